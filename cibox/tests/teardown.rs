//! Integration tests for the archive-or-destroy guard around a job.

use cibox::{
    CiboxError, CreateOptions, RuntimeContainer, StoreKind, TeardownGuard, TeardownPolicy,
    run_guarded,
};
use cibox_test_utils::TestEnv;

async fn job(env: &TestEnv, name: &str) -> RuntimeContainer {
    env.runtime()
        .create("ubuntu-base", Some(name), CreateOptions::default())
        .await
        .unwrap()
}

async fn env_with_base() -> TestEnv {
    let env = TestEnv::new().await;
    env.add_base("ubuntu-base");
    env
}

const ARCHIVE_ON_FAIL: TeardownPolicy = TeardownPolicy {
    archive: false,
    archive_on_fail: true,
};

#[tokio::test]
async fn successful_job_is_destroyed() {
    let env = env_with_base().await;
    let runtime = env.runtime();
    let container = job(&env, "job-1").await;

    let run = run_guarded(container, ARCHIVE_ON_FAIL, |c, outcome| {
        Box::pin(async move {
            c.start().await?;
            let status = c.run_command("echo hello").await?;
            outcome.set(status);
            c.stop().await?;
            Ok(status)
        })
    })
    .await;

    assert_eq!(run.result.unwrap(), 0);
    let report = run.teardown.unwrap();
    assert!(!report.archived());
    assert_eq!(report.exit_status, Some(0));
    assert!(runtime.list_names(StoreKind::Runtime, None).await.unwrap().is_empty());
    assert!(runtime.list_names(StoreKind::Archive, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn failing_job_is_archived_with_archive_on_fail() {
    let env = env_with_base().await;
    env.executor.push_exit_code(7);
    let runtime = env.runtime();
    let container = job(&env, "job-1").await;

    let run = run_guarded(container, ARCHIVE_ON_FAIL, |c, outcome| {
        Box::pin(async move {
            c.start().await?;
            let status = c.run_command("exit 7").await?;
            outcome.set(status);
            c.record_exit_code(status)?;
            c.stop().await?;
            Ok(status)
        })
    })
    .await;

    assert_eq!(run.result.unwrap(), 7);
    let report = run.teardown.unwrap();
    assert!(report.archived());
    assert_eq!(report.store, StoreKind::Archive);

    let archived = runtime.list_summaries(StoreKind::Archive, None).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].name, "job-1");
    assert_eq!(archived[0].meta.exit_code, Some(7));
}

#[tokio::test]
async fn archive_policy_keeps_successful_jobs() {
    let env = env_with_base().await;
    let runtime = env.runtime();
    let container = job(&env, "job-1").await;
    let policy = TeardownPolicy {
        archive: true,
        archive_on_fail: false,
    };

    let run = run_guarded(container, policy, |_, outcome| {
        Box::pin(async move {
            outcome.set(0);
            Ok(())
        })
    })
    .await;

    assert!(run.teardown.unwrap().archived());
    assert_eq!(
        runtime.list_names(StoreKind::Archive, None).await.unwrap(),
        vec!["job-1"]
    );
}

#[tokio::test]
async fn setup_error_still_tears_down() {
    let env = env_with_base().await;
    env.backend.fail_start();
    let runtime = env.runtime();
    let container = job(&env, "job-1").await;

    let run = run_guarded(container, TeardownPolicy::default(), |c, _| {
        Box::pin(async move { c.start().await })
    })
    .await;

    assert!(matches!(run.result, Err(CiboxError::Operation(_))));
    assert!(!run.teardown.unwrap().archived());
    assert!(runtime.list_names(StoreKind::Runtime, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn setup_error_counts_as_failure_for_archive_on_fail() {
    let env = env_with_base().await;
    env.backend.fail_start();
    let container = job(&env, "job-1").await;

    let run = run_guarded(container, ARCHIVE_ON_FAIL, |c, _| {
        Box::pin(async move { c.start().await })
    })
    .await;

    assert!(run.result.is_err());
    let report = run.teardown.unwrap();
    assert!(report.archived());
    assert_eq!(report.exit_status, None);
}

#[tokio::test]
async fn panic_in_job_still_tears_down() {
    let env = env_with_base().await;
    let runtime = env.runtime();
    let container = job(&env, "job-1").await;

    let run = run_guarded(container, TeardownPolicy::default(), |_, _| {
        Box::pin(async move {
            if true {
                panic!("job body exploded");
            }
            Ok(())
        })
    })
    .await;

    match run.result {
        Err(CiboxError::Internal(msg)) => assert!(msg.contains("job body exploded")),
        other => panic!("expected Internal error, got {other:?}"),
    }
    assert!(run.teardown.is_ok());
    assert!(runtime.list_names(StoreKind::Runtime, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn dropped_guard_tears_down() {
    let env = env_with_base().await;
    let runtime = env.runtime();

    {
        let mut guard = TeardownGuard::new(job(&env, "job-1").await, ARCHIVE_ON_FAIL);
        guard.container().start().await.unwrap();
        guard.outcome().set(1);
    }

    assert!(runtime.list_names(StoreKind::Runtime, None).await.unwrap().is_empty());
    assert_eq!(
        runtime.list_names(StoreKind::Archive, None).await.unwrap(),
        vec!["job-1"]
    );
}

#[tokio::test]
async fn teardown_after_explicit_destroy_is_a_no_op() {
    let env = env_with_base().await;
    let container = job(&env, "job-1").await;

    let run = run_guarded(container, TeardownPolicy::default(), |c, _| {
        Box::pin(async move { c.destroy().await })
    })
    .await;

    run.result.unwrap();
    assert!(!run.teardown.unwrap().archived());
}
