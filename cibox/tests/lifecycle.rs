//! Integration tests for the container lifecycle (clone, prepare, start,
//! run, stop, destroy) against the in-memory backend.

use cibox::{
    CiboxError, CiboxRuntime, CloneOptions, CreateOptions, LifecyclePhase, RuntimeContainer,
    RuntimeState, StoreKind,
};
use cibox_test_utils::TestEnv;

// ============================================================================
// TEST FIXTURES
// ============================================================================

async fn env_with_base() -> TestEnv {
    let env = TestEnv::new().await;
    env.add_base("ubuntu-base");
    env
}

async fn create(env: &TestEnv, name: &str) -> RuntimeContainer {
    env.runtime()
        .create("ubuntu-base", Some(name), CreateOptions::default())
        .await
        .unwrap()
}

// ============================================================================
// CLONE
// ============================================================================

#[tokio::test]
async fn clone_then_list_then_destroy() {
    let env = env_with_base().await;
    let runtime = env.runtime();

    let mut container = create(&env, "job-1").await;
    assert_eq!(
        runtime.list_names(StoreKind::Runtime, None).await.unwrap(),
        vec!["job-1"]
    );

    container.destroy().await.unwrap();
    assert_eq!(container.phase(), LifecyclePhase::Destroyed);
    assert!(runtime.list_names(StoreKind::Runtime, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn clone_lays_out_the_guest_filesystem() {
    let env = env_with_base().await;
    let container = create(&env, "job-1").await;
    let rootfs = container.rootfs();

    assert!(rootfs.is_managed());
    assert!(rootfs.workspace_dir().is_dir());
    assert!(rootfs.results_dir().is_dir());
    assert_eq!(
        std::fs::read_to_string(rootfs.authorized_keys()).unwrap(),
        "ssh-ed25519 AAAA test@cibox\n"
    );

    let meta = container.meta().unwrap();
    assert_eq!(meta.base.as_deref(), Some("ubuntu-base"));
    assert!(meta.created.is_some());
    assert_eq!(meta.tags, vec!["default"]);
    assert_eq!(container.phase(), LifecyclePhase::Prepared);
}

#[tokio::test]
async fn clone_generates_a_name_from_the_base() {
    let env = env_with_base().await;
    let container = env
        .runtime()
        .create("ubuntu-base", None, CreateOptions::default())
        .await
        .unwrap();

    assert!(container.name().starts_with("ubuntu-base-runtime-"));
}

#[tokio::test]
async fn clone_passes_clone_options_through() {
    let env = env_with_base().await;
    let options = CreateOptions {
        clone: CloneOptions {
            snapshot: true,
            backing_store: Some("overlayfs".into()),
        },
        ..Default::default()
    };
    env.runtime()
        .create("ubuntu-base", Some("job-1"), options)
        .await
        .unwrap();

    let clones = env.backend.clones();
    assert_eq!(clones.len(), 1);
    assert!(clones[0].1.snapshot);
    assert_eq!(clones[0].1.backing_store.as_deref(), Some("overlayfs"));
}

#[tokio::test]
async fn clone_of_missing_base_fails() {
    let env = TestEnv::new().await;
    let err = env
        .runtime()
        .create("nope", Some("job-1"), CreateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CiboxError::Creation(_)));
}

#[tokio::test]
async fn clone_onto_existing_name_fails() {
    let env = env_with_base().await;
    create(&env, "job-1").await;

    let err = env
        .runtime()
        .create("ubuntu-base", Some("job-1"), CreateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CiboxError::Creation(_)));
}

#[tokio::test]
async fn clone_onto_archived_name_fails() {
    let env = env_with_base().await;
    create(&env, "job-1").await.archive().await.unwrap();

    let err = env
        .runtime()
        .create("ubuntu-base", Some("job-1"), CreateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CiboxError::Creation(_)));
}

#[tokio::test]
async fn clone_rejects_path_like_names() {
    let env = env_with_base().await;
    let err = env
        .runtime()
        .create("ubuntu-base", Some("../escape"), CreateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CiboxError::Creation(_)));
}

// ============================================================================
// PREPARE
// ============================================================================

#[tokio::test]
async fn prepare_runs_exactly_once_across_restarts() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;
    container.add_prepare_command("apt-get install -y make").unwrap();

    container.start().await.unwrap();
    container.stop().await.unwrap();
    container.start().await.unwrap();
    container.stop().await.unwrap();

    let scripts = env.backend.prepare_scripts();
    assert_eq!(scripts.len(), 1);
    assert!(scripts[0].starts_with("#!/bin/sh\n"));
    assert!(scripts[0].contains("set -eux\n"));
    assert!(scripts[0].contains("adduser --system --uid 555"));
    assert!(scripts[0].ends_with("apt-get install -y make\n"));
}

#[tokio::test]
async fn queueing_after_first_boot_is_rejected() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;
    container.start().await.unwrap();

    let err = container.add_prepare_command("true").unwrap_err();
    assert!(matches!(err, CiboxError::InvalidState(_)));

    container.stop().await.unwrap();
    let err = container.add_prepare_command("true").unwrap_err();
    assert!(matches!(err, CiboxError::InvalidState(_)));
}

#[tokio::test]
async fn failed_prepare_names_the_log() {
    let env = env_with_base().await;
    env.backend.fail_prepare();
    let mut container = create(&env, "job-1").await;

    let err = container.start().await.unwrap_err();
    assert!(matches!(err, CiboxError::Operation(_)));
    assert!(err.to_string().contains("/var/log/cibox-prepare.log"));
}

#[tokio::test]
async fn enable_sudo_is_done_by_the_prepare_script() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;
    container.enable_sudo().unwrap();

    let commands = container.prepare_commands().to_vec();
    assert!(commands.contains(&"usermod -a -G sudo cibox".to_string()));
    assert!(commands.contains(&"echo '%cibox ALL=(ALL) NOPASSWD: ALL' >> /etc/sudoers".to_string()));

    container.start().await.unwrap();
    let scripts = env.backend.prepare_scripts();
    assert!(scripts[0].contains(">> /etc/sudoers\n"));
}

#[tokio::test]
async fn write_env_stages_quoted_lines() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;

    container
        .write_env(&[("CI".to_string(), "true".to_string())])
        .unwrap();
    container
        .write_env(&[("GREETING".to_string(), "say \"hi\"".to_string())])
        .unwrap();

    let staged = container.rootfs().host_path("/cibox/environment");
    assert_eq!(
        std::fs::read_to_string(staged).unwrap(),
        "CI=\"true\"\nGREETING=\"say \\\"hi\\\"\"\n"
    );
    let appends = container
        .prepare_commands()
        .iter()
        .filter(|c| c.as_str() == "cat /cibox/environment >> /etc/environment")
        .count();
    assert_eq!(appends, 1);
}

/// On a copy-on-write clone the rootfs is an upper layer without the base's
/// `/etc` files; writing them from the host would shadow the base copies.
#[tokio::test]
async fn guest_config_files_are_not_written_from_the_host() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;
    let etc = container.rootfs().host_path("/etc");
    let _ = std::fs::remove_dir_all(&etc);

    container.enable_sudo().unwrap();
    container
        .write_env(&[("CI".to_string(), "true".to_string())])
        .unwrap();

    assert!(!etc.join("sudoers").exists());
    assert!(!etc.join("environment").exists());
}

#[tokio::test]
async fn guest_config_cannot_change_after_first_boot() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;
    container.start().await.unwrap();

    assert!(matches!(
        container.enable_sudo(),
        Err(CiboxError::InvalidState(_))
    ));
    assert!(matches!(
        container.write_env(&[("CI".to_string(), "true".to_string())]),
        Err(CiboxError::InvalidState(_))
    ));
}

// ============================================================================
// START / RUN / STOP
// ============================================================================

#[tokio::test]
async fn end_to_end_echo_hello() {
    let env = env_with_base().await;
    let runtime = env.runtime();
    let mut container = create(&env, "job-1").await;

    container.start().await.unwrap();
    assert_eq!(container.phase(), LifecyclePhase::Running);
    assert!(!container.addresses().is_empty());

    let status = container.run_command("echo hello").await.unwrap();
    assert_eq!(status, 0);

    let script = std::fs::read_to_string(container.rootfs().command_script()).unwrap();
    assert_eq!(
        script,
        "#!/bin/sh\nset -eu\ncd /home/cibox/workspace\necho hello\n"
    );

    let executions = env.executor.executions();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].user, "cibox");
    assert_eq!(executions[0].identity, env.options.ssh_key);
    assert_eq!(executions[0].script.to_str(), Some("/cibox/command.sh"));

    container.stop().await.unwrap();
    container.destroy().await.unwrap();
    assert!(
        !runtime
            .list_names(StoreKind::Runtime, None)
            .await
            .unwrap()
            .contains(&"job-1".to_string())
    );
}

#[tokio::test]
async fn run_command_returns_the_exit_status() {
    let env = env_with_base().await;
    env.executor.push_exit_code(7);
    let mut container = create(&env, "job-1").await;
    container.start().await.unwrap();

    assert_eq!(container.run_command("exit 7").await.unwrap(), 7);
}

#[tokio::test]
async fn run_command_requires_a_running_container() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;

    let err = container.run_command("true").await.unwrap_err();
    assert!(matches!(err, CiboxError::InvalidState(_)));
}

#[tokio::test]
async fn start_records_timestamps() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;

    container.start().await.unwrap();
    assert!(container.meta().unwrap().started.is_some());

    container.stop().await.unwrap();
    assert!(container.meta().unwrap().stopped.is_some());
}

#[tokio::test]
async fn refused_boot_is_an_operation_error() {
    let env = env_with_base().await;
    env.backend.fail_start();
    let mut container = create(&env, "job-1").await;

    let err = container.start().await.unwrap_err();
    assert!(matches!(err, CiboxError::Operation(_)));
}

#[tokio::test]
async fn start_without_address_times_out() {
    let env = env_with_base().await;
    env.backend.set_addresses(Vec::new());
    let mut container = create(&env, "job-1").await;

    let err = container.start().await.unwrap_err();
    assert!(matches!(err, CiboxError::Timeout(_)));
}

#[tokio::test]
async fn boot_that_never_reaches_running_times_out() {
    let env = env_with_base().await;
    env.backend.hang_on_wait(RuntimeState::Running);
    let mut container = create(&env, "job-1").await;

    let err = container.start().await.unwrap_err();
    assert!(matches!(err, CiboxError::Timeout(_)));
    assert!(err.to_string().contains("RUNNING"));
}

#[tokio::test]
async fn missing_ssh_server_times_out_with_hint() {
    let env = env_with_base().await;
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut options = env.options.clone();
    options.ssh_port = closed.local_addr().unwrap().port();
    drop(closed);

    let runtime = CiboxRuntime::with_backends(options, env.backends()).unwrap();
    let mut container = runtime
        .create("ubuntu-base", Some("job-1"), CreateOptions::default())
        .await
        .unwrap();

    let err = container.start().await.unwrap_err();
    assert!(matches!(err, CiboxError::Timeout(_)));
    assert!(err.to_string().contains("is the ssh server installed?"));
}

#[tokio::test]
async fn stop_that_never_completes_times_out() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;
    container.start().await.unwrap();
    env.backend.hang_on_wait(RuntimeState::Stopped);

    let err = container.stop().await.unwrap_err();
    assert!(matches!(err, CiboxError::Timeout(_)));
    assert!(err.to_string().contains("did not stop"));
}

#[tokio::test]
async fn stop_is_idempotent() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;
    container.start().await.unwrap();

    container.stop().await.unwrap();
    container.stop().await.unwrap();
    assert_eq!(container.phase(), LifecyclePhase::Stopped);
}

// ============================================================================
// DESTROY
// ============================================================================

#[tokio::test]
async fn destroy_survives_one_failure() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;
    env.backend.fail_next_destroys(1);

    container.destroy().await.unwrap();
    assert!(!env.backend.exists(&env.options.runtime_store, "job-1"));
}

#[tokio::test]
async fn destroy_gives_up_after_two_failures() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;
    env.backend.fail_next_destroys(2);

    let err = container.destroy().await.unwrap_err();
    assert!(matches!(err, CiboxError::Operation(_)));
    assert!(env.backend.exists(&env.options.runtime_store, "job-1"));
}

#[tokio::test]
async fn destroy_twice_is_invalid() {
    let env = env_with_base().await;
    let mut container = create(&env, "job-1").await;
    container.destroy().await.unwrap();

    let err = container.destroy().await.unwrap_err();
    assert!(matches!(err, CiboxError::InvalidState(_)));
}

// ============================================================================
// OPEN / EVICTION
// ============================================================================

#[tokio::test]
async fn open_finds_a_running_container() {
    let env = env_with_base().await;
    let runtime = env.runtime();
    let mut container = create(&env, "job-1").await;
    container.start().await.unwrap();

    let mut reopened = runtime.open(StoreKind::Runtime, "job-1").await.unwrap();
    assert_eq!(reopened.phase(), LifecyclePhase::Running);
    assert_eq!(reopened.run_command("true").await.unwrap(), 0);
}

#[tokio::test]
async fn open_ignores_unmanaged_containers() {
    let env = env_with_base().await;
    env.backend
        .add_container(&env.options.runtime_store, "someone-elses");

    let err = env
        .runtime()
        .open(StoreKind::Runtime, "someone-elses")
        .await
        .unwrap_err();
    assert!(matches!(err, CiboxError::NotFound(_)));
}

#[tokio::test]
async fn new_job_evicts_runtime_container_with_same_tag() {
    let env = env_with_base().await;
    let runtime = env.runtime();
    let tagged = |tag: &str| CreateOptions {
        tags: vec![tag.to_string()],
        ..Default::default()
    };

    runtime
        .create("ubuntu-base", Some("old"), tagged("pr-42"))
        .await
        .unwrap();
    runtime
        .create("ubuntu-base", Some("other"), tagged("pr-7"))
        .await
        .unwrap();
    runtime
        .create("ubuntu-base", Some("new"), tagged("pr-42"))
        .await
        .unwrap();

    assert_eq!(
        runtime.list_names(StoreKind::Runtime, None).await.unwrap(),
        vec!["new", "other"]
    );
}

#[tokio::test]
async fn eviction_can_be_disabled() {
    let mut env = env_with_base().await;
    env.options.evict_same_tag = false;
    let runtime = env.runtime();
    let tagged = CreateOptions {
        tags: vec!["pr-42".to_string()],
        ..Default::default()
    };

    runtime
        .create("ubuntu-base", Some("old"), tagged.clone())
        .await
        .unwrap();
    runtime
        .create("ubuntu-base", Some("new"), tagged)
        .await
        .unwrap();

    assert_eq!(
        runtime
            .list_names(StoreKind::Runtime, Some("pr-42"))
            .await
            .unwrap(),
        vec!["new", "old"]
    );
}

#[tokio::test]
async fn name_collision_does_not_evict_same_tag_containers() {
    let env = env_with_base().await;
    let runtime = env.runtime();
    let tagged = CreateOptions {
        tags: vec!["pr-42".to_string()],
        ..Default::default()
    };

    runtime
        .create("ubuntu-base", Some("old"), tagged.clone())
        .await
        .unwrap();
    runtime
        .create("ubuntu-base", Some("taken"), CreateOptions::default())
        .await
        .unwrap()
        .archive()
        .await
        .unwrap();

    let err = runtime
        .create("ubuntu-base", Some("taken"), tagged)
        .await
        .unwrap_err();
    assert!(matches!(err, CiboxError::Creation(_)));
    assert_eq!(
        runtime
            .list_names(StoreKind::Runtime, Some("pr-42"))
            .await
            .unwrap(),
        vec!["old"]
    );
}
