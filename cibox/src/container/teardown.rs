//! Archive-or-destroy teardown around a job.
//!
//! Every job container ends in exactly one of two places: the archive
//! store or nowhere. [`TeardownGuard`] owns the container for the duration
//! of the job and performs that final step once, whichever way the job
//! ends. The decision depends on the command's exit status, which is only
//! known late, so the job body reports it through an [`OutcomeCell`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cibox_shared::errors::{CiboxError, CiboxResult};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use parking_lot::Mutex;

use super::{LifecyclePhase, RuntimeContainer};
use crate::runtime::types::StoreKind;

/// When to keep a container instead of destroying it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownPolicy {
    /// Always archive.
    pub archive: bool,
    /// Archive when the command failed or never produced a status.
    pub archive_on_fail: bool,
}

impl TeardownPolicy {
    /// `None` means the job errored or panicked before the command produced
    /// a status; `archive_on_fail` treats that as a failure and keeps the
    /// container.
    pub fn should_archive(&self, status: Option<i32>) -> bool {
        self.archive || (self.archive_on_fail && status != Some(0))
    }
}

/// Exit status of the job command, filled in by the job body.
#[derive(Debug, Clone, Default)]
pub struct OutcomeCell(Arc<Mutex<Option<i32>>>);

impl OutcomeCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, status: i32) {
        *self.0.lock() = Some(status);
    }

    pub fn get(&self) -> Option<i32> {
        *self.0.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownAction {
    Archived,
    Destroyed,
}

/// What teardown did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub name: String,
    pub action: TeardownAction,
    /// Store the container ended up in (meaningful when archived).
    pub store: StoreKind,
    pub exit_status: Option<i32>,
}

impl TeardownReport {
    pub fn archived(&self) -> bool {
        self.action == TeardownAction::Archived
    }
}

// ============================================================================
// GUARD
// ============================================================================

/// Owns a job container and tears it down exactly once.
///
/// Call [`finish`](Self::finish) on every normal path. If the guard is
/// dropped unfinished (early return, panic) it tears down synchronously on
/// a helper thread before the drop completes.
pub struct TeardownGuard {
    container: RuntimeContainer,
    policy: TeardownPolicy,
    outcome: OutcomeCell,
    finished: bool,
}

impl TeardownGuard {
    pub fn new(container: RuntimeContainer, policy: TeardownPolicy) -> Self {
        Self {
            container,
            policy,
            outcome: OutcomeCell::new(),
            finished: false,
        }
    }

    /// Shared handle to the cell deciding the teardown.
    pub fn outcome(&self) -> OutcomeCell {
        self.outcome.clone()
    }

    pub fn container(&mut self) -> &mut RuntimeContainer {
        &mut self.container
    }

    pub fn policy(&self) -> TeardownPolicy {
        self.policy
    }

    /// Archive or destroy according to the policy and the recorded outcome.
    pub async fn finish(mut self) -> CiboxResult<TeardownReport> {
        self.finished = true;
        let status = self.outcome.get();
        teardown(&mut self.container, self.policy, status).await
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        tracing::warn!(
            container = %self.container.descriptor(),
            "job ended without teardown, tearing down now"
        );

        let policy = self.policy;
        let status = self.outcome.get();
        let container = &mut self.container;

        // A fresh runtime on a scoped thread: we may be inside (or unwinding
        // out of) a runtime that cannot be blocked on.
        let joined = std::thread::scope(|scope| {
            scope
                .spawn(move || -> CiboxResult<TeardownReport> {
                    let rt = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .map_err(|e| CiboxError::Internal(format!("teardown runtime: {e}")))?;
                    rt.block_on(teardown(container, policy, status))
                })
                .join()
        });

        match joined {
            Ok(Ok(report)) => {
                tracing::info!(container = %report.name, action = ?report.action, "teardown on drop")
            }
            Ok(Err(e)) => tracing::error!(error = %e, "teardown on drop failed"),
            Err(_) => tracing::error!("teardown on drop panicked"),
        }
    }
}

async fn teardown(
    container: &mut RuntimeContainer,
    policy: TeardownPolicy,
    status: Option<i32>,
) -> CiboxResult<TeardownReport> {
    let archive = policy.should_archive(status);
    tracing::debug!(container = %container.descriptor(), ?status, archive, "teardown");

    let action = match (archive, container.phase()) {
        (_, LifecyclePhase::Destroyed) => TeardownAction::Destroyed,
        (true, LifecyclePhase::Archived) => TeardownAction::Archived,
        (true, _) => {
            container.archive().await?;
            TeardownAction::Archived
        }
        (false, _) => {
            container.destroy().await?;
            TeardownAction::Destroyed
        }
    };

    Ok(TeardownReport {
        name: container.name().to_string(),
        action,
        store: container.store_kind(),
        exit_status: status,
    })
}

// ============================================================================
// SCOPED RUN
// ============================================================================

/// Result of [`run_guarded`]: the job body's result and the teardown's.
#[derive(Debug)]
pub struct GuardedRun<T> {
    pub result: CiboxResult<T>,
    pub teardown: CiboxResult<TeardownReport>,
}

/// Run `body` against `container`, then archive or destroy it.
///
/// Teardown happens after success, after an error, and after a panic in
/// `body`; a panic is reported as an `Internal` error. `body` receives the
/// outcome cell and should set the command's exit status as soon as it is
/// known.
///
/// ```no_run
/// # use cibox::{RuntimeContainer, TeardownPolicy, run_guarded};
/// # async fn job(container: RuntimeContainer) {
/// let run = run_guarded(container, TeardownPolicy::default(), |c, outcome| {
///     Box::pin(async move {
///         c.start().await?;
///         let status = c.run_command("make test").await?;
///         outcome.set(status);
///         c.stop().await?;
///         Ok(status)
///     })
/// })
/// .await;
/// # }
/// ```
pub async fn run_guarded<T, F>(
    container: RuntimeContainer,
    policy: TeardownPolicy,
    body: F,
) -> GuardedRun<T>
where
    F: for<'a> FnOnce(&'a mut RuntimeContainer, OutcomeCell) -> LocalBoxFuture<'a, CiboxResult<T>>,
{
    let mut guard = TeardownGuard::new(container, policy);
    let outcome = guard.outcome();

    let result = match AssertUnwindSafe(body(guard.container(), outcome))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(CiboxError::Internal(format!(
            "job panicked: {}",
            panic_message(panic.as_ref())
        ))),
    };

    let teardown = guard.finish().await;
    GuardedRun { result, teardown }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
