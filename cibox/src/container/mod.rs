//! RuntimeContainer - lifecycle of one managed container
//!
//! ## Architecture
//!
//! This module is organized into focused submodules:
//! - `state`: phases and the transition table
//! - `prepare`: the one-shot root script run on first boot
//! - `lifecycle`: start/stop/archive/destroy
//! - `exec`: running the job command over the remote executor
//! - `workspace`: syncing sources in and copying results out
//! - `metadata`: the JSON record inside the container filesystem
//! - `teardown`: the archive-or-destroy guard around a job

mod exec;
mod lifecycle;
pub mod metadata;
mod prepare;
mod state;
pub mod teardown;
mod workspace;

pub use exec::render_command_script;
pub use lifecycle::wait_for_ssh_banner;
pub use metadata::{ContainerMeta, MetaPatch, MetadataStore};
pub use prepare::{PrepareQueue, default_commands};
pub use state::{LifecyclePhase, PhaseTracker, RuntimeState};
pub use teardown::{OutcomeCell, TeardownGuard, TeardownPolicy, TeardownReport, run_guarded};
pub use workspace::{Caller, check_sync_source};

use std::net::IpAddr;
use std::path::PathBuf;

use chrono::Utc;
use cibox_shared::errors::{CiboxError, CiboxResult};
use cibox_shared::layout::{GuestLayout, RootfsLayout};

use crate::runtime::RuntimeInner;
use crate::runtime::types::{ContainerDescriptor, StoreKind};
use crate::util::append_to_file;

/// Handle on one managed container.
///
/// Plays the role `std::process::Child` plays for a process: it is how the
/// caller drives the container after [`CiboxRuntime::create`] or
/// [`CiboxRuntime::open`], and it follows the container into the archive
/// store.
///
/// Operations are sequential and take `&mut self`.
///
/// [`CiboxRuntime::create`]: crate::CiboxRuntime::create
/// [`CiboxRuntime::open`]: crate::CiboxRuntime::open
pub struct RuntimeContainer {
    descriptor: ContainerDescriptor,
    runtime: RuntimeInner,
    layout: RootfsLayout,
    metadata: MetadataStore,
    phase: PhaseTracker,
    prepare: PrepareQueue,
    addresses: Vec<IpAddr>,
}

impl RuntimeContainer {
    pub(crate) fn new(
        descriptor: ContainerDescriptor,
        runtime: RuntimeInner,
        phase: LifecyclePhase,
    ) -> Self {
        let layout = RootfsLayout::new(
            descriptor.rootfs.clone(),
            GuestLayout::new(runtime.options.user.clone()),
        );
        let metadata = MetadataStore::new(layout.meta_file());
        Self {
            descriptor,
            runtime,
            layout,
            metadata,
            phase: PhaseTracker::new(phase),
            prepare: PrepareQueue::new(),
            addresses: Vec::new(),
        }
    }

    /// Point the handle at a new copy of the container (after archive).
    fn rebind(&mut self, descriptor: ContainerDescriptor) {
        self.layout = RootfsLayout::new(descriptor.rootfs.clone(), self.layout.guest().clone());
        self.metadata = MetadataStore::new(self.layout.meta_file());
        self.descriptor = descriptor;
    }

    /// Lay out the filesystem of a fresh clone and queue the default
    /// prepare commands.
    pub(crate) fn initialize(&mut self, base: &str, tags: &[String]) -> CiboxResult<()> {
        self.layout.prepare().map_err(|e| {
            CiboxError::Storage(format!(
                "Failed to create the cibox layout in {}: {}",
                self.layout.root().display(),
                e
            ))
        })?;

        let runtime = self.runtime.clone();
        let options = &runtime.options;
        let key = std::fs::read(&options.ssh_pub_key).map_err(|e| {
            CiboxError::Config(format!(
                "Cannot read ssh public key {}: {}",
                options.ssh_pub_key.display(),
                e
            ))
        })?;
        std::fs::write(self.layout.authorized_keys(), key)?;

        for command in default_commands(&options.user, options.user_uid) {
            prepare::queue(self, command)?;
        }

        self.metadata.merge(&MetaPatch {
            base: Some(base.to_string()),
            created: Some(Utc::now()),
            ..Default::default()
        })?;
        if !tags.is_empty() {
            self.metadata.add_tags(tags.iter().cloned())?;
        }
        Ok(())
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ContainerDescriptor {
        &self.descriptor
    }

    pub fn store_kind(&self) -> StoreKind {
        self.descriptor.store.kind
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase.phase()
    }

    /// Host view of the container filesystem.
    pub fn rootfs(&self) -> &RootfsLayout {
        &self.layout
    }

    /// Addresses found by the last `start()`.
    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    pub fn prepare_commands(&self) -> &[String] {
        self.prepare.commands()
    }

    /// Live state as reported by the container runtime.
    pub async fn state(&self) -> CiboxResult<RuntimeState> {
        self.runtime
            .backends
            .containers
            .state(&self.descriptor)
            .await
    }

    // ========================================================================
    // METADATA
    // ========================================================================

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn meta(&self) -> CiboxResult<ContainerMeta> {
        self.metadata.read()
    }

    pub fn add_tags<I, S>(&self, tags: I) -> CiboxResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.add_tags(tags)
    }

    /// Record the command about to run.
    pub fn record_command(&self, command: &str) -> CiboxResult<()> {
        self.metadata.merge(&MetaPatch {
            command: Some(command.to_string()),
            ..Default::default()
        })
    }

    pub fn record_exit_code(&self, status: i32) -> CiboxResult<()> {
        self.metadata.merge(&MetaPatch {
            exit_code: Some(status),
            ..Default::default()
        })
    }

    // ========================================================================
    // PREPARATION (before the first boot)
    // ========================================================================

    /// Queue a root shell statement for the one-shot prepare script.
    ///
    /// `InvalidState` once the container has been started.
    pub fn add_prepare_command(&mut self, command: impl Into<String>) -> CiboxResult<()> {
        prepare::queue(self, command.into())
    }

    /// Grant the job user password-less sudo.
    ///
    /// Both the group change and the sudoers entry run in the prepare
    /// script; `InvalidState` once the container has been started.
    pub fn enable_sudo(&mut self) -> CiboxResult<()> {
        let user = self.runtime.options.user.clone();
        prepare::queue(self, prepare::sudo_group_command(&user))?;
        prepare::queue(self, prepare::sudoers_command(&user))
    }

    /// Append `KEY="value"` lines to the guest `/etc/environment`.
    ///
    /// The lines are staged under `/cibox` and appended by the prepare
    /// script; `InvalidState` once the container has been started.
    pub fn write_env(&mut self, vars: &[(String, String)]) -> CiboxResult<()> {
        let mut lines = String::new();
        for (key, value) in vars {
            lines.push_str(&format_env_line(key, value)?);
        }

        let append = prepare::environment_command();
        if !self.prepare.commands().contains(&append) {
            prepare::queue(self, append)?;
        }

        let staging = self
            .layout
            .host_path(cibox_shared::layout::paths::ENVIRONMENT_STAGING);
        tracing::debug!(container = %self.descriptor, count = vars.len(), "stage environment");
        append_to_file(&staging, &lines)
    }

    /// Copy a host tree into the guest workspace.
    ///
    /// A trailing slash on `source` copies its contents; without one the
    /// directory itself lands in the workspace. Under sudo, `source` must
    /// resolve inside the invoking user's home.
    pub async fn sync_workspace(&self, source: &str) -> CiboxResult<()> {
        let caller = Caller::detect()?;
        self.sync_workspace_as(source, &caller).await
    }

    /// [`sync_workspace`](Self::sync_workspace) with an explicit caller.
    pub async fn sync_workspace_as(&self, source: &str, caller: &Caller) -> CiboxResult<()> {
        workspace::sync(self, source, caller).await
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Boot the container and wait until it accepts ssh connections.
    ///
    /// The first start of a never-booted container runs the prepare script.
    pub async fn start(&mut self) -> CiboxResult<()> {
        lifecycle::start(self).await
    }

    /// Run `command` as the job user in the workspace; returns its exit status.
    pub async fn run_command(&mut self, command: &str) -> CiboxResult<i32> {
        exec::run_command(self, command).await
    }

    /// Boot an archived container, run `command` (typically a shell) and
    /// stop it again. Returns the command's exit status.
    pub async fn inspect(&mut self, command: &str) -> CiboxResult<i32> {
        lifecycle::inspect(self, command).await
    }

    /// Stop the container. No-op when it is already stopped.
    pub async fn stop(&mut self) -> CiboxResult<()> {
        lifecycle::stop(self).await
    }

    /// Stop and move the container into the archive store.
    pub async fn archive(&mut self) -> CiboxResult<()> {
        lifecycle::archive(self).await
    }

    /// Stop and remove the container, retrying once on failure.
    pub async fn destroy(&mut self) -> CiboxResult<()> {
        lifecycle::destroy(self).await
    }

    /// Copy the guest results directory to `<results_dir>/<name>` on the host.
    pub async fn copy_results(&self) -> CiboxResult<Option<PathBuf>> {
        workspace::copy_results(self).await
    }
}

impl std::fmt::Debug for RuntimeContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContainer")
            .field("descriptor", &self.descriptor)
            .field("phase", &self.phase.phase())
            .field("prepare", &self.prepare)
            .finish()
    }
}

/// `KEY="value"` with the value's quotes and backslashes escaped.
pub fn format_env_line(key: &str, value: &str) -> CiboxResult<String> {
    let valid_key = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_key {
        return Err(CiboxError::Config(format!(
            "invalid environment variable name: {key:?}"
        )));
    }
    if value.contains('\n') {
        return Err(CiboxError::Config(format!(
            "environment variable {key} contains a newline"
        )));
    }

    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    Ok(format!("{key}=\"{escaped}\"\n"))
}

// ============================================================================
// THREAD SAFETY ASSERTIONS
// ============================================================================

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<RuntimeContainer>;
};
