//! External collaborators of the lifecycle manager.
//!
//! Each one is a trait so the manager can run against in-memory fakes:
//! - [`ContainerBackend`]: clone/start/stop/destroy/query containers in a store
//! - [`RemoteExecutor`]: run a script inside a running container
//! - [`TreeSync`]: copy a host tree into a container filesystem
//!
//! The production implementations shell out to `lxc-*`, `ssh` and `rsync`.

mod lxc;
mod rsync;
mod ssh;

pub use lxc::LxcBackend;
pub use rsync::RsyncTreeSync;
pub use ssh::{SshExecutor, provision_key_pair};

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cibox_shared::errors::CiboxResult;

use crate::container::RuntimeState;
use crate::runtime::types::{CloneOptions, ContainerDescriptor, Store};

/// Container runtime adapter.
///
/// Boolean results report whether the runtime accepted the request; `Err`
/// is reserved for failing to talk to the runtime at all.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Names of all containers in `store`. A missing store directory is empty.
    async fn list_names(&self, store: &Store) -> CiboxResult<Vec<String>>;

    /// Host path of the container's filesystem root.
    ///
    /// `NotFound` if `name` does not exist in `store`.
    async fn rootfs(&self, name: &str, store: &Store) -> CiboxResult<PathBuf>;

    /// Clone `source` into `target` under `new_name`.
    ///
    /// `Creation` if the runtime refuses.
    async fn clone_container(
        &self,
        source: &ContainerDescriptor,
        new_name: &str,
        target: &Store,
        options: &CloneOptions,
    ) -> CiboxResult<ContainerDescriptor>;

    /// Boot the container.
    ///
    /// With `init_script` (a guest path), run it as init in the foreground
    /// and return whether it exited successfully; the container is stopped
    /// again afterwards.
    async fn start(
        &self,
        container: &ContainerDescriptor,
        init_script: Option<&Path>,
    ) -> CiboxResult<bool>;

    async fn stop(&self, container: &ContainerDescriptor) -> CiboxResult<bool>;

    async fn destroy(&self, container: &ContainerDescriptor) -> CiboxResult<bool>;

    async fn state(&self, container: &ContainerDescriptor) -> CiboxResult<RuntimeState>;

    /// Block until the container reaches `state`; `false` on timeout.
    async fn wait_for_state(
        &self,
        container: &ContainerDescriptor,
        state: RuntimeState,
        timeout: Duration,
    ) -> CiboxResult<bool>;

    /// Addresses currently assigned to the container, possibly none.
    async fn network_addresses(&self, container: &ContainerDescriptor)
    -> CiboxResult<Vec<IpAddr>>;

    /// Build a descriptor for an existing container.
    async fn open(&self, name: &str, store: &Store) -> CiboxResult<ContainerDescriptor> {
        let rootfs = self.rootfs(name, store).await?;
        Ok(ContainerDescriptor::new(name, store.clone(), rootfs))
    }
}

/// Remote execution adapter.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `script` (a guest path) as `user` at `address`, authenticating
    /// with `identity`. Returns the script's exit status.
    async fn execute(
        &self,
        address: IpAddr,
        identity: &Path,
        user: &str,
        script: &Path,
    ) -> CiboxResult<i32>;
}

/// Tree synchronization adapter.
#[async_trait]
pub trait TreeSync: Send + Sync {
    /// Copy `source` into `dest`.
    ///
    /// `source` is passed through verbatim: with a trailing slash its
    /// contents land in `dest`, without one `dest/<basename>` is created.
    async fn sync(&self, source: &str, dest: &Path) -> CiboxResult<()>;
}

/// The three adapters a runtime drives.
#[derive(Clone)]
pub struct Backends {
    pub containers: Arc<dyn ContainerBackend>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub sync: Arc<dyn TreeSync>,
}

impl Backends {
    /// `lxc-*` + `ssh` + `rsync`.
    pub fn system(ssh_port: u16) -> Self {
        Self {
            containers: Arc::new(LxcBackend::new()),
            executor: Arc::new(SshExecutor::new(ssh_port)),
            sync: Arc::new(RsyncTreeSync::new()),
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}
