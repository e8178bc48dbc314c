//! In-memory stand-ins for the container runtime, ssh and rsync.
//!
//! Containers live as plain directories under the configured stores
//! (`<store>/<name>/rootfs`), so everything the library writes into a
//! container filesystem can be inspected directly by the test.

use std::collections::{BTreeMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cibox::backend::{Backends, ContainerBackend, RemoteExecutor, TreeSync};
use cibox::util::copy_tree;
use cibox::{
    CiboxError, CiboxOptions, CiboxResult, CiboxRuntime, CloneOptions, ContainerDescriptor,
    RuntimeState, Store, Timeouts,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

// ============================================================================
// CONTAINER BACKEND
// ============================================================================

#[derive(Debug, Clone)]
struct FakeContainer {
    rootfs: PathBuf,
    running: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    /// Keyed by store directory, so coinciding stores share containers.
    stores: BTreeMap<PathBuf, BTreeMap<String, FakeContainer>>,
    destroy_failures: usize,
    fail_prepare: bool,
    fail_start: bool,
    hung_waits: Vec<RuntimeState>,
    prepare_scripts: Vec<String>,
    clones: Vec<(String, CloneOptions)>,
}

/// Container runtime backed by directories and a map.
#[derive(Debug)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    addresses: Mutex<Vec<IpAddr>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            addresses: Mutex::new(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bare container in `store` (a base image, or anything not
    /// managed by cibox).
    pub fn add_container(&self, store: &Path, name: &str) -> PathBuf {
        let rootfs = store.join(name).join("rootfs");
        for dir in ["etc", "tmp", "var/log", "home"] {
            std::fs::create_dir_all(rootfs.join(dir)).unwrap();
        }
        std::fs::write(rootfs.join("etc/hostname"), format!("{name}\n")).unwrap();

        self.state
            .lock()
            .stores
            .entry(store.to_path_buf())
            .or_default()
            .insert(
                name.to_string(),
                FakeContainer {
                    rootfs: rootfs.clone(),
                    running: false,
                },
            );
        rootfs
    }

    /// The next `count` destroy requests are refused.
    pub fn fail_next_destroys(&self, count: usize) {
        self.state.lock().destroy_failures = count;
    }

    /// Prepare scripts exit non-zero.
    pub fn fail_prepare(&self) {
        self.state.lock().fail_prepare = true;
    }

    /// Regular boots are refused.
    pub fn fail_start(&self) {
        self.state.lock().fail_start = true;
    }

    /// Waits for `state` report a timeout, as if the container never got there.
    pub fn hang_on_wait(&self, state: RuntimeState) {
        self.state.lock().hung_waits.push(state);
    }

    /// Addresses reported for running containers.
    pub fn set_addresses(&self, addresses: Vec<IpAddr>) {
        *self.addresses.lock() = addresses;
    }

    /// Contents of every prepare script run so far.
    pub fn prepare_scripts(&self) -> Vec<String> {
        self.state.lock().prepare_scripts.clone()
    }

    /// `(new name, options)` of every clone so far.
    pub fn clones(&self) -> Vec<(String, CloneOptions)> {
        self.state.lock().clones.clone()
    }

    pub fn exists(&self, store: &Path, name: &str) -> bool {
        self.state
            .lock()
            .stores
            .get(store)
            .is_some_and(|s| s.contains_key(name))
    }

    pub fn is_running(&self, store: &Path, name: &str) -> bool {
        self.state
            .lock()
            .stores
            .get(store)
            .and_then(|s| s.get(name))
            .is_some_and(|c| c.running)
    }

    fn with_container<T>(
        &self,
        desc: &ContainerDescriptor,
        f: impl FnOnce(&mut FakeContainer) -> T,
    ) -> CiboxResult<T> {
        let mut state = self.state.lock();
        state
            .stores
            .get_mut(desc.store.path())
            .and_then(|s| s.get_mut(&desc.name))
            .map(f)
            .ok_or_else(|| CiboxError::NotFound(format!("no container {}", desc)))
    }
}

#[async_trait]
impl ContainerBackend for FakeBackend {
    async fn list_names(&self, store: &Store) -> CiboxResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .stores
            .get(store.path())
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn rootfs(&self, name: &str, store: &Store) -> CiboxResult<PathBuf> {
        self.state
            .lock()
            .stores
            .get(store.path())
            .and_then(|s| s.get(name))
            .map(|c| c.rootfs.clone())
            .ok_or_else(|| CiboxError::NotFound(format!("no container {name}")))
    }

    async fn clone_container(
        &self,
        source: &ContainerDescriptor,
        new_name: &str,
        target: &Store,
        options: &CloneOptions,
    ) -> CiboxResult<ContainerDescriptor> {
        if self.exists(target.path(), new_name) {
            return Err(CiboxError::Creation(format!("{new_name} already exists")));
        }

        let rootfs = target.path().join(new_name).join("rootfs");
        copy_tree(&source.rootfs, &rootfs)?;

        let mut state = self.state.lock();
        state.clones.push((new_name.to_string(), options.clone()));
        state
            .stores
            .entry(target.path().to_path_buf())
            .or_default()
            .insert(
                new_name.to_string(),
                FakeContainer {
                    rootfs: rootfs.clone(),
                    running: false,
                },
            );
        Ok(ContainerDescriptor::new(new_name, target.clone(), rootfs))
    }

    async fn start(
        &self,
        container: &ContainerDescriptor,
        init_script: Option<&Path>,
    ) -> CiboxResult<bool> {
        match init_script {
            Some(script) => {
                let host = container
                    .rootfs
                    .join(script.strip_prefix("/").unwrap_or(script));
                let body = std::fs::read_to_string(&host)?;
                let mut state = self.state.lock();
                state.prepare_scripts.push(body);
                Ok(!state.fail_prepare)
            }
            None => {
                if self.state.lock().fail_start {
                    return Ok(false);
                }
                self.with_container(container, |c| c.running = true)?;
                Ok(true)
            }
        }
    }

    async fn stop(&self, container: &ContainerDescriptor) -> CiboxResult<bool> {
        self.with_container(container, |c| c.running = false)?;
        Ok(true)
    }

    async fn destroy(&self, container: &ContainerDescriptor) -> CiboxResult<bool> {
        let removed = {
            let mut state = self.state.lock();
            if state.destroy_failures > 0 {
                state.destroy_failures -= 1;
                return Ok(false);
            }
            state
                .stores
                .get_mut(container.store.path())
                .and_then(|s| s.remove(&container.name))
        };

        match removed {
            Some(c) => {
                if let Some(dir) = c.rootfs.parent() {
                    std::fs::remove_dir_all(dir)?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn state(&self, container: &ContainerDescriptor) -> CiboxResult<RuntimeState> {
        self.with_container(container, |c| {
            if c.running {
                RuntimeState::Running
            } else {
                RuntimeState::Stopped
            }
        })
    }

    async fn wait_for_state(
        &self,
        container: &ContainerDescriptor,
        state: RuntimeState,
        _timeout: Duration,
    ) -> CiboxResult<bool> {
        if self.state.lock().hung_waits.contains(&state) {
            return Ok(false);
        }
        Ok(self.state(container).await? == state)
    }

    async fn network_addresses(
        &self,
        container: &ContainerDescriptor,
    ) -> CiboxResult<Vec<IpAddr>> {
        if self.with_container(container, |c| c.running)? {
            Ok(self.addresses.lock().clone())
        } else {
            Ok(Vec::new())
        }
    }
}

// ============================================================================
// REMOTE EXECUTOR
// ============================================================================

/// One `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub address: IpAddr,
    pub identity: PathBuf,
    pub user: String,
    pub script: PathBuf,
}

/// Executor returning scripted exit codes (0 once the script runs out).
#[derive(Debug, Default)]
pub struct FakeExecutor {
    exit_codes: Mutex<VecDeque<i32>>,
    executions: Mutex<Vec<Execution>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_exit_code(&self, status: i32) {
        self.exit_codes.lock().push_back(status);
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.executions.lock().clone()
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn execute(
        &self,
        address: IpAddr,
        identity: &Path,
        user: &str,
        script: &Path,
    ) -> CiboxResult<i32> {
        self.executions.lock().push(Execution {
            address,
            identity: identity.to_path_buf(),
            user: user.to_string(),
            script: script.to_path_buf(),
        });
        Ok(self.exit_codes.lock().pop_front().unwrap_or(0))
    }
}

// ============================================================================
// TREE SYNC
// ============================================================================

/// Local copy following rsync's trailing-slash rule.
#[derive(Debug, Default)]
pub struct FakeTreeSync;

#[async_trait]
impl TreeSync for FakeTreeSync {
    async fn sync(&self, source: &str, dest: &Path) -> CiboxResult<()> {
        let src = Path::new(source);
        if source.ends_with('/') {
            return copy_tree(src, dest);
        }
        let name = src
            .file_name()
            .ok_or_else(|| CiboxError::Operation(format!("cannot sync {source}")))?;
        copy_tree(src, &dest.join(name))
    }
}

// ============================================================================
// SSH BANNER
// ============================================================================

/// Accept connections on an ephemeral localhost port and greet each one
/// with an ssh identification string. Returns the port.
pub async fn spawn_banner_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.write_all(b"SSH-2.0-cibox-test\r\n").await;
        }
    });
    port
}

// ============================================================================
// TEST ENVIRONMENT
// ============================================================================

/// Scratch stores, a key pair, fake adapters and a banner server.
pub struct TestEnv {
    pub options: CiboxOptions,
    pub backend: Arc<FakeBackend>,
    pub executor: Arc<FakeExecutor>,
    pub sync: Arc<FakeTreeSync>,
    pub dir: TempDir,
}

impl TestEnv {
    /// Separate base, runtime and archive stores.
    pub async fn new() -> Self {
        Self::build(false).await
    }

    /// Runtime and archive share one directory.
    pub async fn with_coinciding_stores() -> Self {
        Self::build(true).await
    }

    async fn build(coincide: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        let keys = root.join("keys");
        std::fs::create_dir_all(&keys).unwrap();
        std::fs::write(keys.join("id_cibox"), "private\n").unwrap();
        std::fs::write(keys.join("id_cibox.pub"), "ssh-ed25519 AAAA test@cibox\n").unwrap();

        let runtime_store = root.join("runtime");
        let archive_store = if coincide {
            runtime_store.clone()
        } else {
            root.join("archive")
        };

        let options = CiboxOptions {
            base_store: root.join("base"),
            runtime_store,
            archive_store,
            results_dir: root.join("results"),
            ssh_key: keys.join("id_cibox"),
            ssh_pub_key: keys.join("id_cibox.pub"),
            ssh_port: spawn_banner_server().await,
            timeouts: Timeouts::fast(),
            ..Default::default()
        };

        Self {
            options,
            backend: Arc::new(FakeBackend::new()),
            executor: Arc::new(FakeExecutor::new()),
            sync: Arc::new(FakeTreeSync),
            dir,
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            containers: self.backend.clone(),
            executor: self.executor.clone(),
            sync: self.sync.clone(),
        }
    }

    pub fn runtime(&self) -> CiboxRuntime {
        CiboxRuntime::with_backends(self.options.clone(), self.backends()).unwrap()
    }

    /// Add a base image to the base store.
    pub fn add_base(&self, name: &str) -> PathBuf {
        self.backend.add_container(&self.options.base_store, name)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}
