//! Configuration for cibox.

use crate::runtime::constants::{defaults, envs as const_envs};
use crate::runtime::types::StoreKind;
use cibox_shared::constants::{ssh, user};
use cibox_shared::errors::{CiboxError, CiboxResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// Bounds for every wait performed by the lifecycle manager.
///
/// All values are milliseconds in the config file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    /// STOPPED -> RUNNING after `lxc-start`.
    #[serde(default = "default_boot_ms")]
    pub boot_ms: u64,

    /// First network address to appear.
    #[serde(default = "default_network_ms")]
    pub network_ms: u64,

    /// ssh banner on the first address.
    #[serde(default = "default_ssh_ms")]
    pub ssh_ms: u64,

    /// RUNNING -> STOPPED after `lxc-stop`.
    #[serde(default = "default_stop_ms")]
    pub stop_ms: u64,

    /// Interval between checks of every bounded wait.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause after the ssh banner shows up.
    ///
    /// sshd answers before pam/login are fully usable on some images.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Pause before the single destroy retry.
    #[serde(default = "default_destroy_backoff_ms")]
    pub destroy_backoff_ms: u64,
}

fn default_boot_ms() -> u64 {
    60_000
}

fn default_network_ms() -> u64 {
    10_000
}

fn default_ssh_ms() -> u64 {
    10_000
}

fn default_stop_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_settle_ms() -> u64 {
    500
}

fn default_destroy_backoff_ms() -> u64 {
    5_000
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            boot_ms: default_boot_ms(),
            network_ms: default_network_ms(),
            ssh_ms: default_ssh_ms(),
            stop_ms: default_stop_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_ms: default_settle_ms(),
            destroy_backoff_ms: default_destroy_backoff_ms(),
        }
    }
}

impl Timeouts {
    pub fn boot(&self) -> Duration {
        Duration::from_millis(self.boot_ms)
    }

    pub fn network(&self) -> Duration {
        Duration::from_millis(self.network_ms)
    }

    pub fn ssh(&self) -> Duration {
        Duration::from_millis(self.ssh_ms)
    }

    pub fn stop(&self) -> Duration {
        Duration::from_millis(self.stop_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn destroy_backoff(&self) -> Duration {
        Duration::from_millis(self.destroy_backoff_ms)
    }

    /// Tiny bounds for tests driving in-memory backends.
    pub fn fast() -> Self {
        Self {
            boot_ms: 1_000,
            network_ms: 1_000,
            ssh_ms: 1_000,
            stop_ms: 1_000,
            poll_interval_ms: 10,
            settle_ms: 0,
            destroy_backoff_ms: 10,
        }
    }
}

// ============================================================================
// Runtime Options
// ============================================================================

/// Owner applied to copied results when the host process runs as root.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultsOwner {
    pub uid: u32,
    pub gid: u32,
}

/// Configuration options for [`CiboxRuntime`](crate::CiboxRuntime).
///
/// Built once at startup and shared read-only by everything the runtime
/// hands out. Every field has a default, so an empty JSON object is a valid
/// config file.
///
/// # Example
///
/// ```
/// use cibox::runtime::options::CiboxOptions;
///
/// let options: CiboxOptions =
///     serde_json::from_str(r#"{ "archive_store": "/srv/cibox/archive" }"#).unwrap();
/// assert_eq!(options.archive_store.to_str().unwrap(), "/srv/cibox/archive");
/// assert_eq!(options.user, "cibox");
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CiboxOptions {
    /// Store holding the base images jobs are cloned from.
    #[serde(default = "default_store")]
    pub base_store: PathBuf,

    /// Store holding containers of in-flight jobs.
    #[serde(default = "default_store")]
    pub runtime_store: PathBuf,

    /// Store holding archived containers.
    ///
    /// May equal `runtime_store`; archiving then only flips the `archived`
    /// flag in the container metadata.
    #[serde(default = "default_store")]
    pub archive_store: PathBuf,

    /// Host directory receiving `<container-name>/` result trees.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Private key used for every ssh connection into a container.
    #[serde(default = "default_ssh_key")]
    pub ssh_key: PathBuf,

    /// Public half of `ssh_key`, installed as `authorized_keys` on clone.
    #[serde(default = "default_ssh_pub_key")]
    pub ssh_pub_key: PathBuf,

    /// Unprivileged user created inside the container.
    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_user_uid")]
    pub user_uid: u32,

    #[serde(default)]
    pub results_owner: Option<ResultsOwner>,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Destroy runtime containers carrying a tag of the job being created.
    #[serde(default = "default_evict_same_tag")]
    pub evict_same_tag: bool,

    #[serde(default)]
    pub timeouts: Timeouts,
}

fn default_store() -> PathBuf {
    PathBuf::from(defaults::LXC_STORE)
}

fn default_results_dir() -> PathBuf {
    PathBuf::from(defaults::RESULTS_DIR)
}

fn default_key_dir() -> PathBuf {
    ::dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(defaults::FALLBACK_CONFIG_DIR))
        .join(defaults::APP_DIR)
}

fn default_ssh_key() -> PathBuf {
    default_key_dir().join(defaults::SSH_KEY_NAME)
}

fn default_ssh_pub_key() -> PathBuf {
    default_key_dir().join(format!("{}.pub", defaults::SSH_KEY_NAME))
}

fn default_user() -> String {
    user::DEFAULT_NAME.to_string()
}

fn default_user_uid() -> u32 {
    user::DEFAULT_UID
}

fn default_ssh_port() -> u16 {
    ssh::PORT
}

fn default_evict_same_tag() -> bool {
    true
}

impl Default for CiboxOptions {
    fn default() -> Self {
        Self {
            base_store: default_store(),
            runtime_store: default_store(),
            archive_store: default_store(),
            results_dir: default_results_dir(),
            ssh_key: default_ssh_key(),
            ssh_pub_key: default_ssh_pub_key(),
            user: default_user(),
            user_uid: default_user_uid(),
            results_owner: None,
            ssh_port: default_ssh_port(),
            evict_same_tag: default_evict_same_tag(),
            timeouts: Timeouts::default(),
        }
    }
}

impl CiboxOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> CiboxResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CiboxError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&raw)
            .map_err(|e| CiboxError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Load from `path`, else from `$CIBOX_CONFIG`, else defaults.
    pub fn resolve(path: Option<&Path>) -> CiboxResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match std::env::var_os(const_envs::CIBOX_CONFIG) {
            Some(path) if !path.is_empty() => Self::load(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    /// Validate option combinations.
    ///
    /// - store paths must be absolute (lxc resolves relative `-P` against its own cwd)
    /// - the job user must be a plain, non-root account name
    /// - the poll interval must be non-zero
    pub fn sanitize(&self) -> CiboxResult<()> {
        for (kind, path) in [
            (StoreKind::Base, &self.base_store),
            (StoreKind::Runtime, &self.runtime_store),
            (StoreKind::Archive, &self.archive_store),
        ] {
            if !path.is_absolute() {
                return Err(CiboxError::Config(format!(
                    "{} store must be an absolute path, got: {}",
                    kind,
                    path.display()
                )));
            }
        }

        let valid_user = !self.user.is_empty()
            && self.user != "root"
            && self
                .user
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_user {
            return Err(CiboxError::Config(format!(
                "invalid job user name: {:?}",
                self.user
            )));
        }

        if self.timeouts.poll_interval_ms == 0 {
            return Err(CiboxError::Config(
                "timeouts.poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Path of the given store.
    pub fn store_path(&self, kind: StoreKind) -> &Path {
        match kind {
            StoreKind::Base => &self.base_store,
            StoreKind::Runtime => &self.runtime_store,
            StoreKind::Archive => &self.archive_store,
        }
    }

    /// Runtime and archive stores are the same directory.
    pub fn stores_coincide(&self) -> bool {
        self.runtime_store == self.archive_store
    }
}
