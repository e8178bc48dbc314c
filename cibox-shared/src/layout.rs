//! Filesystem layout of a managed container.
//!
//! This module provides two views of the same tree:
//! - `GuestLayout`: absolute paths as seen from inside the container
//! - `RootfsLayout`: the same paths resolved under the container's rootfs on the host
//!
//! The host writes most files directly through `RootfsLayout`, before the
//! container has network or a running ssh server.

use std::path::{Path, PathBuf};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Fixed guest paths.
pub mod paths {
    /// Private directory. Its presence marks a container as managed by cibox.
    pub const PRIVATE_DIR: &str = "/cibox";

    /// Metadata record (JSON)
    pub const META: &str = "/cibox/meta";

    /// Command script, overwritten on every run
    pub const COMMAND_SCRIPT: &str = "/cibox/command.sh";

    /// Environment lines staged by the host, appended to `ENVIRONMENT` by
    /// the prepare script
    pub const ENVIRONMENT_STAGING: &str = "/cibox/environment";

    /// One-shot prepare script, run as init on first boot
    pub const PREPARE_SCRIPT: &str = "/tmp/cibox-prepare.sh";

    /// Output of the prepare script
    pub const PREPARE_LOG: &str = "/var/log/cibox-prepare.log";

    /// Environment file read by pam_env on login
    pub const ENVIRONMENT: &str = "/etc/environment";

    /// Sudoers file, appended to when sudo is granted
    pub const SUDOERS: &str = "/etc/sudoers";

    /// Parent of user home directories
    pub const HOME_ROOT: &str = "/home";
}

/// Directory names below the job user's home.
pub mod dirs {
    pub const WORKSPACE: &str = "workspace";
    pub const RESULTS: &str = "results";
    pub const SSH: &str = ".ssh";
    pub const AUTHORIZED_KEYS: &str = "authorized_keys";
}

// ============================================================================
// GUEST LAYOUT (paths inside the container)
// ============================================================================

/// Guest-side paths for a job user.
///
/// ```text
/// /cibox/
/// ├── meta              # ContainerMeta JSON
/// └── command.sh        # Last command script
/// /home/{user}/
/// ├── .ssh/authorized_keys
/// ├── workspace/        # Synced sources, cwd of the command
/// └── results/          # Artifacts copied back to the host
/// ```
#[derive(Clone, Debug)]
pub struct GuestLayout {
    user: String,
}

impl GuestLayout {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn private_dir(&self) -> PathBuf {
        PathBuf::from(paths::PRIVATE_DIR)
    }

    pub fn meta_file(&self) -> PathBuf {
        PathBuf::from(paths::META)
    }

    pub fn command_script(&self) -> PathBuf {
        PathBuf::from(paths::COMMAND_SCRIPT)
    }

    pub fn prepare_script(&self) -> PathBuf {
        PathBuf::from(paths::PREPARE_SCRIPT)
    }

    /// Home directory: /home/{user}
    pub fn home_dir(&self) -> PathBuf {
        Path::new(paths::HOME_ROOT).join(&self.user)
    }

    /// Working directory of the command: /home/{user}/workspace
    pub fn workspace_dir(&self) -> PathBuf {
        self.home_dir().join(dirs::WORKSPACE)
    }

    /// Artifact directory: /home/{user}/results
    pub fn results_dir(&self) -> PathBuf {
        self.home_dir().join(dirs::RESULTS)
    }

    pub fn ssh_dir(&self) -> PathBuf {
        self.home_dir().join(dirs::SSH)
    }

    pub fn authorized_keys(&self) -> PathBuf {
        self.ssh_dir().join(dirs::AUTHORIZED_KEYS)
    }
}

// ============================================================================
// ROOTFS LAYOUT (guest paths resolved on the host)
// ============================================================================

/// Host view of a container filesystem.
///
/// # Example
///
/// ```
/// use cibox_shared::layout::{GuestLayout, RootfsLayout};
///
/// let rootfs = RootfsLayout::new("/var/lib/lxc/job-1/rootfs", GuestLayout::new("cibox"));
/// assert_eq!(
///     rootfs.host_path("/cibox/meta").to_str().unwrap(),
///     "/var/lib/lxc/job-1/rootfs/cibox/meta"
/// );
/// ```
#[derive(Clone, Debug)]
pub struct RootfsLayout {
    rootfs: PathBuf,
    guest: GuestLayout,
}

impl RootfsLayout {
    pub fn new(rootfs: impl Into<PathBuf>, guest: GuestLayout) -> Self {
        Self {
            rootfs: rootfs.into(),
            guest,
        }
    }

    /// Root of the container filesystem on the host.
    pub fn root(&self) -> &Path {
        &self.rootfs
    }

    pub fn guest(&self) -> &GuestLayout {
        &self.guest
    }

    /// Convert a guest absolute path to the host path under the rootfs.
    ///
    /// Relative paths are treated as relative to the guest root.
    pub fn host_path(&self, guest_path: impl AsRef<Path>) -> PathBuf {
        let guest_path = guest_path.as_ref();
        let relative = guest_path.strip_prefix("/").unwrap_or(guest_path);
        self.rootfs.join(relative)
    }

    pub fn private_dir(&self) -> PathBuf {
        self.host_path(self.guest.private_dir())
    }

    pub fn meta_file(&self) -> PathBuf {
        self.host_path(self.guest.meta_file())
    }

    pub fn command_script(&self) -> PathBuf {
        self.host_path(self.guest.command_script())
    }

    pub fn prepare_script(&self) -> PathBuf {
        self.host_path(self.guest.prepare_script())
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.host_path(self.guest.workspace_dir())
    }

    pub fn results_dir(&self) -> PathBuf {
        self.host_path(self.guest.results_dir())
    }

    pub fn ssh_dir(&self) -> PathBuf {
        self.host_path(self.guest.ssh_dir())
    }

    pub fn authorized_keys(&self) -> PathBuf {
        self.host_path(self.guest.authorized_keys())
    }

    /// Whether this filesystem carries the cibox private directory.
    pub fn is_managed(&self) -> bool {
        self.private_dir().is_dir()
    }

    /// Create the private directory and the job user's home tree.
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.private_dir())?;
        std::fs::create_dir_all(self.ssh_dir())?;
        std::fs::create_dir_all(self.results_dir())?;
        std::fs::create_dir_all(self.workspace_dir())?;
        Ok(())
    }
}
