//! Constants for the cibox runtime
//!
//! Centralized location for hardcoded values the host side relies on.
//! Guest paths live in `cibox_shared::layout`.

// Re-export shared constants
pub use cibox_shared::constants::{exit_codes, ssh, tags, user};

pub mod envs {
    /// Path of the JSON config file, when `--config` is not given
    pub const CIBOX_CONFIG: &str = "CIBOX_CONFIG";

    /// Set by sudo to the uid of the invoking user
    pub const SUDO_UID: &str = "SUDO_UID";
}

/// Default locations
pub mod defaults {
    /// lxc's default lxcpath
    pub const LXC_STORE: &str = "/var/lib/lxc";

    pub const RESULTS_DIR: &str = "/var/lib/cibox/results";

    /// Used when the platform reports no config directory
    pub const FALLBACK_CONFIG_DIR: &str = "/etc";

    pub const APP_DIR: &str = "cibox";

    pub const SSH_KEY_NAME: &str = "id_cibox";
}

/// Naming of generated containers
pub mod naming {
    /// Infix between the base name and the timestamp
    pub const RUNTIME_INFIX: &str = "-runtime-";

    /// chrono format of the timestamp suffix
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

    /// Default name of a job container cloned from `base` at `now`.
    pub fn runtime_name(base: &str, now: chrono::DateTime<chrono::Local>) -> String {
        format!("{}{}{}", base, RUNTIME_INFIX, now.format(TIMESTAMP_FORMAT))
    }
}

/// Guest-side shell snippets
pub mod scripts {
    /// Header of the one-shot prepare script.
    ///
    /// All output goes to the prepare log; any failing statement aborts.
    pub fn prepare_header(log_path: &str) -> String {
        format!("#!/bin/sh\nexec >> {log_path}\nexec 2>&1\nset -eux\n")
    }

    /// Header of the command script, run as the job user.
    pub fn command_header(workspace: &str) -> String {
        format!("#!/bin/sh\nset -eu\ncd {workspace}\n")
    }

    /// Group granted password-less sudo.
    pub const SUDO_GROUP: &str = "sudo";
}
