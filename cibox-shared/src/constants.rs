//! Shared constants between the library and the CLI
//!
//! Values that describe the guest side of a managed container and the
//! process-level contract of the `cibox` binary.

/// Guest user constants
pub mod user {
    /// Unprivileged user the job runs as inside the container
    pub const DEFAULT_NAME: &str = "cibox";

    /// Fixed uid for the job user so archived trees have stable ownership
    pub const DEFAULT_UID: u32 = 555;
}

/// Remote shell constants
pub mod ssh {
    /// Port the container's ssh server listens on
    pub const PORT: u16 = 22;

    /// Every ssh server greets with an identification string starting with this
    pub const BANNER_PREFIX: &[u8] = b"SSH-";
}

/// Tag constants
pub mod tags {
    /// Tag applied when a job supplies none
    pub const DEFAULT: &str = "default";
}

/// Process exit codes of the CLI
pub mod exit_codes {
    /// A setup or teardown step failed; the user command never produced a status
    pub const SETUP_FAILURE: i32 = 2;
}
