pub mod poll;
pub mod process;
pub mod retry;

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Instant;

use cibox_shared::errors::{CiboxError, CiboxResult};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use walkdir::WalkDir;

// ============================================================================
// LOGGING
// ============================================================================

/// How chatty the stderr log is when `RUST_LOG` is unset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only
    #[default]
    Quiet,
    /// Phase progress ("Waiting for the container to boot...")
    Verbose,
    /// Every transition and tool invocation
    Debug,
}

impl Verbosity {
    pub fn directive(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
        }
    }
}

/// Install the global stderr subscriber.
///
/// `RUST_LOG` wins over `verbosity`. Calling it twice is harmless; the
/// second call is ignored.
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity == Verbosity::Debug)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init();
}

/// Logs how long a lifecycle phase took when dropped.
///
/// ```
/// let _timer = cibox::util::PhaseTimer::new("Waiting for the container to boot");
/// // ... work ...
/// ```
pub struct PhaseTimer {
    phase: &'static str,
    started: Instant,
}

impl PhaseTimer {
    pub fn new(phase: &'static str) -> Self {
        tracing::info!("{}...", phase);
        Self {
            phase,
            started: Instant::now(),
        }
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        tracing::info!(
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "{}... {:.1}s",
            self.phase,
            self.started.elapsed().as_secs_f64()
        );
    }
}

// ============================================================================
// FILE HELPERS
// ============================================================================

/// Set the executable bits (0755) on `path`.
pub fn make_executable(path: &Path) -> CiboxResult<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
        CiboxError::Storage(format!(
            "Failed to make {} executable: {}",
            path.display(),
            e
        ))
    })
}

/// Write `contents` to `path` and make it executable.
pub fn write_script(path: &Path, contents: &str) -> CiboxResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            CiboxError::Storage(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }
    std::fs::write(path, contents).map_err(|e| {
        CiboxError::Storage(format!("Failed to write {}: {}", path.display(), e))
    })?;
    make_executable(path)
}

/// Append `text` to `path`, creating the file if needed.
pub fn append_to_file(path: &Path, text: &str) -> CiboxResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| CiboxError::Storage(format!("Failed to open {}: {}", path.display(), e)))?;
    file.write_all(text.as_bytes())
        .map_err(|e| CiboxError::Storage(format!("Failed to append to {}: {}", path.display(), e)))
}

/// Whether `dir` exists and holds at least one entry.
pub fn dir_has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Copy the tree below `src` into `dest`, preserving modes and symlinks.
///
/// `dest` is created if needed; existing files are overwritten.
pub fn copy_tree(src: &Path, dest: &Path) -> CiboxResult<()> {
    std::fs::create_dir_all(dest)?;

    for entry in WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .follow_root_links(false)
    {
        let entry = entry.map_err(|e| {
            CiboxError::Storage(format!("Failed to walk {}: {}", src.display(), e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| CiboxError::Internal(e.to_string()))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            let mode = entry.metadata().map_err(|e| CiboxError::Storage(e.to_string()))?;
            std::fs::set_permissions(&target, mode.permissions())?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            if target.symlink_metadata().is_ok() {
                std::fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| {
                CiboxError::Storage(format!(
                    "Failed to copy {} to {}: {}",
                    entry.path().display(),
                    target.display(),
                    e
                ))
            })?;
        }
    }

    Ok(())
}

/// Recursively change ownership of `root` and everything below it.
///
/// Symlinks themselves are re-owned, not their targets.
pub fn chown_tree(root: &Path, uid: u32, gid: u32) -> CiboxResult<()> {
    for entry in WalkDir::new(root).follow_links(false).follow_root_links(false) {
        let entry = entry.map_err(|e| {
            CiboxError::Storage(format!("Failed to walk {}: {}", root.display(), e))
        })?;
        std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid)).map_err(|e| {
            CiboxError::Storage(format!(
                "Failed to chown {} to {}:{}: {}",
                entry.path().display(),
                uid,
                gid,
                e
            ))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_verbosity_directives() {
        assert_eq!(Verbosity::default().directive(), "warn");
        assert_eq!(Verbosity::Verbose.directive(), "info");
        assert_eq!(Verbosity::Debug.directive(), "debug");
    }

    #[test]
    fn test_write_script_is_executable() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("cibox/command.sh");

        write_script(&script, "#!/bin/sh\ntrue\n").unwrap();

        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(std::fs::read_to_string(&script).unwrap(), "#!/bin/sh\ntrue\n");
    }

    #[test]
    fn test_append_to_file_keeps_existing_content() {
        let tmp = TempDir::new().unwrap();
        let env = tmp.path().join("etc/environment");
        std::fs::create_dir_all(env.parent().unwrap()).unwrap();
        std::fs::write(&env, "PATH=\"/usr/bin\"\n").unwrap();

        append_to_file(&env, "CI=\"true\"\n").unwrap();

        assert_eq!(
            std::fs::read_to_string(&env).unwrap(),
            "PATH=\"/usr/bin\"\nCI=\"true\"\n"
        );
    }

    #[test]
    fn test_dir_has_entries() {
        let tmp = TempDir::new().unwrap();
        assert!(!dir_has_entries(tmp.path()));
        assert!(!dir_has_entries(&tmp.path().join("missing")));

        std::fs::write(tmp.path().join("report.xml"), "<ok/>").unwrap();
        assert!(dir_has_entries(tmp.path()));
    }

    #[test]
    fn test_copy_tree_preserves_structure_and_links() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("logs/unit")).unwrap();
        std::fs::write(src.path().join("logs/unit/out.txt"), "ok").unwrap();
        std::os::unix::fs::symlink("logs/unit/out.txt", src.path().join("latest")).unwrap();

        let target = dest.path().join("job-1");
        copy_tree(src.path(), &target).unwrap();

        assert_eq!(
            std::fs::read_to_string(target.join("logs/unit/out.txt")).unwrap(),
            "ok"
        );
        assert_eq!(
            std::fs::read_link(target.join("latest")).unwrap(),
            Path::new("logs/unit/out.txt")
        );
    }

    #[test]
    fn test_chown_tree_to_self_succeeds() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("file"), "x").unwrap();

        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        chown_tree(tmp.path(), uid, gid).unwrap();
    }
}
