//! Moving files between the host and the container.
//!
//! Sources go in through the tree sync adapter before boot; results come
//! back by plain copy from the container filesystem after the run.

use std::path::{Path, PathBuf};

use cibox_shared::errors::{CiboxError, CiboxResult};

use super::RuntimeContainer;
use crate::runtime::constants::envs;
use crate::util::{PhaseTimer, chown_tree, copy_tree, dir_has_entries};

/// Who is asking for a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Not running under sudo, or sudo'ing from root itself.
    Unrestricted,
    /// Root via sudo on behalf of a regular user with this home directory.
    SudoUser { uid: u32, home: PathBuf },
}

impl Caller {
    /// Work out the caller from the process credentials and `SUDO_UID`.
    pub fn detect() -> CiboxResult<Self> {
        if !nix::unistd::geteuid().is_root() {
            return Ok(Caller::Unrestricted);
        }

        let sudo_uid = match std::env::var(envs::SUDO_UID) {
            Ok(raw) => raw.trim().parse::<u32>().map_err(|_| {
                CiboxError::Permission(format!("{} is not a uid: {:?}", envs::SUDO_UID, raw))
            })?,
            Err(_) => return Ok(Caller::Unrestricted),
        };
        if sudo_uid == 0 {
            return Ok(Caller::Unrestricted);
        }

        let user = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(sudo_uid))
            .map_err(|e| CiboxError::Permission(format!("cannot look up uid {sudo_uid}: {e}")))?
            .ok_or_else(|| CiboxError::Permission(format!("no passwd entry for uid {sudo_uid}")))?;

        Ok(Caller::SudoUser {
            uid: sudo_uid,
            home: user.dir,
        })
    }
}

/// Reject `source` when a sudo caller points outside their own home.
///
/// The check runs on the fully resolved path so `..` and symlinks cannot
/// escape the boundary.
pub fn check_sync_source(source: &str, caller: &Caller) -> CiboxResult<()> {
    let Caller::SudoUser { uid, home } = caller else {
        return Ok(());
    };

    let resolved = std::fs::canonicalize(source).map_err(|e| {
        CiboxError::Permission(format!("cannot resolve sync source {source}: {e}"))
    })?;
    let home = std::fs::canonicalize(home).unwrap_or_else(|_| home.clone());

    if !resolved.starts_with(&home) {
        return Err(CiboxError::Permission(format!(
            "sync source {} is outside the home directory {} of uid {}",
            resolved.display(),
            home.display(),
            uid
        )));
    }
    Ok(())
}

pub(super) async fn sync(
    container: &RuntimeContainer,
    source: &str,
    caller: &Caller,
) -> CiboxResult<()> {
    if container.phase.phase().is_terminal() {
        return Err(CiboxError::InvalidState(format!(
            "Cannot sync into {} container {}",
            container.phase.phase(),
            container.name()
        )));
    }
    check_sync_source(source, caller)?;

    let dest = container.layout.workspace_dir();
    std::fs::create_dir_all(&dest)?;

    let _timer = PhaseTimer::new("Copying the workspace");
    container.runtime.backends.sync.sync(source, &dest).await
}

/// Copy the guest results directory to `<results_dir>/<name>`.
///
/// Returns the host destination, or `None` when there was nothing to copy.
pub(super) async fn copy_results(container: &RuntimeContainer) -> CiboxResult<Option<PathBuf>> {
    let src = container.layout.results_dir();
    check_results_source(&src, container.layout.root())?;
    if !dir_has_entries(&src) {
        tracing::debug!(container = %container.descriptor, "no results to copy");
        return Ok(None);
    }

    let options = &container.runtime.options;
    let dest = results_path(&options.results_dir, container.name());
    let owner = options.results_owner;
    let is_root = nix::unistd::geteuid().is_root();

    let copied = dest.clone();
    tokio::task::spawn_blocking(move || -> CiboxResult<()> {
        copy_tree(&src, &copied)?;
        if let (true, Some(owner)) = (is_root, owner) {
            chown_tree(&copied, owner.uid, owner.gid)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| CiboxError::Internal(format!("results copy task failed: {e}")))??;

    tracing::info!(container = %container.descriptor, dest = %dest.display(), "Copied results");
    Ok(Some(dest))
}

/// The results directory is guest-controlled: it must be a real directory
/// that resolves inside the container rootfs.
fn check_results_source(src: &Path, rootfs: &Path) -> CiboxResult<()> {
    let meta = match std::fs::symlink_metadata(src) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if !meta.is_dir() {
        return Err(CiboxError::Permission(format!(
            "results path {} is not a directory",
            src.display()
        )));
    }

    let resolved = std::fs::canonicalize(src)?;
    let rootfs = std::fs::canonicalize(rootfs)?;
    if !resolved.starts_with(&rootfs) {
        return Err(CiboxError::Permission(format!(
            "results path {} resolves outside the container to {}",
            src.display(),
            resolved.display()
        )));
    }
    Ok(())
}

/// Host path of the results of `name` under `results_dir`.
pub fn results_path(results_dir: &Path, name: &str) -> PathBuf {
    results_dir.join(name)
}
