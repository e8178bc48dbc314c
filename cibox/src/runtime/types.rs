//! Core data types shared by the runtime, the backends and the listing service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use cibox_shared::errors::CiboxError;

// ============================================================================
// STORES
// ============================================================================

/// The three named container stores.
///
/// Jobs clone `Base` into `Runtime`; teardown moves `Runtime` to `Archive`
/// or removes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Base,
    Runtime,
    Archive,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Base => "base",
            StoreKind::Runtime => "runtime",
            StoreKind::Archive => "archive",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = CiboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(StoreKind::Base),
            "runtime" => Ok(StoreKind::Runtime),
            "archive" => Ok(StoreKind::Archive),
            other => Err(CiboxError::Config(format!("unknown store: {other}"))),
        }
    }
}

/// A store resolved to its directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Store {
    pub kind: StoreKind,
    pub path: PathBuf,
}

impl Store {
    pub fn new(kind: StoreKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ============================================================================
// CONTAINERS
// ============================================================================

/// Identity of one container as the backend knows it.
///
/// The rootfs path is resolved once when the descriptor is built and cached
/// here; guest files are read and written through it before the container
/// has a network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerDescriptor {
    pub name: String,
    pub store: Store,
    pub rootfs: PathBuf,
}

impl ContainerDescriptor {
    pub fn new(name: impl Into<String>, store: Store, rootfs: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            store,
            rootfs: rootfs.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store_kind(&self) -> StoreKind {
        self.store.kind
    }

    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }
}

impl fmt::Display for ContainerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.store.kind)
    }
}

/// How a clone is materialized.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneOptions {
    /// Copy-on-write clone instead of a full copy.
    #[serde(default)]
    pub snapshot: bool,

    /// Backing store of the clone, e.g. `overlayfs` or `btrfs`.
    #[serde(default)]
    pub backing_store: Option<String>,
}

/// Options for creating a job container.
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    pub clone: CloneOptions,

    /// Tags recorded on the new container.
    ///
    /// When eviction is enabled, runtime containers carrying any of these
    /// tags are destroyed first.
    pub tags: Vec<String>,
}
