//! CiboxRuntime - entry point for creating, opening and listing containers.

use std::sync::Arc;

use chrono::Local;
use cibox_shared::constants::tags;
use cibox_shared::errors::{CiboxError, CiboxResult};
use cibox_shared::layout::{GuestLayout, RootfsLayout};

use crate::backend::Backends;
use crate::container::{LifecyclePhase, MetadataStore, RuntimeContainer, RuntimeState};
use crate::management::{self, ContainerSummary};
use crate::runtime::constants::naming;
use crate::runtime::options::CiboxOptions;
use crate::runtime::types::{CreateOptions, Store, StoreKind};

// ============================================================================
// PUBLIC API
// ============================================================================

/// Main entry point: clones job containers from base images and finds
/// existing ones.
///
/// **Cloning**: cheap, clones share the same options and backends.
#[derive(Clone)]
pub struct CiboxRuntime {
    inner: RuntimeInner,
}

/// Shared state handed to every container handle.
pub type RuntimeInner = Arc<RuntimeInnerImpl>;

/// Immutable after construction; no locking needed.
pub struct RuntimeInnerImpl {
    pub(crate) options: CiboxOptions,
    pub(crate) backends: Backends,
}

impl CiboxRuntime {
    /// Create a runtime driving the system tools (`lxc-*`, `ssh`, `rsync`).
    ///
    /// # Errors
    ///
    /// `Config` if the options do not validate.
    pub fn new(options: CiboxOptions) -> CiboxResult<Self> {
        let backends = Backends::system(options.ssh_port);
        Self::with_backends(options, backends)
    }

    /// Create a runtime with explicit adapters.
    pub fn with_backends(options: CiboxOptions, backends: Backends) -> CiboxResult<Self> {
        options.sanitize()?;

        tracing::debug!(
            base = %options.base_store.display(),
            runtime = %options.runtime_store.display(),
            archive = %options.archive_store.display(),
            "initialized runtime"
        );

        Ok(Self {
            inner: Arc::new(RuntimeInnerImpl { options, backends }),
        })
    }

    pub fn options(&self) -> &CiboxOptions {
        &self.inner.options
    }

    pub fn store(&self, kind: StoreKind) -> Store {
        self.inner.store(kind)
    }

    /// Clone `base` into a new runtime container.
    ///
    /// Without `name` one is generated from the base name and the local
    /// time. Containers in the runtime store carrying one of the requested
    /// tags are destroyed first when `evict_same_tag` is set, after the
    /// base and name checks have passed.
    ///
    /// # Errors
    ///
    /// `Creation` if the base does not exist, if `name` is taken in the
    /// runtime or archive store, or if the clone fails.
    pub async fn create(
        &self,
        base: &str,
        name: Option<&str>,
        options: CreateOptions,
    ) -> CiboxResult<RuntimeContainer> {
        let name = match name {
            Some(name) => name.to_string(),
            None => naming::runtime_name(base, Local::now()),
        };
        validate_name(&name)?;

        let inner = &self.inner;
        let backend = inner.backends.containers.as_ref();
        let base_store = inner.store(StoreKind::Base);
        let runtime_store = inner.store(StoreKind::Runtime);

        if !backend.list_names(&base_store).await?.iter().any(|n| n == base) {
            return Err(CiboxError::Creation(format!(
                "Base container {} not found in {}",
                base,
                base_store.path().display()
            )));
        }

        for kind in [StoreKind::Runtime, StoreKind::Archive] {
            let store = inner.store(kind);
            if backend.list_names(&store).await?.contains(&name) {
                return Err(CiboxError::Creation(format!(
                    "Container {} already exists in the {} store",
                    name, kind
                )));
            }
        }

        // Only once the create is known to be valid.
        if inner.options.evict_same_tag {
            for tag in &options.tags {
                self.evict_tagged(tag).await?;
            }
        }

        let source = backend.open(base, &base_store).await?;
        tracing::info!(base, name = %name, "Cloning container");
        let descriptor = backend
            .clone_container(&source, &name, &runtime_store, &options.clone)
            .await?;

        let tags = if options.tags.is_empty() {
            vec![tags::DEFAULT.to_string()]
        } else {
            options.tags
        };

        let mut container =
            RuntimeContainer::new(descriptor.clone(), inner.clone(), LifecyclePhase::Created);
        if let Err(e) = container.initialize(base, &tags) {
            tracing::warn!(container = %descriptor, error = %e, "initialization failed, removing clone");
            if let Err(cleanup) = backend.destroy(&descriptor).await {
                tracing::warn!(container = %descriptor, error = %cleanup, "cleanup failed");
            }
            return Err(e);
        }

        Ok(container)
    }

    /// Open an existing managed container.
    ///
    /// # Errors
    ///
    /// `NotFound` if `name` is not a managed container of that store.
    pub async fn open(&self, kind: StoreKind, name: &str) -> CiboxResult<RuntimeContainer> {
        let inner = &self.inner;
        let backend = inner.backends.containers.as_ref();
        let store = inner.store(kind);

        if !backend.list_names(&store).await?.iter().any(|n| n == name) {
            return Err(CiboxError::NotFound(format!(
                "No container {} in the {} store",
                name, kind
            )));
        }

        let descriptor = backend.open(name, &store).await?;
        let layout = RootfsLayout::new(
            descriptor.rootfs.clone(),
            GuestLayout::new(inner.options.user.clone()),
        );
        if !layout.is_managed() {
            return Err(CiboxError::NotFound(format!(
                "Container {name} is not managed by cibox"
            )));
        }

        let archived = MetadataStore::new(layout.meta_file()).read()?.archived;
        if !management::visible_in(kind, archived, &inner.options) {
            return Err(CiboxError::NotFound(format!(
                "No container {} in the {} store",
                name, kind
            )));
        }

        let phase = if kind == StoreKind::Archive || archived {
            LifecyclePhase::Archived
        } else if backend.state(&descriptor).await? == RuntimeState::Running {
            LifecyclePhase::Running
        } else {
            LifecyclePhase::Stopped
        };

        Ok(RuntimeContainer::new(descriptor, inner.clone(), phase))
    }

    /// Names of managed containers in a store, optionally with `tag`.
    pub async fn list_names(&self, kind: StoreKind, tag: Option<&str>) -> CiboxResult<Vec<String>> {
        Ok(self
            .list_summaries(kind, tag)
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect())
    }

    /// Handles on managed containers in a store, optionally with `tag`.
    pub async fn list_containers(
        &self,
        kind: StoreKind,
        tag: Option<&str>,
    ) -> CiboxResult<Vec<RuntimeContainer>> {
        let mut containers = Vec::new();
        for summary in self.list_summaries(kind, tag).await? {
            containers.push(self.open(kind, &summary.name).await?);
        }
        Ok(containers)
    }

    /// Name and metadata of managed containers in a store.
    pub async fn list_summaries(
        &self,
        kind: StoreKind,
        tag: Option<&str>,
    ) -> CiboxResult<Vec<ContainerSummary>> {
        management::scan(&self.inner, kind, tag).await
    }

    /// Names in the base store that are not job containers.
    pub async fn list_base_images(&self) -> CiboxResult<Vec<String>> {
        management::base_images(&self.inner).await
    }

    /// Destroy every archived container carrying `tag` (all of them when
    /// `tag` is `None`). Returns the names destroyed.
    ///
    /// Keeps going past failures and reports them together as `Operation`.
    pub async fn destroy_archived(&self, tag: Option<&str>) -> CiboxResult<Vec<String>> {
        let mut destroyed = Vec::new();
        let mut failed = Vec::new();

        for mut container in self.list_containers(StoreKind::Archive, tag).await? {
            match container.destroy().await {
                Ok(()) => destroyed.push(container.name().to_string()),
                Err(e) => {
                    tracing::error!(container = %container.descriptor(), error = %e, "destroy failed");
                    failed.push(container.name().to_string());
                }
            }
        }

        if !failed.is_empty() {
            return Err(CiboxError::Operation(format!(
                "Failed to destroy {} of {} archived containers: {}",
                failed.len(),
                failed.len() + destroyed.len(),
                failed.join(", ")
            )));
        }
        Ok(destroyed)
    }
}

// ============================================================================
// INTERNAL HELPERS
// ============================================================================

impl CiboxRuntime {
    async fn evict_tagged(&self, tag: &str) -> CiboxResult<()> {
        for mut container in self.list_containers(StoreKind::Runtime, Some(tag)).await? {
            tracing::info!(container = %container.descriptor(), tag, "Evicting container with the same tag");
            container.destroy().await?;
        }
        Ok(())
    }
}

impl RuntimeInnerImpl {
    pub(crate) fn store(&self, kind: StoreKind) -> Store {
        Store::new(kind, self.options.store_path(kind))
    }
}

/// Container names end up as directory names and `lxc-*` arguments.
fn validate_name(name: &str) -> CiboxResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with(['-', '.'])
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(CiboxError::Creation(format!(
            "invalid container name: {name:?}"
        )));
    }
    Ok(())
}

impl std::fmt::Debug for CiboxRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CiboxRuntime")
            .field("runtime_store", &self.inner.options.runtime_store)
            .field("archive_store", &self.inner.options.archive_store)
            .finish()
    }
}

impl std::fmt::Debug for RuntimeInnerImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeInner")
            .field("options", &self.options)
            .field("backends", &self.backends)
            .finish()
    }
}

// ============================================================================
// THREAD SAFETY ASSERTIONS
// ============================================================================

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<CiboxRuntime>;
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("job-1").is_ok());
        assert!(validate_name("ubuntu-base-runtime-2024-01-02_03-04-05").is_ok());
        assert!(validate_name("a.b_c").is_ok());

        for bad in ["", "-x", ".hidden", "a/b", "a b", "../x"] {
            assert!(
                matches!(validate_name(bad), Err(CiboxError::Creation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_relative_store() {
        let options = CiboxOptions {
            runtime_store: "relative/store".into(),
            ..Default::default()
        };
        let err = CiboxRuntime::new(options).unwrap_err();
        assert!(matches!(err, CiboxError::Config(_)));
    }
}
