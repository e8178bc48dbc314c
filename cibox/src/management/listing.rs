//! Store scanning.

use cibox_shared::errors::CiboxResult;
use cibox_shared::layout::{GuestLayout, RootfsLayout};
use serde::Serialize;

use crate::container::{ContainerMeta, MetadataStore};
use crate::runtime::RuntimeInnerImpl;
use crate::runtime::options::CiboxOptions;
use crate::runtime::types::StoreKind;

/// Public view of a managed container (for list operations).
#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary {
    pub name: String,
    pub store: StoreKind,
    pub meta: ContainerMeta,
}

/// Whether a container with the given `archived` flag is listed in `kind`.
///
/// Only matters when runtime and archive stores are one directory; then
/// the flag decides.
pub fn visible_in(kind: StoreKind, archived: bool, options: &CiboxOptions) -> bool {
    if !options.stores_coincide() {
        return true;
    }
    match kind {
        StoreKind::Runtime => !archived,
        StoreKind::Archive => archived,
        StoreKind::Base => true,
    }
}

/// Managed containers of `kind`, optionally restricted to those tagged `tag`.
///
/// Containers whose rootfs or metadata cannot be read are skipped with a
/// warning.
pub(crate) async fn scan(
    inner: &RuntimeInnerImpl,
    kind: StoreKind,
    tag: Option<&str>,
) -> CiboxResult<Vec<ContainerSummary>> {
    let backend = inner.backends.containers.as_ref();
    let store = inner.store(kind);
    let guest = GuestLayout::new(inner.options.user.clone());

    let mut summaries = Vec::new();
    for name in backend.list_names(&store).await? {
        let descriptor = match backend.open(&name, &store).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!(container = %name, store = %kind, error = %e, "skipping unreadable container");
                continue;
            }
        };

        let layout = RootfsLayout::new(descriptor.rootfs, guest.clone());
        if !layout.is_managed() {
            tracing::trace!(container = %name, "not managed, skipping");
            continue;
        }

        let meta = match MetadataStore::new(layout.meta_file()).read() {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "skipping container with bad metadata");
                continue;
            }
        };

        if !visible_in(kind, meta.archived, &inner.options) {
            continue;
        }
        if let Some(tag) = tag
            && !meta.has_tag(tag)
        {
            continue;
        }

        summaries.push(ContainerSummary {
            name,
            store: kind,
            meta,
        });
    }

    tracing::debug!(store = %kind, ?tag, count = summaries.len(), "scanned store");
    Ok(summaries)
}

/// Names in the base store that are not managed containers.
pub(crate) async fn base_images(inner: &RuntimeInnerImpl) -> CiboxResult<Vec<String>> {
    let backend = inner.backends.containers.as_ref();
    let store = inner.store(StoreKind::Base);
    let guest = GuestLayout::new(inner.options.user.clone());

    let mut bases = Vec::new();
    for name in backend.list_names(&store).await? {
        match backend.rootfs(&name, &store).await {
            Ok(rootfs) => {
                if !RootfsLayout::new(rootfs, guest.clone()).is_managed() {
                    bases.push(name);
                }
            }
            Err(e) => tracing::warn!(container = %name, error = %e, "skipping unreadable container"),
        }
    }
    Ok(bases)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(runtime: &str, archive: &str) -> CiboxOptions {
        CiboxOptions {
            runtime_store: runtime.into(),
            archive_store: archive.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_separate_stores_show_everything() {
        let opts = options("/srv/runtime", "/srv/archive");
        for kind in [StoreKind::Runtime, StoreKind::Archive] {
            assert!(visible_in(kind, false, &opts));
            assert!(visible_in(kind, true, &opts));
        }
    }

    #[test]
    fn test_coinciding_stores_split_on_flag() {
        let opts = options("/var/lib/lxc", "/var/lib/lxc");
        assert!(visible_in(StoreKind::Runtime, false, &opts));
        assert!(!visible_in(StoreKind::Runtime, true, &opts));
        assert!(visible_in(StoreKind::Archive, true, &opts));
        assert!(!visible_in(StoreKind::Archive, false, &opts));
    }
}
