//! Tree sync with `rsync -a`.

use std::path::Path;

use async_trait::async_trait;
use cibox_shared::errors::{CiboxError, CiboxResult};

use super::TreeSync;
use crate::util::process::run_tool;

#[derive(Debug, Default, Clone)]
pub struct RsyncTreeSync;

impl RsyncTreeSync {
    pub fn new() -> Self {
        Self
    }

    /// `source` goes through untouched so rsync's trailing-slash rule applies.
    pub(crate) fn args(source: &str, dest: &Path) -> Vec<String> {
        vec![
            "-a".to_string(),
            source.to_string(),
            dest.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl TreeSync for RsyncTreeSync {
    async fn sync(&self, source: &str, dest: &Path) -> CiboxResult<()> {
        let args = Self::args(source, dest);
        tracing::debug!(source, dest = %dest.display(), "rsync");

        let out = run_tool("rsync", &args).await?;
        if !out.success() {
            return Err(CiboxError::Operation(format!(
                "rsync {} -> {} failed: {}",
                source,
                dest.display(),
                out.failure_reason()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_keep_trailing_slash() {
        assert_eq!(
            RsyncTreeSync::args("/home/alice/proj/", Path::new("/rootfs/home/cibox/workspace")),
            ["-a", "/home/alice/proj/", "/rootfs/home/cibox/workspace"]
        );
        assert_eq!(
            RsyncTreeSync::args("/home/alice/proj", Path::new("/w"))[1],
            "/home/alice/proj"
        );
    }
}
