//! LXC backend driving the `lxc-*` command-line tools.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use cibox_shared::errors::{CiboxError, CiboxResult};

use super::ContainerBackend;
use crate::container::RuntimeState;
use crate::runtime::types::{CloneOptions, ContainerDescriptor, Store};
use crate::util::process::run_tool;

/// Per-container config file written by lxc.
const CONFIG_FILE: &str = "config";

/// Config keys naming the rootfs; the second is the pre-2.1 spelling.
const ROOTFS_KEYS: &[&str] = &["lxc.rootfs.path", "lxc.rootfs"];

#[derive(Debug, Default, Clone)]
pub struct LxcBackend;

impl LxcBackend {
    pub fn new() -> Self {
        Self
    }
}

fn lxcpath(store: &Store) -> String {
    store.path().to_string_lossy().into_owned()
}

/// `-n NAME -P LXCPATH`, common to every tool.
fn target_args(container: &ContainerDescriptor) -> Vec<String> {
    vec![
        "-n".to_string(),
        container.name.clone(),
        "-P".to_string(),
        lxcpath(&container.store),
    ]
}

pub(crate) fn clone_args(
    source: &ContainerDescriptor,
    new_name: &str,
    target: &Store,
    options: &CloneOptions,
) -> Vec<String> {
    let mut args = target_args(source);
    args.extend([
        "-N".to_string(),
        new_name.to_string(),
        "-p".to_string(),
        lxcpath(target),
    ]);
    if options.snapshot {
        args.push("-s".to_string());
    }
    if let Some(backing) = &options.backing_store {
        args.extend(["-B".to_string(), backing.clone()]);
    }
    args
}

/// Resolve an `lxc.rootfs.path` value to a host directory.
///
/// Accepts a bare path or `TYPE:PATH`. For overlay stores the last
/// component is the writable upper directory, which is what the host
/// must write into.
pub(crate) fn parse_rootfs_value(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    if value.starts_with('/') {
        return Some(PathBuf::from(value));
    }

    let (kind, rest) = value.split_once(':')?;
    match kind {
        "dir" | "btrfs" | "zfs" => Some(PathBuf::from(rest)),
        "overlay" | "overlayfs" => rest.rsplit(':').next().map(PathBuf::from),
        _ => None,
    }
}

pub(crate) fn parse_rootfs_config(config: &str) -> Option<PathBuf> {
    config.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if ROOTFS_KEYS.contains(&key.trim()) {
            parse_rootfs_value(value)
        } else {
            None
        }
    })
}

pub(crate) fn parse_addresses(output: &str) -> Vec<IpAddr> {
    output
        .split_whitespace()
        .filter_map(|word| word.parse().ok())
        .collect()
}

#[async_trait]
impl ContainerBackend for LxcBackend {
    async fn list_names(&self, store: &Store) -> CiboxResult<Vec<String>> {
        if !store.path().is_dir() {
            return Ok(Vec::new());
        }

        let path = lxcpath(store);
        let out = run_tool("lxc-ls", ["-1", "-P", path.as_str()]).await?;
        if !out.success() {
            return Err(CiboxError::Operation(format!(
                "lxc-ls failed for {} store {}: {}",
                store.kind,
                store.path().display(),
                out.failure_reason()
            )));
        }

        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect())
    }

    async fn rootfs(&self, name: &str, store: &Store) -> CiboxResult<PathBuf> {
        let config_path = store.path().join(name).join(CONFIG_FILE);
        let config = match tokio::fs::read_to_string(&config_path).await {
            Ok(config) => config,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CiboxError::NotFound(format!(
                    "container {} in {} store",
                    name, store.kind
                )));
            }
            Err(e) => {
                return Err(CiboxError::Storage(format!(
                    "Failed to read {}: {}",
                    config_path.display(),
                    e
                )));
            }
        };

        parse_rootfs_config(&config).ok_or_else(|| {
            CiboxError::Operation(format!(
                "No host-accessible rootfs in {}",
                config_path.display()
            ))
        })
    }

    async fn clone_container(
        &self,
        source: &ContainerDescriptor,
        new_name: &str,
        target: &Store,
        options: &CloneOptions,
    ) -> CiboxResult<ContainerDescriptor> {
        let args = clone_args(source, new_name, target, options);
        tracing::debug!(source = %source, new_name, ?args, "lxc-copy");

        let out = run_tool("lxc-copy", &args).await?;
        if !out.success() {
            return Err(CiboxError::Creation(format!(
                "Failed to clone {} to {}: {}",
                source.name,
                new_name,
                out.failure_reason()
            )));
        }

        self.open(new_name, target).await
    }

    async fn start(
        &self,
        container: &ContainerDescriptor,
        init_script: Option<&Path>,
    ) -> CiboxResult<bool> {
        let mut args = target_args(container);
        match init_script {
            Some(script) => {
                args.extend([
                    "-F".to_string(),
                    "--".to_string(),
                    script.to_string_lossy().into_owned(),
                ]);
            }
            None => args.push("-d".to_string()),
        }

        let out = run_tool("lxc-start", &args).await?;
        if !out.success() {
            tracing::debug!(container = %container, reason = %out.failure_reason(), "lxc-start failed");
        }
        Ok(out.success())
    }

    async fn stop(&self, container: &ContainerDescriptor) -> CiboxResult<bool> {
        let out = run_tool("lxc-stop", target_args(container)).await?;
        if !out.success() {
            tracing::debug!(container = %container, reason = %out.failure_reason(), "lxc-stop failed");
        }
        Ok(out.success())
    }

    async fn destroy(&self, container: &ContainerDescriptor) -> CiboxResult<bool> {
        let out = run_tool("lxc-destroy", target_args(container)).await?;
        if !out.success() {
            tracing::debug!(container = %container, reason = %out.failure_reason(), "lxc-destroy failed");
        }
        Ok(out.success())
    }

    async fn state(&self, container: &ContainerDescriptor) -> CiboxResult<RuntimeState> {
        let mut args = target_args(container);
        args.push("-sH".to_string());

        let out = run_tool("lxc-info", &args).await?;
        if !out.success() {
            return Err(CiboxError::Operation(format!(
                "lxc-info failed for {}: {}",
                container,
                out.failure_reason()
            )));
        }

        let raw = out.stdout.trim();
        Ok(raw.parse().unwrap_or_else(|_| {
            // STARTING, STOPPING, FROZEN... are all "not stopped"
            tracing::debug!(container = %container, state = raw, "transient lxc state");
            RuntimeState::Running
        }))
    }

    async fn wait_for_state(
        &self,
        container: &ContainerDescriptor,
        state: RuntimeState,
        timeout: Duration,
    ) -> CiboxResult<bool> {
        let mut args = target_args(container);
        args.extend([
            "-s".to_string(),
            state.as_lxc_str().to_string(),
            "-t".to_string(),
            timeout.as_secs().max(1).to_string(),
        ]);

        let out = run_tool("lxc-wait", &args).await?;
        Ok(out.success())
    }

    async fn network_addresses(
        &self,
        container: &ContainerDescriptor,
    ) -> CiboxResult<Vec<IpAddr>> {
        let mut args = target_args(container);
        args.push("-iH".to_string());

        let out = run_tool("lxc-info", &args).await?;
        if !out.success() {
            return Err(CiboxError::Operation(format!(
                "lxc-info failed for {}: {}",
                container,
                out.failure_reason()
            )));
        }
        Ok(parse_addresses(&out.stdout))
    }
}
