//! Remote execution over `ssh`.

use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use cibox_shared::constants::ssh;
use cibox_shared::errors::{CiboxError, CiboxResult};

use super::RemoteExecutor;
use crate::util::process::{run_attached, run_tool};

/// Runs scripts with the system `ssh` client.
///
/// The container's host key changes with every clone, so host-key
/// verification is skipped and nothing is recorded in known_hosts.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    port: u16,
}

impl SshExecutor {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub(crate) fn args(&self, address: IpAddr, identity: &Path, user: &str, script: &Path) -> Vec<String> {
        let mut args = vec![
            "-q".to_string(),
            "-tt".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-i".to_string(),
            identity.to_string_lossy().into_owned(),
            "-l".to_string(),
            user.to_string(),
        ];
        if self.port != ssh::PORT {
            args.extend(["-p".to_string(), self.port.to_string()]);
        }
        args.push(address.to_string());
        args.push(script.to_string_lossy().into_owned());
        args
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new(ssh::PORT)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        address: IpAddr,
        identity: &Path,
        user: &str,
        script: &Path,
    ) -> CiboxResult<i32> {
        let args = self.args(address, identity, user, script);
        tracing::debug!(%address, user, script = %script.display(), "ssh");

        let status = run_attached("ssh", &args).await?;
        tracing::debug!(%address, status, "ssh finished");
        Ok(status)
    }
}

/// Generate a password-less key pair at `private` (and `private.pub`)
/// unless the private key already exists. Returns whether a key was made.
pub async fn provision_key_pair(private: &Path) -> CiboxResult<bool> {
    if private.exists() {
        return Ok(false);
    }
    if let Some(dir) = private.parent() {
        std::fs::create_dir_all(dir)?;
    }

    tracing::info!(key = %private.display(), "Generating ssh key pair");
    let output = run_tool("ssh-keygen", keygen_args(private)).await?;
    if !output.success() {
        return Err(CiboxError::Config(format!(
            "ssh-keygen failed for {}: {}",
            private.display(),
            output.failure_reason()
        )));
    }
    Ok(true)
}

fn keygen_args(private: &Path) -> Vec<String> {
    vec![
        "-q".to_string(),
        "-t".to_string(),
        "ed25519".to_string(),
        "-N".to_string(),
        String::new(),
        "-C".to_string(),
        "cibox".to_string(),
        "-f".to_string(),
        private.to_string_lossy().into_owned(),
    ]
}
