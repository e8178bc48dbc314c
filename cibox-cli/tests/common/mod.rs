#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use assert_cmd::Command;
use tempfile::TempDir;

/// A config file whose stores live under a private temp dir.
///
/// The stores are never created, so every listing is empty and no `lxc-*`
/// tool is ever invoked. The ssh key exists, so no key is generated.
pub struct TestContext {
    pub dir: TempDir,
    pub config: PathBuf,
}

impl TestContext {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let root = dir.path();

        let keys = root.join("keys");
        std::fs::create_dir_all(&keys).expect("create key dir");
        std::fs::write(keys.join("id_cibox"), "not a real key\n").expect("write key");
        std::fs::write(keys.join("id_cibox.pub"), "ssh-ed25519 AAAA test@cibox\n")
            .expect("write public key");

        let config = root.join("cibox.json");
        let body = serde_json::json!({
            "base_store": root.join("base"),
            "runtime_store": root.join("runtime"),
            "archive_store": root.join("archive"),
            "results_dir": root.join("results"),
            "ssh_key": keys.join("id_cibox"),
            "ssh_pub_key": keys.join("id_cibox.pub"),
        });
        std::fs::write(&config, body.to_string()).expect("write config");

        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// `cibox --config <file>`
    pub fn cmd(&self) -> Command {
        let mut cmd = cibox();
        cmd.arg("--config").arg(&self.config);
        cmd
    }
}

/// `cibox` with no config and a clean environment.
pub fn cibox() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cibox"));
    cmd.timeout(Duration::from_secs(30));
    cmd.env_remove("CIBOX_CONFIG");
    cmd
}
