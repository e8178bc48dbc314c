//! CLI definition and argument parsing for cibox-cli.

use std::io::Write;
use std::path::PathBuf;

use cibox::{CiboxOptions, CiboxRuntime, Verbosity};
use clap::{Args, Command, Parser, Subcommand, ValueEnum};
use clap_complete::shells::{Bash, Fish, Zsh};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "cibox",
    author,
    version,
    about = "Run a command in a throwaway LXC container"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Clone a base container, run a command in it, then destroy or archive it
    Run(crate::commands::run::RunArgs),

    /// List job containers
    #[command(visible_alias = "ls")]
    List(crate::commands::list::ListArgs),

    /// Start an archived container and open a shell in it
    Inspect(crate::commands::inspect::InspectArgs),

    /// Destroy archived containers
    Destroy(crate::commands::destroy::DestroyArgs),

    /// List base containers
    Bases,

    /// Generate shell completion script (hidden from help)
    #[command(hide = true)]
    Completion(CompletionArgs),
}

/// Shell for which to generate completion script.
#[derive(ValueEnum, Clone, Debug)]
#[value(rename_all = "lower")]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
}

/// Arguments for the completion subcommand.
#[derive(Args, Debug)]
pub struct CompletionArgs {
    /// Shell to generate completion for (bash, zsh, fish).
    pub shell: Shell,
}

/// Writes a completion script for the given shell to `out`.
pub fn generate_completion(shell: &Shell, cmd: &mut Command, name: &str, out: &mut dyn Write) {
    match shell {
        Shell::Bash => clap_complete::generate(Bash, cmd, name, out),
        Shell::Zsh => clap_complete::generate(Zsh, cmd, name, out),
        Shell::Fish => clap_complete::generate(Fish, cmd, name, out),
    }
}

// ============================================================================
// GLOBAL FLAGS
// ============================================================================

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Be verbose: phase progress on stderr, tags in listings
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration file (JSON)
    ///
    /// Missing fields take their defaults. Without a file every store is
    /// /var/lib/lxc.
    #[arg(long, global = true, env = "CIBOX_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl GlobalFlags {
    pub fn verbosity(&self) -> Verbosity {
        if self.debug {
            Verbosity::Debug
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Quiet
        }
    }

    pub fn load_options(&self) -> anyhow::Result<CiboxOptions> {
        Ok(CiboxOptions::resolve(self.config.as_deref())?)
    }

    pub fn create_runtime(&self) -> anyhow::Result<CiboxRuntime> {
        Ok(CiboxRuntime::new(self.load_options()?)?)
    }
}

// ============================================================================
// ENVIRONMENT HELPERS
// ============================================================================

/// Parse a `KEY=VALUE` pair. The value may itself contain `=`.
pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

/// Host variables named in `copy` followed by the explicit `set` pairs.
///
/// Names missing on the host are skipped with a warning.
pub fn collect_env<F>(copy: &[String], set: &[(String, String)], lookup: F) -> Vec<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = Vec::new();
    for key in copy {
        match lookup(key) {
            Some(value) => env.push((key.clone(), value)),
            None => tracing::warn!(
                "Environment variable '{}' not found on host, skipping",
                key
            ),
        }
    }
    env.extend(set.iter().cloned());
    env
}
