use std::io::Read;

use anyhow::Context;
use cibox::{CloneOptions, CreateOptions, TeardownPolicy, run_guarded};
use clap::Args;

use crate::cli::{GlobalFlags, collect_env, parse_env_pair};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Base container to clone (see `cibox bases`)
    #[arg(index = 1, value_name = "BASE")]
    pub base: String,

    /// Shell command to run in the container; `-` reads it from stdin
    #[arg(short, long, default_value = "bash")]
    pub command: String,

    /// Name for the job container (default: BASE-runtime-TIMESTAMP)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Comma separated tags for the job container
    #[arg(short, long, value_delimiter = ',', value_name = "TAGS")]
    pub tag: Vec<String>,

    /// Copy DIR into the job workspace (a trailing slash copies its contents)
    #[arg(short = 's', long = "sync-workspace", value_name = "DIR")]
    pub sync_workspace: Option<String>,

    /// Archive the container after the command
    #[arg(short = 'A', long)]
    pub archive: bool,

    /// Archive the container only if the command fails
    #[arg(short = 'a', long)]
    pub archive_on_fail: bool,

    /// Comma separated host environment variables to copy into the container
    #[arg(short = 'E', long = "copy-env", value_delimiter = ',', value_name = "VARS")]
    pub copy_env: Vec<String>,

    /// Set an environment variable in the container (repeatable)
    #[arg(short = 'e', long = "set-env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub set_env: Vec<(String, String)>,

    /// Give the job user password-less sudo
    #[arg(long)]
    pub sudo: bool,

    /// Clone copy-on-write
    #[arg(long)]
    pub snapshot: bool,

    /// Backing store for the clone (e.g. overlayfs, btrfs)
    #[arg(short = 'B', long = "backing-store", value_name = "BACKING")]
    pub backing_store: Option<String>,

    /// Copy the job's results directory to the host after the command
    #[arg(long)]
    pub copy_results: bool,
}

/// Entry point
pub async fn execute(args: RunArgs, global: &GlobalFlags) -> anyhow::Result<i32> {
    let command = resolve_command(&args.command)?;
    let env = collect_env(&args.copy_env, &args.set_env, |k| std::env::var(k).ok());

    let runtime = global.create_runtime()?;
    cibox::backend::provision_key_pair(&runtime.options().ssh_key).await?;

    let options = CreateOptions {
        clone: CloneOptions {
            snapshot: args.snapshot,
            backing_store: args.backing_store.clone(),
        },
        tags: args.tag.clone(),
    };
    let container = runtime
        .create(&args.base, args.name.as_deref(), options)
        .await
        .with_context(|| format!("Cannot create a container from {}", args.base))?;

    let policy = TeardownPolicy {
        archive: args.archive,
        archive_on_fail: args.archive_on_fail,
    };

    let run = run_guarded(container, policy, move |c, outcome| {
        Box::pin(async move {
            if args.sudo {
                c.enable_sudo()?;
            }
            if !env.is_empty() {
                c.write_env(&env)?;
            }
            if let Some(source) = &args.sync_workspace {
                c.sync_workspace(source).await?;
            }

            c.start().await?;
            c.record_command(&command)?;
            let status = c.run_command(&command).await?;
            outcome.set(status);
            c.record_exit_code(status)?;

            if args.copy_results
                && let Some(dest) = c.copy_results().await?
            {
                eprintln!("Results copied to {}", dest.display());
            }

            c.stop().await?;
            Ok(status)
        })
    })
    .await;

    let report = match run.teardown {
        Ok(report) => report,
        Err(e) => {
            if let Err(body) = &run.result {
                eprintln!("Error: {body}");
            }
            return Err(e).context("Teardown failed");
        }
    };

    if report.archived() {
        eprintln!(
            "Archived {}. Inspect it with: cibox inspect {}",
            report.name, report.name
        );
    }

    let status = run.result.context("Job failed")?;
    if status != 0 {
        eprintln!("Command failed with exit status {status}");
    }
    Ok(status)
}

/// `-` means the command comes from stdin.
fn resolve_command(raw: &str) -> anyhow::Result<String> {
    if raw != "-" {
        return Ok(raw.to_string());
    }
    let mut command = String::new();
    std::io::stdin()
        .read_to_string(&mut command)
        .context("Cannot read the command from stdin")?;
    if command.trim().is_empty() {
        anyhow::bail!("Empty command on stdin");
    }
    Ok(command)
}
