use cibox::StoreKind;
use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Archived container to inspect
    #[arg(index = 1, value_name = "NAME")]
    pub name: String,

    /// Command to run inside the booted container
    #[arg(short, long, default_value = "bash")]
    pub command: String,

    /// Print the container metadata as JSON instead of booting it
    #[arg(long)]
    pub meta: bool,
}

pub async fn execute(args: InspectArgs, global: &GlobalFlags) -> anyhow::Result<i32> {
    let runtime = global.create_runtime()?;
    let mut container = runtime.open(StoreKind::Archive, &args.name).await?;

    if args.meta {
        println!("{}", serde_json::to_string_pretty(&container.meta()?)?);
        return Ok(0);
    }

    cibox::backend::provision_key_pair(&runtime.options().ssh_key).await?;
    Ok(container.inspect(&args.command).await?)
}
