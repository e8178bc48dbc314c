use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Only destroy archived containers carrying this tag
    #[arg(short, long, value_name = "TAG")]
    pub tag: Option<String>,
}

pub async fn execute(args: DestroyArgs, global: &GlobalFlags) -> anyhow::Result<i32> {
    let runtime = global.create_runtime()?;
    for name in runtime.destroy_archived(args.tag.as_deref()).await? {
        println!("{name}");
    }
    Ok(0)
}
