use cibox::{ContainerSummary, StoreKind};
use clap::Args;
use comfy_table::{Table, presets};

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Store to list: runtime or archive
    #[arg(long, default_value = "archive", value_name = "STORE")]
    pub store: StoreKind,

    /// Only list containers carrying this tag
    #[arg(short, long, value_name = "TAG")]
    pub tag: Option<String>,

    /// Print summaries as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ListArgs, global: &GlobalFlags) -> anyhow::Result<i32> {
    let runtime = global.create_runtime()?;
    let summaries = runtime
        .list_summaries(args.store, args.tag.as_deref())
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else if global.verbose {
        print_table(&summaries);
    } else {
        for summary in &summaries {
            println!("{}", summary.name);
        }
    }
    Ok(0)
}

fn print_table(summaries: &[ContainerSummary]) {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_NO_BORDERS);
    table.set_header(vec!["NAME", "BASE", "TAGS", "EXIT", "CREATED"]);

    for summary in summaries {
        let meta = &summary.meta;
        table.add_row(vec![
            summary.name.clone(),
            meta.base.clone().unwrap_or_else(|| "-".to_string()),
            meta.tags.join(","),
            meta.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            meta.created
                .map(|t| format_time(&t))
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    println!("{table}");
}

fn format_time(t: &chrono::DateTime<chrono::Utc>) -> String {
    t.with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
