use crate::cli::GlobalFlags;

pub async fn execute(global: &GlobalFlags) -> anyhow::Result<i32> {
    let runtime = global.create_runtime()?;
    for name in runtime.list_base_images().await? {
        println!("{name}");
    }
    Ok(0)
}
