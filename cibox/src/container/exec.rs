//! Command execution inside a running container.

use std::net::IpAddr;

use cibox_shared::errors::{CiboxError, CiboxResult};

use super::RuntimeContainer;
use crate::runtime::constants::scripts;
use crate::util::write_script;

/// Script text for `command`: header, then the command verbatim.
pub fn render_command_script(workspace: &str, command: &str) -> String {
    let mut script = scripts::command_header(workspace);
    script.push_str(command);
    script.push('\n');
    script
}

pub(super) async fn run_command(container: &mut RuntimeContainer, command: &str) -> CiboxResult<i32> {
    let phase = container.phase.phase();
    if !phase.is_running() {
        return Err(CiboxError::InvalidState(format!(
            "Cannot run a command in {} container {}",
            phase,
            container.name()
        )));
    }
    execute(container, command).await
}

/// Write `/cibox/command.sh` and run it as the job user over the remote
/// executor. Returns the command's exit status.
pub(super) async fn execute(container: &mut RuntimeContainer, command: &str) -> CiboxResult<i32> {
    let guest = container.layout.guest().clone();
    let workspace = guest.workspace_dir();
    write_script(
        &container.layout.command_script(),
        &render_command_script(&workspace.to_string_lossy(), command),
    )?;

    let address = first_address(container).await?;
    let options = &container.runtime.options;
    tracing::info!(container = %container.descriptor, %address, "Running command");

    let status = container
        .runtime
        .backends
        .executor
        .execute(address, &options.ssh_key, guest.user(), &guest.command_script())
        .await?;

    tracing::debug!(container = %container.descriptor, status, "command finished");
    Ok(status)
}

/// Address cached by `start()`, or a fresh lookup for handles opened on an
/// already running container.
async fn first_address(container: &mut RuntimeContainer) -> CiboxResult<IpAddr> {
    if container.addresses.is_empty() {
        container.addresses = container
            .runtime
            .backends
            .containers
            .network_addresses(&container.descriptor)
            .await?;
    }

    container.addresses.first().copied().ok_or_else(|| {
        CiboxError::Operation(format!(
            "Container {} has no network address",
            container.name()
        ))
    })
}
