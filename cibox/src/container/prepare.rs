//! One-shot prepare script.
//!
//! Root-level setup (user creation, privilege grants) is queued while the
//! container has never been booted, then run once as the container's init
//! process right before the first real boot.

use cibox_shared::errors::{CiboxError, CiboxResult};
use cibox_shared::layout::paths;

use super::RuntimeContainer;
use crate::runtime::constants::scripts;
use crate::util::{PhaseTimer, write_script};

/// Ordered shell statements waiting for the first boot.
#[derive(Debug, Clone, Default)]
pub struct PrepareQueue {
    commands: Vec<String>,
    flushed: bool,
}

impl PrepareQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: impl Into<String>) {
        self.commands.push(command.into());
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The queue already ran; it never runs again.
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Full script text: header followed by one statement per line.
    pub fn render(&self) -> String {
        let mut script = scripts::prepare_header(paths::PREPARE_LOG);
        for command in &self.commands {
            script.push_str(command);
            script.push('\n');
        }
        script
    }

    fn mark_flushed(&mut self) {
        self.commands.clear();
        self.flushed = true;
    }
}

/// Statements every job container gets: the job user, its password, and
/// ownership of its home (the host wrote `.ssh` and friends as root).
pub fn default_commands(user: &str, uid: u32) -> Vec<String> {
    vec![
        format!("adduser --system --uid {uid} --shell /bin/bash --group {user}"),
        format!("echo -n '{user}:{user}' | chpasswd"),
        format!("chown -R {user}:{user} /home/{user}"),
    ]
}

/// Statement adding `user` to the sudo group.
pub fn sudo_group_command(user: &str) -> String {
    format!("usermod -a -G {} {}", scripts::SUDO_GROUP, user)
}

/// Sudoers line granting password-less sudo to the members of `user`'s group.
pub fn sudoers_line(user: &str) -> String {
    format!("%{user} ALL=(ALL) NOPASSWD: ALL\n")
}

/// Statement appending [`sudoers_line`] to the guest sudoers file.
///
/// Runs inside the guest so a copy-on-write rootfs appends to the base
/// file instead of shadowing it.
pub fn sudoers_command(user: &str) -> String {
    format!(
        "echo '{}' >> {}",
        sudoers_line(user).trim_end(),
        paths::SUDOERS
    )
}

/// Statement appending the staged environment lines to the guest
/// environment file.
pub fn environment_command() -> String {
    format!(
        "cat {} >> {}",
        paths::ENVIRONMENT_STAGING,
        paths::ENVIRONMENT
    )
}

pub(super) fn queue(container: &mut RuntimeContainer, command: String) -> CiboxResult<()> {
    let phase = container.phase.phase();
    if !phase.can_queue_prepare() || container.prepare.is_flushed() {
        return Err(CiboxError::InvalidState(format!(
            "Cannot queue prepare commands for {}: container already started ({})",
            container.name(),
            phase
        )));
    }

    tracing::debug!(container = %container.descriptor, %command, "queue prepare command");
    container.prepare.push(command);
    if phase == super::LifecyclePhase::Created {
        container.phase.transition_to(super::LifecyclePhase::Prepared)?;
    }
    Ok(())
}

/// Write the queue as the prepare script and boot it as init, once.
pub(super) async fn flush(container: &mut RuntimeContainer) -> CiboxResult<()> {
    let script = container.layout.prepare_script();
    write_script(&script, &container.prepare.render())?;

    let guest_script = container.layout.guest().prepare_script();
    let backend = container.runtime.backends.containers.clone();

    let ok = {
        let _timer = PhaseTimer::new("Running the prepare script");
        backend
            .start(&container.descriptor, Some(&guest_script))
            .await?
    };

    // Runs at most once whatever the outcome; a failed prepare is not retried.
    container.prepare.mark_flushed();

    if !ok {
        return Err(CiboxError::Operation(format!(
            "Failed to prepare container {}, see {} inside the container",
            container.name(),
            paths::PREPARE_LOG
        )));
    }

    tracing::debug!(container = %container.descriptor, "prepare script finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_puts_header_first() {
        let mut queue = PrepareQueue::new();
        for command in default_commands("cibox", 555) {
            queue.push(command);
        }

        let script = queue.render();
        assert!(script.starts_with("#!/bin/sh\nexec >> /var/log/cibox-prepare.log\n"));
        assert!(script.contains("set -eux\nadduser --system --uid 555 --shell /bin/bash --group cibox\n"));
        assert!(script.contains("echo -n 'cibox:cibox' | chpasswd\n"));
        assert!(script.ends_with("chown -R cibox:cibox /home/cibox\n"));
    }

    #[test]
    fn test_render_keeps_queue_order() {
        let mut queue = PrepareQueue::new();
        queue.push("first");
        queue.push("second");

        let script = queue.render();
        let first = script.find("first").unwrap();
        let second = script.find("second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_mark_flushed_empties_queue() {
        let mut queue = PrepareQueue::new();
        queue.push("true");
        queue.mark_flushed();

        assert!(queue.is_empty());
        assert!(queue.is_flushed());
    }

    #[test]
    fn test_sudo_snippets() {
        assert_eq!(sudo_group_command("cibox"), "usermod -a -G sudo cibox");
        assert_eq!(sudoers_line("cibox"), "%cibox ALL=(ALL) NOPASSWD: ALL\n");
        assert_eq!(
            sudoers_command("cibox"),
            "echo '%cibox ALL=(ALL) NOPASSWD: ALL' >> /etc/sudoers"
        );
        assert_eq!(
            environment_command(),
            "cat /cibox/environment >> /etc/environment"
        );
    }
}
