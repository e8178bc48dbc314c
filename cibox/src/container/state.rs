//! Container lifecycle phases and state machine.
//!
//! The container runtime only knows STOPPED and RUNNING. The manager layers
//! its own phases on top so that one-shot steps (the prepare script) and
//! terminal outcomes (archived, destroyed) can be enforced.

use cibox_shared::errors::{CiboxError, CiboxResult};
use serde::{Deserialize, Serialize};

/// Live state reported by the container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    Stopped,
    Running,
}

impl RuntimeState {
    /// Spelling used by `lxc-info` and `lxc-wait`.
    pub fn as_lxc_str(&self) -> &'static str {
        match self {
            RuntimeState::Stopped => "STOPPED",
            RuntimeState::Running => "RUNNING",
        }
    }
}

impl std::str::FromStr for RuntimeState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "STOPPED" => Ok(RuntimeState::Stopped),
            "RUNNING" => Ok(RuntimeState::Running),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_lxc_str())
    }
}

/// Lifecycle phase of a managed container.
///
/// ```text
/// clone()          → Created
/// queue prepare    → Prepared      (still STOPPED in the runtime)
/// start()          → Running       (prepare script flushed on the first one)
/// stop()           → Stopped
/// start()          → Running       (no prepare)
/// archive()        → Archived
/// destroy()        → Destroyed     (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    /// Cloned, nothing queued, never booted.
    Created,

    /// Prepare commands queued, never booted.
    Prepared,

    /// Booted and reachable over ssh.
    Running,

    /// Booted at least once, currently stopped.
    Stopped,

    /// Moved to (or flagged in) the archive store.
    Archived,

    /// Removed from its store.
    Destroyed,
}

impl LifecyclePhase {
    /// The container has never been booted.
    pub fn is_pristine(&self) -> bool {
        matches!(self, LifecyclePhase::Created | LifecyclePhase::Prepared)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, LifecyclePhase::Running)
    }

    /// No further transitions except from Archived to Destroyed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecyclePhase::Archived | LifecyclePhase::Destroyed)
    }

    /// Prepare commands can only be queued before the first boot.
    pub fn can_queue_prepare(&self) -> bool {
        self.is_pristine()
    }

    pub fn can_start(&self) -> bool {
        matches!(
            self,
            LifecyclePhase::Created
                | LifecyclePhase::Prepared
                | LifecyclePhase::Stopped
                | LifecyclePhase::Running
        )
    }

    /// Check if transition to target phase is valid.
    pub fn can_transition_to(&self, target: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        matches!(
            (self, target),
            (Created, Prepared) |
            (Prepared, Prepared) |
            // First boot, with or without a prepare script
            (Created, Running) |
            (Prepared, Running) |
            (Running, Stopped) |
            (Stopped, Running) |
            // Teardown of a never-booted container (e.g. sync failed)
            (Created, Archived) |
            (Prepared, Archived) |
            (Created, Destroyed) |
            (Prepared, Destroyed) |
            (Stopped, Archived) |
            (Stopped, Destroyed) |
            // Archive store doubles as runtime store
            (Archived, Destroyed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Created => "created",
            LifecyclePhase::Prepared => "prepared",
            LifecyclePhase::Running => "running",
            LifecyclePhase::Stopped => "stopped",
            LifecyclePhase::Archived => "archived",
            LifecyclePhase::Destroyed => "destroyed",
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current phase with validated transitions.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    phase: LifecyclePhase,
}

impl PhaseTracker {
    pub fn new(phase: LifecyclePhase) -> Self {
        Self { phase }
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// Attempt a phase transition with validation.
    ///
    /// Returns `InvalidState` if the transition is not valid.
    pub fn transition_to(&mut self, target: LifecyclePhase) -> CiboxResult<()> {
        if !self.phase.can_transition_to(target) {
            return Err(CiboxError::InvalidState(format!(
                "Cannot transition from {} to {}",
                self.phase, target
            )));
        }
        tracing::trace!(from = %self.phase, to = %target, "phase transition");
        self.phase = target;
        Ok(())
    }
}
