//! Operator-configured recovery for the description service.
//!
//! When many consecutive files fail on timeouts or connection errors,
//! the orchestrator may invoke this trigger to restart the service. The
//! cooldown that prevents restart storms is owned by the orchestrator,
//! not by this collaborator — this type only knows how to run the
//! command.

use anyhow::{Context, Result};
use std::process::Command;

pub struct DependencyRecoveryTrigger {
    command: String,
}

impl DependencyRecoveryTrigger {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Run the restart command through the shell, blocking until it
    /// exits.
    pub fn restart(&self) -> Result<()> {
        log::warn!("Restarting description service: {}", self.command);
        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .status()
            .context("failed to spawn restart command")?;
        if !status.success() {
            anyhow::bail!("restart command exited with {status}");
        }
        log::info!("Description service restart command completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn successful_command_is_ok() {
        let trigger = DependencyRecoveryTrigger::new("true");
        assert!(trigger.restart().is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn failing_command_is_err() {
        let trigger = DependencyRecoveryTrigger::new("exit 3");
        assert!(trigger.restart().is_err());
    }
}
