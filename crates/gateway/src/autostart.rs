use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::error::AutostartError;

/// Launches a gateway process when no candidate answers
#[async_trait]
pub trait Autostart: Send + Sync {
    /// Start the gateway and wait until it may be listening
    async fn start(&self) -> Result<(), AutostartError>;
}

/// Runs a shell command (e.g. an IBC start script) and waits a settle delay
pub struct CommandAutostart {
    command: String,
    settle: Duration,
}

impl CommandAutostart {
    pub fn new(command: impl Into<String>, settle: Duration) -> Self {
        CommandAutostart {
            command: command.into(),
            settle,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Autostart for CommandAutostart {
    async fn start(&self) -> Result<(), AutostartError> {
        let command = self.command.trim();
        if command.is_empty() {
            return Err(AutostartError::EmptyCommand);
        }
        info!(command, "Launching gateway");
        // The gateway outlives us; the child is deliberately not awaited
        let _child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let autostart = CommandAutostart::new("   ", Duration::ZERO);
        assert!(matches!(
            autostart.start().await,
            Err(AutostartError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn test_command_spawned() {
        let autostart = CommandAutostart::new("true", Duration::from_millis(1));
        assert!(autostart.start().await.is_ok());
        assert_eq!(autostart.command(), "true");
    }
}
