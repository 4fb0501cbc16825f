use crate::transport::{ModemPort, TransportError};

use std::sync::Arc;

/// Signal quality query.
pub const SIGNAL_QUALITY: &str = "AT+CSQ";

/// An AT command bound to a modem port.
#[derive(Clone)]
pub struct AtCommand {
    port: Arc<dyn ModemPort>,
    command: String,
}

impl AtCommand {
    pub fn new(port: Arc<dyn ModemPort>, command: impl Into<String>) -> Self {
        Self {
            port,
            command: command.into(),
        }
    }

    pub fn signal_quality(port: Arc<dyn ModemPort>) -> Self {
        Self::new(port, SIGNAL_QUALITY)
    }

    pub fn device(&self) -> &str {
        self.port.device()
    }

    /// The full command line for `suffix`, without the trailing CR.
    pub fn line(&self, suffix: &str) -> String {
        format!("{}{}", self.command, suffix)
    }

    /// Execute the command with `suffix` appended.
    ///
    /// Serial I/O blocks, so it runs on the blocking pool.
    pub async fn run(&self, suffix: &str) -> Result<Vec<String>, TransportError> {
        let port = Arc::clone(&self.port);
        let line = self.line(suffix);
        tokio::task::spawn_blocking(move || port.execute(&line))
            .await
            .map_err(|e| TransportError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SimulatedModem, SimulatedReply};

    #[test]
    fn formats_command_line() {
        let port = Arc::new(SimulatedModem::new("sim0"));
        assert_eq!(AtCommand::signal_quality(port.clone()).line(""), "AT+CSQ");
        assert_eq!(AtCommand::new(port, "AT+C").line("SQ"), "AT+CSQ");
    }

    #[tokio::test]
    async fn run_delegates_to_port() {
        let modem = Arc::new(SimulatedModem::scripted("sim0", vec![SimulatedReply::csq(20)]));
        let at = AtCommand::new(modem.clone(), "AT+C");

        let lines = at.run("SQ").await.unwrap();
        assert!(lines.iter().any(|l| l == "+CSQ: 20,99"));
        assert_eq!(modem.calls(), 1);
        assert_eq!(at.device(), "sim0");
    }

    #[tokio::test]
    async fn run_surfaces_transport_errors() {
        let modem = Arc::new(SimulatedModem::scripted("sim0", vec![SimulatedReply::Unplugged]));
        let err = AtCommand::signal_quality(modem).run("").await.unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }
}
