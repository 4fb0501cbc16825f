//! ==============================================================================
//! transport.rs - serial link to the modem
//! ==============================================================================
//!
//! purpose:
//!     one call = one AT exchange. open the tty, write the command line,
//!     read a bounded reply, close. nothing is held between calls, so a modem
//!     that is unplugged and replugged between ticks just works again.
//!
//! implementations:
//!     - SerialModem: real device through the `serialport` crate
//!     - SimulatedModem: canned replies, for --simulate and for tests
//!
//! relationships:
//!     - used by: at.rs (AtCommand wraps a port and a command prefix)
//!     - configured by: config.rs ([serial] section)
//!
//! ==============================================================================

use crate::at::SIGNAL_QUALITY;
use crate::config::SerialConfig;

use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// failure to talk to the modem at all
///
/// an empty or unparseable reply is not a transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },
    #[error("cannot write to {device}: {source}")]
    Write {
        device: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot read from {device}: {source}")]
    Read {
        device: String,
        #[source]
        source: io::Error,
    },
    #[error("modem task failed: {0}")]
    Task(String),
}

pub trait ModemPort: Send + Sync {
    /// identifier of the endpoint, reported in every sample
    fn device(&self) -> &str;

    /// send `command` terminated by CR and return the reply split on CRLF
    ///
    /// blocking; callers on the async side go through `AtCommand::run`.
    fn execute(&self, command: &str) -> Result<Vec<String>, TransportError>;
}

/// split a raw reply on CRLF
///
/// an empty buffer is an empty reply, not a single empty line.
pub fn split_lines(raw: &[u8]) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    String::from_utf8_lossy(raw)
        .split("\r\n")
        .map(str::to_owned)
        .collect()
}

fn ends_with_result_code(raw: &[u8]) -> bool {
    raw.ends_with(b"OK\r\n") || raw.ends_with(b"ERROR\r\n")
}

// ==============================================================================
// REAL IMPLEMENTATION (serial tty)
// ==============================================================================

pub struct SerialModem {
    device: String,
    baud_rate: u32,
    timeout: Duration,
    read_limit: usize,
}

impl SerialModem {
    pub fn new(device: impl Into<String>, serial: &SerialConfig) -> Self {
        Self {
            device: device.into(),
            baud_rate: serial.baud_rate,
            timeout: serial.timeout(),
            read_limit: serial.read_limit.max(1),
        }
    }
}

impl ModemPort for SerialModem {
    fn device(&self) -> &str {
        &self.device
    }

    fn execute(&self, command: &str) -> Result<Vec<String>, TransportError> {
        // the boxed port closes when it goes out of scope, on every path
        let mut port = serialport::new(&self.device, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.timeout)
            .open()
            .map_err(|source| TransportError::Open {
                device: self.device.clone(),
                source,
            })?;

        let write_err = |source| TransportError::Write {
            device: self.device.clone(),
            source,
        };
        port.write_all(format!("{}\r", command).as_bytes())
            .map_err(write_err)?;
        port.flush().map_err(write_err)?;

        // keep reading until the modem goes quiet for one timeout, the final
        // result code arrives, or the buffer is full
        let mut raw = vec![0u8; self.read_limit];
        let mut filled = 0;
        while filled < raw.len() {
            match port.read(&mut raw[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    if ends_with_result_code(&raw[..filled]) {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(source) => {
                    return Err(TransportError::Read {
                        device: self.device.clone(),
                        source,
                    })
                }
            }
        }
        raw.truncate(filled);

        trace!(device = %self.device, command, bytes = filled, raw = %hex::encode(&raw), "modem reply");
        Ok(split_lines(&raw))
    }
}

// ==============================================================================
// SIMULATED IMPLEMENTATION (no hardware)
// ==============================================================================

/// what the simulated modem does on one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedReply {
    /// raw reply text, CRLF separated
    Text(String),
    /// nothing came back before the timeout
    Silent,
    /// the device cannot be opened
    #[cfg(test)]
    Unplugged,
}

impl SimulatedReply {
    /// a well-formed `+CSQ` reply for the given index (99 = not known)
    pub fn csq(index: u8) -> Self {
        SimulatedReply::Text(format!("\r\n+CSQ: {},99\r\n\r\nOK\r\n", index))
    }
}

/// a modem that replays a script instead of touching a tty
pub struct SimulatedModem {
    device: String,
    replies: Vec<SimulatedReply>,
    /// restart the script after the last reply instead of repeating it
    cycle: bool,
    calls: AtomicUsize,
}

/// signal indices walked by `--simulate`
const DEMO_INDICES: [u8; 10] = [12, 12, 14, 17, 21, 21, 18, 9, 1, 99];

impl SimulatedModem {
    /// endless demo script that walks through every tier
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            replies: DEMO_INDICES.iter().map(|&i| SimulatedReply::csq(i)).collect(),
            cycle: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// play `replies` in order, then keep answering with the last one
    #[cfg(test)]
    pub fn scripted(device: impl Into<String>, replies: Vec<SimulatedReply>) -> Self {
        Self {
            device: device.into(),
            replies,
            cycle: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// number of executed commands so far
    #[cfg(test)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> SimulatedReply {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.replies.is_empty() {
            return SimulatedReply::Silent;
        }
        let index = if self.cycle {
            call % self.replies.len()
        } else {
            call.min(self.replies.len() - 1)
        };
        self.replies[index].clone()
    }
}

impl ModemPort for SimulatedModem {
    fn device(&self) -> &str {
        &self.device
    }

    fn execute(&self, command: &str) -> Result<Vec<String>, TransportError> {
        let reply = self.next_reply();
        trace!(device = %self.device, command, ?reply, "simulated modem");
        match reply {
            #[cfg(test)]
            SimulatedReply::Unplugged => Err(TransportError::Open {
                device: self.device.clone(),
                source: serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    "simulated modem unplugged",
                ),
            }),
            SimulatedReply::Silent => Ok(Vec::new()),
            SimulatedReply::Text(_) if command != SIGNAL_QUALITY => {
                Ok(split_lines(b"\r\nERROR\r\n"))
            }
            SimulatedReply::Text(text) => Ok(split_lines(text.as_bytes())),
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_lines_on_crlf() {
        let lines = split_lines(b"\r\n+CSQ: 17,99\r\n\r\nOK\r\n");
        assert_eq!(lines, vec!["", "+CSQ: 17,99", "", "OK", ""]);
    }

    #[test]
    fn empty_reply_has_no_lines() {
        assert!(split_lines(b"").is_empty());
    }

    #[test]
    fn result_code_detection() {
        assert!(ends_with_result_code(b"+CSQ: 5,99\r\n\r\nOK\r\n"));
        assert!(ends_with_result_code(b"\r\nERROR\r\n"));
        assert!(!ends_with_result_code(b"+CSQ: 5,99\r\n"));
    }

    #[test]
    fn scripted_modem_repeats_last_reply() {
        let modem = SimulatedModem::scripted(
            "sim0",
            vec![SimulatedReply::csq(10), SimulatedReply::Silent],
        );
        assert_eq!(modem.execute(SIGNAL_QUALITY).unwrap()[1], "+CSQ: 10,99");
        assert!(modem.execute(SIGNAL_QUALITY).unwrap().is_empty());
        assert!(modem.execute(SIGNAL_QUALITY).unwrap().is_empty());
        assert_eq!(modem.calls(), 3);
    }

    #[test]
    fn demo_modem_cycles() {
        let modem = SimulatedModem::new("sim0");
        let first = modem.execute(SIGNAL_QUALITY).unwrap();
        for _ in 1..DEMO_INDICES.len() {
            modem.execute(SIGNAL_QUALITY).unwrap();
        }
        assert_eq!(modem.execute(SIGNAL_QUALITY).unwrap(), first);
    }

    #[test]
    fn simulated_modem_rejects_other_commands() {
        let modem = SimulatedModem::new("sim0");
        let lines = modem.execute("AT+CGMI").unwrap();
        assert!(lines.iter().any(|l| l == "ERROR"));
    }

    #[test]
    fn unplugged_is_an_open_error() {
        let modem = SimulatedModem::scripted("sim0", vec![SimulatedReply::Unplugged]);
        let err = modem.execute(SIGNAL_QUALITY).unwrap_err();
        assert!(matches!(err, TransportError::Open { ref device, .. } if device == "sim0"));
    }

    #[test]
    fn missing_tty_fails_to_open() {
        let modem = SerialModem::new("/dev/gsm-signal-does-not-exist", &SerialConfig::default());
        let err = modem.execute(SIGNAL_QUALITY).unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }), "got {err}");
    }
}
