//! Signal sampling: run `AT+CSQ`, parse the reply, classify it and notify
//! the presenter when the signal index changes.

use crate::at::AtCommand;
use crate::domain::{QualityTier, Reading, RssiEstimate, Sample};
use crate::presenter::Notifier;
use crate::transport::TransportError;

use chrono::Local;
use serde::Deserialize;
use tracing::{debug, warn};

/// Prefix of the signal quality line in a modem reply.
const CSQ_PREFIX: &str = "+CSQ: ";

/// Valid csq indices are 0..=31; anything else (99 = not known) is unknown.
const CSQ_MAX_INDEX: f64 = 31.0;

/// csq index → dBm for indices 0..=30.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RssiTable([i32; 31]);

impl RssiTable {
    pub fn new() -> Self {
        let mut table = [0i32; 31];
        table[0] = -113;
        for i in 1..table.len() {
            table[i] = if i == 7 { -99 } else { table[i - 1] + 2 };
        }
        Self(table)
    }

    #[cfg(test)]
    pub fn get(&self, index: usize) -> Option<i32> {
        self.0.get(index).copied()
    }

    pub fn estimate(&self, strength: f64) -> RssiEstimate {
        if strength < 1.0 {
            RssiEstimate::Below
        } else if strength <= 30.0 {
            // truncation is the lookup rule; 1.0..=30.0 always indexes in range
            RssiEstimate::Dbm(self.0[strength as usize])
        } else {
            RssiEstimate::Above
        }
    }
}

impl Default for RssiTable {
    fn default() -> Self {
        Self::new()
    }
}

/// How a signal index maps to a quality tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierPolicy {
    /// None < 2, Marginal < 10, OK < 15, Good < 20, Excellent otherwise.
    #[default]
    Banded,
    /// First-match cascade checked in ascending order: everything from 2 up
    /// is Marginal, so OK/Good/Excellent never appear. Only for consumers
    /// that still expect the two-tier output.
    Cascade,
}

impl TierPolicy {
    pub fn classify(self, strength: f64) -> QualityTier {
        if strength < 2.0 {
            return QualityTier::None;
        }
        match self {
            TierPolicy::Cascade => QualityTier::Marginal,
            TierPolicy::Banded if strength < 10.0 => QualityTier::Marginal,
            TierPolicy::Banded if strength < 15.0 => QualityTier::Ok,
            TierPolicy::Banded if strength < 20.0 => QualityTier::Good,
            TierPolicy::Banded => QualityTier::Excellent,
        }
    }
}

/// Pull the signal index out of an `AT+CSQ` reply.
///
/// The text after `": "` is read as a decimal with `,` as separator, so
/// `+CSQ: 17,99` gives `17.99`. Returns `None` when there is no `+CSQ` line,
/// the value does not parse, or it is outside 0..=31.
pub fn parse_csq<S: AsRef<str>>(lines: &[S]) -> Option<f64> {
    let line = lines
        .iter()
        .map(AsRef::as_ref)
        .find(|line| line.contains(CSQ_PREFIX))?;
    let (_, value) = line.split_once(": ")?;
    let value: String = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    match value.parse::<f64>() {
        Ok(strength) if (0.0..CSQ_MAX_INDEX + 1.0).contains(&strength) => Some(strength),
        Ok(strength) => {
            debug!(strength, "signal index out of range, treating as unknown");
            None
        }
        Err(e) => {
            warn!(line, error = %e, "unparseable signal quality line");
            None
        }
    }
}

pub struct SignalSampler {
    command: AtCommand,
    table: RssiTable,
    policy: TierPolicy,
    notifier: Notifier,
    current: Sample,
}

impl SignalSampler {
    pub fn new(command: AtCommand, policy: TierPolicy) -> Self {
        let current = Sample::unknown(command.device(), Local::now());
        Self {
            command,
            table: RssiTable::new(),
            policy,
            notifier: Notifier::default(),
            current,
        }
    }

    pub fn device(&self) -> &str {
        self.command.device()
    }

    /// The last sample produced (or the initial unknown one).
    #[cfg(test)]
    pub fn current(&self) -> &Sample {
        &self.current
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Replace the change handler; `None` silences notifications.
    #[cfg(test)]
    pub fn set_presenter(&self, presenter: Option<Box<dyn crate::presenter::Presenter>>) {
        self.notifier.replace(presenter);
    }

    pub fn classify(&self, strength: f64) -> Reading {
        Reading {
            strength,
            rssi: self.table.estimate(strength),
            tier: self.policy.classify(strength),
        }
    }

    /// Query the modem once.
    ///
    /// A transport failure carries no new information: the presenter sees the
    /// unchanged current sample and the error is returned to the caller. Any
    /// reply, even an empty one, moves the timestamp. A reply without a usable
    /// `+CSQ` line yields an unknown sample and always notifies; otherwise the
    /// presenter is only told when the raw index changed.
    pub async fn sample(&mut self) -> Result<Sample, TransportError> {
        let lines = match self.command.run("").await {
            Ok(lines) => lines,
            Err(e) => {
                self.notifier.dispatch(&self.current);
                return Err(e);
            }
        };
        let timestamp = Local::now();
        let previous = self.current.raw_strength();

        let Some(strength) = parse_csq(lines.as_slice()) else {
            debug!(device = %self.device(), lines = lines.len(), "no signal quality in reply");
            self.current = Sample::unknown(self.device(), timestamp);
            self.notifier.dispatch(&self.current);
            return Ok(self.current.clone());
        };

        let sample = Sample {
            device: self.device().to_owned(),
            timestamp,
            reading: Some(self.classify(strength)),
        };
        if previous != Some(strength) {
            debug!(device = %sample.device, ?previous, strength, "signal changed");
            self.notifier.dispatch(&sample);
        }
        self.current = sample.clone();
        Ok(sample)
    }
}
