use chrono::{DateTime, Local, SecondsFormat};
use serde::Serialize;
use std::fmt;

/// qualitative signal bucket derived from the csq index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum QualityTier {
    None,
    Marginal,
    #[serde(rename = "OK")]
    Ok,
    Good,
    Excellent,
}

impl QualityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityTier::None => "None",
            QualityTier::Marginal => "Marginal",
            QualityTier::Ok => "OK",
            QualityTier::Good => "Good",
            QualityTier::Excellent => "Excellent",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// estimated received signal strength
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RssiEstimate {
    /// index 0, weaker than the table covers
    Below,
    Dbm(i32),
    /// index 31, stronger than the table covers
    Above,
}

impl fmt::Display for RssiEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RssiEstimate::Below => f.write_str("< -113 dBm"),
            RssiEstimate::Dbm(dbm) => write!(f, "{} dBm", dbm),
            RssiEstimate::Above => f.write_str("> -51 dBm"),
        }
    }
}

/// a parsed signal index together with everything derived from it
///
/// keeping these in one struct means a sample either has all three or none.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub strength: f64,
    pub rssi: RssiEstimate,
    pub tier: QualityTier,
}

/// one signal check result
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// serial endpoint the sample came from (e.g. "/dev/ttyUSB2")
    pub device: String,
    /// local time of the last reply from the modem
    pub timestamp: DateTime<Local>,
    /// `None` when the modem gave no usable signal index
    pub reading: Option<Reading>,
}

impl Sample {
    pub fn unknown(device: impl Into<String>, timestamp: DateTime<Local>) -> Self {
        Self {
            device: device.into(),
            timestamp,
            reading: None,
        }
    }

    pub fn raw_strength(&self) -> Option<f64> {
        self.reading.map(|r| r.strength)
    }

    pub fn tier(&self) -> Option<QualityTier> {
        self.reading.map(|r| r.tier)
    }

    pub fn rssi(&self) -> Option<RssiEstimate> {
        self.reading.map(|r| r.rssi)
    }
}

/// the record written once per change in json mode
///
/// field order is the output key order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SignalReport {
    pub time: String,
    pub strength: Option<f64>,
    pub assessment: Option<QualityTier>,
    pub rssi: Option<String>,
}

impl From<&Sample> for SignalReport {
    fn from(sample: &Sample) -> Self {
        Self {
            time: sample.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
            strength: sample.raw_strength(),
            assessment: sample.tier(),
            rssi: sample.rssi().map(|r| r.to_string()),
        }
    }
}
