//! Consumers of signal changes.
//!
//! Text and JSON printers live here; the tray icon is in `tray.rs`.

use crate::domain::{Sample, SignalReport};

use serde::Serialize;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Something that wants to hear about new samples.
pub trait Presenter: Send {
    fn notify(&mut self, sample: &Sample) -> anyhow::Result<()>;
}

/// Shared, replaceable presenter slot.
///
/// The sampler dispatches through it and service handles can swap the
/// presenter while the loop runs. Presenter failures are logged here and never
/// reach the caller.
#[derive(Clone, Default)]
pub struct Notifier {
    slot: Arc<Mutex<Option<Box<dyn Presenter>>>>,
}

impl Notifier {
    /// Install `presenter`, returning the one it replaced.
    pub fn replace(&self, presenter: Option<Box<dyn Presenter>>) -> Option<Box<dyn Presenter>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, presenter)
    }

    pub fn dispatch(&self, sample: &Sample) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(presenter) = slot.as_mut() {
            if let Err(e) = presenter.notify(sample) {
                warn!(device = %sample.device, error = %e, "presenter failed");
            }
        }
    }
}

/// `<time>: Signal strength <n> (<tier>), RSSI <rssi>`
pub fn text_line(sample: &Sample) -> String {
    let time = sample.timestamp.format("%Y-%m-%d %H:%M:%S%.6f");
    match sample.reading {
        Some(reading) => format!(
            "{}: Signal strength {} ({}), RSSI {}",
            time,
            reading.strength.trunc() as i64,
            reading.tier,
            reading.rssi
        ),
        None => format!("{}: Signal strength unknown (unknown), RSSI unknown", time),
    }
}

pub struct TextPresenter<W> {
    out: W,
}

impl<W: Write + Send> TextPresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl TextPresenter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> Presenter for TextPresenter<W> {
    fn notify(&mut self, sample: &Sample) -> anyhow::Result<()> {
        writeln!(self.out, "{}", text_line(sample))?;
        self.out.flush()?;
        Ok(())
    }
}

/// serde_json formatter that puts a space after `:` and `,` while keeping
/// each record on one line.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

pub fn write_json_line<W: Write>(out: &mut W, sample: &Sample) -> anyhow::Result<()> {
    let report = SignalReport::from(sample);
    let mut ser = serde_json::Serializer::with_formatter(&mut *out, SpacedFormatter);
    report.serialize(&mut ser)?;
    out.write_all(b"\n")?;
    Ok(())
}

pub struct JsonPresenter<W> {
    out: W,
}

impl<W: Write + Send> JsonPresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl JsonPresenter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> Presenter for JsonPresenter<W> {
    fn notify(&mut self, sample: &Sample) -> anyhow::Result<()> {
        write_json_line(&mut self.out, sample)?;
        self.out.flush()?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Failing, Recorder};
    use super::*;
    use crate::domain::{QualityTier, Reading, RssiEstimate};
    use chrono::{Local, SecondsFormat, TimeZone};

    fn sample(reading: Option<Reading>) -> Sample {
        Sample {
            device: "/dev/ttyUSB2".into(),
            timestamp: Local.with_ymd_and_hms(2026, 5, 4, 21, 15, 7).unwrap(),
            reading,
        }
    }

    fn good17() -> Reading {
        Reading {
            strength: 17.0,
            rssi: RssiEstimate::Dbm(-79),
            tier: QualityTier::Good,
        }
    }

    #[test]
    fn json_line_matches_expected_layout() {
        let s = sample(Some(good17()));
        let mut out = Vec::new();
        write_json_line(&mut out, &s).unwrap();

        let iso = s.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false);
        let expected = format!(
            "{{\"time\": \"{}\", \"strength\": 17.0, \"assessment\": \"Good\", \"rssi\": \"-79 dBm\"}}\n",
            iso
        );
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn json_line_for_unknown_uses_nulls() {
        let mut out = Vec::new();
        write_json_line(&mut out, &sample(None)).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.ends_with(
            "\"strength\": null, \"assessment\": null, \"rssi\": null}\n"
        ));

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert!(parsed["time"].as_str().unwrap().starts_with("2026-05-04T21:15:07"));
    }

    #[test]
    fn text_line_truncates_strength() {
        let mut reading = good17();
        reading.strength = 17.99;
        assert_eq!(
            text_line(&sample(Some(reading))),
            "2026-05-04 21:15:07.000000: Signal strength 17 (Good), RSSI -79 dBm"
        );
    }

    #[test]
    fn text_line_for_unknown() {
        assert_eq!(
            text_line(&sample(None)),
            "2026-05-04 21:15:07.000000: Signal strength unknown (unknown), RSSI unknown"
        );
    }

    #[test]
    fn text_presenter_writes_one_line_per_notify() {
        let mut presenter = TextPresenter::new(Vec::new());
        presenter.notify(&sample(Some(good17()))).unwrap();
        presenter.notify(&sample(None)).unwrap();
        let written = String::from_utf8(presenter.out).unwrap();
        assert_eq!(written.lines().count(), 2);
    }

    #[test]
    fn notifier_swallows_presenter_errors() {
        let failing = Failing::default();
        let notifier = Notifier::default();
        notifier.replace(Some(Box::new(failing.clone())));
        notifier.dispatch(&sample(None));
        notifier.dispatch(&sample(None));
        assert_eq!(failing.attempts(), 2);
    }

    #[test]
    fn notifier_replace_affects_later_dispatches_only() {
        let first = Recorder::default();
        let second = Recorder::default();
        let notifier = Notifier::default();

        notifier.dispatch(&sample(None));
        notifier.replace(Some(Box::new(first.clone())));
        notifier.dispatch(&sample(None));
        let old = notifier.replace(Some(Box::new(second.clone())));
        notifier.dispatch(&sample(Some(good17())));

        assert!(old.is_some());
        assert_eq!(first.samples().len(), 1);
        assert_eq!(second.samples(), vec![sample(Some(good17()))]);
    }
}
