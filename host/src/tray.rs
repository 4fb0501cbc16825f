//! ==============================================================================
//! tray.rs - desktop tray icon presenter (feature "tray")
//! ==============================================================================
//!
//! purpose:
//!     shows the current quality tier as a StatusNotifierItem icon with the
//!     details in the tooltip, and a "Close" menu entry.
//!
//! lifecycle:
//!     the D-Bus service runs on its own thread. if it cannot start (no
//!     session bus, no tray host) startup fails and main exits non-zero; if
//!     it dies later, polling is stopped so the process does not keep running
//!     with nothing on screen.
//!
//! relationships:
//!     - implements: presenter.rs (Presenter)
//!     - uses: service.rs (ServiceHandle, "Close" stops polling which ends main)
//!     - uses: config.rs (TrayConfig icon paths)
//!     - uses: ksni (D-Bus tray protocol), png (icon files → ARGB pixmaps)
//!
//! ==============================================================================

use crate::domain::Sample;

use anyhow::{anyhow, Context};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{error, info};

/// Tooltip before the first sample arrives.
pub const WAITING_TOOLTIP: &str = "Waiting for information";

/// A tray service that has not failed within this long counts as started.
pub const STARTUP_GRACE: Duration = Duration::from_millis(500);

pub fn tooltip(sample: &Sample) -> String {
    match sample.reading {
        Some(reading) => format!(
            "RSSI dBm: {}\nStrength: {:.6}\nAssessment: {}",
            reading.rssi, reading.strength, reading.tier
        ),
        None => "Unknown".to_string(),
    }
}

/// Run a blocking service loop on a named thread and watch it.
///
/// Returns an error when `run` fails, returns or panics within `grace`.
/// Whenever the loop ends, `on_exit` runs on that thread, before the outcome
/// is reported.
pub fn supervise<F, E, X>(name: &str, run: F, grace: Duration, on_exit: X) -> anyhow::Result<()>
where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: fmt::Display,
    X: FnOnce() + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let label = name.to_string();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(run)) {
                Ok(Ok(())) => Err("service loop ended".to_string()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("service thread panicked".to_string()),
            };
            if let Err(reason) = &outcome {
                error!(service = %label, %reason, "stopped");
            }
            on_exit();
            // nobody listens after the grace period
            let _ = tx.send(outcome);
        })
        .with_context(|| format!("cannot start {} thread", name))?;

    match rx.recv_timeout(grace) {
        Err(RecvTimeoutError::Timeout) => {
            info!(service = %name, "started");
            Ok(())
        }
        Ok(Err(reason)) => Err(anyhow!("{} unavailable: {}", name, reason)),
        Ok(Ok(())) => Err(anyhow!("{} exited during startup", name)),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{} thread vanished", name)),
    }
}

#[cfg(feature = "tray")]
pub use icon::TrayPresenter;

#[cfg(feature = "tray")]
mod icon {
    use super::{supervise, tooltip, STARTUP_GRACE, WAITING_TOOLTIP};
    use crate::config::TrayConfig;
    use crate::domain::Sample;
    use crate::presenter::Presenter;
    use crate::service::ServiceHandle;

    use anyhow::{bail, Context};
    use ksni::menu::StandardItem;
    use std::fs::File;
    use std::io::{BufReader, Read};
    use std::path::{Path, PathBuf};
    use tracing::{info, warn};

    pub struct SignalTray {
        icon: PathBuf,
        /// decoded `icon`; when missing, hosts look the file up by name
        pixmap: Option<ksni::Icon>,
        tooltip: String,
        service: ServiceHandle,
    }

    /// (theme directory, icon name) for an icon file path
    fn split_icon_path(path: &Path) -> (String, String) {
        let dir = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = file.strip_suffix(".png").unwrap_or(&file).to_string();
        (dir, name)
    }

    /// Decode a PNG into the ARGB32 (network order) pixmap the tray protocol wants.
    pub fn decode_png<R: Read>(input: R) -> anyhow::Result<ksni::Icon> {
        let mut decoder = png::Decoder::new(input);
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder.read_info()?;
        let mut buf = vec![0; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut buf)?;
        let pixels = &buf[..frame.buffer_size()];

        let data: Vec<u8> = match frame.color_type {
            png::ColorType::Rgba => pixels
                .chunks_exact(4)
                .flat_map(|p| [p[3], p[0], p[1], p[2]])
                .collect(),
            png::ColorType::Rgb => pixels
                .chunks_exact(3)
                .flat_map(|p| [0xff, p[0], p[1], p[2]])
                .collect(),
            png::ColorType::GrayscaleAlpha => pixels
                .chunks_exact(2)
                .flat_map(|p| [p[1], p[0], p[0], p[0]])
                .collect(),
            png::ColorType::Grayscale => pixels.iter().flat_map(|&g| [0xff, g, g, g]).collect(),
            other => bail!("unsupported png color type {:?}", other),
        };
        Ok(ksni::Icon {
            width: frame.width as i32,
            height: frame.height as i32,
            data,
        })
    }

    fn load_icon(path: &Path) -> Option<ksni::Icon> {
        let decoded = File::open(path)
            .with_context(|| format!("cannot open {}", path.display()))
            .and_then(|file| decode_png(BufReader::new(file)));
        match decoded {
            Ok(icon) => Some(icon),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "icon not loaded, falling back to icon name");
                None
            }
        }
    }

    impl ksni::Tray for SignalTray {
        fn id(&self) -> String {
            env!("CARGO_PKG_NAME").into()
        }

        fn title(&self) -> String {
            "GSM signal".into()
        }

        fn icon_pixmap(&self) -> Vec<ksni::Icon> {
            self.pixmap.iter().cloned().collect()
        }

        // hosts prefer a name over the pixmap, so only name the icon when
        // the file could not be decoded
        fn icon_theme_path(&self) -> String {
            match self.pixmap {
                Some(_) => String::new(),
                None => split_icon_path(&self.icon).0,
            }
        }

        fn icon_name(&self) -> String {
            match self.pixmap {
                Some(_) => String::new(),
                None => split_icon_path(&self.icon).1,
            }
        }

        fn tool_tip(&self) -> ksni::ToolTip {
            ksni::ToolTip {
                title: self.title(),
                description: self.tooltip.clone(),
                ..Default::default()
            }
        }

        fn menu(&self) -> Vec<ksni::MenuItem<Self>> {
            vec![StandardItem {
                label: "Close".into(),
                icon_name: "application-exit".into(),
                activate: Box::new(|tray: &mut Self| {
                    info!("close requested from tray");
                    tray.service.stop();
                }),
                ..Default::default()
            }
            .into()]
        }
    }

    pub struct TrayPresenter {
        icons: TrayConfig,
        handle: ksni::Handle<SignalTray>,
    }

    impl TrayPresenter {
        /// Start the tray service on its own thread.
        ///
        /// Fails when no tray can be shown; a later failure stops `service`.
        pub fn spawn(icons: TrayConfig, service: ServiceHandle) -> anyhow::Result<Self> {
            let icon = icons.icon_for(None).to_path_buf();
            let tray = SignalTray {
                pixmap: load_icon(&icon),
                icon,
                tooltip: WAITING_TOOLTIP.to_string(),
                service: service.clone(),
            };
            let tray_service = ksni::TrayService::new(tray);
            let handle = tray_service.handle();
            supervise("tray", move || tray_service.run(), STARTUP_GRACE, move || service.stop())?;
            Ok(Self { icons, handle })
        }
    }

    impl Presenter for TrayPresenter {
        fn notify(&mut self, sample: &Sample) -> anyhow::Result<()> {
            let icon = self.icons.icon_for(sample.tier()).to_path_buf();
            let pixmap = load_icon(&icon);
            let text = tooltip(sample);
            self.handle.update(move |tray: &mut SignalTray| {
                tray.icon = icon;
                tray.pixmap = pixmap;
                tray.tooltip = text;
            });
            Ok(())
        }
    }

}
