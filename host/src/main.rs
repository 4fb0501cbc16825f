//! ==============================================================================
//! main.rs - gsm signal meter entry point
//! ==============================================================================
//!
//! purpose:
//!     asks a gsm modem for its signal quality (AT+CSQ) every few seconds and
//!     reports changes as text, json lines or a tray icon.
//!
//! responsibilities:
//!     - parse and validate the command line before touching the device
//!     - load configuration and set up logging (stderr, stdout is output)
//!     - wire transport -> sampler -> polling service -> presenter
//!     - run once, or poll until ctrl-c / tray "Close" / tray loss / transport failure
//!
//! relationships:
//!     - cli.rs: options and usage errors
//!     - config.rs: gsm-signal.toml
//!     - transport.rs, at.rs: talking to the modem
//!     - signal.rs: parsing and classification
//!     - service.rs: polling loop
//!     - presenter.rs, tray.rs: output
//!
//! architecture:
//!
//!     ┌──────────┐   ┌───────────┐   ┌───────────────┐   ┌────────────────┐
//!     │ timer    │──>│ sampler   │──>│ change check  │──>│ presenter      │
//!     │ (tokio)  │   │ AT+CSQ    │   │ raw index     │   │ text/json/tray │
//!     └──────────┘   └─────┬─────┘   └───────────────┘   └────────────────┘
//!                          │ spawn_blocking
//!                    ┌─────┴─────┐
//!                    │ /dev/tty* │  opened and closed per tick
//!                    └───────────┘
//!
//! ==============================================================================

mod at;
mod cli;
mod config;
mod domain;
mod presenter;
mod service;
mod signal;
mod transport;
#[cfg_attr(not(feature = "tray"), allow(dead_code))]
mod tray;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use at::AtCommand;
use cli::{Cli, Mode, RunOptions, UsageError};
use config::GsmConfig;
use presenter::{JsonPresenter, Presenter, TextPresenter};
use service::{PollingService, ServiceHandle};
use signal::SignalSampler;
use transport::{ModemPort, SerialModem, SimulatedModem};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // step 1: command line (clap exits with a usage error on bad arguments)
    let cli = Cli::parse();

    // step 2: configuration, then logging at the configured level
    let config = load_config(&cli)?;

    // step 3: validate the mode combination before any device is opened
    let options = match RunOptions::from_cli(&cli, config.polling.interval_seconds) {
        Ok(options) => options,
        Err(e) => usage_error(e),
    };

    // step 4: modem -> sampler -> service
    let port: Arc<dyn ModemPort> = if cli.simulate {
        info!(device = %cli.device, "using simulated modem");
        Arc::new(SimulatedModem::new(&cli.device))
    } else {
        Arc::new(SerialModem::new(&cli.device, &config.serial))
    };
    let sampler = SignalSampler::new(AtCommand::signal_quality(port), config.signal.tier_policy);
    let mut service = PollingService::new(sampler, options.interval);

    // step 5: presenter for the selected output
    let presenter: Box<dyn Presenter> = match options.mode {
        Mode::Text if options.json => Box::new(JsonPresenter::stdout()),
        Mode::Text => Box::new(TextPresenter::stdout()),
        Mode::Tray => tray_presenter(&config, service.handle())?,
    };
    service.set_presenter(presenter);

    // step 6: run
    if options.once {
        service
            .sample_once_until_interrupted()
            .await
            .with_context(|| format!("signal check on {} failed", cli.device))?;
        return Ok(ExitCode::SUCCESS);
    }

    match service.run_until_interrupted().await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        // already logged by the service
        Err(_) => Ok(ExitCode::FAILURE),
    }
}

/// Load the config file and initialise logging.
///
/// `--config` must load; the default locations fall back to built-in
/// defaults with a warning.
fn load_config(cli: &Cli) -> Result<GsmConfig> {
    let path = cli.config.clone().or_else(GsmConfig::locate);
    let loaded = path.as_deref().map(GsmConfig::load).transpose();

    let level = match &loaded {
        Ok(Some(config)) => config.logging.level.clone(),
        _ => config::LoggingConfig::default().level,
    };
    init_logging(&level);

    let config = match (loaded, &path) {
        (Ok(Some(config)), Some(path)) => {
            info!(path = %path.display(), "configuration loaded");
            config
        }
        (Err(e), _) if cli.config.is_some() => return Err(e),
        (Err(e), _) => {
            warn!(error = %e, "ignoring config file, using defaults");
            GsmConfig::default()
        }
        _ => {
            info!("no config file found, using defaults");
            GsmConfig::default()
        }
    };
    config.log_summary();
    Ok(config)
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn usage_error(e: UsageError) -> ! {
    Cli::command()
        .error(clap::error::ErrorKind::ArgumentConflict, e)
        .exit()
}

#[cfg(feature = "tray")]
fn tray_presenter(config: &GsmConfig, service: ServiceHandle) -> Result<Box<dyn Presenter>> {
    let presenter = tray::TrayPresenter::spawn(config.tray.clone(), service)
        .context("tray mode needs a desktop session with a system tray; use -t for text")?;
    Ok(Box::new(presenter))
}

#[cfg(not(feature = "tray"))]
fn tray_presenter(_config: &GsmConfig, _service: ServiceHandle) -> Result<Box<dyn Presenter>> {
    // RunOptions already refuses tray mode in this build
    Err(UsageError::TrayUnavailable.into())
}
