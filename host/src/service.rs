//! ==============================================================================
//! service.rs - polling loop
//! ==============================================================================
//!
//! purpose:
//!     drives the signal sampler on a fixed interval until told to stop.
//!
//! lifecycle:
//!
//!     Stopped --run()--> Running --stop() / ctrl-c / transport error--> Stopped
//!
//!     - first tick runs immediately, the next one `interval` after the
//!       previous tick finished (not aligned to the wall clock)
//!     - stop() wakes a sleeping loop right away; a tick in flight completes
//!     - once Stopped, no further tick is scheduled
//!
//! relationships:
//!     - owns: signal.rs (SignalSampler)
//!     - handed out: ServiceHandle, to main.rs (ctrl-c) and tray.rs (Close)
//!
//! ==============================================================================

use crate::domain::Sample;
use crate::presenter::{Notifier, Presenter};
use crate::signal::SignalSampler;
use crate::transport::TransportError;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Running,
}

/// Cloneable control surface for a running service.
#[derive(Clone)]
pub struct ServiceHandle {
    state: Arc<watch::Sender<ServiceState>>,
    notifier: Notifier,
}

impl ServiceHandle {
    pub fn is_running(&self) -> bool {
        *self.state.borrow() == ServiceState::Running
    }

    /// Running → Stopped. No-op when already stopped.
    pub fn stop(&self) {
        self.state.send_if_modified(|state| {
            let was_running = *state == ServiceState::Running;
            *state = ServiceState::Stopped;
            was_running
        });
    }

    /// Swap the presenter; only later notifications see the new one.
    pub fn set_presenter(&self, presenter: Box<dyn Presenter>) {
        self.notifier.replace(Some(presenter));
    }

    fn start(&self) {
        self.state.send_replace(ServiceState::Running);
    }
}

pub struct PollingService {
    sampler: SignalSampler,
    interval: Duration,
    handle: ServiceHandle,
}

impl PollingService {
    pub fn new(sampler: SignalSampler, interval: Duration) -> Self {
        let (state, _) = watch::channel(ServiceState::Stopped);
        let handle = ServiceHandle {
            state: Arc::new(state),
            notifier: sampler.notifier().clone(),
        };
        Self {
            sampler,
            interval,
            handle,
        }
    }

    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn set_presenter(&self, presenter: Box<dyn Presenter>) {
        self.handle.set_presenter(presenter);
    }

    /// One signal check that gives up when `cancel` completes first.
    ///
    /// `Ok(None)` means cancelled; the port is still closed by the blocking
    /// call once its read times out.
    pub async fn sample_once_or<C>(&mut self, cancel: C) -> Result<Option<Sample>, TransportError>
    where
        C: Future<Output = ()>,
    {
        let device = self.sampler.device().to_owned();
        tokio::select! {
            biased;
            () = cancel => {
                info!(%device, "signal check cancelled");
                Ok(None)
            }
            sample = self.sampler.sample() => sample.map(Some),
        }
    }

    /// One signal check, outside the schedule; Ctrl-C ends it cleanly.
    pub async fn sample_once_until_interrupted(&mut self) -> Result<Option<Sample>, TransportError> {
        self.sample_once_or(interrupted()).await
    }

    /// Poll until stopped.
    ///
    /// Returns the transport error that ended the loop, if any; it has
    /// already been logged.
    pub async fn run(&mut self) -> Result<(), TransportError> {
        self.handle.start();
        // subscribing after start leaves only later transitions as changes
        let mut state = self.handle.state.subscribe();

        info!(device = %self.sampler.device(), interval = ?self.interval, "signal polling started");
        let mut outcome = Ok(());
        loop {
            if let Err(e) = self.tick().await {
                outcome = Err(e);
            }
            if !self.is_running() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if !self.is_running() {
                break;
            }
        }
        info!(device = %self.sampler.device(), "signal polling stopped");
        outcome
    }

    /// Like `run`, but Ctrl-C stops the loop instead of killing the process.
    pub async fn run_until_interrupted(&mut self) -> Result<(), TransportError> {
        let handle = self.handle();
        let interrupt = tokio::spawn(async move {
            interrupted().await;
            handle.stop();
        });
        let outcome = self.run().await;
        interrupt.abort();
        outcome
    }

    async fn tick(&mut self) -> Result<(), TransportError> {
        match self.sampler.sample().await {
            Ok(sample) => {
                debug!(device = %sample.device, strength = ?sample.raw_strength(), "signal checked");
                Ok(())
            }
            Err(e) => {
                error!(device = %self.sampler.device(), error = %e, "signal check failed, stopping");
                self.stop();
                Err(e)
            }
        }
    }
}

/// Resolves on Ctrl-C. Never resolves if the signal cannot be watched.
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupted, stopping"),
        Err(e) => {
            error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::at::AtCommand;
    use crate::presenter::testing::{Failing, Recorder};
    use crate::signal::TierPolicy;
    use crate::transport::{SimulatedModem, SimulatedReply};

    fn service(
        replies: Vec<SimulatedReply>,
        interval: Duration,
    ) -> (PollingService, Arc<SimulatedModem>) {
        let modem = Arc::new(SimulatedModem::scripted("/dev/ttyUSB2", replies));
        let sampler = SignalSampler::new(AtCommand::signal_quality(modem.clone()), TierPolicy::Banded);
        (PollingService::new(sampler, interval), modem)
    }

    async fn within<F: std::future::Future>(fut: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(5), fut)
            .await
            .expect("service did not stop in time")
    }

    #[test]
    fn starts_stopped() {
        let (service, _) = service(vec![SimulatedReply::csq(10)], Duration::from_secs(60));
        assert!(!service.is_running());
        // stopping a stopped service is harmless
        service.stop();
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn transport_failure_stops_polling() {
        let (mut service, modem) = service(
            vec![
                SimulatedReply::csq(10),
                SimulatedReply::csq(11),
                SimulatedReply::Unplugged,
            ],
            Duration::from_millis(10),
        );
        let recorder = Recorder::default();
        service.set_presenter(Box::new(recorder.clone()));

        let outcome = within(service.run()).await;

        assert!(matches!(outcome, Err(TransportError::Open { .. })));
        assert!(!service.is_running());
        assert_eq!(modem.calls(), 3);
        // two changes, then the unchanged last sample on failure
        assert_eq!(recorder.samples().len(), 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(modem.calls(), 3);
    }

    #[tokio::test]
    async fn stop_wakes_sleeping_loop() {
        let (mut service, modem) =
            service(vec![SimulatedReply::csq(20)], Duration::from_secs(3600));
        let recorder = Recorder::default();
        service.set_presenter(Box::new(recorder.clone()));
        let handle = service.handle();

        let stopper = async {
            while recorder.samples().is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            assert!(handle.is_running());
            handle.stop();
        };
        let (outcome, ()) = within(async { tokio::join!(service.run(), stopper) }).await;

        assert!(outcome.is_ok());
        assert!(!handle.is_running());
        assert_eq!(modem.calls(), 1);
    }

    #[tokio::test]
    async fn presenter_errors_do_not_stop_polling() {
        let (mut service, modem) = service(
            vec![
                SimulatedReply::csq(5),
                SimulatedReply::csq(6),
                SimulatedReply::Unplugged,
            ],
            Duration::from_millis(5),
        );
        let failing = Failing::default();
        service.set_presenter(Box::new(failing.clone()));

        let outcome = within(service.run()).await;

        assert!(outcome.is_err());
        assert_eq!(modem.calls(), 3);
        assert_eq!(failing.attempts(), 3);
    }

    #[tokio::test]
    async fn unknown_replies_keep_polling() {
        let (mut service, modem) = service(
            vec![
                SimulatedReply::Silent,
                SimulatedReply::Text("\r\nERROR\r\n".into()),
                SimulatedReply::csq(14),
                SimulatedReply::Unplugged,
            ],
            Duration::from_millis(5),
        );
        let recorder = Recorder::default();
        service.set_presenter(Box::new(recorder.clone()));

        within(service.run()).await.unwrap_err();

        assert_eq!(modem.calls(), 4);
        let strengths: Vec<_> = recorder.samples().iter().map(Sample::raw_strength).collect();
        assert_eq!(strengths, vec![None, None, Some(14.99), Some(14.99)]);
    }

    #[tokio::test]
    async fn presenter_can_be_replaced_between_samples() {
        let (mut service, _) = service(
            vec![SimulatedReply::csq(3), SimulatedReply::csq(4)],
            Duration::from_secs(60),
        );
        let first = Recorder::default();
        let second = Recorder::default();

        service.set_presenter(Box::new(first.clone()));
        service.sample_once_or(std::future::pending()).await.unwrap();
        service.handle().set_presenter(Box::new(second.clone()));
        service.sample_once_or(std::future::pending()).await.unwrap();

        assert_eq!(first.samples().len(), 1);
        assert_eq!(second.samples().len(), 1);
        assert_eq!(second.samples()[0].raw_strength(), Some(4.99));
    }

    #[tokio::test]
    async fn single_check_returns_the_sample() {
        let (mut service, modem) = service(vec![SimulatedReply::csq(21)], Duration::from_secs(60));
        let sample = service
            .sample_once_or(std::future::pending())
            .await
            .unwrap()
            .expect("not cancelled");
        assert_eq!(sample.raw_strength(), Some(21.99));
        assert_eq!(modem.calls(), 1);
    }

    #[tokio::test]
    async fn interrupted_single_check_is_not_an_error() {
        let (mut service, modem) = service(vec![SimulatedReply::csq(21)], Duration::from_secs(60));
        let recorder = Recorder::default();
        service.set_presenter(Box::new(recorder.clone()));

        let outcome = service.sample_once_or(std::future::ready(())).await;

        assert!(matches!(outcome, Ok(None)));
        assert_eq!(modem.calls(), 0);
        assert!(recorder.samples().is_empty());
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn single_check_surfaces_transport_errors() {
        let (mut service, _) = service(vec![SimulatedReply::Unplugged], Duration::from_secs(60));
        let outcome = service.sample_once_or(std::future::pending()).await;
        assert!(matches!(outcome, Err(TransportError::Open { .. })));
    }

    #[tokio::test]
    async fn can_run_again_after_stop() {
        let (mut service, modem) = service(
            vec![SimulatedReply::csq(3), SimulatedReply::Unplugged],
            Duration::from_millis(5),
        );
        within(service.run()).await.unwrap_err();
        within(service.run()).await.unwrap_err();
        assert_eq!(modem.calls(), 3);
    }
}
