//! Drive a managed service up or down and confirm it via health polling

use crate::config::{Config, ServiceConfig};
use crate::error::{Error, Result, RunState};
use crate::healthcheck::{HealthProbe, ProbeOutcome};
use crate::process::{ControlAction, ServiceControl};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Issues control commands and polls health endpoints until a service
/// reaches the requested run state.
///
/// Calls are sequential: each one occupies the caller for at most the given
/// budget plus one probe timeout. Two calls targeting the same service must
/// not overlap.
pub struct ServicePoller {
    services: HashMap<String, ServiceConfig>,
    control: ServiceControl,
    probe: HealthProbe,
    max_wait: Duration,
    poll_interval: Duration,
}

impl ServicePoller {
    pub fn new(
        services: HashMap<String, ServiceConfig>,
        control: ServiceControl,
        probe: HealthProbe,
    ) -> Self {
        let defaults = crate::config::PollConfig::default();
        Self {
            services,
            control,
            probe,
            max_wait: defaults.max_wait(),
            poll_interval: defaults.poll_interval(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let control = ServiceControl::from_config(&config.control)?;
        let probe = HealthProbe::from_config(&config.poll);
        Ok(Self::new(config.services.clone(), control, probe)
            .with_defaults(config.poll.max_wait(), config.poll.poll_interval()))
    }

    /// Budget and interval used by the `*_default` variants
    pub fn with_defaults(mut self, max_wait: Duration, poll_interval: Duration) -> Self {
        self.max_wait = max_wait;
        self.poll_interval = poll_interval;
        self
    }

    pub fn port(&self, service: &str) -> Result<u16> {
        self.services
            .get(service)
            .map(|s| s.port)
            .ok_or_else(|| Error::UnknownService(service.to_string()))
    }

    /// Stop `service` and wait until its health endpoint refuses connections
    pub async fn bring_down(
        &self,
        service: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        self.transition(service, RunState::Down, max_wait, poll_interval)
            .await
    }

    /// Start `service` and wait until its health endpoint answers 200
    pub async fn bring_up(
        &self,
        service: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        self.transition(service, RunState::Up, max_wait, poll_interval)
            .await
    }

    pub async fn bring_down_default(&self, service: &str) -> Result<()> {
        self.bring_down(service, self.max_wait, self.poll_interval)
            .await
    }

    pub async fn bring_up_default(&self, service: &str) -> Result<()> {
        self.bring_up(service, self.max_wait, self.poll_interval)
            .await
    }

    async fn transition(
        &self,
        service: &str,
        target: RunState,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        let port = self.port(service)?;
        let action = match target {
            RunState::Down => ControlAction::Stop,
            RunState::Up => ControlAction::Start,
        };

        // Exit status is informational; the health endpoint is the source of truth.
        match self.control.run(action, service).await {
            Ok(out) if !out.success() => {
                warn!(service, action = action.as_str(), status = %out.status, "Control command exited unsuccessfully");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(service, action = action.as_str(), error = %e, "Control command failed");
            }
        }

        info!(
            service,
            port,
            url = %self.probe.url(port),
            max_wait_ms = max_wait.as_millis() as u64,
            "Waiting for service to reach {:?}",
            target
        );

        let start = Instant::now();
        let mut attempt: u32 = 0;

        while start.elapsed() < max_wait {
            attempt += 1;
            let outcome = self.probe.check(port).await;

            if reached(target, &outcome) {
                info!(
                    service,
                    attempt,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Service {}",
                    target
                );
                return Ok(());
            }

            debug!(service, attempt, ?outcome, "Service not yet {:?}", target);
            tokio::time::sleep(poll_interval).await;
        }

        let waited = start.elapsed();
        warn!(
            service,
            attempt,
            elapsed_ms = waited.as_millis() as u64,
            "Service never {}",
            target
        );

        Err(Error::ServiceTransitionTimeout {
            service: service.to_string(),
            target,
            waited,
        })
    }
}

/// Whether a single probe outcome confirms `target`
fn reached(target: RunState, outcome: &ProbeOutcome) -> bool {
    match target {
        RunState::Down => outcome.is_refused(),
        RunState::Up => outcome.is_ok(),
    }
}
