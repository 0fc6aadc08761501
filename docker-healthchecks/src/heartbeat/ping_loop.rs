//! Periodic classify-and-announce loop for one container.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::classifier::{ClassifyError, HealthClassifier};
use super::notifier::RetryingNotifier;
use super::transport::HeartbeatTransport;
use crate::domain::{HealthState, MonitoredUnit, StateChange};
use crate::runtime::ContainerRuntime;

/// Default time between two heartbeats.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Why a heartbeat loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The cancellation token was triggered.
    Cancelled,
    /// The container could not be found anymore.
    UnitGone,
}

/// Classifies a container and announces the result on a fixed interval.
///
/// Cancellation is observed while sleeping and before each tick. An
/// in-flight heartbeat, including its retries, is never interrupted.
pub struct HeartbeatLoop<R: ContainerRuntime, T: HeartbeatTransport> {
    unit: MonitoredUnit,
    classifier: HealthClassifier<R>,
    notifier: Arc<RetryingNotifier<T>>,
    ping_interval: Duration,
    cancellation_token: CancellationToken,
}

impl<R: ContainerRuntime, T: HeartbeatTransport> HeartbeatLoop<R, T> {
    pub fn new(
        unit: MonitoredUnit,
        classifier: HealthClassifier<R>,
        notifier: Arc<RetryingNotifier<T>>,
        ping_interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            unit,
            classifier,
            notifier,
            ping_interval,
            cancellation_token,
        }
    }

    /// Run until cancelled or until the container disappears.
    pub async fn run(mut self) -> LoopOutcome {
        loop {
            if self.cancellation_token.is_cancelled() {
                debug!(container = %self.unit, "Heartbeat loop cancelled");
                return LoopOutcome::Cancelled;
            }

            match self.classifier.classify(self.unit.id()).await {
                Ok(state) => {
                    self.announce(state).await;
                }
                Err(ClassifyError::UnitNotFound(_)) => {
                    warn!(container = %self.unit, "Could not find container, stopping heartbeats");
                    return LoopOutcome::UnitGone;
                }
                Err(e) => {
                    error!(container = %self.unit, error = %e, "Could not determine container health");
                }
            }

            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    debug!(container = %self.unit, "Heartbeat loop cancelled while waiting");
                    return LoopOutcome::Cancelled;
                }

                _ = tokio::time::sleep(self.ping_interval) => {}
            }
        }
    }

    /// Send `state` and return the change it represents, if any.
    pub(crate) async fn announce(&mut self, state: HealthState) -> Option<StateChange> {
        let change = self.unit.state_change(state);
        if let Some(ref change) = change {
            info!(container = %self.unit, "Container status changed: {}", change);
        }
        debug!(container = %self.unit, %state, "Container ping");

        self.notifier.notify(self.unit.base_url(), state).await;
        self.unit.record_announced(state);
        change
    }
}
