//! Lifecycle supervisor for a single container.
//!
//! The supervisor owns one container's event feed and its heartbeat loop:
//! - starts a heartbeat loop as soon as the event feed is open
//! - restarts the loop on every non-terminal lifecycle event
//! - sends a final unhealthy heartbeat and stops on `destroy`
//! - restarts a crashed loop with backoff, and gives up after repeated crashes
//! - stops when the feed closes, the container vanishes or on shutdown
//!
//! Events are handled strictly one at a time in feed order. Restarting a loop
//! only requests cancellation of the old one, so one stale heartbeat may
//! still go out while the new loop starts.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::domain::{DiscoveredUnit, EventFilter, EventRecord, HealthState, MonitoredUnit};
use crate::heartbeat::{
    DEFAULT_PING_INTERVAL, HealthClassifier, HeartbeatLoop, HeartbeatTransport, LoopOutcome,
    RetryingNotifier,
};
use crate::runtime::{ContainerRuntime, RuntimeError};

use super::restart_tracker::{RestartDecision, RestartTracker, RestartTrackerConfig};

/// Result type of a supervisor run.
pub type SupervisorResult = Result<SupervisorReport, SupervisorError>;

/// Configuration shared by all unit supervisors.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Time between two heartbeats of one container.
    pub ping_interval: Duration,
    /// Backoff for heartbeat loops that crash.
    pub restart: RestartTrackerConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            restart: RestartTrackerConfig::default(),
        }
    }
}

/// Why supervision of a container ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// A `destroy` event was received.
    Destroyed,
    /// The runtime stopped knowing the container.
    Vanished,
    /// The event feed closed without a `destroy` event.
    StreamEnded,
    /// The heartbeat loop kept crashing.
    Crashed,
    /// The process is shutting down.
    Shutdown,
}

/// Errors that end supervision of a container.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("could not subscribe to events of container {unit_id}: {source}")]
    Subscribe {
        unit_id: String,
        #[source]
        source: RuntimeError,
    },
}

/// Summary of a finished supervisor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    pub unit_id: String,
    pub outcome: SupervisorOutcome,
    /// Number of heartbeat loops started after the first one.
    pub loop_restarts: usize,
}

/// The heartbeat loop currently owned by a supervisor.
struct ActiveLoop {
    token: CancellationToken,
    handle: JoinHandle<LoopOutcome>,
}

impl ActiveLoop {
    /// Request cancellation without waiting for the task to finish.
    fn cancel(&self) {
        self.token.cancel();
    }
}

/// Supervises a single container until it is destroyed.
pub struct UnitSupervisor<R: ContainerRuntime, T: HeartbeatTransport> {
    unit: DiscoveredUnit,
    runtime: Arc<R>,
    notifier: Arc<RetryingNotifier<T>>,
    config: SupervisorConfig,
    cancellation_token: CancellationToken,
    restarts: RestartTracker,
    loop_restarts: usize,
}

impl<R: ContainerRuntime, T: HeartbeatTransport> UnitSupervisor<R, T> {
    pub fn new(
        unit: DiscoveredUnit,
        runtime: Arc<R>,
        notifier: Arc<RetryingNotifier<T>>,
        config: SupervisorConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        let restarts = RestartTracker::new(config.restart.clone());
        Self {
            unit,
            runtime,
            notifier,
            config,
            cancellation_token,
            restarts,
            loop_restarts: 0,
        }
    }

    /// Run until the container is destroyed or supervision is cancelled.
    ///
    /// Only a failure to open the event feed is reported as an error.
    pub async fn run(mut self) -> SupervisorResult {
        let filter = EventFilter::for_unit(&self.unit.id);
        let mut events = self
            .runtime
            .subscribe_events(&filter)
            .await
            .map_err(|source| SupervisorError::Subscribe {
                unit_id: self.unit.id.clone(),
                source,
            })?;

        debug!(container = %self.unit, "Watching container events");
        let mut active = self.start_loop(Duration::ZERO);

        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    active.cancel();
                    debug!(container = %self.unit, "Supervisor shutting down");
                    break SupervisorOutcome::Shutdown;
                }

                event = events.next() => {
                    let Some(event) = event else {
                        active.cancel();
                        warn!(
                            container = %self.unit,
                            "Event feed ended without a destroy event, stopping supervision"
                        );
                        break SupervisorOutcome::StreamEnded;
                    };

                    active.cancel();
                    if self.handle_event(&event).await {
                        break SupervisorOutcome::Destroyed;
                    }
                    active = self.restart_loop(Duration::ZERO);
                }

                joined = &mut active.handle => {
                    match joined {
                        Ok(LoopOutcome::UnitGone) => {
                            self.send_final_heartbeat().await;
                            break SupervisorOutcome::Vanished;
                        }
                        // The loop token is a child of ours, so this only
                        // happens while shutting down.
                        Ok(LoopOutcome::Cancelled) => break SupervisorOutcome::Shutdown,
                        Err(e) => match self.restarts.record_failure() {
                            RestartDecision::Restart(delay) => {
                                error!(
                                    container = %self.unit,
                                    error = %e,
                                    crashes = self.restarts.recent_failures(),
                                    "Heartbeat loop crashed, restarting in {:?}", delay
                                );
                                active = self.restart_loop(delay);
                            }
                            RestartDecision::GiveUp => {
                                error!(
                                    container = %self.unit,
                                    error = %e,
                                    "Heartbeat loop keeps crashing, giving up"
                                );
                                break SupervisorOutcome::Crashed;
                            }
                        },
                    }
                }
            }
        };

        // Closes the event feed.
        drop(events);

        match outcome {
            SupervisorOutcome::Destroyed | SupervisorOutcome::Vanished => {
                info!(container = %self.unit, "Container destroyed");
            }
            SupervisorOutcome::StreamEnded
            | SupervisorOutcome::Crashed
            | SupervisorOutcome::Shutdown => {
                info!(container = %self.unit, ?outcome, "Stopped supervising container");
            }
        }

        Ok(SupervisorReport {
            unit_id: self.unit.id,
            outcome,
            loop_restarts: self.loop_restarts,
        })
    }

    /// Handle one event. Returns true if supervision should end.
    async fn handle_event(&self, event: &EventRecord) -> bool {
        debug!(container = %self.unit, kind = %event.kind, "Container event");

        if event.kind.is_terminal() {
            self.send_final_heartbeat().await;
            return true;
        }
        false
    }

    async fn send_final_heartbeat(&self) {
        self.notifier
            .notify(&self.unit.url, HealthState::Unhealthy)
            .await;
    }

    /// Build a heartbeat loop with no announced state.
    fn build_loop(&self, token: CancellationToken) -> HeartbeatLoop<R, T> {
        HeartbeatLoop::new(
            MonitoredUnit::from(self.unit.clone()),
            HealthClassifier::new(self.runtime.clone()),
            self.notifier.clone(),
            self.config.ping_interval,
            token,
        )
    }

    /// Spawn a fresh heartbeat loop that starts ticking after `delay`.
    fn start_loop(&self, delay: Duration) -> ActiveLoop {
        let token = self.cancellation_token.child_token();
        let heartbeat_loop = self.build_loop(token.clone());

        let loop_token = token.clone();
        let task = async move {
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => return LoopOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            heartbeat_loop.run().await
        };
        let handle = tokio::spawn(task.in_current_span());
        ActiveLoop { token, handle }
    }

    fn restart_loop(&mut self, delay: Duration) -> ActiveLoop {
        self.loop_restarts += 1;
        self.start_loop(delay)
    }
}
