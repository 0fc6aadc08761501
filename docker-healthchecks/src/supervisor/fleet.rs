//! Discovery of labelled containers and ownership of their supervisors.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use url::Url;

use super::unit::{SupervisorConfig, SupervisorResult, UnitSupervisor};
use crate::domain::{DiscoveredUnit, short_id};
use crate::error::{Error, Result};
use crate::heartbeat::{HeartbeatTransport, RetryingNotifier};
use crate::runtime::ContainerRuntime;

/// Label carrying the heartbeat base URL.
pub const DEFAULT_LABEL: &str = "healthchecks.url";

/// Default time supervisors get to stop on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time between two full container listings.
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(600);

/// Fleet watcher configuration.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Label selecting supervised containers.
    pub label: String,
    /// How long to wait for supervisors on shutdown before aborting them.
    pub shutdown_timeout: Duration,
    /// Time between two full listings picking up unsupervised containers.
    pub fetch_interval: Duration,
    pub supervisor: SupervisorConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            fetch_interval: DEFAULT_FETCH_INTERVAL,
            supervisor: SupervisorConfig::default(),
        }
    }
}

/// Validate a heartbeat base URL taken from a container label.
pub fn parse_heartbeat_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::invalid_url(raw, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(Error::invalid_url(
            raw,
            format!("unsupported scheme '{scheme}'"),
        )),
    }
}

/// Runs one [`UnitSupervisor`] per labelled container.
///
/// Existing containers are picked up at startup, new ones from the creation
/// feed. A periodic full listing picks up containers whose supervisor ended
/// while they kept running. A container is never supervised twice at the
/// same time.
pub struct FleetWatcher<R: ContainerRuntime, T: HeartbeatTransport> {
    runtime: Arc<R>,
    notifier: Arc<RetryingNotifier<T>>,
    config: FleetConfig,
    supervisors: JoinSet<SupervisorResult>,
    /// Supervisor task to container id.
    tasks: HashMap<task::Id, String>,
    /// Containers with a running supervisor.
    active: HashSet<String>,
    cancellation_token: CancellationToken,
    /// Parent of all supervisor tokens.
    supervisor_token: CancellationToken,
}

impl<R: ContainerRuntime, T: HeartbeatTransport> FleetWatcher<R, T> {
    pub fn new(
        runtime: Arc<R>,
        notifier: Arc<RetryingNotifier<T>>,
        config: FleetConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        let supervisor_token = cancellation_token.child_token();
        Self {
            runtime,
            notifier,
            config,
            supervisors: JoinSet::new(),
            tasks: HashMap::new(),
            active: HashSet::new(),
            cancellation_token,
            supervisor_token,
        }
    }

    /// Supervise labelled containers until cancelled.
    ///
    /// Returns an error if discovery fails or the creation feed ends. In
    /// both cases running supervisors are stopped first.
    pub async fn run(mut self) -> Result<()> {
        info!(label = %self.config.label, "Watching for labelled containers");

        // Subscribe before listing so nothing created in between is missed.
        let mut creations = self
            .runtime
            .subscribe_creations(&self.config.label)
            .await?;

        match self.runtime.list_units(&self.config.label).await {
            Ok(units) => {
                info!(count = units.len(), "Found existing containers");
                for unit in units {
                    self.supervise(unit);
                }
            }
            Err(e) => {
                self.shutdown().await;
                return Err(e.into());
            }
        }

        // The first tick of an interval completes immediately.
        let mut resync =
            tokio::time::interval(self.config.fetch_interval.max(Duration::from_secs(1)));
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        resync.tick().await;

        let result = loop {
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    info!("Fleet watcher shutting down");
                    break Ok(());
                }

                Some(joined) = self.supervisors.join_next_with_id(), if !self.supervisors.is_empty() => {
                    self.reap(joined);
                }

                unit = creations.next() => {
                    match unit {
                        Some(unit) => {
                            info!(container = %unit, "Container created");
                            self.supervise(unit);
                        }
                        None => {
                            error!("Container creation feed ended");
                            break Err(Error::other("container creation feed ended"));
                        }
                    }
                }

                _ = resync.tick() => self.resync().await,
            }
        };

        drop(creations);
        self.shutdown().await;
        result
    }

    /// List all labelled containers and supervise those without a supervisor.
    async fn resync(&mut self) {
        match self.runtime.list_units(&self.config.label).await {
            Ok(units) => {
                debug!(count = units.len(), "Resynchronizing containers");
                for unit in units {
                    self.supervise(unit);
                }
            }
            Err(e) => warn!(error = %e, "Failed to list containers, retrying later"),
        }
    }

    fn supervise(&mut self, unit: DiscoveredUnit) {
        if let Err(e) = parse_heartbeat_url(&unit.url) {
            warn!(container = %unit, error = %e, "Skipping container");
            return;
        }
        if self.active.contains(&unit.id) {
            debug!(container = %unit, "Container is already supervised");
            return;
        }

        info!(container = %unit, "Supervising container");
        let span = info_span!("supervisor", container = %short_id(&unit.id));
        let unit_id = unit.id.clone();
        let supervisor = UnitSupervisor::new(
            unit,
            self.runtime.clone(),
            self.notifier.clone(),
            self.config.supervisor.clone(),
            self.supervisor_token.child_token(),
        );

        let handle = self.supervisors.spawn(supervisor.run().instrument(span));
        self.tasks.insert(handle.id(), unit_id.clone());
        self.active.insert(unit_id);
    }

    fn reap(&mut self, joined: std::result::Result<(task::Id, SupervisorResult), JoinError>) {
        let (task_id, result) = match joined {
            Ok((task_id, result)) => (task_id, Ok(result)),
            Err(e) => (e.id(), Err(e)),
        };
        let unit_id = self.tasks.remove(&task_id).unwrap_or_default();
        self.active.remove(&unit_id);
        let container = short_id(&unit_id);

        match result {
            Ok(Ok(report)) => info!(
                container = %container,
                outcome = ?report.outcome,
                loop_restarts = report.loop_restarts,
                "Supervisor finished"
            ),
            Ok(Err(e)) => error!(container = %container, error = %e, "Supervisor failed"),
            Err(e) if e.is_cancelled() => debug!(container = %container, "Supervisor aborted"),
            Err(e) => error!(container = %container, error = %e, "Supervisor crashed"),
        }
    }

    async fn shutdown(&mut self) {
        self.supervisor_token.cancel();
        if self.supervisors.is_empty() {
            return;
        }

        info!(
            count = self.supervisors.len(),
            "Waiting for supervisors to stop (timeout: {:?})", self.config.shutdown_timeout
        );
        // Far-future timeouts are clamped by the timer.
        let deadline = tokio::time::sleep(self.config.shutdown_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        remaining = self.supervisors.len(),
                        "Shutdown timeout reached, aborting supervisors"
                    );
                    self.supervisors.abort_all();
                    while let Some(joined) = self.supervisors.join_next_with_id().await {
                        self.reap(joined);
                    }
                    break;
                }

                joined = self.supervisors.join_next_with_id() => {
                    match joined {
                        Some(joined) => self.reap(joined),
                        None => break,
                    }
                }
            }
        }
        debug!("All supervisors stopped");
    }
}
