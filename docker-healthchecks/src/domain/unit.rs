//! Monitored containers and their raw runtime state.

use std::fmt;

use super::health::HealthState;

/// Length of the abbreviated container id used in log lines.
pub const SHORT_ID_LEN: usize = 12;

/// Abbreviate a container id the way the Docker CLI does.
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

/// A container found through discovery, before supervision starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUnit {
    /// Full container id.
    pub id: String,
    /// Heartbeat base URL taken from the container label.
    pub url: String,
}

impl DiscoveredUnit {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for DiscoveredUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Container(id={}, url={})", short_id(&self.id), self.url)
    }
}

/// Raw state flags reported by the runtime for one container.
///
/// Always fetched fresh; never cached between classifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitState {
    pub running: bool,
    pub paused: bool,
    pub restarting: bool,
    pub dead: bool,
    /// Health check status, `None` if the container has no health check.
    pub health: Option<String>,
}

impl UnitState {
    /// A running container without a health check.
    pub fn running() -> Self {
        Self {
            running: true,
            ..Self::default()
        }
    }

    /// A running container with the given health check status.
    pub fn running_with_health(health: impl Into<String>) -> Self {
        Self {
            running: true,
            health: Some(health.into()),
            ..Self::default()
        }
    }

    /// Whether any flag marks the container as not operational.
    pub fn is_down(&self) -> bool {
        !self.running || self.paused || self.restarting || self.dead
    }
}

/// A transition between two consecutively announced states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// Previously announced state, `None` on the first tick of a loop.
    pub from: Option<HealthState>,
    pub to: HealthState,
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.from {
            Some(from) => write!(f, "{} -> {}", from, self.to),
            None => write!(f, "none -> {}", self.to),
        }
    }
}

/// A container under supervision, as seen by one heartbeat loop.
///
/// `last_announced` is owned by the loop and only drives change-detection
/// logging; every tick announces regardless.
#[derive(Debug, Clone)]
pub struct MonitoredUnit {
    id: String,
    base_url: String,
    last_announced: Option<HealthState>,
}

impl MonitoredUnit {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            last_announced: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn last_announced(&self) -> Option<HealthState> {
        self.last_announced
    }

    /// Compare `state` with the last announced one.
    ///
    /// Returns `Some` when they differ, including when nothing has been
    /// announced yet.
    pub fn state_change(&self, state: HealthState) -> Option<StateChange> {
        if self.last_announced == Some(state) {
            return None;
        }
        Some(StateChange {
            from: self.last_announced,
            to: state,
        })
    }

    /// Remember `state` as the latest announced one.
    pub fn record_announced(&mut self, state: HealthState) {
        self.last_announced = Some(state);
    }
}

impl From<DiscoveredUnit> for MonitoredUnit {
    fn from(unit: DiscoveredUnit) -> Self {
        Self::new(unit.id, unit.url)
    }
}

impl fmt::Display for MonitoredUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Container(id={}, url={})", self.short_id(), self.base_url)
    }
}
