//! Health classification announced to the heartbeat collector.

use strum::{Display, EnumString};

/// Health of a container at a point in time.
///
/// Every state maps to the URL suffix appended to the container's heartbeat
/// base URL when the state is announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum HealthState {
    /// Running and passing its health check (or it has none).
    Healthy,
    /// Stopped, paused, restarting, dead or failing its health check.
    Unhealthy,
    /// Running but its health check has not settled yet.
    Starting,
}

impl HealthState {
    /// URL suffix used when announcing this state.
    pub fn url_suffix(self) -> &'static str {
        match self {
            HealthState::Healthy => "",
            HealthState::Unhealthy => "/fail",
            HealthState::Starting => "/start",
        }
    }

    /// Full heartbeat URL for this state.
    pub fn heartbeat_url(self, base_url: &str) -> String {
        format!("{}{}", base_url, self.url_suffix())
    }
}
