//! Container supervision.
//!
//! The [`FleetWatcher`] discovers labelled containers and spawns one
//! [`UnitSupervisor`] per container. Each supervisor reacts to the
//! container's lifecycle events by restarting its heartbeat loop.
//!
//! Cancellation flows down a token tree: root token, fleet, supervisor,
//! heartbeat loop.

mod fleet;
mod restart_tracker;
mod unit;

pub use fleet::{
    DEFAULT_FETCH_INTERVAL, DEFAULT_LABEL, DEFAULT_SHUTDOWN_TIMEOUT, FleetConfig, FleetWatcher,
    parse_heartbeat_url,
};
pub use restart_tracker::{RestartDecision, RestartTracker, RestartTrackerConfig};
pub use unit::{
    SupervisorConfig, SupervisorError, SupervisorOutcome, SupervisorReport, SupervisorResult,
    UnitSupervisor,
};
