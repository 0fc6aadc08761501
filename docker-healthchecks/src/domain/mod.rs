//! Domain types for container health supervision.

pub mod event;
pub mod health;
pub mod unit;

pub use event::{EventFilter, EventKind, EventRecord, SUPERVISED_EVENTS};
pub use health::HealthState;
pub use unit::{DiscoveredUnit, MonitoredUnit, StateChange, UnitState, short_id};
