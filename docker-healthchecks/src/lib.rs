//! Reports the health of labelled Docker containers to a heartbeat
//! collector such as healthchecks.io.
//!
//! Every container carrying the configured label gets its own supervisor.
//! The supervisor pings `<url>`, `<url>/start` or `<url>/fail` on a fixed
//! interval depending on the container's health, and restarts its heartbeat
//! loop whenever the container changes state.

pub mod config;
pub mod domain;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod runtime;
pub mod supervisor;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
