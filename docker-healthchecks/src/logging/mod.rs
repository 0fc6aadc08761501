//! Logging setup.
//!
//! Log lines carry local timezone timestamps. `RUST_LOG` overrides the
//! filter derived from `LOG_LEVEL`.

use chrono::Local;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LogLevel;
use crate::error::{Error, Result};

/// Crate target used in filter directives.
const CRATE_TARGET: &str = "docker_healthchecks";

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Filter directive for `level`, e.g. `docker_healthchecks=info`.
pub fn filter_directive(level: LogLevel) -> String {
    format!("{CRATE_TARGET}={level}")
}

/// Build the filter: `RUST_LOG` if set and valid, else the `level` directive.
pub fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(level)))
}

/// Install the global subscriber.
pub fn init_logging(level: LogLevel) -> Result<()> {
    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(fmt::layer().with_timer(LocalTimer).with_target(false))
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to initialize logging: {e}")))
}
