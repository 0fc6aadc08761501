//! Heartbeat production for a single container.
//!
//! - `HealthClassifier`: maps the container's raw state to a `HealthState`
//! - `RetryingNotifier`: announces a state, retrying network failures
//! - `HeartbeatLoop`: runs both on a fixed interval until cancelled

mod classifier;
mod notifier;
mod ping_loop;
mod transport;

pub use classifier::{ClassifyError, HealthClassifier, classify_state};
pub use notifier::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, NotifierConfig, NotifyOutcome, RetryingNotifier,
};
pub use ping_loop::{DEFAULT_PING_INTERVAL, HeartbeatLoop, LoopOutcome};
pub use transport::{HeartbeatTransport, ReqwestTransport, TransportError};
