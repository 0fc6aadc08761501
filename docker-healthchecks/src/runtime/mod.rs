//! Container runtime interface.
//!
//! Supervisors never talk to Docker directly. Everything they need from the
//! runtime goes through [`ContainerRuntime`]:
//! - `inspect_state`: raw state flags of one container
//! - `subscribe_events`: lazy lifecycle event feed, filtered
//! - `list_units`: labelled containers that already exist
//! - `subscribe_creations`: labelled containers as they are created
//!
//! Event feeds are one-shot. Once a stream ends the consumer has to
//! subscribe again to get a fresh one.

mod docker;

pub use docker::{DEFAULT_COMMAND_TIMEOUT, DockerCli};

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::domain::{DiscoveredUnit, EventFilter, EventRecord, UnitState};

/// Lazy feed of lifecycle events.
pub type EventStream = BoxStream<'static, EventRecord>;

/// Lazy feed of newly created containers.
pub type DiscoveryStream = BoxStream<'static, DiscoveredUnit>;

/// Errors reported by the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The container does not exist (anymore).
    #[error("container {0} not found")]
    NotFound(String),

    #[error("`{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse runtime output: {0}")]
    Parse(String),
}

/// Operations the supervisors need from the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Query the current state of a container.
    ///
    /// Fails with [`RuntimeError::NotFound`] if the container is gone.
    async fn inspect_state(&self, id: &str) -> Result<UnitState, RuntimeError>;

    /// Subscribe to lifecycle events matching `filter`.
    async fn subscribe_events(&self, filter: &EventFilter) -> Result<EventStream, RuntimeError>;

    /// List existing containers carrying `label`, with the label value as URL.
    async fn list_units(&self, label: &str) -> Result<Vec<DiscoveredUnit>, RuntimeError>;

    /// Subscribe to creation of containers carrying `label`.
    async fn subscribe_creations(&self, label: &str) -> Result<DiscoveryStream, RuntimeError>;
}
