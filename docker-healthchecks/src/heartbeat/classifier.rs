//! Container health classification.

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{HealthState, UnitState};
use crate::runtime::{ContainerRuntime, RuntimeError};

/// Health status Docker reports for containers without a health check.
const NO_HEALTH_CHECK: &str = "none";

/// Errors raised while classifying a container.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The container is gone; supervision should stop.
    #[error("container {0} not found")]
    UnitNotFound(String),

    /// The runtime reported a health status with no matching state.
    #[error("unrecognized health status: {0}")]
    UnrecognizedHealth(String),

    /// The runtime could not be queried.
    #[error(transparent)]
    Runtime(RuntimeError),
}

impl From<RuntimeError> for ClassifyError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(id) => ClassifyError::UnitNotFound(id),
            other => ClassifyError::Runtime(other),
        }
    }
}

/// Map a raw state snapshot to a [`HealthState`].
///
/// Any of not running, paused, restarting or dead wins over the health
/// check result.
pub fn classify_state(state: &UnitState) -> Result<HealthState, ClassifyError> {
    if state.is_down() {
        return Ok(HealthState::Unhealthy);
    }

    match state.health.as_deref() {
        None => Ok(HealthState::Healthy),
        Some(health) if health.eq_ignore_ascii_case(NO_HEALTH_CHECK) => Ok(HealthState::Healthy),
        Some(health) => health
            .parse::<HealthState>()
            .map_err(|_| ClassifyError::UnrecognizedHealth(health.to_string())),
    }
}

/// Queries a container's state and classifies it.
pub struct HealthClassifier<R: ContainerRuntime> {
    runtime: Arc<R>,
}

impl<R: ContainerRuntime> HealthClassifier<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    /// Classify the current health of container `id`.
    ///
    /// The state is queried fresh on every call.
    pub async fn classify(&self, id: &str) -> Result<HealthState, ClassifyError> {
        let state = self.runtime.inspect_state(id).await?;
        classify_state(&state)
    }
}
