//! Progress reporting
//!
//! The manager reports one event after each step settles. Reporter failures
//! are caught and logged by the caller, never propagated into the
//! orchestration loop.

use async_trait::async_trait;
use serde::Serialize;

use crate::types::StepName;

/// Progress event emitted after a step reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Step that just settled
    pub step: StepName,
    /// Steps completed so far
    pub completed_count: usize,
    /// Total registered steps
    pub total_count: usize,
}

impl ProgressEvent {
    pub fn new(step: impl Into<StepName>, completed_count: usize, total_count: usize) -> Self {
        Self {
            step: step.into(),
            completed_count,
            total_count,
        }
    }
}

/// Sink interface for initialization progress reporting.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, event: ProgressEvent) -> Result<(), String>;
}
