//! Error taxonomy for the initialization pipeline
//!
//! Every variant is cloneable so the single-flight start future can hand the
//! identical outcome to every concurrent caller.

use thiserror::Error;

use crate::types::StepName;

/// Initialization pipeline errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InitError {
    /// Registration-time rejection: step name already exists.
    #[error("step '{0}' is already registered")]
    DuplicateStep(StepName),

    /// Dependency graph contains a cycle; fatal to the pipeline.
    #[error("circular dependency involving step '{0}'")]
    CircularDependency(StepName),

    /// A declared dependency names no registered step.
    #[error("step '{step}' depends on unregistered step '{dependency}'")]
    MissingDependency { step: StepName, dependency: StepName },

    /// Dependencies did not settle within the wait ceiling.
    #[error("step '{step}' timed out waiting for dependencies: {pending:?}")]
    DependencyTimeout {
        step: StepName,
        pending: Vec<StepName>,
    },

    /// A critical dependency failed; the step's action is never attempted.
    #[error("critical dependency '{dependency}' of step '{step}' failed")]
    UpstreamCriticalFailure {
        step: StepName,
        dependency: StepName,
    },

    /// A deferred step ran before its action was bound.
    #[error("action for step '{0}' was invoked before it was bound")]
    ActionNotBound(StepName),

    /// The step's action failed on every attempt.
    #[error("step '{step}' failed after {attempts} attempt(s): {message}")]
    StepFailed {
        step: StepName,
        attempts: u32,
        critical: bool,
        message: String,
    },

    /// An in-flight wait or attempt observed a cancelled token.
    #[error("initialization cancelled")]
    Cancelled,

    /// The orchestration-wide deadline elapsed.
    #[error("global deadline elapsed; steps not yet completed: {pending:?}")]
    GlobalTimeout { pending: Vec<StepName> },

    /// Aggregate pipeline abort raised on a critical failure.
    #[error(
        "initialization aborted ({} completed, {} failed): {source}",
        completed.len(),
        failed.len()
    )]
    Aborted {
        completed: Vec<StepName>,
        failed: Vec<StepName>,
        source: Box<InitError>,
    },
}

impl InitError {
    /// Whether this error represents cooperative cancellation rather than an
    /// ordinary failure. The recovery path downstream differs.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::GlobalTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_display_counts_sets() {
        let err = InitError::Aborted {
            completed: vec!["config".into()],
            failed: vec!["storage".into()],
            source: Box::new(InitError::StepFailed {
                step: "storage".into(),
                attempts: 3,
                critical: true,
                message: "disk unavailable".to_string(),
            }),
        };
        let text = err.to_string();
        assert!(text.contains("1 completed"));
        assert!(text.contains("1 failed"));
        assert!(text.contains("disk unavailable"));
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(InitError::Cancelled.is_cancellation());
        assert!(InitError::GlobalTimeout {
            pending: vec!["auth".into()]
        }
        .is_cancellation());
        assert!(!InitError::DuplicateStep("auth".into()).is_cancellation());
    }
}
