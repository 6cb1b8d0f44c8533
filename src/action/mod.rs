//! Action abstraction module
//!
//! An [`InitAction`] is the opaque asynchronous work one step performs:
//! storage bring-up, network client construction, authentication, and so on.
//! Actions are black boxes to the executor; they succeed, fail, or observe
//! the attempt token and abandon their work.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::StepName;

/// Failure reported by an action attempt.
///
/// Carries a message only; retry and criticality semantics live on the step
/// descriptor, not on the error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Execution context handed to each action attempt.
///
/// The cancellation token combines the pipeline token with the per-attempt
/// timeout; actions should check it at their own suspension points and
/// abort early when it fires.
#[derive(Clone)]
pub struct ActionContext {
    /// Step being executed
    pub step: StepName,
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Execution ID for this attempt (fresh per retry)
    pub execution_id: String,
    /// Cooperative cancellation token for this attempt
    pub cancellation_token: CancellationToken,
}

impl ActionContext {
    pub fn new(step: impl Into<StepName>, attempt: u32, token: CancellationToken) -> Self {
        Self {
            step: step.into(),
            attempt,
            execution_id: uuid::Uuid::new_v4().to_string(),
            cancellation_token: token,
        }
    }

    /// Check if the attempt has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Completes when cancellation is requested
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("step", &self.step)
            .field("attempt", &self.attempt)
            .field("execution_id", &self.execution_id)
            .finish_non_exhaustive()
    }
}

/// The asynchronous work a step performs.
#[async_trait]
pub trait InitAction: Send + Sync {
    /// Run one attempt of the action.
    async fn run(&self, ctx: ActionContext) -> Result<(), ActionError>;
}

struct FnAction<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> InitAction for FnAction<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ActionError>> + Send,
{
    async fn run(&self, ctx: ActionContext) -> Result<(), ActionError> {
        (self.f)(ctx).await
    }
}

/// Wrap an async closure as an [`InitAction`].
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn InitAction>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    Arc::new(FnAction { f })
}
