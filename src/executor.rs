//! Step executor
//!
//! Runs one step's action under its per-attempt timeout, retrying with a
//! bounded backoff. The executor is the sole writer of the step's entry in
//! the shared `completed`/`failed` sets; settlement happens exactly once.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::action::{ActionContext, ActionError, InitAction};
use crate::cancel;
use crate::error::InitError;
use crate::state::SharedState;
use crate::types::InitStep;

/// Executes a single step with retry and per-attempt timeout semantics.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    base_delay: Duration,
    max_delay: Duration,
}

impl StepExecutor {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Run `step`'s action until it succeeds, its retry budget is exhausted,
    /// or the caller's token fires.
    ///
    /// Cancellation never settles the step: the sets stay untouched and
    /// [`InitError::Cancelled`] is returned so the manager can tell the
    /// cancellation branch from an ordinary failure.
    pub async fn execute(
        &self,
        step: &InitStep,
        action: Option<Arc<dyn InitAction>>,
        state: &SharedState,
        token: &CancellationToken,
        mut on_attempt_failed: impl FnMut(u32, &ActionError) + Send,
    ) -> Result<(), InitError> {
        let Some(action) = action else {
            state.mark_failed(&step.name);
            tracing::error!(step = %step.name, "step has no bound action");
            return Err(InitError::ActionNotBound(step.name.clone()));
        };

        let mut last_error = ActionError::new("no attempts made");
        for attempt in 1..=step.max_attempts() {
            if token.is_cancelled() {
                return Err(InitError::Cancelled);
            }

            // The guard clears the attempt timer when this attempt settles.
            let (attempt_token, _timeout_guard) = cancel::attach_timeout(token, step.timeout);
            let ctx = ActionContext::new(step.name.clone(), attempt, attempt_token.clone());
            tracing::debug!(
                step = %step.name,
                attempt,
                execution_id = %ctx.execution_id,
                "step attempt started"
            );

            // Race the action against its attempt token so a
            // non-cooperative action is abandoned on timeout or cancel.
            let outcome = tokio::select! {
                result = action.run(ctx) => result,
                _ = attempt_token.cancelled() => {
                    if token.is_cancelled() {
                        return Err(InitError::Cancelled);
                    }
                    Err(ActionError::new(format!(
                        "attempt timed out after {}ms",
                        step.timeout.as_millis()
                    )))
                }
            };

            match outcome {
                Ok(()) => {
                    state.mark_completed(&step.name);
                    tracing::info!(step = %step.name, attempt, "step completed");
                    return Ok(());
                }
                Err(error) => {
                    if attempt == step.max_attempts() {
                        last_error = error;
                        break;
                    }
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        step = %step.name,
                        attempt,
                        error = %error,
                        retry_in_ms = delay.as_millis() as u64,
                        "step attempt failed; retrying"
                    );
                    on_attempt_failed(attempt, &error);
                    last_error = error;
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = token.cancelled() => return Err(InitError::Cancelled),
                            _ = sleep(delay) => {}
                        }
                    }
                }
            }
        }

        state.mark_failed(&step.name);
        tracing::error!(
            step = %step.name,
            attempts = step.max_attempts(),
            error = %last_error,
            "step failed terminally"
        );
        Err(InitError::StepFailed {
            step: step.name.clone(),
            attempts: step.max_attempts(),
            critical: step.critical,
            message: last_error.message,
        })
    }

    /// Backoff before the next attempt: `min(base * attempt, cap)`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let capped = base_ms
            .saturating_mul(u64::from(attempt))
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::action_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn executor() -> StepExecutor {
        StepExecutor::new(Duration::from_millis(0), Duration::from_millis(0))
    }

    #[test]
    fn test_success_marks_completed() {
        tokio_test::block_on(async {
            let step = InitStep::new("config");
            let state = SharedState::new();
            let token = CancellationToken::new();
            let action = action_fn(|_ctx| async { Ok(()) });

            let result = executor()
                .execute(&step, Some(action), &state, &token, |_, _| {})
                .await;
            assert!(result.is_ok());
            assert!(state.is_completed(&"config".into()));
            assert!(!state.is_failed(&"config".into()));
        });
    }

    #[test]
    fn test_retry_bound_is_max_retries_plus_one() {
        tokio_test::block_on(async {
            let step = InitStep::new("network").with_max_retries(2);
            let state = SharedState::new();
            let token = CancellationToken::new();

            let calls = Arc::new(AtomicUsize::new(0));
            let calls_ref = calls.clone();
            let action = action_fn(move |_ctx| {
                let calls = calls_ref.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ActionError::new("connection refused"))
                }
            });

            let mut observed_failures = 0;
            let result = executor()
                .execute(&step, Some(action), &state, &token, |_, _| {
                    observed_failures += 1;
                })
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), 3);
            assert_eq!(observed_failures, 2);
            assert!(state.is_failed(&"network".into()));
            assert_eq!(
                result,
                Err(InitError::StepFailed {
                    step: "network".into(),
                    attempts: 3,
                    critical: false,
                    message: "connection refused".to_string(),
                })
            );
        });
    }

    #[test]
    fn test_flaky_action_eventually_succeeds() {
        tokio_test::block_on(async {
            let step = InitStep::new("storage").with_max_retries(3);
            let state = SharedState::new();
            let token = CancellationToken::new();

            let calls = Arc::new(AtomicUsize::new(0));
            let calls_ref = calls.clone();
            let action = action_fn(move |_ctx| {
                let calls = calls_ref.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ActionError::new("temporary failure"))
                    } else {
                        Ok(())
                    }
                }
            });

            let result = executor()
                .execute(&step, Some(action), &state, &token, |_, _| {})
                .await;
            assert!(result.is_ok());
            assert_eq!(calls.load(Ordering::SeqCst), 3);
            assert!(state.is_completed(&"storage".into()));
        });
    }

    #[test]
    fn test_attempt_timeout_counts_as_failure_and_retries() {
        tokio_test::block_on(async {
            let step = InitStep::new("network")
                .with_timeout(Duration::from_millis(20))
                .with_max_retries(1);
            let state = SharedState::new();
            let token = CancellationToken::new();

            let calls = Arc::new(AtomicUsize::new(0));
            let calls_ref = calls.clone();
            let action = action_fn(move |_ctx| {
                let calls = calls_ref.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            });

            let result = executor()
                .execute(&step, Some(action), &state, &token, |_, _| {})
                .await;
            assert_eq!(calls.load(Ordering::SeqCst), 2);
            match result {
                Err(InitError::StepFailed { message, .. }) => {
                    assert!(message.contains("timed out"));
                }
                other => panic!("expected step failure, got {:?}", other),
            }
        });
    }

    #[test]
    fn test_cancelled_token_short_circuits_before_attempt() {
        tokio_test::block_on(async {
            let step = InitStep::new("auth");
            let state = SharedState::new();
            let token = CancellationToken::new();
            token.cancel();

            let action = action_fn(|_ctx| async {
                panic!("action must not run after cancellation");
            });

            let result = executor()
                .execute(&step, Some(action), &state, &token, |_, _| {})
                .await;
            assert_eq!(result, Err(InitError::Cancelled));
            // cancellation is not a settlement
            assert!(!state.is_failed(&"auth".into()));
        });
    }

    #[test]
    fn test_cancellation_mid_attempt_is_distinguishable() {
        tokio_test::block_on(async {
            let step = InitStep::new("network").with_timeout(Duration::from_secs(60));
            let state = SharedState::new();
            let token = CancellationToken::new();

            let cancel_token = token.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(20)).await;
                cancel_token.cancel();
            });

            let action = action_fn(|_ctx| async {
                sleep(Duration::from_secs(60)).await;
                Ok(())
            });

            let result = executor()
                .execute(&step, Some(action), &state, &token, |_, _| {})
                .await;
            assert_eq!(result, Err(InitError::Cancelled));
        });
    }

    #[test]
    fn test_unbound_action_fails_fast() {
        tokio_test::block_on(async {
            let step = InitStep::new("auth").with_max_retries(5);
            let state = SharedState::new();
            let token = CancellationToken::new();

            let result = executor()
                .execute(&step, None, &state, &token, |_, _| {})
                .await;
            assert_eq!(result, Err(InitError::ActionNotBound("auth".into())));
            assert!(state.is_failed(&"auth".into()));
        });
    }

    #[test]
    fn test_backoff_delay_is_linear_and_capped() {
        let executor = StepExecutor::new(Duration::from_millis(100), Duration::from_millis(250));
        assert_eq!(executor.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(executor.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(executor.backoff_delay(3), Duration::from_millis(250));
        assert_eq!(executor.backoff_delay(10), Duration::from_millis(250));
    }
}
