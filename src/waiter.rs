//! Dependency waiter
//!
//! Blocks (cooperatively) until every declared dependency of a step has
//! settled. Uses a fixed-interval poll loop rather than wake-on-event so a
//! late-arriving cancellation is observed within one poll interval even when
//! no dependency state changes.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::InitError;
use crate::state::SharedState;
use crate::types::{InitStep, StepName};

/// Waits for a step's dependencies to settle.
#[derive(Debug, Clone)]
pub struct DependencyWaiter {
    poll_interval: Duration,
    wait_ceiling: Duration,
}

impl DependencyWaiter {
    pub fn new(poll_interval: Duration, wait_ceiling: Duration) -> Self {
        Self {
            poll_interval,
            wait_ceiling,
        }
    }

    /// Wait until every dependency of `step` is satisfied.
    ///
    /// Policy:
    /// - failed critical dependency: fails immediately with
    ///   [`InitError::UpstreamCriticalFailure`]
    /// - failed non-critical dependency: treated as satisfied
    ///   (soft-dependency policy)
    /// - cycle in the dependency chain: fails before blocking with
    ///   [`InitError::CircularDependency`]
    /// - ceiling elapsed: [`InitError::DependencyTimeout`] naming the
    ///   still-unsatisfied dependencies
    pub async fn wait(
        &self,
        step: &InitStep,
        steps: &HashMap<StepName, InitStep>,
        state: &SharedState,
        token: &CancellationToken,
    ) -> Result<(), InitError> {
        if let Some(name) = detect_cycle(&step.name, steps) {
            return Err(InitError::CircularDependency(name));
        }
        if step.depends_on.is_empty() {
            return Ok(());
        }

        let deadline = Instant::now() + self.wait_ceiling;
        loop {
            if token.is_cancelled() {
                return Err(InitError::Cancelled);
            }

            let mut pending = Vec::new();
            for dep in &step.depends_on {
                if state.is_completed(dep) {
                    continue;
                }
                if state.is_failed(dep) {
                    let dep_critical = steps.get(dep).map(|s| s.critical).unwrap_or(false);
                    if dep_critical {
                        return Err(InitError::UpstreamCriticalFailure {
                            step: step.name.clone(),
                            dependency: dep.clone(),
                        });
                    }
                    // Soft-dependency policy: a failed non-critical
                    // dependency counts as satisfied.
                    tracing::warn!(
                        step = %step.name,
                        dependency = %dep,
                        "proceeding past failed non-critical dependency"
                    );
                    continue;
                }
                pending.push(dep.clone());
            }

            if pending.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(InitError::DependencyTimeout {
                    step: step.name.clone(),
                    pending,
                });
            }

            tokio::select! {
                _ = token.cancelled() => return Err(InitError::Cancelled),
                _ = sleep(self.poll_interval) => {}
            }
        }
    }
}

/// Depth-first cycle search from `start`, with a per-call visited set.
fn detect_cycle(start: &StepName, steps: &HashMap<StepName, InitStep>) -> Option<StepName> {
    let mut visited = HashSet::new();
    let mut stack = HashSet::new();

    fn dfs(
        node: &StepName,
        steps: &HashMap<StepName, InitStep>,
        visited: &mut HashSet<StepName>,
        stack: &mut HashSet<StepName>,
    ) -> Option<StepName> {
        if stack.contains(node) {
            return Some(node.clone());
        }
        if !visited.insert(node.clone()) {
            return None;
        }
        stack.insert(node.clone());
        if let Some(step) = steps.get(node) {
            for dep in &step.depends_on {
                if let Some(cycle_node) = dfs(dep, steps, visited, stack) {
                    return Some(cycle_node);
                }
            }
        }
        stack.remove(node);
        None
    }

    dfs(start, steps, &mut visited, &mut stack)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_map(steps: Vec<InitStep>) -> HashMap<StepName, InitStep> {
        steps.into_iter().map(|s| (s.name.clone(), s)).collect()
    }

    fn waiter() -> DependencyWaiter {
        DependencyWaiter::new(Duration::from_millis(5), Duration::from_millis(200))
    }

    #[test]
    fn test_no_dependencies_resolves_immediately() {
        tokio_test::block_on(async {
            let step = InitStep::new("config");
            let steps = step_map(vec![step.clone()]);
            let state = SharedState::new();
            let token = CancellationToken::new();

            let result = waiter().wait(&step, &steps, &state, &token).await;
            assert!(result.is_ok());
        });
    }

    #[test]
    fn test_waits_until_dependency_completes() {
        tokio_test::block_on(async {
            let dep = InitStep::new("config");
            let step = InitStep::new("network").with_depends_on(vec!["config".into()]);
            let steps = step_map(vec![dep, step.clone()]);
            let state = SharedState::new();
            let token = CancellationToken::new();

            let state_clone = state.clone();
            let marker = tokio::spawn(async move {
                sleep(Duration::from_millis(30)).await;
                state_clone.mark_completed(&"config".into());
            });

            let result = waiter().wait(&step, &steps, &state, &token).await;
            assert!(result.is_ok());
            marker.await.expect("marker task");
        });
    }

    #[test]
    fn test_cycle_detected_before_blocking() {
        tokio_test::block_on(async {
            let x = InitStep::new("x").with_depends_on(vec!["y".into()]);
            let y = InitStep::new("y").with_depends_on(vec!["x".into()]);
            let steps = step_map(vec![x.clone(), y]);
            let state = SharedState::new();
            let token = CancellationToken::new();

            let result = waiter().wait(&x, &steps, &state, &token).await;
            assert!(matches!(result, Err(InitError::CircularDependency(_))));
        });
    }

    #[test]
    fn test_transitive_cycle_detected() {
        tokio_test::block_on(async {
            let a = InitStep::new("a").with_depends_on(vec!["b".into()]);
            let b = InitStep::new("b").with_depends_on(vec!["c".into()]);
            let c = InitStep::new("c").with_depends_on(vec!["a".into()]);
            let steps = step_map(vec![a.clone(), b, c]);
            let state = SharedState::new();
            let token = CancellationToken::new();

            let result = waiter().wait(&a, &steps, &state, &token).await;
            assert!(matches!(result, Err(InitError::CircularDependency(_))));
        });
    }

    #[test]
    fn test_failed_critical_dependency_fails_immediately() {
        tokio_test::block_on(async {
            let dep = InitStep::new("storage").critical();
            let step = InitStep::new("auth").with_depends_on(vec!["storage".into()]);
            let steps = step_map(vec![dep, step.clone()]);
            let state = SharedState::new();
            state.mark_failed(&"storage".into());
            let token = CancellationToken::new();

            let result = waiter().wait(&step, &steps, &state, &token).await;
            assert_eq!(
                result,
                Err(InitError::UpstreamCriticalFailure {
                    step: "auth".into(),
                    dependency: "storage".into(),
                })
            );
        });
    }

    // Soft-dependency policy: present in the observed behavior, preserved as
    // documented even though it lets a downstream step run against a
    // known-broken upstream. Flagged here for reviewer confirmation.
    #[test]
    fn test_failed_noncritical_dependency_is_treated_as_satisfied() {
        tokio_test::block_on(async {
            let dep = InitStep::new("telemetry");
            let step = InitStep::new("network").with_depends_on(vec!["telemetry".into()]);
            let steps = step_map(vec![dep, step.clone()]);
            let state = SharedState::new();
            state.mark_failed(&"telemetry".into());
            let token = CancellationToken::new();

            let result = waiter().wait(&step, &steps, &state, &token).await;
            assert!(result.is_ok());
        });
    }

    #[test]
    fn test_dependency_timeout_names_pending_steps() {
        tokio_test::block_on(async {
            let dep = InitStep::new("storage");
            let step = InitStep::new("auth").with_depends_on(vec!["storage".into()]);
            let steps = step_map(vec![dep, step.clone()]);
            let state = SharedState::new();
            let token = CancellationToken::new();

            let short = DependencyWaiter::new(Duration::from_millis(5), Duration::from_millis(30));
            let result = short.wait(&step, &steps, &state, &token).await;
            assert_eq!(
                result,
                Err(InitError::DependencyTimeout {
                    step: "auth".into(),
                    pending: vec!["storage".into()],
                })
            );
        });
    }

    #[test]
    fn test_cancellation_observed_mid_wait() {
        tokio_test::block_on(async {
            let dep = InitStep::new("storage");
            let step = InitStep::new("auth").with_depends_on(vec!["storage".into()]);
            let steps = step_map(vec![dep, step.clone()]);
            let state = SharedState::new();
            let token = CancellationToken::new();

            let cancel_token = token.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(20)).await;
                cancel_token.cancel();
            });

            let slow = DependencyWaiter::new(Duration::from_millis(5), Duration::from_secs(10));
            let result = slow.wait(&step, &steps, &state, &token).await;
            assert_eq!(result, Err(InitError::Cancelled));
        });
    }
}
