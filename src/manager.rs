//! Initialization manager
//!
//! Owns the ordered step registry and drives the dependency waiter and step
//! executor for each step in registration order, under a global deadline.
//! `start()` is single-flight: concurrent callers share one in-flight future
//! and observe the identical outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::action::InitAction;
use crate::cancel;
use crate::config::ManagerConfig;
use crate::error::InitError;
use crate::executor::StepExecutor;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::state::{Phase, SharedState, StatusSnapshot};
use crate::types::{InitStep, StepName};
use crate::waiter::DependencyWaiter;

/// Successful pipeline outcome.
///
/// `failed` lists non-critical steps that failed without halting the
/// pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub completed: Vec<StepName>,
    pub failed: Vec<StepName>,
    pub duration: Duration,
}

/// Options for a `start()` call.
#[derive(Clone, Default)]
pub struct StartOptions {
    /// External cancellation signal merged into the run token
    pub signal: Option<CancellationToken>,
    /// Progress sink invoked after each step settles
    pub progress: Option<Arc<dyn ProgressReporter>>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }
}

struct RegisteredStep {
    step: InitStep,
    action: Option<Arc<dyn InitAction>>,
}

type StartFuture = Shared<BoxFuture<'static, Result<InitReport, InitError>>>;

struct ManagerInner {
    config: ManagerConfig,
    registry: RwLock<Vec<RegisteredStep>>,
    state: SharedState,
    in_flight: Mutex<Option<StartFuture>>,
    waiter: DependencyWaiter,
    executor: StepExecutor,
}

/// Staged initialization orchestrator.
///
/// Explicitly constructed and passed by reference; lifecycle is owned by the
/// application entry point. Cloning yields another handle to the same
/// orchestrator.
#[derive(Clone)]
pub struct InitManager {
    inner: Arc<ManagerInner>,
}

impl InitManager {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let waiter = DependencyWaiter::new(config.poll_interval, config.dependency_wait_ceiling);
        let executor = StepExecutor::new(config.retry_base_delay, config.retry_max_delay);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                registry: RwLock::new(Vec::new()),
                state: SharedState::new(),
                in_flight: Mutex::new(None),
                waiter,
                executor,
            }),
        }
    }

    /// Register a step with its action. Fails if the name is taken.
    pub fn add_step(&self, step: InitStep, action: Arc<dyn InitAction>) -> Result<(), InitError> {
        self.insert(step, Some(action))
    }

    /// Register a step whose action will be bound later via
    /// [`set_action`](Self::set_action). Running it unbound fails with
    /// [`InitError::ActionNotBound`].
    pub fn add_deferred_step(&self, step: InitStep) -> Result<(), InitError> {
        self.insert(step, None)
    }

    fn insert(&self, step: InitStep, action: Option<Arc<dyn InitAction>>) -> Result<(), InitError> {
        let mut registry = self.inner.registry.write().expect("registry lock poisoned");
        if registry.iter().any(|r| r.step.name == step.name) {
            return Err(InitError::DuplicateStep(step.name));
        }
        registry.push(RegisteredStep { step, action });
        Ok(())
    }

    /// Remove a registered step. Returns false if absent.
    pub fn remove_step(&self, name: &StepName) -> bool {
        let mut registry = self.inner.registry.write().expect("registry lock poisoned");
        let before = registry.len();
        registry.retain(|r| &r.step.name != name);
        registry.len() != before
    }

    /// Bind (or rebind) a step's action. Safe to call any number of times
    /// before orchestration starts. Returns false if the step is unknown.
    pub fn set_action(&self, name: &StepName, action: Arc<dyn InitAction>) -> bool {
        let mut registry = self.inner.registry.write().expect("registry lock poisoned");
        match registry.iter_mut().find(|r| &r.step.name == name) {
            Some(entry) => {
                entry.action = Some(action);
                true
            }
            None => false,
        }
    }

    /// Run the pipeline with default options.
    pub async fn start(&self) -> Result<InitReport, InitError> {
        self.start_with(StartOptions::default()).await
    }

    /// Run the pipeline.
    ///
    /// Idempotent under concurrent callers: if a run is already in flight,
    /// the caller joins it and receives the same outcome (the racer's
    /// options are not applied). After a failed run the handle is cleared,
    /// so a later call is a fresh attempt.
    pub async fn start_with(&self, options: StartOptions) -> Result<InitReport, InitError> {
        let fut = {
            let mut guard = self.inner.in_flight.lock().expect("in-flight lock poisoned");
            if self.inner.state.phase() == Phase::Initialized {
                return Ok(InitReport {
                    completed: self.inner.state.completed(),
                    failed: self.inner.state.failed(),
                    duration: Duration::ZERO,
                });
            }
            match guard.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    // A fresh attempt after a failed run must not inherit
                    // the previous run's settled sets.
                    self.inner.state.clear();
                    self.inner.state.set_phase(Phase::Initializing);
                    let fut: StartFuture =
                        run_pipeline(self.inner.clone(), options).boxed().shared();
                    *guard = Some(fut.clone());
                    fut
                }
            }
        };
        fut.await
    }

    /// Return the state machine to `Idle`, clearing completed/failed sets.
    ///
    /// No-op (returns false) while a run is in flight.
    pub fn reset(&self) -> bool {
        let guard = self.inner.in_flight.lock().expect("in-flight lock poisoned");
        if guard.is_some() {
            return false;
        }
        self.inner.state.clear();
        true
    }

    /// Non-blocking status snapshot.
    pub fn status(&self) -> StatusSnapshot {
        let total = self
            .inner
            .registry
            .read()
            .expect("registry lock poisoned")
            .len();
        let phase = self.inner.state.phase();
        let completed_steps = self.inner.state.completed();
        let progress = if total == 0 {
            0.0
        } else {
            completed_steps.len() as f64 / total as f64
        };
        StatusSnapshot {
            is_initialized: phase == Phase::Initialized,
            is_initializing: phase == Phase::Initializing,
            completed_steps,
            failed_steps: self.inner.state.failed(),
            progress,
        }
    }
}

impl Default for InitManager {
    fn default() -> Self {
        Self::new()
    }
}

/// One full pipeline run. Settles phase and clears the in-flight handle on
/// the way out, under the same lock, so `in_flight` is non-empty iff the
/// phase is `Initializing`.
async fn run_pipeline(
    inner: Arc<ManagerInner>,
    options: StartOptions,
) -> Result<InitReport, InitError> {
    let result = drive(&inner, options).await;

    let mut guard = inner.in_flight.lock().expect("in-flight lock poisoned");
    match &result {
        Ok(report) => {
            tracing::info!(
                completed = report.completed.len(),
                failed = report.failed.len(),
                duration_ms = report.duration.as_millis() as u64,
                "initialization complete"
            );
            inner.state.set_phase(Phase::Initialized);
        }
        Err(error) => {
            tracing::error!(error = %error, "initialization failed");
            inner.state.set_phase(Phase::Failed);
        }
    }
    *guard = None;
    result
}

async fn drive(
    inner: &Arc<ManagerInner>,
    options: StartOptions,
) -> Result<InitReport, InitError> {
    let started = Instant::now();
    let state = inner.state.clone();

    // Snapshot the registry in registration order; late set_action calls do
    // not affect a run already in flight.
    let registered: Vec<(InitStep, Option<Arc<dyn InitAction>>)> = {
        let registry = inner.registry.read().expect("registry lock poisoned");
        registry
            .iter()
            .map(|r| (r.step.clone(), r.action.clone()))
            .collect()
    };
    let steps: HashMap<StepName, InitStep> = registered
        .iter()
        .map(|(step, _)| (step.name.clone(), step.clone()))
        .collect();

    for (step, _) in &registered {
        for dep in &step.depends_on {
            if !steps.contains_key(dep) {
                return Err(InitError::MissingDependency {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // The deadline token is kept distinct from the external signal so its
    // firing maps to GlobalTimeout rather than plain cancellation.
    let (deadline_token, deadline_guard) = cancel::deadline(inner.config.global_deadline);
    let mut sources = vec![deadline_token.clone()];
    if let Some(signal) = &options.signal {
        sources.push(signal.clone());
    }
    let (run_token, mut links) = cancel::combine(&sources);
    links.merge(deadline_guard);
    let _links = links;

    let total = registered.len();
    for (step, action) in &registered {
        if run_token.is_cancelled() {
            return Err(cancel_outcome(&deadline_token, &state, &steps));
        }

        let settled = match inner.waiter.wait(step, &steps, &state, &run_token).await {
            Ok(()) => {
                inner
                    .executor
                    .execute(step, action.clone(), &state, &run_token, |_, _| {})
                    .await
            }
            Err(err) => Err(err),
        };

        match settled {
            Ok(()) => {}
            Err(InitError::Cancelled) => {
                return Err(cancel_outcome(&deadline_token, &state, &steps));
            }
            Err(InitError::CircularDependency(name)) => {
                run_token.cancel();
                return Err(InitError::CircularDependency(name));
            }
            Err(err) => {
                // Waiter-origin failures settle the step here; the executor
                // has already recorded its own.
                if matches!(
                    err,
                    InitError::DependencyTimeout { .. } | InitError::UpstreamCriticalFailure { .. }
                ) {
                    state.mark_failed(&step.name);
                }
                if step.critical {
                    run_token.cancel();
                    report_progress(&options, &state, &step.name, total).await;
                    return Err(InitError::Aborted {
                        completed: state.completed(),
                        failed: state.failed(),
                        source: Box::new(err),
                    });
                }
                tracing::warn!(
                    step = %step.name,
                    error = %err,
                    "non-critical step failed; continuing"
                );
            }
        }

        report_progress(&options, &state, &step.name, total).await;
    }

    Ok(InitReport {
        completed: state.completed(),
        failed: state.failed(),
        duration: started.elapsed(),
    })
}

fn cancel_outcome(
    deadline_token: &CancellationToken,
    state: &SharedState,
    steps: &HashMap<StepName, InitStep>,
) -> InitError {
    if deadline_token.is_cancelled() {
        let mut pending: Vec<StepName> = steps
            .keys()
            .filter(|name| !state.is_completed(name))
            .cloned()
            .collect();
        pending.sort();
        InitError::GlobalTimeout { pending }
    } else {
        InitError::Cancelled
    }
}

/// Report a settled step. Reporter failures are logged, never propagated.
async fn report_progress(
    options: &StartOptions,
    state: &SharedState,
    step: &StepName,
    total: usize,
) {
    if let Some(reporter) = &options.progress {
        let event = ProgressEvent::new(step.clone(), state.completed_count(), total);
        if let Err(err) = reporter.report(event).await {
            tracing::warn!(step = %step, error = %err, "progress reporter failed");
        }
    }
}
