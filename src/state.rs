//! Shared execution state
//!
//! One [`ExecutionState`] exists per manager instance. The step executor is
//! the sole writer of the `completed`/`failed` sets on terminal settlement;
//! the waiter and manager only read them. A step name lives in at most one
//! of the two sets and never moves between them; both sets are emptied by
//! `reset` and again when a fresh run begins.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::StepName;

/// Orchestrator lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Initializing,
    Initialized,
    Failed,
}

/// Mutable pipeline state behind [`SharedState`].
#[derive(Debug)]
pub struct ExecutionState {
    completed: HashSet<StepName>,
    failed: HashSet<StepName>,
    phase: Phase,
    started_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    fn new() -> Self {
        Self {
            completed: HashSet::new(),
            failed: HashSet::new(),
            phase: Phase::Idle,
            started_at: None,
        }
    }
}

/// Cheaply cloneable handle to the per-manager execution state.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<RwLock<ExecutionState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ExecutionState::new())),
        }
    }

    /// Record terminal success for a step. Executor-only.
    pub(crate) fn mark_completed(&self, name: &StepName) {
        let mut state = self.inner.write().expect("state lock poisoned");
        debug_assert!(!state.failed.contains(name));
        state.completed.insert(name.clone());
    }

    /// Record terminal failure for a step. Executor-only.
    pub(crate) fn mark_failed(&self, name: &StepName) {
        let mut state = self.inner.write().expect("state lock poisoned");
        debug_assert!(!state.completed.contains(name));
        state.failed.insert(name.clone());
    }

    pub fn is_completed(&self, name: &StepName) -> bool {
        self.inner
            .read()
            .expect("state lock poisoned")
            .completed
            .contains(name)
    }

    pub fn is_failed(&self, name: &StepName) -> bool {
        self.inner
            .read()
            .expect("state lock poisoned")
            .failed
            .contains(name)
    }

    pub fn phase(&self) -> Phase {
        self.inner.read().expect("state lock poisoned").phase
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        let mut state = self.inner.write().expect("state lock poisoned");
        state.phase = phase;
        if phase == Phase::Initializing {
            state.started_at = Some(Utc::now());
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().expect("state lock poisoned").started_at
    }

    /// Sorted snapshot of the completed set.
    pub fn completed(&self) -> Vec<StepName> {
        let state = self.inner.read().expect("state lock poisoned");
        let mut names: Vec<_> = state.completed.iter().cloned().collect();
        names.sort();
        names
    }

    /// Sorted snapshot of the failed set.
    pub fn failed(&self) -> Vec<StepName> {
        let state = self.inner.read().expect("state lock poisoned");
        let mut names: Vec<_> = state.failed.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn completed_count(&self) -> usize {
        self.inner
            .read()
            .expect("state lock poisoned")
            .completed
            .len()
    }

    pub fn settled_count(&self) -> usize {
        let state = self.inner.read().expect("state lock poisoned");
        state.completed.len() + state.failed.len()
    }

    /// Clear all sets and return to `Idle`. Used by `reset()`.
    pub(crate) fn clear(&self) {
        let mut state = self.inner.write().expect("state lock poisoned");
        state.completed.clear();
        state.failed.clear();
        state.phase = Phase::Idle;
        state.started_at = None;
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-blocking status snapshot exposed to the embedding application.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub is_initialized: bool,
    pub is_initializing: bool,
    pub completed_steps: Vec<StepName>,
    pub failed_steps: Vec<StepName>,
    /// Fraction of registered steps that completed, in `[0, 1]`.
    pub progress: f64,
}
