//! # Bootstage
//!
//! Staged initialization orchestrator: boots interdependent subsystems
//! (configuration, storage, network, authentication, ...) in a safe,
//! deterministic order under a wall-clock budget, with retries, per-attempt
//! timeouts, cooperative cancellation and circular-dependency protection.
//!
//! ## Core Concepts
//!
//! - **Step**: one named, ordered unit of initialization work with declared
//!   dependencies ([`types::InitStep`])
//! - **Action**: the opaque asynchronous work a step performs (black box to
//!   the executor)
//! - **Waiter**: cooperative, cancellable dependency wait with cycle
//!   detection ([`waiter::DependencyWaiter`])
//! - **Executor**: per-attempt timeout and bounded retry backoff
//!   ([`executor::StepExecutor`])
//! - **Manager**: ordered, single-flight pipeline under a global deadline
//!   ([`manager::InitManager`])
//!
//! Steps run strictly sequentially in registration order; later steps may
//! depend on earlier ones' side effects beyond the declared dependency set.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bootstage::prelude::*;
//!
//! let manager = InitManager::new();
//! manager.add_step(InitStep::new("config").critical(), action_fn(load_config))?;
//! manager.add_step(
//!     InitStep::new("network").with_depends_on(vec!["config".into()]),
//!     action_fn(build_client),
//! )?;
//! // auth's action is bound later, once the session lookup exists
//! manager.add_deferred_step(InitStep::new("auth").with_depends_on(vec!["network".into()]))?;
//! manager.set_action(&"auth".into(), action_fn(authenticate));
//!
//! let report = manager.start().await?;
//! ```
//!
//! This crate does NOT care about:
//! - What the subsystems being initialized actually do
//! - Persisting orchestrator state across process restarts
//! - Rolling back already-completed steps

pub mod action;
pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod manager;
pub mod progress;
pub mod state;
pub mod types;
pub mod waiter;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::action::{action_fn, ActionContext, ActionError, InitAction};
    pub use crate::cancel::{attach_timeout, combine, deadline, LinkGuard};
    pub use crate::config::ManagerConfig;
    pub use crate::error::InitError;
    pub use crate::executor::StepExecutor;
    pub use crate::manager::{InitManager, InitReport, StartOptions};
    pub use crate::progress::{ProgressEvent, ProgressReporter};
    pub use crate::state::{Phase, SharedState, StatusSnapshot};
    pub use crate::types::{InitStep, StepName};
    pub use crate::waiter::DependencyWaiter;
}

// Re-export key types at crate root
pub use action::{action_fn, ActionContext, ActionError, InitAction};
pub use config::ManagerConfig;
pub use error::InitError;
pub use manager::{InitManager, InitReport, StartOptions};
pub use progress::{ProgressEvent, ProgressReporter};
pub use state::{Phase, StatusSnapshot};
pub use types::{InitStep, StepName};

// Re-export CancellationToken for convenience
pub use tokio_util::sync::CancellationToken;
