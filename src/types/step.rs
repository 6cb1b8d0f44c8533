//! Step descriptor types
//!
//! An [`InitStep`] describes one named unit of initialization work:
//! criticality, per-attempt timeout, retry budget and declared dependencies.
//! Descriptors are immutable after registration; the action they run is held
//! separately by the manager's registry so it can be bound late.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Strongly-typed step name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StepName(pub String);

impl StepName {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for StepName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for StepName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<StepName> for String {
    fn from(value: StepName) -> Self {
        value.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// A single initialization step descriptor.
///
/// Steps run strictly in registration order; `depends_on` gates when a step
/// may begin, it does not reorder execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitStep {
    /// Unique name for this step
    pub name: StepName,
    /// Whether failure of this step aborts the whole pipeline
    #[serde(default)]
    pub critical: bool,
    /// Per-attempt execution timeout
    #[serde(with = "duration_millis", default = "default_timeout")]
    pub timeout: Duration,
    /// Retry budget beyond the first attempt
    #[serde(default)]
    pub max_retries: u32,
    /// Names of steps that must settle before this step runs
    #[serde(default)]
    pub depends_on: Vec<StepName>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl InitStep {
    /// Create a step with defaults: non-critical, 10s timeout, no retries.
    pub fn new(name: impl Into<StepName>) -> Self {
        Self {
            name: name.into(),
            critical: false,
            timeout: default_timeout(),
            max_retries: 0,
            depends_on: Vec::new(),
        }
    }

    /// Mark the step critical: its terminal failure aborts the pipeline.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry budget (attempts = max_retries + 1).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Declare dependencies by name.
    pub fn with_depends_on(mut self, deps: Vec<StepName>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Total attempts this step may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Serde support for Duration as integer milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_builder_defaults() {
        let step = InitStep::new("storage");
        assert_eq!(step.name, "storage");
        assert!(!step.critical);
        assert_eq!(step.max_retries, 0);
        assert_eq!(step.max_attempts(), 1);
        assert!(step.depends_on.is_empty());
    }

    #[test]
    fn test_step_builder_chaining() {
        let step = InitStep::new("auth")
            .critical()
            .with_timeout(Duration::from_millis(250))
            .with_max_retries(2)
            .with_depends_on(vec!["config".into(), "network".into()]);
        assert!(step.critical);
        assert_eq!(step.timeout, Duration::from_millis(250));
        assert_eq!(step.max_attempts(), 3);
        assert_eq!(step.depends_on, vec!["config", "network"]);
    }

    #[test]
    fn test_step_serializes_timeout_as_millis() {
        let step = InitStep::new("config").with_timeout(Duration::from_millis(1500));
        let json = serde_json::to_value(&step).expect("serialize step");
        assert_eq!(json["timeout"], 1500);
    }
}
