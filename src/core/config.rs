use serde::{Deserialize, Serialize};

use super::errors::{FlowError, Result};

/// What to do when a task fails during task-based execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnFailure {
    /// Abort the whole run on the first task failure (default).
    FailFast,
    /// Abandon the failed task's downstream and let unaffected branches
    /// run to completion; missing requested outputs error at the end.
    Continue,
}

impl Default for OnFailure {
    fn default() -> Self {
        OnFailure::FailFast
    }
}

/// Configuration for execution behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum number of tasks the pooled executor runs concurrently.
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,
    /// What to do when a task fails.
    #[serde(default)]
    pub on_failure: OnFailure,
    /// Maximum wall-clock runtime in seconds (None = unbounded).
    pub timeout_seconds: Option<u64>,
}

fn default_max_parallel_tasks() -> usize {
    10
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: default_max_parallel_tasks(),
            on_failure: OnFailure::default(),
            timeout_seconds: None,
        }
    }
}

impl ExecutionConfig {
    /// Validates configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_tasks == 0 {
            return Err(FlowError::configuration(
                "max_parallel_tasks must be greater than 0",
            ));
        }
        if let Some(timeout) = self.timeout_seconds {
            if timeout == 0 {
                return Err(FlowError::configuration(
                    "timeout_seconds must be greater than 0",
                ));
            }
            if timeout > 86_400 {
                return Err(FlowError::configuration(
                    "timeout_seconds cannot exceed 24 hours",
                ));
            }
        }
        Ok(())
    }
}
