//! Task identity and the retry loop.
//!
//! This is the only place in the crate that retries. Every attempt starts
//! from scratch: map attempts re-decode the manifest, reduce attempts
//! re-invoke the engine with a fresh sink.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::config::DEFAULT_MAX_ATTEMPTS;
use crate::error::{MergeError, Result};
use crate::metrics::JobMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Map,
    Reduce,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Map => "map",
            TaskKind::Reduce => "reduce",
        }
    }
}

/// `map-0003`, `reduce-0012`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub kind: TaskKind,
    pub index: u32,
}

impl TaskId {
    pub fn map(index: u32) -> Self {
        Self { kind: TaskKind::Map, index }
    }

    pub fn reduce(index: u32) -> Self {
        Self { kind: TaskKind::Reduce, index }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:04}", self.kind.as_str(), self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Run `attempt_fn(attempt)` until it succeeds, fails with a
/// non-retriable error, or the policy is exhausted. Attempts count from 1.
pub fn run_with_retries<T, F>(
    task: TaskId,
    policy: RetryPolicy,
    metrics: &JobMetrics,
    cancel: &CancelToken,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let mut attempt = 1;
    loop {
        cancel.check()?;
        metrics.record_task_attempt(task.kind);

        let err = match attempt_fn(attempt) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        metrics.record_task_failure(task.kind);

        if !err.is_retriable() {
            return Err(err);
        }
        if attempt >= policy.max_attempts() {
            tracing::error!(%task, attempts = attempt, "task failed: {}", err);
            return Err(MergeError::TaskFailed {
                task: task.to_string(),
                attempts: attempt,
                source: Box::new(err),
            });
        }
        tracing::warn!(%task, attempt, "attempt failed, retrying: {}", err);
        attempt += 1;
    }
}
