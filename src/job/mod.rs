//! Job execution: task identity, retries, and the in-process runner.

pub mod runner;
pub mod task;

pub use runner::{run_job, JobReport, LocalJobRunner};
pub use task::{run_with_retries, RetryPolicy, TaskId, TaskKind};
