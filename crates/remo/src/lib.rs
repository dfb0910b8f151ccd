//! Remote code execution: compile and run untrusted snippets under resource limits.

mod backend;
mod engine;
mod job;
mod limiter;
mod process;

pub use backend::{
    BashBackend, CBackend, CppBackend, ExecutionError, JavaBackend, LanguageBackend,
    PythonBackend,
};
pub use engine::Remo;
pub use job::{
    ExecutionResult, ExecutionStatus, Job, JobRequest, JobState, Language, Limits, ProcessLog,
    WorkDir,
};
pub use limiter::{LimitViolation, ResourceLimiter};

#[derive(Debug, thiserror::Error)]
pub enum RemoError {
    #[error("invalid job: {0}")]
    Validation(String),
    #[error("job workspace failed: {0}")]
    Workspace(std::io::Error),
}
