use crate::backend::{
    BashBackend, CBackend, CppBackend, ExecutionError, JavaBackend, LanguageBackend,
    PythonBackend,
};
use crate::job::{
    ExecutionResult, ExecutionStatus, Job, JobRequest, JobState, Language, Limits, ProcessLog,
};
use crate::limiter::ResourceLimiter;
use crate::RemoError;
use common::config::SandboxConfig;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Execution engine. Every failure, including a panicking backend, comes back as an
/// `ExecutionResult` with `status: error`; nothing propagates to the caller.
pub struct Remo {
    backends: HashMap<Language, Box<dyn LanguageBackend>>,
    limiter: ResourceLimiter,
    defaults: Limits,
    max_output_bytes: usize,
}

impl Remo {
    pub fn new(config: &SandboxConfig) -> Self {
        let mut engine = Self::empty(config);
        engine.register(Box::new(CBackend));
        engine.register(Box::new(CppBackend));
        engine.register(Box::new(JavaBackend));
        engine.register(Box::new(PythonBackend));
        engine.register(Box::new(BashBackend));
        engine
    }

    pub fn empty(config: &SandboxConfig) -> Self {
        Self {
            backends: HashMap::new(),
            limiter: ResourceLimiter::new(config.wrapper.clone()),
            defaults: Limits {
                time_limit_secs: config.default_time_limit_secs,
                memory_limit_kb: config.default_memory_limit_kb,
            },
            max_output_bytes: config.max_output_bytes,
        }
    }

    pub fn register(&mut self, backend: Box<dyn LanguageBackend>) {
        self.backends.insert(backend.language(), backend);
    }

    pub fn supports(&self, language: Language) -> bool {
        self.backends.contains_key(&language)
    }

    pub fn job(&self, request: JobRequest) -> Result<Job, RemoError> {
        let job = Job::from_request(request, self.defaults)?;
        if !self.supports(job.language()) {
            return Err(RemoError::Validation(format!(
                "no backend registered for {}",
                job.language()
            )));
        }
        Ok(job)
    }

    /// Validates and executes in one step; the job's scoped directory is gone on return.
    pub fn run_request(&self, request: JobRequest) -> ExecutionResult {
        match self.job(request) {
            Ok(mut job) => self.execute(&mut job),
            Err(err) => {
                tracing::warn!("remo rejected job: {}", err);
                ExecutionResult::error(err.to_string())
            }
        }
    }

    pub fn execute(&self, job: &mut Job) -> ExecutionResult {
        let language = job.language();
        let Some(backend) = self.backends.get(&language) else {
            job.advance(JobState::Failed);
            return ExecutionResult::error(format!("no backend registered for {language}"));
        };
        tracing::info!(
            "remo executing {} job in {}",
            language,
            job.workdir().display()
        );

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.execute_with(backend.as_ref(), job)
        }))
        .unwrap_or_else(|_| {
            tracing::error!("remo backend {} panicked", language);
            ExecutionResult::error(format!("{language} backend panicked"))
        });

        job.advance(match outcome.status {
            ExecutionStatus::Success => JobState::Succeeded,
            ExecutionStatus::Error => JobState::Failed,
        });
        outcome
    }

    fn execute_with(&self, backend: &dyn LanguageBackend, job: &mut Job) -> ExecutionResult {
        let compile_log = match backend.prepare(job, self.max_output_bytes) {
            Ok(log) => log,
            Err(err) => {
                tracing::info!("remo {} prepare failed: {}", job.language(), err);
                return failure(err, None, false);
            }
        };
        job.advance(JobState::Prepared);

        let result = backend.run(job, &self.limiter, self.max_output_bytes);
        job.advance(JobState::Ran);
        match result {
            Ok(run_log) => ExecutionResult::success(compile_log, run_log),
            Err(err) => {
                tracing::info!("remo {} run failed: {}", job.language(), err);
                failure(err, compile_log, true)
            }
        }
    }
}

fn failure(
    err: ExecutionError,
    compile_log: Option<ProcessLog>,
    ran: bool,
) -> ExecutionResult {
    let mut result = ExecutionResult::error(err.to_string());
    match err.log().cloned() {
        Some(log) if ran => {
            result.compile_log = compile_log;
            result.run_log = Some(log);
        }
        Some(log) => result.compile_log = Some(log),
        None => result.compile_log = compile_log,
    }
    result
}
