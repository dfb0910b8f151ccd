use crate::job::{Job, Language, ProcessLog};
use crate::limiter::{LimitViolation, ResourceLimiter};
use crate::process::{run_captured, Captured};
use std::path::Path;
use std::process::Command;
use walkdir::WalkDir;

const JAVA_ENTRY_SIGNATURE: &str = "public static void main(java.lang.String[])";

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("compilation failed")]
    Compile { log: ProcessLog },
    #[error("no entry point found")]
    NoEntryPoint { log: ProcessLog },
    #[error("multiple entry points found: {}", .classes.join(", "))]
    MultipleEntryPoints {
        classes: Vec<String>,
        log: ProcessLog,
    },
    #[error("time limit exceeded ({secs}s)")]
    TimeLimit { secs: u64, log: ProcessLog },
    #[error("memory limit exceeded ({kb} KiB)")]
    MemoryLimit { kb: u64, log: ProcessLog },
    #[error("{}", exit_message(.code))]
    NonZeroExit { code: Option<i32>, log: ProcessLog },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("io failed: {0}")]
    Io(std::io::Error),
    #[error("{0}")]
    Invariant(String),
}

fn exit_message(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("program exited with status {code}"),
        None => "program terminated by signal".to_string(),
    }
}

impl ExecutionError {
    /// Process output carried by the error, if the failure happened after a process ran.
    pub fn log(&self) -> Option<&ProcessLog> {
        match self {
            Self::Compile { log }
            | Self::NoEntryPoint { log }
            | Self::MultipleEntryPoints { log, .. }
            | Self::TimeLimit { log, .. }
            | Self::MemoryLimit { log, .. }
            | Self::NonZeroExit { log, .. } => Some(log),
            _ => None,
        }
    }
}

/// Per-language compile and run steps. `prepare` writes sources into the job's
/// working directory and builds whatever `run_command` needs.
pub trait LanguageBackend: Send + Sync {
    fn language(&self) -> Language;

    /// Returns the compiler log for compiled languages, `None` otherwise.
    fn prepare(&self, job: &mut Job, max_output_bytes: usize)
        -> Result<Option<ProcessLog>, ExecutionError>;

    /// Program and arguments to execute once prepared.
    fn run_command(&self, job: &Job) -> Result<Vec<String>, ExecutionError>;

    fn run(
        &self,
        job: &Job,
        limiter: &ResourceLimiter,
        max_output_bytes: usize,
    ) -> Result<ProcessLog, ExecutionError> {
        let argv = self.run_command(job)?;
        let limits = job.limits();
        let command = limiter.command(limits, &argv, job.workdir());
        let captured = run_captured(command, job.stdin(), max_output_bytes)?;
        if captured.status.success() {
            return Ok(captured.log);
        }
        let code = captured.code();
        match limiter.classify(code, &captured.log.stderr, captured.elapsed, limits) {
            Some(LimitViolation::Time) => Err(ExecutionError::TimeLimit {
                secs: limits.time_limit_secs,
                log: captured.log,
            }),
            Some(LimitViolation::Memory) => Err(ExecutionError::MemoryLimit {
                kb: limits.memory_limit_kb,
                log: captured.log,
            }),
            None => Err(ExecutionError::NonZeroExit {
                code,
                log: captured.log,
            }),
        }
    }
}

fn compile(
    mut command: Command,
    workdir: &Path,
    max_output_bytes: usize,
) -> Result<ProcessLog, ExecutionError> {
    command.current_dir(workdir);
    let Captured { status, log, .. } = run_captured(command, None, max_output_bytes)?;
    if status.success() {
        Ok(log)
    } else {
        Err(ExecutionError::Compile { log })
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn prepared_executable(job: &Job) -> Result<String, ExecutionError> {
    job.executable()
        .map(path_arg)
        .ok_or_else(|| ExecutionError::Invariant("job has not been compiled".to_string()))
}

pub struct CBackend;

impl LanguageBackend for CBackend {
    fn language(&self) -> Language {
        Language::C
    }

    fn prepare(
        &self,
        job: &mut Job,
        max_output_bytes: usize,
    ) -> Result<Option<ProcessLog>, ExecutionError> {
        let source = job.write_source().map_err(ExecutionError::Io)?;
        let executable = job.workdir().join("main");
        let mut command = Command::new("gcc");
        command
            .arg("-O2")
            .arg("-o")
            .arg(&executable)
            .arg(&source)
            .arg("-lm");
        let log = compile(command, job.workdir(), max_output_bytes)?;
        job.executable = Some(executable);
        Ok(Some(log))
    }

    fn run_command(&self, job: &Job) -> Result<Vec<String>, ExecutionError> {
        Ok(vec![prepared_executable(job)?])
    }
}

pub struct CppBackend;

impl LanguageBackend for CppBackend {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn prepare(
        &self,
        job: &mut Job,
        max_output_bytes: usize,
    ) -> Result<Option<ProcessLog>, ExecutionError> {
        let source = job.write_source().map_err(ExecutionError::Io)?;
        let executable = job.workdir().join("main");
        let mut command = Command::new("g++");
        command
            .arg("-std=c++17")
            .arg("-O2")
            .arg("-o")
            .arg(&executable)
            .arg(&source);
        let log = compile(command, job.workdir(), max_output_bytes)?;
        job.executable = Some(executable);
        Ok(Some(log))
    }

    fn run_command(&self, job: &Job) -> Result<Vec<String>, ExecutionError> {
        Ok(vec![prepared_executable(job)?])
    }
}

/// Compiles every class the source declares, then picks the single class exposing
/// `main(String[])` as the entry point. Classes in packages are found under their
/// package directories and named by their binary name (`demo.Main`).
pub struct JavaBackend;

/// Flags that keep the JVM's up-front reservations (class space, code cache,
/// metaspace, CDS archive) small enough to start under `ulimit -v`.
const JVM_RESERVATION_FLAGS: [&str; 6] = [
    "-XX:+UseSerialGC",
    "-Xshare:off",
    "-XX:CompressedClassSpaceSize=32m",
    "-XX:ReservedCodeCacheSize=16m",
    "-XX:MaxMetaspaceSize=64m",
    "-XX:TieredStopAtLevel=1",
];
const JVM_MIN_HEAP_KB: u64 = 16 * 1024;

fn class_name(workdir: &Path, class_file: &Path) -> Option<String> {
    let relative = class_file.strip_prefix(workdir).ok()?.with_extension("");
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().to_string())
        .collect();
    (!parts.is_empty()).then(|| parts.join("."))
}

impl JavaBackend {
    fn entry_points(
        &self,
        workdir: &Path,
        max_output_bytes: usize,
    ) -> Result<Vec<String>, ExecutionError> {
        let mut classes = Vec::new();
        for entry in WalkDir::new(workdir).follow_links(false) {
            let entry = entry.map_err(|err| ExecutionError::Io(err.into()))?;
            let path = entry.path();
            if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "class") {
                classes.extend(class_name(workdir, path));
            }
        }
        classes.sort();

        let mut entries = Vec::new();
        for class in classes {
            let mut command = Command::new("javap");
            command.arg("-cp").arg(workdir).arg(&class);
            let captured = run_captured(command, None, max_output_bytes)?;
            if captured.log.stdout.contains(JAVA_ENTRY_SIGNATURE) {
                entries.push(class);
            }
        }
        Ok(entries)
    }
}

impl LanguageBackend for JavaBackend {
    fn language(&self) -> Language {
        Language::Java
    }

    fn prepare(
        &self,
        job: &mut Job,
        max_output_bytes: usize,
    ) -> Result<Option<ProcessLog>, ExecutionError> {
        let source = job.write_source().map_err(ExecutionError::Io)?;
        let mut command = Command::new("javac");
        command.arg("-d").arg(job.workdir()).arg(&source);
        let log = compile(command, job.workdir(), max_output_bytes)?;

        let mut entries = self.entry_points(job.workdir(), max_output_bytes)?;
        match entries.len() {
            0 => Err(ExecutionError::NoEntryPoint { log }),
            1 => {
                job.entry_class = entries.pop();
                Ok(Some(log))
            }
            _ => Err(ExecutionError::MultipleEntryPoints {
                classes: entries,
                log,
            }),
        }
    }

    fn run_command(&self, job: &Job) -> Result<Vec<String>, ExecutionError> {
        let class = job
            .entry_class()
            .ok_or_else(|| ExecutionError::Invariant("java entry point not resolved".to_string()))?;
        Ok(java_command(
            job.limits().memory_limit_kb,
            job.workdir(),
            class,
        ))
    }
}

/// The heap gets a quarter of the address-space cap; the rest covers the fixed
/// reservations, thread stacks and native allocations.
fn java_command(memory_limit_kb: u64, workdir: &Path, class: &str) -> Vec<String> {
    let heap_kb = (memory_limit_kb / 4).max(JVM_MIN_HEAP_KB);
    let mut argv = vec!["java".to_string()];
    argv.extend(JVM_RESERVATION_FLAGS.iter().map(|flag| flag.to_string()));
    argv.extend([
        format!("-Xmx{heap_kb}k"),
        "-cp".to_string(),
        path_arg(workdir),
        class.to_string(),
    ]);
    argv
}

pub struct PythonBackend;

impl LanguageBackend for PythonBackend {
    fn language(&self) -> Language {
        Language::Python
    }

    fn prepare(&self, job: &mut Job, _: usize) -> Result<Option<ProcessLog>, ExecutionError> {
        job.write_source().map_err(ExecutionError::Io)?;
        Ok(None)
    }

    fn run_command(&self, job: &Job) -> Result<Vec<String>, ExecutionError> {
        Ok(vec!["python3".to_string(), path_arg(&job.source_path())])
    }
}

pub struct BashBackend;

impl LanguageBackend for BashBackend {
    fn language(&self) -> Language {
        Language::Bash
    }

    fn prepare(&self, job: &mut Job, _: usize) -> Result<Option<ProcessLog>, ExecutionError> {
        job.write_source().map_err(ExecutionError::Io)?;
        Ok(None)
    }

    fn run_command(&self, job: &Job) -> Result<Vec<String>, ExecutionError> {
        Ok(vec!["bash".to_string(), path_arg(&job.source_path())])
    }
}
