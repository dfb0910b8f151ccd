use crate::RemoError;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tempfile::TempDir;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Language {
    C,
    Cpp,
    Java,
    Python,
    Bash,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::C,
        Language::Cpp,
        Language::Java,
        Language::Python,
        Language::Bash,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Self::C => "C",
            Self::Cpp => "CPP",
            Self::Java => "JAVA",
            Self::Python => "PYTHON",
            Self::Bash => "BASH",
        }
    }

    pub fn default_source_file(self) -> &'static str {
        match self {
            Self::C => "main.c",
            Self::Cpp => "main.cpp",
            Self::Java => "Main.java",
            Self::Python => "main.py",
            Self::Bash => "main.sh",
        }
    }
}

impl FromStr for Language {
    type Err = RemoError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let tag = raw.trim().to_ascii_uppercase();
        Language::ALL
            .into_iter()
            .find(|language| language.tag() == tag)
            .ok_or_else(|| RemoError::Validation(format!("unsupported language: {raw}")))
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Wire shape of an execution request as it arrives in flow arguments.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct JobRequest {
    pub lang: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub time_limit: Option<u64>,
    #[serde(default)]
    pub memory_limit: Option<u64>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub source_file_name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub time_limit_secs: u64,
    pub memory_limit_kb: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Created,
    Prepared,
    Ran,
    Succeeded,
    Failed,
}

/// Directory holding the job's sources and artifacts.
#[derive(Debug)]
pub enum WorkDir {
    /// Created for this job and removed when the job is dropped.
    Scoped(TempDir),
    /// Supplied by the caller and left in place.
    Provided(PathBuf),
}

impl WorkDir {
    pub fn path(&self) -> &Path {
        match self {
            Self::Scoped(dir) => dir.path(),
            Self::Provided(path) => path,
        }
    }
}

#[derive(Debug)]
pub struct Job {
    language: Language,
    source: String,
    stdin: Option<String>,
    limits: Limits,
    workdir: WorkDir,
    source_file_name: String,
    state: JobState,
    pub(crate) executable: Option<PathBuf>,
    pub(crate) entry_class: Option<String>,
}

impl Job {
    /// Validates `request`, filling absent limits from `defaults`. Nothing is spawned here.
    pub fn from_request(request: JobRequest, defaults: Limits) -> Result<Self, RemoError> {
        let language = Language::from_str(&request.lang)?;
        if request.source.trim().is_empty() {
            return Err(RemoError::Validation("missing source".to_string()));
        }
        let limits = Limits {
            time_limit_secs: request.time_limit.unwrap_or(defaults.time_limit_secs),
            memory_limit_kb: request.memory_limit.unwrap_or(defaults.memory_limit_kb),
        };
        if limits.time_limit_secs == 0 {
            return Err(RemoError::Validation("time_limit must be positive".to_string()));
        }
        if limits.memory_limit_kb == 0 {
            return Err(RemoError::Validation("memory_limit must be positive".to_string()));
        }
        let source_file_name = match request.source_file_name {
            Some(name) => validate_file_name(&name)?,
            None => language.default_source_file().to_string(),
        };
        let workdir = match request.path {
            Some(path) if path.is_dir() => WorkDir::Provided(path),
            Some(path) => {
                return Err(RemoError::Validation(format!(
                    "path is not a directory: {}",
                    path.display()
                )))
            }
            None => WorkDir::Scoped(
                tempfile::Builder::new()
                    .prefix("remo-")
                    .tempdir()
                    .map_err(RemoError::Workspace)?,
            ),
        };
        Ok(Self {
            language,
            source: request.source,
            stdin: request.stdin,
            limits,
            workdir,
            source_file_name,
            state: JobState::Created,
            executable: None,
            entry_class: None,
        })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn source_file_name(&self) -> &str {
        &self.source_file_name
    }

    pub fn source_path(&self) -> PathBuf {
        self.workdir().join(&self.source_file_name)
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    pub fn entry_class(&self) -> Option<&str> {
        self.entry_class.as_deref()
    }

    pub(crate) fn advance(&mut self, next: JobState) {
        tracing::debug!("remo job {} state {:?} -> {:?}", self.language, self.state, next);
        self.state = next;
    }

    pub(crate) fn write_source(&self) -> std::io::Result<PathBuf> {
        let path = self.source_path();
        std::fs::write(&path, &self.source)?;
        Ok(path)
    }
}

fn validate_file_name(name: &str) -> Result<String, RemoError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name.to_string()),
        _ => Err(RemoError::Validation(format!(
            "source_file_name must be a bare file name: {name}"
        ))),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLog {
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream went past `max_output_bytes` and was clipped.
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_log: Option<ProcessLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_log: Option<ProcessLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecutionResult {
    pub fn success(compile_log: Option<ProcessLog>, run_log: ProcessLog) -> Self {
        Self {
            status: ExecutionStatus::Success,
            compile_log,
            run_log: Some(run_log),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            compile_log: None,
            run_log: None,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::{Job, JobRequest, Language, Limits};
    use std::str::FromStr;

    fn defaults() -> Limits {
        Limits {
            time_limit_secs: 2,
            memory_limit_kb: 65_536,
        }
    }

    #[test]
    fn language_tags_parse_case_insensitively() {
        assert_eq!(Language::from_str("python").ok(), Some(Language::Python));
        assert_eq!(Language::from_str("CPP").ok(), Some(Language::Cpp));
        assert!(Language::from_str("COBOL").is_err());
    }

    #[test]
    fn request_defaults_fill_limits_and_file_name() {
        let job = Job::from_request(
            JobRequest {
                lang: "JAVA".to_string(),
                source: "class Main {}".to_string(),
                ..JobRequest::default()
            },
            defaults(),
        )
        .expect("valid job");
        assert_eq!(job.limits(), defaults());
        assert_eq!(job.source_file_name(), "Main.java");
        assert!(job.workdir().is_dir());
    }

    #[test]
    fn source_file_name_cannot_escape_workdir() {
        let result = Job::from_request(
            JobRequest {
                lang: "C".to_string(),
                source: "int main(){}".to_string(),
                source_file_name: Some("../main.c".to_string()),
                ..JobRequest::default()
            },
            defaults(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let result = Job::from_request(
            JobRequest {
                lang: "BASH".to_string(),
                source: "true".to_string(),
                time_limit: Some(0),
                ..JobRequest::default()
            },
            defaults(),
        );
        assert!(result.is_err());
    }
}
