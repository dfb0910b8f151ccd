use crate::job::Limits;
use common::config::WrapperConfig;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// `$1` is the address-space cap in KiB; the rest is handed to `timeout`.
const ULIMIT_SCRIPT: &str = r#"ulimit -v "$1" || exit 125; shift; exec timeout -k 1 "$@""#;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitViolation {
    Time,
    Memory,
}

/// Wraps a program invocation so the kernel or a helper enforces wall time and memory.
#[derive(Clone, Debug)]
pub struct ResourceLimiter {
    wrapper: WrapperConfig,
}

impl ResourceLimiter {
    pub fn new(wrapper: WrapperConfig) -> Self {
        Self { wrapper }
    }

    pub fn wrapper(&self) -> &WrapperConfig {
        &self.wrapper
    }

    /// Builds the limited command for `argv` (program first), running inside `workdir`.
    pub fn command(&self, limits: Limits, argv: &[String], workdir: &Path) -> Command {
        let secs = limits.time_limit_secs.to_string();
        let kb = limits.memory_limit_kb.to_string();
        let mut command = match &self.wrapper {
            WrapperConfig::Ulimit => {
                let mut command = Command::new("bash");
                command
                    .arg("-c")
                    .arg(ULIMIT_SCRIPT)
                    .arg("remo-limit")
                    .arg(kb)
                    .arg(secs);
                command
            }
            WrapperConfig::Script {
                interpreter,
                script,
            } => {
                let mut command = Command::new(interpreter);
                command.arg(script).arg("-t").arg(secs).arg("-m").arg(kb);
                command
            }
        };
        command.args(argv).current_dir(workdir);
        command
    }

    /// Maps a finished run to the limit it tripped, if any. Exit codes alone cannot tell
    /// `timeout` apart from a program that exits 124 or gets SIGKILLed (137) by the
    /// OOM killer, so the time limit is only blamed once the deadline has passed.
    pub fn classify(
        &self,
        code: Option<i32>,
        stderr: &str,
        elapsed: Duration,
        limits: Limits,
    ) -> Option<LimitViolation> {
        let deadline_passed = elapsed >= Duration::from_secs(limits.time_limit_secs);
        match &self.wrapper {
            // timeout exits 124 on TERM, 137 when it had to follow up with KILL
            WrapperConfig::Ulimit => match code {
                Some(124) | Some(137) if deadline_passed => Some(LimitViolation::Time),
                Some(code) if code != 0 && allocation_failed(stderr) => {
                    Some(LimitViolation::Memory)
                }
                _ => None,
            },
            WrapperConfig::Script { .. } => stderr.lines().find_map(|line| {
                let line = line.trim_start();
                if line.starts_with("TIMEOUT") {
                    Some(LimitViolation::Time)
                } else if line.starts_with("MEM") {
                    Some(LimitViolation::Memory)
                } else {
                    None
                }
            }),
        }
    }
}

fn allocation_failed(stderr: &str) -> bool {
    ["MemoryError", "std::bad_alloc", "Cannot allocate memory", "OutOfMemoryError"]
        .iter()
        .any(|marker| stderr.contains(marker))
}
