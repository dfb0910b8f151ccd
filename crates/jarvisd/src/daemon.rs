use crate::JarvisError;
use common::config::ChannelKind;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub console: bool,
    pub telegram: bool,
    pub list_triggers: bool,
    pub daemon: bool,
    pub daemon_child: bool,
    pub stop: bool,
    pub pid_file: Option<PathBuf>,
}

impl CliArgs {
    pub fn parse() -> Result<Self, JarvisError> {
        Self::parse_from(std::env::args().skip(1))
    }

    pub fn parse_from<I>(args: I) -> Result<Self, JarvisError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let mut cli = Self::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--console" => cli.console = true,
                "--telegram" => cli.telegram = true,
                "--list-triggers" => cli.list_triggers = true,
                "--daemon" => cli.daemon = true,
                "--daemon-child" => cli.daemon_child = true,
                "--stop" => cli.stop = true,
                "--config" => {
                    let Some(path) = args.next() else {
                        return Err(JarvisError::new("missing value for --config"));
                    };
                    cli.config = Some(PathBuf::from(path));
                }
                "--pid-file" => {
                    let Some(path) = args.next() else {
                        return Err(JarvisError::new("missing value for --pid-file"));
                    };
                    cli.pid_file = Some(PathBuf::from(path));
                }
                _ => {
                    return Err(JarvisError::new(format!("unknown argument: {arg}")));
                }
            }
        }

        if cli.console && cli.telegram {
            return Err(JarvisError::new(
                "--console and --telegram are mutually exclusive",
            ));
        }
        Ok(cli)
    }

    /// Command-line channel flags win over `channel.kind` from the config file.
    pub fn channel(&self, configured: ChannelKind) -> ChannelKind {
        if self.console {
            ChannelKind::Console
        } else if self.telegram {
            ChannelKind::Telegram
        } else {
            configured
        }
    }

    pub fn should_spawn_daemon(&self) -> bool {
        self.daemon && !self.daemon_child
    }
}

pub fn default_runtime_dir() -> Result<PathBuf, JarvisError> {
    let var_run = PathBuf::from("/var/run/jarvis");
    if ensure_dir(&var_run).is_ok() {
        return Ok(var_run);
    }

    let local = dirs::data_local_dir()
        .ok_or_else(|| JarvisError::new("local data dir missing"))?
        .join("jarvis");
    ensure_dir(&local)?;
    Ok(local)
}

pub fn default_pid_file() -> Result<PathBuf, JarvisError> {
    Ok(default_runtime_dir()?.join("jarvisd.pid"))
}

/// Re-executes the current binary detached from the terminal. The console channel
/// needs a terminal, so the child always talks to Telegram.
pub fn spawn_daemon_child(cli: &CliArgs) -> Result<(), JarvisError> {
    let exe = std::env::current_exe()
        .map_err(|err| JarvisError::new(format!("resolve current exe failed: {err}")))?;
    let mut command = std::process::Command::new(exe);
    command
        .arg("--daemon-child")
        .arg("--telegram")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    if let Some(path) = &cli.pid_file {
        command.arg("--pid-file").arg(path);
    }
    if let Some(path) = &cli.config {
        command.arg("--config").arg(path);
    }

    let child = command
        .spawn()
        .map_err(|err| JarvisError::new(format!("spawn daemon child failed: {err}")))?;
    tracing::info!("jarvisd daemon started pid={}", child.id());
    Ok(())
}

pub fn stop_daemon(pid_file: &Path) -> Result<(), JarvisError> {
    let pid = read_pid(pid_file)?;
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(_) => {}
            Err(Errno::ESRCH) => {
                tracing::info!("jarvisd pid {} was not running", pid);
            }
            Err(err) => {
                return Err(JarvisError::new(format!("send sigterm failed: {err}")));
            }
        }
        let _ = std::fs::remove_file(pid_file);
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        return Err(JarvisError::new("daemon stop is only supported on unix"));
    }

    Ok(())
}

pub struct PidFileGuard {
    pid_file: PathBuf,
}

impl PidFileGuard {
    pub fn create(pid_file: PathBuf) -> Result<Self, JarvisError> {
        if let Some(parent) = pid_file.parent() {
            ensure_dir(parent)?;
        }
        let pid = std::process::id();
        std::fs::write(&pid_file, format!("{pid}\n"))
            .map_err(|err| JarvisError::new(format!("write pid file failed: {err}")))?;
        Ok(Self { pid_file })
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.pid_file);
    }
}

fn ensure_dir(path: &Path) -> Result<(), JarvisError> {
    std::fs::create_dir_all(path)
        .map_err(|err| JarvisError::new(format!("create directory failed: {err}")))
}

fn read_pid(path: &Path) -> Result<i32, JarvisError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| JarvisError::new(format!("read pid file failed: {err}")))?;
    raw.trim()
        .parse::<i32>()
        .map_err(|err| JarvisError::new(format!("parse pid failed: {err}")))
}
