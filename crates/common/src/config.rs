use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("config parse failed: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config invalid: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub setup: SetupConfig,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub routines: RoutineTables,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SetupConfig {
    pub greeting: String,
    pub comment: String,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            greeting: "Jarvis is online".to_string(),
            comment: "Send a routine name, or !<flow> followed by its arguments".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_rotate_keep")]
    pub rotate_keep: usize,
    #[serde(default = "default_rotate_max_bytes")]
    pub rotate_max_bytes: u64,
}

fn default_rotate_keep() -> usize {
    5
}

fn default_rotate_max_bytes() -> u64 {
    10 * 1024 * 1024
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
            rotate_keep: default_rotate_keep(),
            rotate_max_bytes: default_rotate_max_bytes(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    Console,
    Telegram,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub kind: ChannelKind,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub owner_chat_id: Option<i64>,
    #[serde(default = "default_poll_timeout_seconds")]
    pub poll_timeout_seconds: u64,
    #[serde(default = "default_offset_file")]
    pub offset_file: PathBuf,
}

fn default_poll_timeout_seconds() -> u64 {
    30
}

fn default_offset_file() -> PathBuf {
    PathBuf::from("data/telegram.offset")
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            owner_chat_id: None,
            poll_timeout_seconds: default_poll_timeout_seconds(),
            offset_file: default_offset_file(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    #[default]
    Ansi,
    Plain,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_flow_prefix")]
    pub flow_prefix: char,
    #[serde(default)]
    pub response_style: ResponseStyle,
    #[serde(default = "default_trace_capacity")]
    pub trace_capacity: usize,
}

fn default_flow_prefix() -> char {
    '!'
}

fn default_trace_capacity() -> usize {
    256
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            flow_prefix: default_flow_prefix(),
            response_style: ResponseStyle::Ansi,
            trace_capacity: default_trace_capacity(),
        }
    }
}

/// How untrusted programs are wrapped to enforce time and memory limits.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WrapperConfig {
    /// `bash` applies `ulimit -v` and hands off to coreutils `timeout`.
    #[default]
    Ulimit,
    /// External script invoked as `<interpreter> <script> -t <secs> -m <kb> <cmd...>`.
    Script {
        interpreter: String,
        script: PathBuf,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SandboxConfig {
    #[serde(default = "default_time_limit_secs")]
    pub default_time_limit_secs: u64,
    #[serde(default = "default_memory_limit_kb")]
    pub default_memory_limit_kb: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default)]
    pub wrapper: WrapperConfig,
}

fn default_time_limit_secs() -> u64 {
    5
}

fn default_memory_limit_kb() -> u64 {
    512 * 1024
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_time_limit_secs: default_time_limit_secs(),
            default_memory_limit_kb: default_memory_limit_kb(),
            max_output_bytes: default_max_output_bytes(),
            wrapper: WrapperConfig::Ulimit,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RoutineConfig {
    pub callable: String,
    #[serde(default)]
    pub message: String,
}

/// Zero-argument routines keyed by the exact text that triggers them.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RoutineTables {
    #[serde(default)]
    pub utility: BTreeMap<String, RoutineConfig>,
    #[serde(default)]
    pub power: BTreeMap<String, RoutineConfig>,
}

impl Default for RoutineTables {
    fn default() -> Self {
        let utility = [
            ("time", "local_time", "Local time: "),
            ("pwd", "current_working_directory", "Working directory: "),
            ("ip", "local_ip_address", "Local IP: "),
            ("ssid", "connected_ssid", "Connected SSID: "),
            ("temp", "cpu_temperature", "CPU temperature: "),
            ("uptime", "uptime", "Uptime: "),
            ("logs", "log_tail", "Recent log lines:\n"),
        ];
        let power = [
            ("restart", "reboot", "Restarting the machine"),
            ("shutdown", "shutdown", "Shutting down the machine"),
        ];
        Self {
            utility: routine_map(&utility),
            power: routine_map(&power),
        }
    }
}

fn routine_map(entries: &[(&str, &str, &str)]) -> BTreeMap<String, RoutineConfig> {
    entries
        .iter()
        .map(|(name, callable, message)| {
            (
                name.to_string(),
                RoutineConfig {
                    callable: callable.to_string(),
                    message: message.to_string(),
                },
            )
        })
        .collect()
}

impl AgentConfig {
    pub fn default_for_local() -> Self {
        Self {
            setup: SetupConfig::default(),
            logging: LoggingSection::default(),
            channel: ChannelConfig::default(),
            dispatch: DispatchConfig::default(),
            sandbox: SandboxConfig::default(),
            routines: RoutineTables::default(),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, falling back to local defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("config {} not found; using local defaults", path.display());
                Ok(Self::default_for_local())
            }
            Err(err) => Err(ConfigError::Read(err)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.flow_prefix.is_whitespace() {
            return Err(ConfigError::Invalid(
                "dispatch.flow_prefix must not be whitespace".to_string(),
            ));
        }
        if self.sandbox.default_time_limit_secs == 0 || self.sandbox.default_memory_limit_kb == 0 {
            return Err(ConfigError::Invalid(
                "sandbox default limits must be positive".to_string(),
            ));
        }
        for name in self.routines.utility.keys() {
            if self.routines.power.contains_key(name) {
                return Err(ConfigError::Invalid(format!(
                    "routine {name} is declared as both utility and power"
                )));
            }
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var("JARVIS_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| ConfigError::Invalid("home dir missing".into()))?;
    Ok(home.join(".config/jarvis/jarvis.toml"))
}

#[cfg(test)]
mod tests {
    use super::{AgentConfig, ChannelKind, ResponseStyle, WrapperConfig};

    #[test]
    fn empty_file_uses_defaults() {
        let config = AgentConfig::from_toml("").expect("parse empty config");
        assert_eq!(config.dispatch.flow_prefix, '!');
        assert_eq!(config.channel.kind, ChannelKind::Console);
        assert_eq!(config.sandbox.wrapper, WrapperConfig::Ulimit);
        assert!(config.routines.utility.contains_key("time"));
        assert!(config.routines.power.contains_key("restart"));
    }

    #[test]
    fn sections_override_defaults() {
        let raw = r#"
[dispatch]
flow_prefix = "/"
response_style = "plain"

[sandbox]
default_time_limit_secs = 3
wrapper = { kind = "script", interpreter = "perl", script = "/opt/timeout.pl" }

[routines.utility.status]
callable = "uptime"
message = "Up for "
"#;
        let config = AgentConfig::from_toml(raw).expect("parse config");
        assert_eq!(config.dispatch.flow_prefix, '/');
        assert_eq!(config.dispatch.response_style, ResponseStyle::Plain);
        assert_eq!(config.sandbox.default_time_limit_secs, 3);
        assert!(matches!(
            config.sandbox.wrapper,
            WrapperConfig::Script { ref interpreter, .. } if interpreter == "perl"
        ));
        assert_eq!(config.routines.utility.len(), 1);
        assert!(config.routines.power.is_empty());
    }

    #[test]
    fn routine_in_both_tables_is_rejected() {
        let raw = r#"
[routines.utility.reboot]
callable = "uptime"

[routines.power.reboot]
callable = "reboot"
"#;
        assert!(AgentConfig::from_toml(raw).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_local_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AgentConfig::load(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(config.sandbox.default_time_limit_secs, 5);
    }
}
