//! Zero-argument routines addressed by their exact trigger text.

use crate::trie::TriggerKind;
use crate::RouterError;
use common::config::{RoutineConfig, RoutineTables};
use regex::Regex;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

const LOG_TAIL_LINES: usize = 10;

/// State routines may read. Cheap to clone into blocking tasks.
#[derive(Clone, Debug, Default)]
pub struct RoutineContext {
    pub log_file: Option<PathBuf>,
}

pub type RoutineFn = Arc<dyn Fn(&RoutineContext) -> Result<String, RouterError> + Send + Sync>;

#[derive(Clone)]
pub struct Routine {
    pub name: String,
    pub callable: String,
    pub message: String,
    pub kind: TriggerKind,
    run: RoutineFn,
}

impl Routine {
    pub fn new(
        name: impl Into<String>,
        callable: impl Into<String>,
        message: impl Into<String>,
        kind: TriggerKind,
        run: RoutineFn,
    ) -> Self {
        Self {
            name: name.into(),
            callable: callable.into(),
            message: message.into(),
            kind,
            run,
        }
    }

    pub fn invoke(&self, ctx: &RoutineContext) -> Result<String, RouterError> {
        (self.run)(ctx)
    }
}

impl std::fmt::Debug for Routine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routine")
            .field("name", &self.name)
            .field("callable", &self.callable)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Resolves a callable name to its implementation.
pub fn builtin(callable: &str) -> Option<RoutineFn> {
    let run: RoutineFn = match callable {
        "local_time" => Arc::new(local_time),
        "current_working_directory" => Arc::new(current_working_directory),
        "local_ip_address" => Arc::new(local_ip_address),
        "connected_ssid" => Arc::new(connected_ssid),
        "cpu_temperature" => Arc::new(cpu_temperature),
        "uptime" => Arc::new(uptime),
        "log_tail" => Arc::new(log_tail),
        "reboot" => Arc::new(reboot),
        "shutdown" => Arc::new(shutdown),
        _ => return None,
    };
    Some(run)
}

/// Builds every configured routine. An unknown callable is a configuration error.
pub fn from_config(tables: &RoutineTables) -> Result<Vec<Routine>, RouterError> {
    let utility = tables
        .utility
        .iter()
        .map(|(name, config)| (name, config, TriggerKind::Utility));
    let power = tables
        .power
        .iter()
        .map(|(name, config)| (name, config, TriggerKind::Power));
    utility
        .chain(power)
        .map(|(name, config, kind)| resolve(name, config, kind))
        .collect()
}

fn resolve(name: &str, config: &RoutineConfig, kind: TriggerKind) -> Result<Routine, RouterError> {
    let run = builtin(&config.callable).ok_or_else(|| {
        RouterError::Configuration(format!(
            "routine {name} names unknown callable {}",
            config.callable
        ))
    })?;
    Ok(Routine::new(name, &config.callable, &config.message, kind, run))
}

fn local_time(_: &RoutineContext) -> Result<String, RouterError> {
    Ok(chrono::Local::now().format("%c").to_string())
}

fn current_working_directory(_: &RoutineContext) -> Result<String, RouterError> {
    std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .map_err(|err| RouterError::Execution(format!("cwd failed: {err}")))
}

/// Address of the interface that routes outward. Connecting a UDP socket sends nothing.
fn local_ip_address(_: &RoutineContext) -> Result<String, RouterError> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .map_err(|err| RouterError::Execution(format!("udp bind failed: {err}")))?;
    socket
        .connect("8.8.8.8:80")
        .map_err(|err| RouterError::Execution(format!("no route to network: {err}")))?;
    socket
        .local_addr()
        .map(|addr| addr.ip().to_string())
        .map_err(|err| RouterError::Execution(format!("local addr failed: {err}")))
}

fn connected_ssid(_: &RoutineContext) -> Result<String, RouterError> {
    if let Ok(output) = Command::new("iwgetid").arg("-r").output() {
        let ssid = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() && !ssid.is_empty() {
            return Ok(ssid);
        }
    }
    let output = Command::new("iwconfig")
        .arg("wlan0")
        .output()
        .map_err(|err| RouterError::Execution(format!("iwconfig failed: {err}")))?;
    let text = String::from_utf8_lossy(&output.stdout);
    let essid = Regex::new(r#"ESSID:"([^"]+)""#)
        .map_err(|err| RouterError::Execution(format!("essid pattern failed: {err}")))?;
    essid
        .captures(&text)
        .map(|captures| captures[1].to_string())
        .ok_or_else(|| RouterError::Execution("not connected to a wireless network".to_string()))
}

fn cpu_temperature(_: &RoutineContext) -> Result<String, RouterError> {
    let raw = std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp")
        .map_err(|err| RouterError::Execution(format!("thermal zone read failed: {err}")))?;
    let millidegrees: f64 = raw
        .trim()
        .parse()
        .map_err(|err| RouterError::Execution(format!("thermal zone parse failed: {err}")))?;
    Ok(format!("{:.1}°C", millidegrees / 1000.0))
}

fn uptime(_: &RoutineContext) -> Result<String, RouterError> {
    let raw = std::fs::read_to_string("/proc/uptime")
        .map_err(|err| RouterError::Execution(format!("uptime read failed: {err}")))?;
    let seconds: f64 = raw
        .split_whitespace()
        .next()
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| RouterError::Execution("uptime parse failed".to_string()))?;
    Ok(format_duration(seconds as u64))
}

fn format_duration(total: u64) -> String {
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn log_tail(ctx: &RoutineContext) -> Result<String, RouterError> {
    let path = ctx
        .log_file
        .as_ref()
        .ok_or_else(|| RouterError::Execution("logging is not writing to a file".to_string()))?;
    let contents = std::fs::read_to_string(path)
        .map_err(|err| RouterError::Execution(format!("log read failed: {err}")))?;
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    Ok(lines[start..].join("\n"))
}

fn reboot(_: &RoutineContext) -> Result<String, RouterError> {
    run_privileged(&["reboot"])
}

fn shutdown(_: &RoutineContext) -> Result<String, RouterError> {
    run_privileged(&["shutdown", "-h", "now"])
}

fn run_privileged(args: &[&str]) -> Result<String, RouterError> {
    let status = Command::new("sudo")
        .args(args)
        .status()
        .map_err(|err| RouterError::Execution(format!("sudo {} failed: {err}", args[0])))?;
    if status.success() {
        Ok(String::new())
    } else {
        Err(RouterError::Execution(format!(
            "sudo {} exited with {status}",
            args.join(" ")
        )))
    }
}
