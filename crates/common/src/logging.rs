use crate::config::LoggingSection;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Noop,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Noop => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Whether an event at `event` level passes a filter set to `self`.
    pub fn allows(self, event: Self) -> bool {
        self != Self::Noop && event != Self::Noop && event <= self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("logging init failed: {0}")]
    Init(String),
    #[error("logging io failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone)]
pub struct LoggingHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    log_file: Option<Arc<RotatingLog>>,
}

impl LoggingHandle {
    pub fn set_level(&self, level: LogLevel) -> Result<(), LoggingError> {
        self.filter
            .reload(EnvFilter::new(level.as_directive()))
            .map_err(|err| LoggingError::Init(format!("reload filter failed: {err}")))
    }

    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.log_file.as_ref().map(|log| log.path.clone())
    }
}

/// Installs the global subscriber. `RUST_LOG`, when set, wins over the configured level.
pub fn init_logging(config: &LoggingSection) -> Result<LoggingHandle, LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));
    let (filter_layer, filter) = reload::Layer::new(env_filter);

    let log_file = match &config.file {
        Some(path) => Some(Arc::new(RotatingLog::open(
            path.clone(),
            config.rotate_keep,
            config.rotate_max_bytes,
        )?)),
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter_layer);
    let installed = match &log_file {
        Some(log) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(LogWriterFactory(log.clone())),
            )
            .try_init(),
        None => registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .try_init(),
    };
    installed.map_err(|err| LoggingError::Init(err.to_string()))?;

    Ok(LoggingHandle { filter, log_file })
}

#[derive(Clone)]
struct LogWriterFactory(Arc<RotatingLog>);

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self.0.clone())
    }
}

struct LogWriter(Arc<RotatingLog>);

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.append(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Append-only log file rotated on size or day change; rotated segments are gzipped.
struct RotatingLog {
    path: PathBuf,
    keep: usize,
    max_bytes: u64,
    active: Mutex<ActiveSegment>,
}

struct ActiveSegment {
    file: File,
    written: u64,
    day: u64,
}

impl RotatingLog {
    fn open(path: PathBuf, keep: usize, max_bytes: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            keep,
            max_bytes,
            active: Mutex::new(ActiveSegment {
                file,
                written,
                day: epoch_day(),
            }),
        })
    }

    fn append(&self, buf: &[u8]) -> io::Result<usize> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| io::Error::other("log mutex poisoned"))?;
        let incoming = buf.len() as u64;
        let oversized =
            active.written > 0 && active.written.saturating_add(incoming) > self.max_bytes;
        if active.day != epoch_day() || oversized {
            self.rotate(&mut active)?;
        }
        let count = active.file.write(buf)?;
        active.written = active.written.saturating_add(count as u64);
        Ok(count)
    }

    fn flush(&self) -> io::Result<()> {
        self.active
            .lock()
            .map_err(|_| io::Error::other("log mutex poisoned"))?
            .file
            .flush()
    }

    fn rotate(&self, active: &mut ActiveSegment) -> io::Result<()> {
        active.file.flush()?;
        let segment = PathBuf::from(format!("{}.{}", self.path.display(), epoch_seconds()));
        if self.path.exists() {
            std::fs::rename(&self.path, &segment)?;
            gzip_in_place(&segment)?;
        }
        active.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        active.written = 0;
        active.day = epoch_day();
        prune_segments(&self.path, self.keep)
    }
}

fn gzip_in_place(path: &Path) -> io::Result<()> {
    let raw = std::fs::read(path)?;
    let target = File::create(format!("{}.gz", path.display()))?;
    let mut encoder = GzEncoder::new(target, Compression::default());
    encoder.write_all(&raw)?;
    encoder.finish()?;
    std::fs::remove_file(path)
}

fn prune_segments(base: &Path, keep: usize) -> io::Result<()> {
    let (Some(dir), Some(stem)) = (base.parent(), base.file_name()) else {
        return Ok(());
    };
    let stem = stem.to_string_lossy().to_string();
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&stem) && name.ends_with(".gz") {
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(UNIX_EPOCH);
            segments.push((modified, entry.path()));
        }
    }
    segments.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, stale) in segments.into_iter().skip(keep) {
        let _ = std::fs::remove_file(stale);
    }
    Ok(())
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn epoch_day() -> u64 {
    epoch_seconds() / 86_400
}
