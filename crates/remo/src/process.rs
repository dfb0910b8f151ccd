use crate::backend::ExecutionError;
use crate::job::ProcessLog;
use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 8 * 1024;
const TRUNCATION_MARKER: &str = "\n...<truncated>\n";

pub(crate) struct Captured {
    pub status: ExitStatus,
    pub log: ProcessLog,
    pub elapsed: Duration,
}

impl Captured {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Bytes kept from one pipe. Everything past the cap was read and thrown away.
#[derive(Debug, Default)]
struct Bounded {
    kept: Vec<u8>,
    total: u64,
}

impl Bounded {
    fn truncated(&self) -> bool {
        self.total > self.kept.len() as u64
    }

    fn render(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.kept).to_string();
        if self.truncated() {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Reads `reader` to EOF keeping at most `max_bytes`. The rest is drained so the
/// child never blocks on a full pipe.
fn read_bounded<R: Read>(mut reader: R, max_bytes: usize) -> Bounded {
    let mut bounded = Bounded {
        kept: Vec::with_capacity(max_bytes.min(READ_CHUNK)),
        total: 0,
    };
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::debug!("remo pipe read stopped: {}", err);
                break;
            }
        };
        bounded.total += read as u64;
        let room = max_bytes.saturating_sub(bounded.kept.len());
        bounded.kept.extend_from_slice(&chunk[..read.min(room)]);
    }
    bounded
}

fn spawn_reader<R>(pipe: Option<R>, max_bytes: usize) -> Option<JoinHandle<Bounded>>
where
    R: Read + Send + 'static,
{
    pipe.map(|pipe| std::thread::spawn(move || read_bounded(pipe, max_bytes)))
}

fn join_reader(reader: Option<JoinHandle<Bounded>>) -> Bounded {
    reader
        .and_then(|reader| reader.join().ok())
        .unwrap_or_default()
}

/// Runs `command` to completion with piped stdio. Stdin is fed from its own thread and
/// each output pipe has a reader thread capped at `max_output_bytes`, so neither a
/// chatty child nor one that writes before reading can stall or bloat us.
pub(crate) fn run_captured(
    mut command: Command,
    stdin: Option<&str>,
    max_output_bytes: usize,
) -> Result<Captured, ExecutionError> {
    let program = command.get_program().to_string_lossy().to_string();
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let started = Instant::now();
    let mut child = command
        .spawn()
        .map_err(|source| ExecutionError::Spawn { program, source })?;

    let feeder = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_string();
            Some(std::thread::spawn(move || {
                // A child that exits without reading closes the pipe; that is not an error here.
                let _ = pipe.write_all(input.as_bytes());
            }))
        }
        _ => None,
    };
    let stdout = spawn_reader(child.stdout.take(), max_output_bytes);
    let stderr = spawn_reader(child.stderr.take(), max_output_bytes);

    let status = child.wait().map_err(ExecutionError::Io)?;
    let elapsed = started.elapsed();
    let stdout = join_reader(stdout);
    let stderr = join_reader(stderr);
    if let Some(feeder) = feeder {
        let _ = feeder.join();
    }
    if stdout.truncated() || stderr.truncated() {
        tracing::info!(
            "remo clipped output stdout={}B stderr={}B cap={}B",
            stdout.total,
            stderr.total,
            max_output_bytes
        );
    }

    Ok(Captured {
        status,
        log: ProcessLog {
            stdout: stdout.render(),
            stderr: stderr.render(),
            truncated: stdout.truncated() || stderr.truncated(),
        },
        elapsed,
    })
}
