//! Terminal channel: stdin lines in, stdout out. A trailing `\` continues the
//! message on the next line.

use async_trait::async_trait;
use common::channel::{
    local_source, Attachment, ChannelError, InboundMessage, LocalSource, Notifier,
    SenderIdentity,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;

const CONSOLE_BUFFER: usize = 16;

/// Joins continuation lines into whole messages.
#[derive(Debug, Default)]
pub struct LineJoiner {
    buffer: String,
}

impl LineJoiner {
    pub fn push(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(head) = line.strip_suffix('\\') {
            self.buffer.push_str(head);
            self.buffer.push('\n');
            return None;
        }
        self.buffer.push_str(line);
        Some(std::mem::take(&mut self.buffer))
    }

    /// Whatever was pending when input ended.
    pub fn finish(self) -> Option<String> {
        let rest = self.buffer.trim_end_matches('\n');
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

/// Spawns the stdin reader. The source closes when stdin reaches EOF.
pub fn console_source() -> LocalSource {
    let (tx, source) = local_source(CONSOLE_BUFFER);
    tokio::spawn(async move {
        let sender = SenderIdentity::new("console", whoami());
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut joiner = LineJoiner::default();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!("console read failed: {}", err);
                    break;
                }
            };
            let Some(text) = joiner.push(&line) else {
                continue;
            };
            if tx
                .send(InboundMessage::text(sender.clone(), text))
                .await
                .is_err()
            {
                return;
            }
        }
        if let Some(text) = joiner.finish() {
            let _ = tx.send(InboundMessage::text(sender, text)).await;
        }
    });
    source
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "local".to_string())
}

pub struct ConsoleNotifier {
    stdout: Mutex<Stdout>,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

pub fn render_console(text: &str, attachments: &[Attachment]) -> String {
    let mut out = format!("{text}\n");
    for attachment in attachments {
        out.push_str(&format!(
            "--- {} ---\n{}",
            attachment.name,
            String::from_utf8_lossy(&attachment.bytes)
        ));
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send_message(
        &self,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<(), ChannelError> {
        let rendered = render_console(text, attachments);
        let mut stdout = self.stdout.lock().await;
        stdout
            .write_all(rendered.as_bytes())
            .await
            .map_err(|err| ChannelError::new(format!("stdout write failed: {err}")))?;
        stdout
            .flush()
            .await
            .map_err(|err| ChannelError::new(format!("stdout flush failed: {err}")))
    }
}
