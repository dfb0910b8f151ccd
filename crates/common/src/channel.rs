use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SenderIdentity {
    pub channel: String,
    pub id: String,
}

impl SenderIdentity {
    pub fn new(channel: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for SenderIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.channel, self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn text(name: impl Into<String>, contents: &str) -> Self {
        Self {
            name: name.into(),
            bytes: contents.as_bytes().to_vec(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub sender: SenderIdentity,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl InboundMessage {
    pub fn text(sender: SenderIdentity, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("channel error: {message}")]
pub struct ChannelError {
    message: String,
}

impl ChannelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Where chat messages come from. `Ok(None)` means the channel closed.
#[async_trait]
pub trait MessageSource: Send {
    async fn recv(&mut self) -> Result<Option<InboundMessage>, ChannelError>;
}

/// Outbound delivery. Callers log failures; nothing retries.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, text: &str, attachments: &[Attachment])
        -> Result<(), ChannelError>;
}

pub struct LocalSource {
    rx: mpsc::Receiver<InboundMessage>,
}

/// In-process source fed through an mpsc sender; used by the console channel and tests.
pub fn local_source(buffer: usize) -> (mpsc::Sender<InboundMessage>, LocalSource) {
    let (tx, rx) = mpsc::channel(buffer);
    (tx, LocalSource { rx })
}

#[async_trait]
impl MessageSource for LocalSource {
    async fn recv(&mut self) -> Result<Option<InboundMessage>, ChannelError> {
        Ok(self.rx.recv().await)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

/// Notifier that keeps everything it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|message| message.text).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(
        &self,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<(), ChannelError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| ChannelError::new("recording notifier poisoned"))?;
        sent.push(SentMessage {
            text: text.to_string(),
            attachments: attachments.to_vec(),
        });
        Ok(())
    }
}
