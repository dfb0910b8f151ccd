//! Telegram Bot API channel: long-polls `getUpdates` for the owner's chat and
//! answers through `sendMessage`.

use crate::JarvisError;
use async_trait::async_trait;
use common::channel::{
    Attachment, ChannelError, InboundMessage, MessageSource, Notifier, SenderIdentity,
};
use common::config::TelegramConfig;
use serde::{Deserialize, Serialize};
use std::cmp::min;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TELEGRAM_CHUNK_MAX_CHARS: usize = 4096;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub owner_chat_id: i64,
    pub poll_timeout_seconds: u64,
    pub offset_file: PathBuf,
}

impl TelegramSettings {
    /// `TELEGRAM_BOT_TOKEN` and `OWNER_TELEGRAM_CHAT_ID` take precedence over the config file.
    pub fn from_config(config: &TelegramConfig) -> Result<Self, JarvisError> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .or_else(|| config.bot_token.clone())
            .ok_or_else(|| JarvisError::new("telegram channel selected but bot token is missing"))?;
        let owner_chat_id = std::env::var("OWNER_TELEGRAM_CHAT_ID")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .or(config.owner_chat_id)
            .ok_or_else(|| {
                JarvisError::new("telegram channel selected but owner chat id is missing")
            })?;
        let poll_timeout_seconds = if config.poll_timeout_seconds == 0 {
            30
        } else {
            config.poll_timeout_seconds
        };
        Ok(Self {
            bot_token,
            owner_chat_id,
            poll_timeout_seconds,
            offset_file: config.offset_file.clone(),
        })
    }
}

#[derive(Clone)]
pub struct TelegramClient {
    bot_token: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TelegramApiResponse<T> {
    ok: bool,
    result: T,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub document: Option<TelegramDocument>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TelegramDocument {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Deserialize)]
struct TelegramFile {
    file_path: Option<String>,
}

#[derive(Serialize)]
struct TelegramGetUpdatesRequest<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct TelegramSendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Serialize)]
struct TelegramGetFileRequest<'a> {
    file_id: &'a str,
}

impl TelegramClient {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    pub async fn get_updates(
        &self,
        offset: i64,
        timeout: u64,
    ) -> Result<Vec<TelegramUpdate>, JarvisError> {
        let request = TelegramGetUpdatesRequest {
            offset,
            timeout,
            allowed_updates: &["message"],
        };
        self.call("getUpdates", &request).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), JarvisError> {
        let request = TelegramSendMessageRequest { chat_id, text };
        let _: serde_json::Value = self.call("sendMessage", &request).await?;
        Ok(())
    }

    /// Resolves a document through `getFile` and downloads its bytes.
    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>, JarvisError> {
        let file: TelegramFile = self
            .call("getFile", &TelegramGetFileRequest { file_id })
            .await?;
        let file_path = file
            .file_path
            .ok_or_else(|| JarvisError::new("telegram getfile returned no file path"))?;
        let url = format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.bot_token, file_path
        );
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| JarvisError::new(format!("telegram download request failed: {err}")))?
            .error_for_status()
            .map_err(|err| JarvisError::new(format!("telegram download failed: {err}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| JarvisError::new(format!("telegram download read failed: {err}")))?;
        Ok(bytes.to_vec())
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, JarvisError>
    where
        B: Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let name = method.to_lowercase();
        let response = self
            .client
            .post(self.url(method))
            .json(body)
            .send()
            .await
            .map_err(|err| JarvisError::new(format!("telegram {name} request failed: {err}")))?;
        let response = response
            .error_for_status()
            .map_err(|err| JarvisError::new(format!("telegram {name} failed: {err}")))?;
        let body: TelegramApiResponse<T> = response
            .json()
            .await
            .map_err(|err| JarvisError::new(format!("telegram {name} decode failed: {err}")))?;
        if !body.ok {
            return Err(JarvisError::new(format!("telegram {name} returned not ok")));
        }
        Ok(body.result)
    }

    fn url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }
}

/// Long-polling source that only lets the owner's chat through. The offset is saved
/// before each update is handed out so a restart never replays a command.
pub struct TelegramSource {
    client: TelegramClient,
    settings: TelegramSettings,
    offset: i64,
    pending: VecDeque<TelegramUpdate>,
}

impl TelegramSource {
    pub fn new(client: TelegramClient, settings: TelegramSettings) -> Result<Self, JarvisError> {
        let offset = load_telegram_offset(&settings.offset_file)?;
        tracing::info!(
            "telegram source started owner_chat_id={} offset={} offset_file={}",
            settings.owner_chat_id,
            offset,
            settings.offset_file.display()
        );
        Ok(Self {
            client,
            settings,
            offset,
            pending: VecDeque::new(),
        })
    }

    async fn inbound(&self, message: TelegramMessage) -> Option<InboundMessage> {
        let sender = SenderIdentity::new("telegram", message.chat.id.to_string());
        let mut attachments = Vec::new();
        if let Some(document) = &message.document {
            match self.client.download(&document.file_id).await {
                Ok(bytes) => attachments.push(Attachment {
                    name: document
                        .file_name
                        .clone()
                        .unwrap_or_else(|| document.file_id.clone()),
                    bytes,
                }),
                Err(err) => {
                    tracing::warn!("telegram attachment dropped: {}", err);
                }
            }
        }
        let text = message.text.or(message.caption).unwrap_or_default();
        if text.is_empty() && attachments.is_empty() {
            return None;
        }
        Some(InboundMessage {
            sender,
            text,
            attachments,
        })
    }
}

/// Returns the message when it came from `owner_chat_id`.
pub fn accept_update(update: TelegramUpdate, owner_chat_id: i64) -> Option<TelegramMessage> {
    let message = update.message?;
    tracing::debug!("telegram update {} from chat {}", update.update_id, message.chat.id);
    if message.chat.id != owner_chat_id {
        tracing::warn!("telegram message denied from chat {}", message.chat.id);
        return None;
    }
    Some(message)
}

#[async_trait]
impl MessageSource for TelegramSource {
    async fn recv(&mut self) -> Result<Option<InboundMessage>, ChannelError> {
        loop {
            while let Some(update) = self.pending.pop_front() {
                self.offset = min(i64::MAX - 1, update.update_id.saturating_add(1));
                if let Err(err) = save_telegram_offset(&self.settings.offset_file, self.offset) {
                    tracing::warn!("{}", err);
                }
                let Some(message) = accept_update(update, self.settings.owner_chat_id) else {
                    continue;
                };
                if let Some(inbound) = self.inbound(message).await {
                    return Ok(Some(inbound));
                }
            }

            match self
                .client
                .get_updates(self.offset, self.settings.poll_timeout_seconds)
                .await
            {
                Ok(updates) => self.pending.extend(updates),
                Err(err) => {
                    tracing::error!("telegram polling failed: {}", err);
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                }
            }
        }
    }
}

pub struct TelegramNotifier {
    client: TelegramClient,
    chat_id: i64,
}

impl TelegramNotifier {
    pub fn new(client: TelegramClient, chat_id: i64) -> Self {
        Self { client, chat_id }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_message(
        &self,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<(), ChannelError> {
        let mut blocks = vec![text.to_string()];
        blocks.extend(attachments.iter().filter_map(attachment_block));
        for block in blocks {
            for chunk in split_telegram_chunks(&block, TELEGRAM_CHUNK_MAX_CHARS) {
                if chunk.is_empty() {
                    continue;
                }
                self.client
                    .send_message(self.chat_id, &chunk)
                    .await
                    .map_err(|err| ChannelError::new(err.to_string()))?;
            }
        }
        Ok(())
    }
}

/// Attachments go out as follow-up text blocks; empty ones are skipped.
fn attachment_block(attachment: &Attachment) -> Option<String> {
    if attachment.bytes.is_empty() {
        return None;
    }
    Some(format!(
        "{}:\n{}",
        attachment.name,
        String::from_utf8_lossy(&attachment.bytes)
    ))
}

pub fn split_telegram_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let mut out = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut index = 0usize;
    while index < chars.len() {
        let end = min(chars.len(), index.saturating_add(max_chars.max(1)));
        out.push(chars[index..end].iter().collect::<String>());
        index = end;
    }
    out
}

pub fn load_telegram_offset(path: &Path) -> Result<i64, JarvisError> {
    if !path.exists() {
        return Ok(0);
    }
    let value = std::fs::read_to_string(path)
        .map_err(|err| JarvisError::new(format!("telegram offset read failed: {err}")))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse::<i64>()
        .map_err(|err| JarvisError::new(format!("telegram offset parse failed: {err}")))
}

pub fn save_telegram_offset(path: &Path, offset: i64) -> Result<(), JarvisError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            JarvisError::new(format!("telegram offset dir create failed: {err}"))
        })?;
    }
    std::fs::write(path, format!("{offset}\n"))
        .map_err(|err| JarvisError::new(format!("telegram offset write failed: {err}")))
}

#[cfg(test)]
#[path = "telegram_test.rs"]
mod telegram_test;
