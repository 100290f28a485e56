//! Chat platform seam: inbound messages and the two actions moderation needs.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ReplyParameters};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("failed to send message: {0}")]
    Send(String),
    #[error("failed to delete message: {0}")]
    Delete(String),
}

/// A message as received from the chat, before any classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender: String,
    /// Empty for non-text messages (photos, stickers, ...).
    pub text: String,
}

impl InboundMessage {
    pub fn from_telegram(msg: &Message) -> Self {
        let user = msg.from.as_ref();
        let sender = user
            .and_then(|u| u.username.as_deref())
            .unwrap_or_else(|| user.map(|u| u.first_name.as_str()).unwrap_or("unknown"))
            .to_string();

        Self {
            chat_id: msg.chat.id.0,
            message_id: msg.id.0 as i64,
            sender,
            text: msg.text().unwrap_or("").to_string(),
        }
    }

    /// First 100 chars, for log lines.
    pub fn preview(&self) -> String {
        self.text.chars().take(100).collect()
    }
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Send plain text, optionally as a reply. Returns the new message id.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, PlatformError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError>;
}

/// Telegram implementation over a teloxide bot.
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, PlatformError> {
        // No parse mode: reasons are written by the model and may contain markup.
        let mut request = self.bot.send_message(ChatId(chat_id), text);

        if let Some(msg_id) = reply_to_message_id {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
        }

        request
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| PlatformError::Send(e.to_string()))
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError> {
        info!("🗑️ Deleting message {} in chat {}", message_id, chat_id);

        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id as i32))
            .await
            .map_err(|e| PlatformError::Delete(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> InboundMessage {
        InboundMessage {
            chat_id: -100,
            message_id: 7,
            sender: "alice".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_preview_truncates_by_chars() {
        let msg = message(&"я".repeat(150));
        let preview = msg.preview();
        assert_eq!(preview.chars().count(), 100);
        assert!(preview.chars().all(|c| c == 'я'));
    }

    #[test]
    fn test_preview_short_text_unchanged() {
        assert_eq!(message("hi").preview(), "hi");
    }
}
