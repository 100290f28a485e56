//! Applies a decision to the chat: delete, warn, or stay silent.

use tracing::{info, warn};

use crate::platform::{ChatPlatform, InboundMessage};
use crate::policy::{Decision, SPAM_THRESHOLD};
use crate::verdict::Classification;

/// A reply the executor wants posted in the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    /// Message to reply to; `None` posts a standalone message.
    pub reply_to: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModerationOutcome {
    pub decision: Decision,
    pub delete_attempted: bool,
    pub deleted: bool,
    pub reply: Option<Reply>,
    pub reply_sent: bool,
}

impl ModerationOutcome {
    fn silent(decision: Decision) -> Self {
        Self {
            decision,
            delete_attempted: false,
            deleted: false,
            reply: None,
            reply_sent: false,
        }
    }
}

pub fn removed_text(c: &Classification) -> String {
    format!(
        "❌ СПАМ\n✅ Сообщение автоматически удалено\nВероятность: {:.1}%\nПричина: {}",
        c.probability, c.reason
    )
}

pub fn removal_failed_text(c: &Classification) -> String {
    format!(
        "❌ СПАМ\n⚠️ Внимание: обнаружен спам!\nВероятность: {:.1}%\nПричина: {}\n\n\
         Не удалось автоматически удалить сообщение. Пожалуйста, убедитесь, что бот имеет права администратора.",
        c.probability, c.reason
    )
}

pub fn suspected_text(c: &Classification) -> String {
    format!(
        "⚠️ ВОЗМОЖНО СПАМ\nВероятность: {:.1}%\nПричина: {}\n\n\
         Сообщение не удалено автоматически, так как вероятность спама ниже {}%",
        c.probability, c.reason, SPAM_THRESHOLD as u32
    )
}

/// Carry out `decision` for `msg`: at most one delete and one send.
pub async fn execute(
    decision: Decision,
    classification: &Classification,
    msg: &InboundMessage,
    platform: &dyn ChatPlatform,
) -> ModerationOutcome {
    let mut outcome = ModerationOutcome::silent(decision);

    let reply = match decision {
        Decision::Clean => return outcome,
        Decision::ConfirmedSpam => {
            outcome.delete_attempted = true;
            // The original is gone (or stays put) either way, so never reply to it.
            let text = match platform.delete_message(msg.chat_id, msg.message_id).await {
                Ok(()) => {
                    outcome.deleted = true;
                    info!("Removed spam {} from {} in chat {}", msg.message_id, msg.sender, msg.chat_id);
                    removed_text(classification)
                }
                Err(e) => {
                    warn!("Could not remove spam {} in chat {}: {e}", msg.message_id, msg.chat_id);
                    removal_failed_text(classification)
                }
            };
            Reply { text, reply_to: None }
        }
        Decision::SuspectedSpam => Reply {
            text: suspected_text(classification),
            reply_to: Some(msg.message_id),
        },
    };

    match platform.send_message(msg.chat_id, &reply.text, reply.reply_to).await {
        Ok(_) => outcome.reply_sent = true,
        Err(e) => warn!("Failed to post moderation notice in chat {}: {e}", msg.chat_id),
    }
    outcome.reply = Some(reply);
    outcome
}
