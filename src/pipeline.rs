//! Drives one inbound message through classify, parse, decide and act.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::completion::{CompletionClient, CompletionError};
use crate::moderation::{self, ModerationOutcome};
use crate::platform::{ChatPlatform, InboundMessage};
use crate::policy::{self, SPAM_THRESHOLD};
use crate::verdict::{self, VerdictError};

/// Sent in reply to a message whose classification failed.
pub const APOLOGY_TEXT: &str = "Извините, произошла ошибка при анализе сообщения";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Classifying,
    Parsing,
    Deciding,
    Acting,
    Done,
    ErrorReported,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Classifying => "classifying",
            Stage::Parsing => "parsing",
            Stage::Deciding => "deciding",
            Stage::Acting => "acting",
            Stage::Done => "done",
            Stage::ErrorReported => "error_reported",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Verdict(#[from] VerdictError),
}

/// Result of handling one message.
#[derive(Debug)]
pub struct PipelineRun {
    /// Terminal stage: `Done` or `ErrorReported`.
    pub stage: Stage,
    pub outcome: Option<ModerationOutcome>,
    pub error: Option<PipelineError>,
}

pub struct Pipeline {
    completion: CompletionClient,
    platform: Arc<dyn ChatPlatform>,
}

impl Pipeline {
    pub fn new(completion: CompletionClient, platform: Arc<dyn ChatPlatform>) -> Self {
        Self { completion, platform }
    }

    /// Handle one message to a terminal stage. Never fails: errors are
    /// reported in the chat and returned in the run for the caller to inspect.
    pub async fn handle(&self, msg: InboundMessage) -> PipelineRun {
        let mut stage = Stage::Received;

        if msg.text.is_empty() {
            debug!("Ignoring non-text message {} in chat {}", msg.message_id, msg.chat_id);
            return PipelineRun { stage: Stage::Done, outcome: None, error: None };
        }
        info!("Message from {} in chat {}: \"{}\"", msg.sender, msg.chat_id, msg.preview());

        advance(&mut stage, Stage::Classifying, &msg);
        let raw = match self.completion.complete(&msg.text).await {
            Ok(raw) => raw,
            Err(e) => return self.report(&msg, stage, e.into()).await,
        };
        debug!("Model output: {raw}");

        advance(&mut stage, Stage::Parsing, &msg);
        let assessment = match verdict::parse_verdict(&raw) {
            Ok(a) => a,
            Err(e) => return self.report(&msg, stage, e.into()).await,
        };

        advance(&mut stage, Stage::Deciding, &msg);
        let classification = &assessment.classification;
        if classification.is_contradictory(SPAM_THRESHOLD) {
            warn!(
                "Model said not spam with probability {:.1}% for message {} in chat {}; treating as clean",
                classification.probability, msg.message_id, msg.chat_id
            );
        }
        let decision = policy::decide(classification);
        info!(
            "Verdict for message {}: {:?} (spam={}, {:.1}%, {})",
            msg.message_id, decision, classification.is_spam, classification.probability, classification.reason
        );

        advance(&mut stage, Stage::Acting, &msg);
        let outcome = moderation::execute(decision, classification, &msg, self.platform.as_ref()).await;

        advance(&mut stage, Stage::Done, &msg);
        PipelineRun { stage, outcome: Some(outcome), error: None }
    }

    async fn report(&self, msg: &InboundMessage, failed_at: Stage, err: PipelineError) -> PipelineRun {
        error!("Failed to classify message {} in chat {} while {failed_at}: {err}", msg.message_id, msg.chat_id);

        if let Err(e) = self
            .platform
            .send_message(msg.chat_id, APOLOGY_TEXT, Some(msg.message_id))
            .await
        {
            warn!("Could not send apology for message {}: {e}", msg.message_id);
        }

        PipelineRun { stage: Stage::ErrorReported, outcome: None, error: Some(err) }
    }
}

fn advance(stage: &mut Stage, next: Stage, msg: &InboundMessage) {
    debug!("Message {}: {} -> {}", msg.message_id, stage, next);
    *stage = next;
}
