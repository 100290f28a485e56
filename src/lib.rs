//! Telegram spam moderation backed by a local completion model.
//!
//! Each text message is sent to the model for a JSON verdict, the verdict is
//! mapped to a decision with a fixed threshold, and the decision is applied
//! in the chat (delete, warn, or nothing).

pub mod completion;
pub mod config;
pub mod moderation;
pub mod pipeline;
pub mod platform;
pub mod policy;
pub mod verdict;

pub use completion::{CompletionClient, CompletionError};
pub use config::{CompletionConfig, Config, ConfigError};
pub use moderation::{ModerationOutcome, Reply};
pub use pipeline::{Pipeline, PipelineError, PipelineRun, Stage};
pub use platform::{ChatPlatform, InboundMessage, PlatformError, TelegramPlatform};
pub use policy::{Decision, SPAM_THRESHOLD};
pub use verdict::{SpamAssessment, VerdictError};
