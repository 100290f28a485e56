use std::process::ExitCode;
use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use spamwarden::{CompletionClient, Config, InboundMessage, Pipeline, TelegramPlatform};

#[tokio::main]
async fn main() -> ExitCode {
    let env_path = std::env::args().nth(1).unwrap_or_else(|| ".env".to_string());
    let config = match Config::load(&env_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Setup logging
    if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
        eprintln!("Failed to create log dir {}: {e}", config.log_dir.display());
        return ExitCode::FAILURE;
    }
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "spamwarden.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    match config.env_file {
        Some(ref path) => info!("Loaded settings from {}", path.display()),
        None => warn!("No env file at {env_path}, using process environment only"),
    }

    let bot = Bot::new(&config.telegram_bot_token);
    match bot.get_me().await {
        Ok(me) => info!("🚀 Bot @{} started, model {}", me.username(), config.completion.model),
        Err(e) => {
            error!("Failed to reach Telegram: {e}");
            return ExitCode::FAILURE;
        }
    }

    let completion = match CompletionClient::new(config.completion) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let platform = Arc::new(TelegramPlatform::new(bot.clone()));
    let pipeline = Arc::new(Pipeline::new(completion, platform));

    // The default distribution runs updates from one chat in order and
    // different chats concurrently.
    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![pipeline])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    ExitCode::SUCCESS
}

async fn handle_message(msg: Message, pipeline: Arc<Pipeline>) -> ResponseResult<()> {
    pipeline.handle(InboundMessage::from_telegram(&msg)).await;
    Ok(())
}
