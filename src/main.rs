mod anilist;
mod bot;
mod config;
mod dispatch;
mod format;
mod gate;
mod notify;
mod platform;
mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::anilist::AniListClient;
use crate::bot::{BotHandler, DebugAccess};
use crate::config::Config;
use crate::dispatch::{UpdateQueue, QUEUE_CAPACITY};
use crate::gate::GateState;
use crate::notify::Notifier;
use crate::platform::telegram::TelegramClient;
use crate::store::Store;

fn default_filter(debug: bool) -> &'static str {
    if debug {
        "info,animebot=debug"
    } else {
        "warn,animebot=info"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first, the log filter depends on DEBUG
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(config.debug).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Configuration loaded successfully");
    info!("  Listening on: {}", config.bind_address());
    info!("  Webhook path: {}", config.server.webhook_path);
    info!("  Health path: {}", config.server.health_path);
    info!("  Database: {}", config.storage.database_path.display());
    info!("  Log chats: {:?}", config.telegram.log_chat_ids);
    info!("  Debug: {}", config.debug);

    let store = Store::open(&config.storage.database_path)?;

    let telegram = Arc::new(TelegramClient::new(&config.telegram.bot_token));
    let identity = telegram.identity().await?;
    info!("Running as {}", identity.handle());

    match config.webhook_url() {
        Some(url) => telegram
            .register_webhook(&url, &config.telegram.secret_token)
            .await
            .context("Failed to register webhook")?,
        None => warn!("BOT_WEB_URL not set, assuming the webhook is registered elsewhere"),
    }
    telegram.register_commands().await?;

    let notifier = Notifier::new(
        telegram.clone(),
        config.telegram.log_chat_ids.clone(),
        config.telegram.developer_chat_ids.clone(),
    );
    let handler = Arc::new(BotHandler::new(
        telegram.clone(),
        Arc::new(AniListClient::new()),
        store,
        notifier.clone(),
        identity,
        DebugAccess {
            enabled: config.debug,
            developer_ids: config.telegram.developer_chat_ids.clone(),
        },
    ));

    let (queue, updates) = UpdateQueue::new(QUEUE_CAPACITY);
    let worker = tokio::spawn(dispatch::run_worker(
        updates,
        handler,
        Arc::new(notifier.clone()),
    ));

    notifier.startup_notice(config.debug).await;

    let app = gate::router(
        &config.server.webhook_path,
        &config.server.health_path,
        GateState::new(config.telegram.secret_token.clone(), Arc::new(queue)),
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;

    info!("Bot is starting...");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // The router (and with it the last queue sender) is gone, let the worker drain
    info!("Server stopped, draining pending updates");
    worker.await.context("Update worker failed")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_follows_debug() {
        assert_eq!(default_filter(true), "info,animebot=debug");
        assert_eq!(default_filter(false), "warn,animebot=info");
    }
}
