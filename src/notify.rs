use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::dispatch::ErrorReporter;
use crate::format::html::{chunk_html, escape, redact_update, MAX_MESSAGE_LENGTH};
use crate::platform::{OutgoingMessage, TelegramApi, Update};

/// Forwards log lines and failure alerts to the configured Telegram chats.
#[derive(Clone)]
pub struct Notifier {
    api: Arc<dyn TelegramApi>,
    log_chat_ids: Vec<i64>,
    developer_chat_ids: Vec<i64>,
}

impl Notifier {
    pub fn new(api: Arc<dyn TelegramApi>, log_chat_ids: Vec<i64>, developer_chat_ids: Vec<i64>) -> Self {
        Self {
            api,
            log_chat_ids,
            developer_chat_ids,
        }
    }

    pub async fn log(&self, html: &str) {
        self.broadcast(&self.log_chat_ids, html).await;
    }

    pub async fn alert_developers(&self, html: &str) {
        self.broadcast(&self.developer_chat_ids, html).await;
    }

    pub async fn startup_notice(&self, debug: bool) {
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        self.log(&format!("<b>Bot starting up</b>\n{now}\ndebug: <code>{debug}</code>"))
            .await;
    }

    async fn broadcast(&self, chat_ids: &[i64], html: &str) {
        if chat_ids.is_empty() {
            debug!("No chats configured, dropping notification");
            return;
        }
        let chunks = chunk_html(html, MAX_MESSAGE_LENGTH);
        let sends = chat_ids.iter().map(|&chat_id| {
            let chunks = &chunks;
            async move {
                // Chunks go out in order within a chat
                for chunk in chunks {
                    if let Err(e) = self
                        .api
                        .send_message(OutgoingMessage::html(chat_id, chunk.clone()))
                        .await
                    {
                        warn!("Failed to notify chat {}: {:#}", chat_id, e);
                        break;
                    }
                }
            }
        });
        join_all(sends).await;
    }
}

/// Text sent to developers when an update fails.
pub fn failure_report(update: &Update, error: &anyhow::Error) -> String {
    let dump = serde_json::to_value(update)
        .map(|value| redact_update(&value))
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|e| format!("<unserialisable update: {e}>"));
    format!(
        "An exception was raised while handling an update\n<pre>update = {}</pre>\n\n<pre>{}</pre>",
        escape(&dump),
        escape(&format!("{error:#}"))
    )
}

#[async_trait]
impl ErrorReporter for Notifier {
    async fn report(&self, update: &Update, error: &anyhow::Error) {
        self.alert_developers(&failure_report(update, error)).await;
    }
}
