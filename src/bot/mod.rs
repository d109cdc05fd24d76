pub mod commands;
pub mod keyboards;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::utils::command::BotCommands;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::anilist::Catalog;
use crate::dispatch::UpdateHandler;
use crate::format::html::{chunk_html, escape, redact_update, MAX_MESSAGE_LENGTH};
use crate::notify::Notifier;
use crate::platform::{BotIdentity, CallbackQuery, Message, OutgoingMessage, TelegramApi, Update, User};
use crate::store::{KeyboardState, Store, Subject};
use commands::{Command, FALLBACK_REPLY};
use keyboards::{Callback, HelpTopic};

/// Developer-only commands need both debug mode and a developer sender.
#[derive(Debug, Clone, Default)]
pub struct DebugAccess {
    pub enabled: bool,
    pub developer_ids: Vec<i64>,
}

impl DebugAccess {
    fn allows(&self, user_id: i64) -> bool {
        self.enabled && self.developer_ids.contains(&user_id)
    }
}

/// Unused per-user locks are dropped once the map grows past this.
const USER_LOCKS_PRUNE_AT: usize = 1024;

/// Routes updates to commands, keyboards and membership logging.
///
/// Updates from the same user are handled one at a time, so the stored
/// keyboard state is never read and written by two updates at once.
pub struct BotHandler {
    api: Arc<dyn TelegramApi>,
    catalog: Arc<dyn Catalog>,
    store: Store,
    notifier: Notifier,
    identity: BotIdentity,
    debug: DebugAccess,
    user_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl BotHandler {
    pub fn new(
        api: Arc<dyn TelegramApi>,
        catalog: Arc<dyn Catalog>,
        store: Store,
        notifier: Notifier,
        identity: BotIdentity,
        debug: DebugAccess,
    ) -> Self {
        Self {
            api,
            catalog,
            store,
            notifier,
            identity,
            debug,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until no other update from `key` is being handled.
    async fn lock_user(&self, key: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.user_locks.lock().await;
            if locks.len() >= USER_LOCKS_PRUNE_AT {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    async fn reply(&self, message: &Message, text: impl Into<String>) -> Result<i32> {
        self.api
            .send_message(OutgoingMessage::text(message.chat.id, text).reply_to(message.message_id))
            .await
    }

    async fn reply_html_chunks(&self, message: &Message, html: &str) -> Result<()> {
        for chunk in chunk_html(html, MAX_MESSAGE_LENGTH) {
            self.api
                .send_message(OutgoingMessage::html(message.chat.id, chunk).reply_to(message.message_id))
                .await?;
        }
        Ok(())
    }

    async fn handle_message(&self, update: &Update, message: &Message) -> Result<()> {
        let chat = &message.chat;
        let title = chat.title.as_deref().unwrap_or("untitled");

        if message.new_chat_members.iter().any(|m| m.id == self.identity.id) {
            info!("Added to chat {}", chat.id);
            self.notifier
                .log(&escape(&format!("Was added to {} chat: {} with id: {}", chat.kind, title, chat.id)))
                .await;
            return Ok(());
        }
        if message.left_chat_member.as_ref().map(|m| m.id) == Some(self.identity.id) {
            info!("Removed from chat {}", chat.id);
            self.notifier
                .log(&escape(&format!("Left {} chat: {} with id: {}", chat.kind, title, chat.id)))
                .await;
            return Ok(());
        }

        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };
        if !text.starts_with('/') {
            self.reply(message, FALLBACK_REPLY).await?;
            return Ok(());
        }

        let command = match Command::parse(text, &self.identity.username) {
            Ok(command) => command,
            Err(e) => {
                debug!("Ignoring command: {}", e);
                return Ok(());
            }
        };
        let name = text.split([' ', '@']).next().unwrap_or(text);
        self.run_command(update, message, command)
            .await
            .with_context(|| format!("Failed to handle {}", name))
    }

    async fn run_command(&self, update: &Update, message: &Message, command: Command) -> Result<()> {
        if command == Command::Id {
            let text = match &message.from {
                Some(user) => format!("Your id is {}\nThe chat id is {}", user.id, message.chat.id),
                None => "You do not have a user id".to_string(),
            };
            self.reply(message, text).await?;
            return Ok(());
        }

        let Some(user) = message.from.as_ref() else {
            return Ok(());
        };
        if command.is_debug() && !self.debug.allows(user.id) {
            debug!("Ignoring debug command from user {}", user.id);
            return Ok(());
        }
        if command.logs_usage() {
            self.log_usage(update).await;
        }

        match &command {
            Command::Start => {
                let language = self.store.language(user.id).await?;
                let text = commands::greeting(language, user, &self.identity);
                self.reply(message, text).await?;
            }
            Command::Help => {
                self.api
                    .send_message(
                        OutgoingMessage::text(message.chat.id, commands::HELP_TEXT)
                            .reply_to(message.message_id)
                            .keyboard(keyboards::help_keyboard()),
                    )
                    .await?;
            }
            Command::About => {
                self.api
                    .send_message(
                        OutgoingMessage::html(message.chat.id, commands::about_text(&self.identity))
                            .reply_to(message.message_id),
                    )
                    .await?;
            }
            Command::Anime(_) | Command::Manga(_) | Command::Character(_) => {
                if let Some((subject, query)) = command.lookup() {
                    self.first_page(message, user, subject, query).await?;
                }
            }
            Command::Language(args) => self.language(message, user, args.trim()).await?,
            Command::Raise => anyhow::bail!("Deliberate failure requested by /raise"),
            Command::Cache => {
                let snapshot = self.store.cache_snapshot().await;
                let dump = serde_json::to_string_pretty(&snapshot)?;
                self.reply_html_chunks(message, &format!("<pre>data_cache = {}</pre>", escape(&dump)))
                    .await?;
            }
            Command::Sql(statement) => {
                let statement = statement.trim();
                if statement.is_empty() {
                    self.reply(message, "Usage: /sql <statement>").await?;
                    return Ok(());
                }
                let rows = self.store.execute_raw(statement).await?;
                let dump = serde_json::to_string(&rows)?;
                self.reply_html_chunks(message, &format!("<pre>{}</pre>", escape(&dump)))
                    .await?;
            }
            Command::Id => {}
        }
        Ok(())
    }

    async fn log_usage(&self, update: &Update) {
        let dump = serde_json::to_value(update)
            .map(|value| redact_update(&value))
            .and_then(|value| serde_json::to_string_pretty(&value));
        match dump {
            Ok(dump) => {
                self.notifier
                    .log(&format!("<pre>update = {}</pre>", escape(&dump)))
                    .await
            }
            Err(e) => debug!("Could not serialise update for usage log: {}", e),
        }
    }

    async fn language(&self, message: &Message, user: &User, args: &str) -> Result<()> {
        if args.is_empty() {
            let current = self.store.language(user.id).await?;
            self.reply(message, commands::language_status(current)).await?;
            return Ok(());
        }
        match args.parse() {
            Ok(language) => {
                self.store.set_language(user.id, language).await?;
                self.reply(message, format!("Language set to {language}")).await?;
            }
            Err(e) => {
                self.reply(message, format!("{e}\nChoose english, romaji or japanese"))
                    .await?;
            }
        }
        Ok(())
    }

    /// Delete the message holding the user's previous keyboard for a subject.
    async fn discard_keyboard(&self, chat_id: i64, state: &mut KeyboardState) {
        if let Some(message_id) = state.message_id.take() {
            if let Err(e) = self.api.delete_message(chat_id, message_id).await {
                debug!("Previous keyboard message {} not deleted: {:#}", message_id, e);
            }
        }
    }

    async fn first_page(&self, message: &Message, user: &User, subject: Subject, query: &str) -> Result<()> {
        if query.is_empty() {
            self.reply(message, commands::lookup_usage(subject)).await?;
            return Ok(());
        }

        let language = self.store.language(user.id).await?;
        let page = keyboards::fetch_page(self.catalog.as_ref(), subject, query, 1, language).await?;
        let last_page = page.info.last_page.max(1);

        let mut state = self.store.keyboard(user.id, subject).await?;
        self.discard_keyboard(message.chat.id, &mut state).await;

        let keyboard = keyboards::pagination_keyboard(subject, 1, last_page, state.step);
        let sent = self
            .api
            .send_message(
                OutgoingMessage::html(message.chat.id, page.render(1))
                    .reply_to(message.message_id)
                    .keyboard(keyboard),
            )
            .await?;

        state.message_id = Some(sent);
        state.reply_id = Some(message.message_id);
        state.current_page = Some(1);
        state.last_page = Some(last_page);
        state.query = Some(query.to_string());
        self.store.save_keyboard(user.id, subject, &state).await
    }

    async fn handle_callback(&self, query: &CallbackQuery) -> Result<()> {
        // Answering fails for queries that are too old, which is fine
        if let Err(e) = self.api.answer_callback_query(&query.id).await {
            debug!("Callback query {} not answered: {:#}", query.id, e);
        }

        let (Some(data), Some(message)) = (query.data.as_deref(), query.message.as_ref()) else {
            return Ok(());
        };
        match keyboards::parse_callback(data) {
            Some(Callback::Help(topic)) => self.show_help_topic(message, topic).await,
            Some(Callback::Page { subject, step }) => self
                .turn_page(&query.from, message, subject, step)
                .await
                .with_context(|| format!("Failed to turn {subject} page")),
            None => {
                debug!("Ignoring callback data {:?}", data);
                Ok(())
            }
        }
    }

    async fn show_help_topic(&self, message: &Message, topic: Option<HelpTopic>) -> Result<()> {
        let text = keyboards::help_text(topic);
        if message.text.as_deref() == Some(text) {
            return Ok(());
        }
        self.api
            .edit_message(message.chat.id, message.message_id, text, Some(keyboards::help_keyboard()))
            .await
    }

    async fn turn_page(&self, user: &User, message: &Message, subject: Subject, step: i32) -> Result<()> {
        let mut state = self.store.keyboard(user.id, subject).await?;
        let (Some(current), Some(query)) = (state.current_page, state.query.clone()) else {
            self.reply(message, "Please run the command again").await?;
            return Ok(());
        };
        let last_page = state.last_page.unwrap_or(current);
        let next = keyboards::next_page(current, step, last_page);
        if next == current {
            return Ok(());
        }

        let language = self.store.language(user.id).await?;
        let page = keyboards::fetch_page(self.catalog.as_ref(), subject, &query, next, language).await?;
        self.discard_keyboard(message.chat.id, &mut state).await;

        let keyboard = keyboards::pagination_keyboard(subject, next, last_page, state.step);
        let outgoing = OutgoingMessage::html(
            message.chat.id,
            format!("{} of {}\n\n{}", next, last_page, page.text),
        )
        .keyboard(keyboard);
        let sent = match state.reply_id {
            Some(reply_id) => match self.api.send_message(outgoing.clone().reply_to(reply_id)).await {
                Ok(id) => id,
                Err(e) => {
                    debug!("Reply target {} unavailable, sending plain: {:#}", reply_id, e);
                    self.api.send_message(outgoing).await?
                }
            },
            None => self.api.send_message(outgoing).await?,
        };

        state.message_id = Some(sent);
        state.current_page = Some(next);
        self.store.save_keyboard(user.id, subject, &state).await
    }
}

#[async_trait]
impl UpdateHandler for BotHandler {
    async fn handle(&self, update: Update) -> Result<()> {
        let sender = update
            .callback_query
            .as_ref()
            .map(|query| query.from.id)
            .or_else(|| update.message.as_ref().and_then(|m| m.from.as_ref().map(|u| u.id)))
            .or_else(|| update.message.as_ref().map(|m| m.chat.id));
        let _guard = match sender {
            Some(key) => Some(self.lock_user(key).await),
            None => None,
        };

        if let Some(query) = &update.callback_query {
            return self.handle_callback(query).await;
        }
        if let Some(message) = &update.message {
            return self.handle_message(&update, message).await;
        }
        debug!("Ignoring update {} with no handled content", update.update_id);
        Ok(())
    }
}
