use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQueryId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode, ReplyParameters,
};
use teloxide::utils::command::BotCommands;
use tracing::info;

use super::{BotIdentity, InlineKeyboard, OutgoingMessage, TelegramApi};
use crate::bot::commands::Command;
use crate::config::{BotToken, SecretToken};

fn to_markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.into_iter().map(|row| {
        row.into_iter()
            .map(|b| InlineKeyboardButton::callback(b.label, b.callback_data))
            .collect::<Vec<_>>()
    }))
}

/// Bot API client backed by teloxide
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot_token: &BotToken) -> Self {
        Self {
            bot: Bot::new(bot_token.expose()),
        }
    }

    pub async fn identity(&self) -> Result<BotIdentity> {
        let me = self.bot.get_me().await.context("getMe failed")?;
        Ok(BotIdentity {
            id: me.id.0 as i64,
            username: me.username().to_string(),
            first_name: me.first_name.clone(),
        })
    }

    /// Point Telegram at our webhook and have it send the secret header.
    pub async fn register_webhook(&self, url: &str, secret: &SecretToken) -> Result<()> {
        let url = reqwest::Url::parse(url)
            .with_context(|| format!("Invalid webhook URL: {url}"))?;
        self.bot
            .set_webhook(url.clone())
            .secret_token(secret.expose().to_string())
            .await
            .context("setWebhook failed")?;
        info!("Webhook registered at {}", url);
        Ok(())
    }

    /// Fill the Telegram command menu. Debug commands are hidden from it.
    pub async fn register_commands(&self) -> Result<()> {
        self.bot
            .set_my_commands(Command::bot_commands())
            .await
            .context("setMyCommands failed")?;
        Ok(())
    }
}

#[async_trait]
impl TelegramApi for TelegramClient {
    async fn send_message(&self, message: OutgoingMessage) -> Result<i32> {
        let mut request = self.bot.send_message(ChatId(message.chat_id), message.text);
        if message.html {
            request = request.parse_mode(ParseMode::Html);
        }
        if let Some(reply_to) = message.reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(reply_to)));
        }
        if let Some(keyboard) = message.keyboard {
            request = request.reply_markup(to_markup(keyboard));
        }
        let sent = request.await.context("sendMessage failed")?;
        Ok(sent.id.0)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        let mut request =
            self.bot
                .edit_message_text(ChatId(chat_id), MessageId(message_id), text.to_string());
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(to_markup(keyboard));
        }
        request.await.context("editMessageText failed")?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .context("deleteMessage failed")?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str) -> Result<()> {
        self.bot
            .answer_callback_query(CallbackQueryId(callback_id.to_string()))
            .await
            .context("answerCallbackQuery failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InlineButton;

    #[test]
    fn test_markup_preserves_rows() {
        let keyboard = InlineKeyboard::new(vec![
            vec![
                InlineButton::new("Anime", "help:anime"),
                InlineButton::new("Manga", "help:manga"),
            ],
            vec![InlineButton::new("About", "help:about")],
        ]);
        let markup = to_markup(keyboard);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert_eq!(markup.inline_keyboard[1][0].text, "About");
    }

    #[test]
    fn test_menu_commands_are_lowercase_and_described() {
        let commands = Command::bot_commands();
        assert!(!commands.is_empty());
        for command in commands {
            assert_eq!(command.command, command.command.to_lowercase());
            assert!(!command.description.is_empty(), "{}", command.command);
        }
    }
}
