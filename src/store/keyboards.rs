use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::Store;

/// What a paginated lookup is about. Also the callback data prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Anime,
    Manga,
    Character,
}

impl Subject {
    pub const ALL: [Subject; 3] = [Subject::Anime, Subject::Manga, Subject::Character];

    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Anime => "anime",
            Subject::Manga => "manga",
            Subject::Character => "character",
        }
    }

    /// Capitalised, for user-facing text.
    pub fn label(self) -> &'static str {
        match self {
            Subject::Anime => "Anime",
            Subject::Manga => "Manga",
            Subject::Character => "Character",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subject {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|subject| subject.as_str() == s)
            .with_context(|| format!("unknown subject '{s}'"))
    }
}

/// Where a user's pagination keyboard for one subject currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyboardState {
    /// Message carrying the current keyboard, deleted when replaced.
    pub message_id: Option<i32>,
    /// The command message the pages reply to.
    pub reply_id: Option<i32>,
    pub step: i32,
    pub current_page: Option<u32>,
    pub last_page: Option<u32>,
    pub query: Option<String>,
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self {
            message_id: None,
            reply_id: None,
            step: 1,
            current_page: None,
            last_page: None,
            query: None,
        }
    }
}

impl Store {
    pub async fn keyboard(&self, user_id: i64, subject: Subject) -> Result<KeyboardState> {
        let mut state = self.state.lock().await;
        Ok(state
            .user(user_id)?
            .keyboards
            .get(&subject)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn save_keyboard(
        &self,
        user_id: i64,
        subject: Subject,
        keyboard: &KeyboardState,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.user(user_id)?;
        state
            .conn
            .execute(
                "INSERT INTO keyboards
                    (user_id, subject, message_id, reply_id, step, current_page, last_page, query)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(user_id, subject) DO UPDATE SET
                    message_id = excluded.message_id,
                    reply_id = excluded.reply_id,
                    step = excluded.step,
                    current_page = excluded.current_page,
                    last_page = excluded.last_page,
                    query = excluded.query,
                    updated_at = datetime('now')",
                rusqlite::params![
                    user_id,
                    subject.as_str(),
                    keyboard.message_id,
                    keyboard.reply_id,
                    keyboard.step,
                    keyboard.current_page,
                    keyboard.last_page,
                    keyboard.query,
                ],
            )
            .context("Failed to save keyboard state")?;
        state
            .user(user_id)?
            .keyboards
            .insert(subject, keyboard.clone());
        Ok(())
    }
}
