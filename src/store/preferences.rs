use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::Store;

/// Preferred language for titles, names and greetings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Romaji,
    Japanese,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::English, Language::Romaji, Language::Japanese];

    /// Stored representation.
    pub fn id(self) -> i64 {
        match self {
            Language::English => 1,
            Language::Romaji => 2,
            Language::Japanese => 3,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.id() == id)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::English => write!(f, "english"),
            Language::Romaji => write!(f, "romaji"),
            Language::Japanese => write!(f, "japanese"),
        }
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "english" | "en" => Ok(Language::English),
            "romaji" => Ok(Language::Romaji),
            "japanese" | "ja" | "jp" => Ok(Language::Japanese),
            other => anyhow::bail!("'{}' is not a supported language", other),
        }
    }
}

impl Store {
    pub async fn language(&self, user_id: i64) -> Result<Language> {
        let mut state = self.state.lock().await;
        Ok(state.user(user_id)?.language)
    }

    pub async fn set_language(&self, user_id: i64, language: Language) -> Result<()> {
        let mut state = self.state.lock().await;
        state.user(user_id)?;
        state
            .conn
            .execute(
                "UPDATE preferences SET language = ?1 WHERE user_id = ?2",
                rusqlite::params![language.id(), user_id],
            )
            .context("Failed to save language preference")?;
        state.user(user_id)?.language = language;
        Ok(())
    }
}
