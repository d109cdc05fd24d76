use teloxide::utils::command::BotCommands;

use crate::format::html::escape;
use crate::platform::{BotIdentity, User};
use crate::store::{Language, Subject};

pub const HELP_TEXT: &str = "I was designed to give you quick and easy access to information about anime and manga.\n\
                             Pick a topic you need help understanding.";

pub const FALLBACK_REPLY: &str = "Use /help to get a list of commands";

/// Bot commands. Hidden ones are developer tools and stay out of the menu.
#[derive(BotCommands, Debug, Clone, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Commands:")]
pub enum Command {
    #[command(description = "Start the bot")]
    Start,
    #[command(description = "Get help about this bot")]
    Help,
    #[command(description = "Show your user id and the chat id")]
    Id,
    #[command(description = "Get information about the bot")]
    About,
    #[command(description = "Get information about an anime")]
    Anime(String),
    #[command(description = "Get information about a manga")]
    Manga(String),
    #[command(description = "Get information about a character")]
    Character(String),
    #[command(description = "Show or change your title language")]
    Language(String),
    #[command(hide)]
    Raise,
    #[command(hide)]
    Cache,
    #[command(hide)]
    Sql(String),
}

impl Command {
    /// The subject and query of a lookup command.
    pub fn lookup(&self) -> Option<(Subject, &str)> {
        match self {
            Command::Anime(query) => Some((Subject::Anime, query.trim())),
            Command::Manga(query) => Some((Subject::Manga, query.trim())),
            Command::Character(query) => Some((Subject::Character, query.trim())),
            _ => None,
        }
    }

    /// Only available in debug mode, to developers.
    pub fn is_debug(&self) -> bool {
        matches!(self, Command::Raise | Command::Cache | Command::Sql(_))
    }

    /// Forwarded (redacted) to the log chats when used.
    pub fn logs_usage(&self) -> bool {
        matches!(self, Command::About) || self.lookup().is_some()
    }
}

pub fn greeting(language: Language, user: &User, bot: &BotIdentity) -> String {
    let name = user.display_name();
    match language {
        Language::English => format!(
            "Welcome {name}!\nI am {}\nUse the help command (/help) to view the guide",
            bot.first_name
        ),
        Language::Romaji => format!(
            "Hajimemashite {name}!\nWatashi wa {} desu.\nUse the help command (/help) to view the guide",
            bot.first_name
        ),
        Language::Japanese => format!(
            "はじめまして {name}!\nわたしは{}です。\nUse the help command (/help) to open the guide.",
            bot.first_name
        ),
    }
}

pub fn about_text(bot: &BotIdentity) -> String {
    let link = escape(&bot.link());
    format!(
        "<b>{name}</b>\n\n\
         Anime, manga and character lookups powered by \
         <a href='https://anilist.co' title='AniList'>AniList</a>\n\n\
         Bot name: {name}\nBot handle: {handle}\n\n\
         <b>Links</b>\n\
         Telegram link: <a href='{link}' title='Telegram link'>{link}</a>",
        name = escape(&bot.first_name),
        handle = escape(&bot.handle()),
    )
}

/// Usage text for a lookup command, also shown in the help keyboard.
pub fn lookup_usage(subject: Subject) -> &'static str {
    match subject {
        Subject::Anime => {
            "Use the /anime command to request anime data\n\n/anime <anime title>\n\nFor example: /anime Frieren"
        }
        Subject::Manga => {
            "Use the /manga command to request manga data\n\n/manga <manga title>\n\nFor example: /manga Berserk"
        }
        Subject::Character => {
            "Use the /character command to request character data\n\n/character <character name>\n\nFor example: /character Fern"
        }
    }
}

pub const ABOUT_USAGE: &str = "Get information about this bot\n\n/about";

pub fn language_status(language: Language) -> String {
    format!("Your language is {language}\nUse /language english, /language romaji or /language japanese to change it")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lookup_command() {
        let command = Command::parse("/anime Sousou no Frieren", "anime_bot").unwrap();
        assert_eq!(command, Command::Anime("Sousou no Frieren".into()));
        assert_eq!(command.lookup(), Some((Subject::Anime, "Sousou no Frieren")));
    }

    #[test]
    fn test_parse_command_without_args() {
        assert_eq!(Command::parse("/help", "anime_bot").unwrap(), Command::Help);
        let command = Command::parse("/manga", "anime_bot").unwrap();
        assert_eq!(command.lookup(), Some((Subject::Manga, "")));
    }

    #[test]
    fn test_parse_command_addressed_to_bot() {
        assert_eq!(
            Command::parse("/start@Anime_Bot", "anime_bot").unwrap(),
            Command::Start
        );
        assert!(Command::parse("/start@other_bot", "anime_bot").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_commands() {
        assert!(Command::parse("/nonsense", "anime_bot").is_err());
        assert!(Command::parse("hello", "anime_bot").is_err());
    }

    #[test]
    fn test_command_flags() {
        assert!(Command::Sql("SELECT 1".into()).is_debug());
        assert!(!Command::Start.is_debug());
        assert!(Command::About.logs_usage());
        assert!(Command::Character("Fern".into()).logs_usage());
        assert!(!Command::Help.logs_usage());
    }

    #[test]
    fn test_menu_hides_debug_commands() {
        let menu: Vec<String> = Command::bot_commands()
            .into_iter()
            .map(|c| c.command)
            .collect();
        for visible in ["start", "help", "id", "about", "anime", "manga", "character", "language"] {
            assert!(menu.iter().any(|c| c.trim_start_matches('/') == visible), "{visible} missing");
        }
        for hidden in ["raise", "cache", "sql"] {
            assert!(!menu.iter().any(|c| c.trim_start_matches('/') == hidden), "{hidden} shown");
        }
    }

    #[test]
    fn test_about_text_escapes_and_links() {
        let bot = BotIdentity {
            id: 1,
            username: "anime_bot".into(),
            first_name: "A<b>".into(),
        };
        let text = about_text(&bot);
        assert!(text.starts_with("<b>A&lt;b&gt;</b>"));
        assert!(text.contains("Bot handle: @anime_bot"));
        assert!(text.contains("<a href='https://t.me/anime_bot'"));
    }

    #[test]
    fn test_greeting_follows_language() {
        let user = User {
            id: 7,
            is_bot: false,
            first_name: "Ann".into(),
            last_name: None,
            username: None,
        };
        let bot = BotIdentity {
            id: 1,
            username: "anime_bot".into(),
            first_name: "Aries".into(),
        };
        assert!(greeting(Language::English, &user, &bot).starts_with("Welcome Ann!\nI am Aries"));
        assert!(greeting(Language::Romaji, &user, &bot).starts_with("Hajimemashite Ann!"));
        assert!(greeting(Language::Japanese, &user, &bot).contains("わたしはAriesです"));
    }
}
