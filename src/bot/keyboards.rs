use anyhow::Result;

use super::commands::{lookup_usage, ABOUT_USAGE, HELP_TEXT};
use crate::anilist::{Catalog, MediaKind, PageInfo};
use crate::format::html::escape;
use crate::format::{format_character, format_media};
use crate::platform::{InlineButton, InlineKeyboard};
use crate::store::{Language, Subject};

/// Lookups show one record per page.
pub const PER_PAGE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpTopic {
    Anime,
    Character,
    Manga,
    About,
}

impl HelpTopic {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "anime" => Some(HelpTopic::Anime),
            "character" => Some(HelpTopic::Character),
            "manga" => Some(HelpTopic::Manga),
            "about" => Some(HelpTopic::About),
            _ => None,
        }
    }

    fn callback_data(self) -> &'static str {
        match self {
            HelpTopic::Anime => "help:anime",
            HelpTopic::Character => "help:character",
            HelpTopic::Manga => "help:manga",
            HelpTopic::About => "help:about",
        }
    }
}

/// Text a help topic switches the message to. Unknown topics show the
/// general help.
pub fn help_text(topic: Option<HelpTopic>) -> &'static str {
    match topic {
        Some(HelpTopic::Anime) => lookup_usage(Subject::Anime),
        Some(HelpTopic::Character) => lookup_usage(Subject::Character),
        Some(HelpTopic::Manga) => lookup_usage(Subject::Manga),
        Some(HelpTopic::About) => ABOUT_USAGE,
        None => HELP_TEXT,
    }
}

pub fn help_keyboard() -> InlineKeyboard {
    let button = |label: &str, topic: HelpTopic| InlineButton::new(label, topic.callback_data());
    InlineKeyboard::new(vec![
        vec![
            button("Anime", HelpTopic::Anime),
            button("Characters", HelpTopic::Character),
            button("Manga", HelpTopic::Manga),
        ],
        vec![button("About", HelpTopic::About)],
    ])
}

/// Decoded inline button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    Help(Option<HelpTopic>),
    Page { subject: Subject, step: i32 },
}

pub fn parse_callback(data: &str) -> Option<Callback> {
    let (prefix, rest) = data.split_once(':')?;
    if prefix == "help" {
        return Some(Callback::Help(HelpTopic::from_name(rest)));
    }
    let subject = prefix.parse::<Subject>().ok()?;
    let step = rest.parse::<i32>().ok()?;
    Some(Callback::Page { subject, step })
}

/// Page reached by moving `step` pages from `current`, kept within
/// `1..=last`.
pub fn next_page(current: u32, step: i32, last: u32) -> u32 {
    let target = i64::from(current) + i64::from(step);
    target.clamp(1, i64::from(last.max(1))) as u32
}

/// `Previous` above the first page, `Next` below the last one. Empty when the
/// result fits on a single page.
pub fn pagination_keyboard(subject: Subject, current: u32, last: u32, step: i32) -> InlineKeyboard {
    let mut row = Vec::new();
    if current > 1 {
        row.push(InlineButton::new("Previous", format!("{subject}:-{step}")));
    }
    if current < last {
        row.push(InlineButton::new("Next", format!("{subject}:{step}")));
    }
    InlineKeyboard::new(vec![row])
}

/// One rendered page of a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub text: String,
    pub info: PageInfo,
}

impl Page {
    /// `N of M` header followed by the record.
    pub fn render(&self, page: u32) -> String {
        format!("{} of {}\n\n{}", page, self.info.last_page.max(1), self.text)
    }
}

/// All-digit queries are AniList ids.
fn parse_id(query: &str) -> Option<i64> {
    if query.is_empty() || !query.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    query.parse().ok()
}

fn media_kind(subject: Subject) -> Option<MediaKind> {
    match subject {
        Subject::Anime => Some(MediaKind::Anime),
        Subject::Manga => Some(MediaKind::Manga),
        Subject::Character => None,
    }
}

pub async fn fetch_page(
    catalog: &dyn Catalog,
    subject: Subject,
    query: &str,
    page: u32,
    language: Language,
) -> Result<Page> {
    let by_id = parse_id(query);

    let (text, info) = match media_kind(subject) {
        Some(kind) => {
            let (found, info) = match by_id {
                Some(id) => (catalog.media(kind, id).await?, PageInfo::single()),
                None => {
                    let (items, info) = catalog.search_media(kind, query, page, PER_PAGE).await?;
                    (items.into_iter().next(), info)
                }
            };
            (found.map(|media| format_media(&media, kind, language)), info)
        }
        None => {
            let (found, info) = match by_id {
                Some(id) => (catalog.character(id).await?, PageInfo::single()),
                None => {
                    let (items, info) = catalog.search_characters(query, page, PER_PAGE).await?;
                    (items.into_iter().next(), info)
                }
            };
            (found.map(|character| format_character(&character, language)), info)
        }
    };

    Ok(match text {
        Some(text) => Page { text, info },
        None => Page {
            text: format!("{} '{}' not found", subject.label(), escape(query)),
            info: PageInfo::single(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_page_clamps() {
        assert_eq!(next_page(1, 1, 3), 2);
        assert_eq!(next_page(3, 1, 3), 3);
        assert_eq!(next_page(1, -1, 3), 1);
        assert_eq!(next_page(2, -5, 3), 1);
        assert_eq!(next_page(2, 10, 3), 3);
        assert_eq!(next_page(1, 1, 0), 1);
    }

    #[test]
    fn test_pagination_keyboard_buttons() {
        let first = pagination_keyboard(Subject::Anime, 1, 3, 1);
        assert_eq!(first.rows, vec![vec![InlineButton::new("Next", "anime:1")]]);

        let middle = pagination_keyboard(Subject::Manga, 2, 3, 1);
        assert_eq!(
            middle.rows,
            vec![vec![
                InlineButton::new("Previous", "manga:-1"),
                InlineButton::new("Next", "manga:1"),
            ]]
        );

        let last = pagination_keyboard(Subject::Character, 3, 3, 2);
        assert_eq!(last.rows, vec![vec![InlineButton::new("Previous", "character:-2")]]);

        assert!(pagination_keyboard(Subject::Anime, 1, 1, 1).is_empty());
    }

    #[test]
    fn test_parse_callback() {
        assert_eq!(
            parse_callback("anime:-1"),
            Some(Callback::Page {
                subject: Subject::Anime,
                step: -1
            })
        );
        assert_eq!(
            parse_callback("help:manga"),
            Some(Callback::Help(Some(HelpTopic::Manga)))
        );
        assert_eq!(parse_callback("help:whatever"), Some(Callback::Help(None)));
        assert_eq!(parse_callback("movie:1"), None);
        assert_eq!(parse_callback("anime:x"), None);
        assert_eq!(parse_callback("anime"), None);
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("30013"), Some(30013));
        assert_eq!(parse_id("86 EIGHTY-SIX"), None);
        assert_eq!(parse_id("-5"), None);
        assert_eq!(parse_id("99999999999999999999999"), None);
    }

    #[test]
    fn test_help_keyboard_layout() {
        let keyboard = help_keyboard();
        assert_eq!(keyboard.rows.len(), 2);
        assert_eq!(keyboard.rows[0][1].callback_data, "help:character");
        assert_eq!(keyboard.rows[1][0].label, "About");
        assert_eq!(help_text(Some(HelpTopic::About)), ABOUT_USAGE);
        assert_eq!(help_text(None), HELP_TEXT);
    }
}
