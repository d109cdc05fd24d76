pub mod html;

use std::fmt::Display;

use crate::anilist::{Character, CharacterName, FuzzyDate, Media, MediaKind, MediaTitle};
use crate::store::Language;
use html::{escape, sanitize_html, truncate_html};

const NOT_KNOWN: &str = "Not known";
const DESCRIPTION_LIMIT: usize = 700;
const MAX_APPEARANCES: usize = 8;

/// `LIGHT_NOVEL` -> `Light Novel`
pub fn title_case(value: &str) -> String {
    value
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn or_not_known<T: Display>(value: Option<T>) -> String {
    value
        .map(|v| escape(&v.to_string()))
        .unwrap_or_else(|| NOT_KNOWN.to_string())
}

fn dedup(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

/// Titles ordered for the reader's language, duplicates removed.
pub fn media_titles(title: &MediaTitle, language: Language) -> Vec<String> {
    let pick = |value: &Option<String>, fallback: &str| {
        value.clone().unwrap_or_else(|| fallback.to_string())
    };
    let romaji = pick(&title.romaji, "No romaji title");
    let english = pick(&title.english, "No english title");
    let native = pick(&title.native, "No japanese title");

    match language {
        Language::Romaji => dedup([romaji, english, native]),
        Language::Japanese => dedup([native, english, romaji]),
        Language::English => dedup([english, romaji, native]),
    }
}

/// Best single title for the reader's language.
pub fn primary_title(title: &MediaTitle, language: Language) -> String {
    let preferred = match language {
        Language::English => [&title.english, &title.romaji, &title.native],
        Language::Romaji => [&title.romaji, &title.english, &title.native],
        Language::Japanese => [&title.native, &title.romaji, &title.english],
    };
    preferred
        .into_iter()
        .flatten()
        .next()
        .cloned()
        .unwrap_or_else(|| "Untitled".to_string())
}

pub fn character_names(name: &CharacterName, language: Language) -> Vec<String> {
    let native = name
        .native
        .clone()
        .unwrap_or_else(|| "No japanese name".to_string());
    let full = name
        .full
        .clone()
        .unwrap_or_else(|| "No english name".to_string());

    match language {
        Language::Japanese => dedup([native, full]),
        Language::English | Language::Romaji => dedup([full, native]),
    }
}

fn year(date: &FuzzyDate) -> String {
    or_not_known(date.year)
}

fn birthday(date: &FuzzyDate) -> String {
    match (date.year, date.month, date.day) {
        (Some(y), Some(m), Some(d)) => format!("{y:04}-{m:02}-{d:02}"),
        (None, Some(m), Some(d)) => format!("{m:02}-{d:02}"),
        (Some(y), _, _) => y.to_string(),
        _ => NOT_KNOWN.to_string(),
    }
}

fn description(raw: Option<&str>) -> String {
    match raw.map(str::trim).filter(|d| !d.is_empty()) {
        Some(text) => {
            let text = text
                .replace("~!", "\n  ")
                .replace("!~", "\n  ")
                .replace("__", "");
            truncate_html(sanitize_html(&text, &["a", "b"]).trim(), DESCRIPTION_LIMIT)
        }
        None => "No description".to_string(),
    }
}

fn joined(values: impl IntoIterator<Item = String>) -> String {
    let items: Vec<String> = values.into_iter().map(|v| escape(&v)).collect();
    if items.is_empty() {
        NOT_KNOWN.to_string()
    } else {
        items.join(", ")
    }
}

fn link(url: Option<&str>) -> String {
    match url {
        Some(url) => {
            let url = escape(url);
            format!("<a href=\"{url}\">{url}</a>")
        }
        None => NOT_KNOWN.to_string(),
    }
}

fn titles_block(title: &MediaTitle, language: Language) -> String {
    media_titles(title, language)
        .iter()
        .map(|t| escape(t))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render an anime or manga record as Telegram HTML.
pub fn format_media(media: &Media, kind: MediaKind, language: Language) -> String {
    let mut text = format!(
        "ID: {}\n\n<b>Titles</b>\n{}\n\n<b>Description</b>\n<i>{}</i>\n\n<b>Details</b>\n",
        media.id,
        titles_block(&media.title, language),
        description(media.description.as_deref()),
    );

    text.push_str(&format!("Country: {}\n", or_not_known(media.country_of_origin.as_deref())));
    match kind {
        MediaKind::Anime => {
            text.push_str(&format!("Episodes: {}\n", or_not_known(media.episodes)));
        }
        MediaKind::Manga => {
            text.push_str(&format!("Chapters: {}\n", or_not_known(media.chapters)));
            text.push_str(&format!("Volumes: {}\n", or_not_known(media.volumes)));
        }
    }
    text.push_str(&format!(
        "Format: {}\n",
        or_not_known(media.format.as_deref().map(|f| f.replace('_', " ")))
    ));
    text.push_str(&format!("Source: {}\n", or_not_known(media.source.as_deref().map(title_case))));
    text.push_str(&format!("Status: {}\n", or_not_known(media.status.as_deref().map(title_case))));
    if kind == MediaKind::Anime {
        let season = match (media.season.as_deref(), media.season_year) {
            (Some(season), Some(year)) => Some(format!("{} {}", title_case(season), year)),
            (Some(season), None) => Some(title_case(season)),
            _ => None,
        };
        text.push_str(&format!("Season: {}\n", or_not_known(season)));
    }
    text.push_str(&format!("Started: {}\n", year(&media.start_date)));
    text.push_str(&format!("Ended: {}\n\n", year(&media.end_date)));

    text.push_str("<b>Extra Info</b>\n");
    text.push_str(&format!("<i>Genres</i>: {}\n\n", joined(media.genres.iter().cloned())));
    text.push_str(&format!(
        "<i>Tags</i>: {}\n\n",
        joined(media.tags.iter().map(|t| t.name.clone()))
    ));
    if kind == MediaKind::Anime {
        text.push_str(&format!(
            "<i>Studios</i>: {}\n\n",
            joined(media.studios.nodes.iter().map(|s| s.name.clone()))
        ));
    }

    text.push_str("<b>Main characters</b>\n");
    let main: Vec<String> = media
        .characters
        .edges
        .iter()
        .filter(|edge| edge.role.as_deref().is_some_and(|r| r.eq_ignore_ascii_case("MAIN")))
        .map(|edge| format!(" • {}", escape(&character_names(&edge.node.name, language).join(" / "))))
        .collect();
    if main.is_empty() {
        text.push_str(" None listed\n\n");
    } else {
        text.push_str(&main.join("\n"));
        text.push_str("\n\n");
    }

    text.push_str(&format!("Url: {}", link(media.site_url.as_deref())));
    text
}

/// Render a character record as Telegram HTML.
pub fn format_character(character: &Character, language: Language) -> String {
    let names = character_names(&character.name, language)
        .iter()
        .map(|n| escape(n))
        .collect::<Vec<_>>()
        .join("\n");

    let role = character
        .media
        .edges
        .first()
        .and_then(|edge| edge.character_role.as_deref())
        .map(title_case);

    let appearances: Vec<String> = character
        .media
        .edges
        .iter()
        .take(MAX_APPEARANCES)
        .map(|edge| format!(" • {}", escape(&primary_title(&edge.node.title, language))))
        .collect();
    let appearances = if appearances.is_empty() {
        " None listed".to_string()
    } else {
        appearances.join("\n")
    };

    format!(
        "ID: {}\n\n<b>Names</b>\n{}\n\n<b>Description</b>\n<i>{}</i>\n\n<b>Details</b>\n\
         Gender: {}\nAge: {}\nDOB: {}\nRole: {}\n\n<b>Appearances</b>\n{}\n\nUrl: {}",
        character.id,
        names,
        description(character.description.as_deref()),
        or_not_known(character.gender.as_deref()),
        or_not_known(character.age.as_deref()),
        birthday(&character.date_of_birth),
        or_not_known(role),
        appearances,
        link(character.site_url.as_deref()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anilist::{
        CharacterConnection, CharacterEdge, CharacterSummary, MediaConnection, MediaEdge,
        MediaSummary, Named, StudioConnection,
    };

    fn title(romaji: Option<&str>, english: Option<&str>, native: Option<&str>) -> MediaTitle {
        MediaTitle {
            romaji: romaji.map(String::from),
            english: english.map(String::from),
            native: native.map(String::from),
        }
    }

    fn frieren() -> Media {
        Media {
            id: 154587,
            site_url: Some("https://anilist.co/anime/154587".into()),
            title: title(
                Some("Sousou no Frieren"),
                Some("Frieren: Beyond Journey's End"),
                Some("葬送のフリーレン"),
            ),
            description: Some("Elf mage <i>Frieren</i> & friends.<br>After the journey.".into()),
            country_of_origin: Some("JP".into()),
            episodes: Some(28),
            chapters: None,
            volumes: None,
            format: Some("TV".into()),
            source: Some("MANGA".into()),
            status: Some("FINISHED".into()),
            season: Some("FALL".into()),
            season_year: Some(2023),
            start_date: FuzzyDate { year: Some(2023), month: Some(9), day: Some(29) },
            end_date: FuzzyDate { year: Some(2024), month: None, day: None },
            genres: vec!["Adventure".into(), "Drama".into()],
            tags: vec![Named { name: "Elf".into() }],
            studios: StudioConnection { nodes: vec![Named { name: "Madhouse".into() }] },
            characters: CharacterConnection {
                edges: vec![
                    CharacterEdge {
                        role: Some("MAIN".into()),
                        node: CharacterSummary {
                            name: CharacterName {
                                full: Some("Frieren".into()),
                                native: Some("フリーレン".into()),
                            },
                        },
                    },
                    CharacterEdge {
                        role: Some("SUPPORTING".into()),
                        node: CharacterSummary {
                            name: CharacterName { full: Some("Stark".into()), native: None },
                        },
                    },
                ],
            },
        }
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("LIGHT_NOVEL"), "Light Novel");
        assert_eq!(title_case("FINISHED"), "Finished");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn test_media_titles_order_by_language() {
        let t = title(Some("Romaji"), Some("English"), Some("Native"));
        assert_eq!(media_titles(&t, Language::English), ["English", "Romaji", "Native"]);
        assert_eq!(media_titles(&t, Language::Romaji), ["Romaji", "English", "Native"]);
        assert_eq!(media_titles(&t, Language::Japanese), ["Native", "English", "Romaji"]);
    }

    #[test]
    fn test_media_titles_dedup_and_fallbacks() {
        let t = title(Some("Same"), Some("Same"), None);
        assert_eq!(media_titles(&t, Language::English), ["Same", "No japanese title"]);
        assert_eq!(primary_title(&title(None, None, Some("N")), Language::English), "N");
        assert_eq!(primary_title(&title(None, None, None), Language::English), "Untitled");
    }

    #[test]
    fn test_format_anime() {
        let text = format_media(&frieren(), MediaKind::Anime, Language::English);
        assert!(text.starts_with("ID: 154587\n\n<b>Titles</b>\nFrieren: Beyond Journey&#39;s End")
            || text.starts_with("ID: 154587\n\n<b>Titles</b>\nFrieren: Beyond Journey's End"));
        assert!(text.contains("<i>Elf mage Frieren &amp; friends.\nAfter the journey.</i>"));
        assert!(text.contains("Episodes: 28\n"));
        assert!(text.contains("Source: Manga\n"));
        assert!(text.contains("Season: Fall 2023\n"));
        assert!(text.contains("Ended: 2024\n"));
        assert!(text.contains("<i>Studios</i>: Madhouse"));
        assert!(text.contains(" • Frieren / フリーレン"));
        assert!(!text.contains("Stark"));
        assert!(text.ends_with("<a href=\"https://anilist.co/anime/154587\">https://anilist.co/anime/154587</a>"));
        assert!(!text.contains("Chapters"));
    }

    #[test]
    fn test_format_manga_shows_chapters_not_studios() {
        let mut manga = frieren();
        manga.chapters = None;
        manga.volumes = Some(13);
        let text = format_media(&manga, MediaKind::Manga, Language::Romaji);
        assert!(text.contains("<b>Titles</b>\nSousou no Frieren\n"));
        assert!(text.contains("Chapters: Not known\n"));
        assert!(text.contains("Volumes: 13\n"));
        assert!(!text.contains("Studios"));
        assert!(!text.contains("Episodes"));
    }

    #[test]
    fn test_format_character() {
        let character = Character {
            id: 176754,
            site_url: Some("https://anilist.co/character/176754".into()),
            name: CharacterName { full: Some("Frieren".into()), native: Some("フリーレン".into()) },
            description: Some("__Height:__ 160cm ~!secret!~".into()),
            gender: Some("Female".into()),
            age: Some("1000+".into()),
            date_of_birth: FuzzyDate { year: None, month: Some(12), day: Some(25) },
            media: MediaConnection {
                edges: vec![MediaEdge {
                    character_role: Some("MAIN".into()),
                    node: MediaSummary { title: title(Some("Sousou no Frieren"), None, None) },
                }],
            },
        };
        let text = format_character(&character, Language::Japanese);
        assert!(text.contains("<b>Names</b>\nフリーレン\nFrieren\n"));
        assert!(text.contains("Height: 160cm"));
        assert!(!text.contains("~!"));
        assert!(text.contains("DOB: 12-25\n"));
        assert!(text.contains("Role: Main\n"));
        assert!(text.contains(" • Sousou no Frieren"));
    }

    #[test]
    fn test_missing_description() {
        assert_eq!(description(None), "No description");
        assert_eq!(description(Some("  ")), "No description");
    }
}
