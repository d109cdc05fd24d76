use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

pub const ANILIST_URL: &str = "https://graphql.anilist.co";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Anime,
    Manga,
}

impl MediaKind {
    fn graphql_name(self) -> &'static str {
        match self {
            MediaKind::Anime => "ANIME",
            MediaKind::Manga => "MANGA",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTitle {
    pub romaji: Option<String>,
    pub english: Option<String>,
    pub native: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FuzzyDate {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CharacterName {
    pub full: Option<String>,
    pub native: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Named {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudioConnection {
    #[serde(default)]
    pub nodes: Vec<Named>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CharacterEdge {
    pub role: Option<String>,
    pub node: CharacterSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CharacterSummary {
    #[serde(default)]
    pub name: CharacterName,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CharacterConnection {
    #[serde(default)]
    pub edges: Vec<CharacterEdge>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: i64,
    pub site_url: Option<String>,
    #[serde(default)]
    pub title: MediaTitle,
    pub description: Option<String>,
    pub country_of_origin: Option<String>,
    pub episodes: Option<u32>,
    pub chapters: Option<u32>,
    pub volumes: Option<u32>,
    pub format: Option<String>,
    pub source: Option<String>,
    pub status: Option<String>,
    pub season: Option<String>,
    pub season_year: Option<i32>,
    #[serde(default)]
    pub start_date: FuzzyDate,
    #[serde(default)]
    pub end_date: FuzzyDate,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub tags: Vec<Named>,
    #[serde(default)]
    pub studios: StudioConnection,
    #[serde(default)]
    pub characters: CharacterConnection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEdge {
    pub character_role: Option<String>,
    pub node: MediaSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaSummary {
    #[serde(default)]
    pub title: MediaTitle,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaConnection {
    #[serde(default)]
    pub edges: Vec<MediaEdge>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: i64,
    pub site_url: Option<String>,
    #[serde(default)]
    pub name: CharacterName,
    pub description: Option<String>,
    pub gender: Option<String>,
    pub age: Option<String>,
    #[serde(default)]
    pub date_of_birth: FuzzyDate,
    #[serde(default)]
    pub media: MediaConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub total: u32,
    #[serde(default = "first_page")]
    pub current_page: u32,
    #[serde(default = "first_page")]
    pub last_page: u32,
}

fn first_page() -> u32 {
    1
}

impl PageInfo {
    /// Pagination for a lookup by id.
    pub fn single() -> Self {
        Self {
            total: 1,
            current_page: 1,
            last_page: 1,
        }
    }
}

/// Read access to the anime/manga/character database.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn media(&self, kind: MediaKind, id: i64) -> Result<Option<Media>>;

    async fn search_media(
        &self,
        kind: MediaKind,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<Media>, PageInfo)>;

    async fn character(&self, id: i64) -> Result<Option<Character>>;

    async fn search_characters(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<Character>, PageInfo)>;
}

const MEDIA_FIELDS: &str = "
    id siteUrl
    title { romaji english native }
    description(asHtml: true)
    countryOfOrigin episodes chapters volumes format source status season seasonYear
    startDate { year month day }
    endDate { year month day }
    genres
    tags { name }
    studios(isMain: true) { nodes { name } }
    characters(role: MAIN, perPage: 8) { edges { role node { name { full native } } } }
";

const CHARACTER_FIELDS: &str = "
    id siteUrl
    name { full native }
    description(asHtml: true)
    gender age
    dateOfBirth { year month day }
    media(perPage: 8) { edges { characterRole node { title { romaji english native } } } }
";

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: String,
    variables: &'a Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
    status: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct MediaData {
    #[serde(rename = "Media")]
    media: Option<Media>,
}

#[derive(Debug, Deserialize)]
struct CharacterData {
    #[serde(rename = "Character")]
    character: Option<Character>,
}

#[derive(Debug, Deserialize)]
struct PageData<T> {
    #[serde(rename = "Page")]
    page: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaPage {
    page_info: PageInfo,
    #[serde(default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CharacterPage {
    page_info: PageInfo,
    #[serde(default)]
    characters: Vec<Character>,
}

pub struct AniListClient {
    client: reqwest::Client,
    endpoint: String,
}

impl AniListClient {
    pub fn new() -> Self {
        Self::with_endpoint(ANILIST_URL)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Run a query. `Ok(None)` when AniList reports the record as missing.
    async fn query<T: DeserializeOwned>(&self, query: String, variables: Value) -> Result<Option<T>> {
        debug!("Sending AniList query: {}", variables);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&GraphQlRequest {
                query,
                variables: &variables,
            })
            .send()
            .await
            .context("Failed to send request to AniList")?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("AniList API error ({}): {}", status, error_body);
        }

        let body: GraphQlResponse<T> = response
            .json()
            .await
            .context("Failed to parse AniList response")?;

        decode_response(body)
    }
}

impl Default for AniListClient {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_response<T>(body: GraphQlResponse<T>) -> Result<Option<T>> {
    if let Some(error) = body.errors.first() {
        if error.status == Some(404) {
            return Ok(None);
        }
        anyhow::bail!("AniList query failed: {}", error.message);
    }
    Ok(body.data)
}

#[async_trait]
impl Catalog for AniListClient {
    async fn media(&self, kind: MediaKind, id: i64) -> Result<Option<Media>> {
        let query = format!(
            "query ($id: Int, $type: MediaType) {{ Media(id: $id, type: $type) {{ {MEDIA_FIELDS} }} }}"
        );
        let data: Option<MediaData> = self
            .query(query, json!({ "id": id, "type": kind.graphql_name() }))
            .await?;
        Ok(data.and_then(|d| d.media))
    }

    async fn search_media(
        &self,
        kind: MediaKind,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<Media>, PageInfo)> {
        let graphql = format!(
            "query ($search: String, $type: MediaType, $page: Int, $perPage: Int) {{ \
             Page(page: $page, perPage: $perPage) {{ \
             pageInfo {{ total currentPage lastPage }} \
             media(search: $search, type: $type, sort: SEARCH_MATCH) {{ {MEDIA_FIELDS} }} }} }}"
        );
        let data: Option<PageData<MediaPage>> = self
            .query(
                graphql,
                json!({
                    "search": query,
                    "type": kind.graphql_name(),
                    "page": page,
                    "perPage": per_page,
                }),
            )
            .await?;
        Ok(data
            .map(|d| (d.page.media, d.page.page_info))
            .unwrap_or_else(|| (Vec::new(), PageInfo::single())))
    }

    async fn character(&self, id: i64) -> Result<Option<Character>> {
        let query = format!(
            "query ($id: Int) {{ Character(id: $id) {{ {CHARACTER_FIELDS} }} }}"
        );
        let data: Option<CharacterData> = self.query(query, json!({ "id": id })).await?;
        Ok(data.and_then(|d| d.character))
    }

    async fn search_characters(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<Character>, PageInfo)> {
        let graphql = format!(
            "query ($search: String, $page: Int, $perPage: Int) {{ \
             Page(page: $page, perPage: $perPage) {{ \
             pageInfo {{ total currentPage lastPage }} \
             characters(search: $search, sort: SEARCH_MATCH) {{ {CHARACTER_FIELDS} }} }} }}"
        );
        let data: Option<PageData<CharacterPage>> = self
            .query(
                graphql,
                json!({ "search": query, "page": page, "perPage": per_page }),
            )
            .await?;
        Ok(data
            .map(|d| (d.page.characters, d.page.page_info))
            .unwrap_or_else(|| (Vec::new(), PageInfo::single())))
    }
}
