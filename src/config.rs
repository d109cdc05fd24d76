use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::PathBuf;
use subtle::ConstantTimeEq;

/// Longest secret Telegram accepts for `setWebhook`.
const MAX_SECRET_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub telegram: TelegramConfig,
    pub storage: StorageConfig,
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Route receiving Telegram updates, e.g. `/webhook/`
    pub webhook_path: String,
    /// Unauthenticated route for platform health checks
    pub health_path: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: BotToken,
    pub secret_token: SecretToken,
    /// Public base URL the webhook path is appended to. When unset the
    /// webhook is assumed to be registered out of band.
    pub bot_web_url: Option<String>,
    pub log_chat_ids: Vec<i64>,
    pub developer_chat_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

/// Bot API token from BotFather. Never printed.
#[derive(Clone)]
pub struct BotToken(String);

impl BotToken {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            bail!("BOT_TOKEN must not be empty");
        }
        Ok(Self(value))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BotToken(***)")
    }
}

/// Shared secret Telegram echoes back in `X-Telegram-Bot-Api-Secret-Token`.
#[derive(Clone)]
pub struct SecretToken(String);

impl SecretToken {
    /// Telegram allows 1-256 characters of `A-Z`, `a-z`, `0-9`, `_` and `-`.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() || value.len() > MAX_SECRET_LEN {
            bail!("SECRET_TOKEN must be between 1 and {MAX_SECRET_LEN} characters long");
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            bail!("SECRET_TOKEN may only contain A-Z, a-z, 0-9, '_' and '-'");
        }
        Ok(Self(value))
    }

    /// Constant-time comparison against a header value.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        self.0.as_bytes().ct_eq(candidate).into()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(***)")
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_webhook_path() -> String {
    "/webhook/".to_string()
}

fn default_health_path() -> String {
    "/health/".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("animebot.db")
}

impl Config {
    /// Full public URL Telegram should deliver updates to.
    pub fn webhook_url(&self) -> Option<String> {
        self.telegram.bot_web_url.as_ref().map(|base| {
            format!(
                "{}{}",
                base.trim_end_matches('/'),
                self.server.webhook_path
            )
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Load from the process environment, reading `.env` first when present.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e).context("Failed to read .env file"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bot_token = BotToken::new(get("BOT_TOKEN").context("BOT_TOKEN is required but not set")?)?;
        let secret_token = SecretToken::new(
            get("SECRET_TOKEN").context("SECRET_TOKEN is required but not set")?,
        )?;

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("PORT must be a port number, got '{raw}'"))?,
            None => default_port(),
        };

        let debug = match get("DEBUG") {
            Some(raw) => parse_bool(&raw).with_context(|| format!("Invalid DEBUG value '{raw}'"))?,
            None => false,
        };

        let webhook_path = get("WEBHOOK_URL").unwrap_or_else(default_webhook_path);
        let health_path = get("HEALTH_URL").unwrap_or_else(default_health_path);
        validate_path("WEBHOOK_URL", &webhook_path)?;
        validate_path("HEALTH_URL", &health_path)?;
        if webhook_path == health_path {
            bail!("WEBHOOK_URL and HEALTH_URL must be different paths");
        }

        let config = Config {
            server: ServerConfig {
                host: get("HOST").unwrap_or_else(default_host),
                port,
                webhook_path,
                health_path,
            },
            telegram: TelegramConfig {
                bot_token,
                secret_token,
                bot_web_url: get("BOT_WEB_URL"),
                log_chat_ids: parse_chat_ids("LOG_CHAT_IDS", get("LOG_CHAT_IDS").as_deref())?,
                developer_chat_ids: parse_chat_ids(
                    "DEVELOPER_CHAT_IDS",
                    get("DEVELOPER_CHAT_IDS").as_deref(),
                )?,
            },
            storage: StorageConfig {
                database_path: get("DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_db_path),
            },
            debug,
        };

        Ok(config)
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" | "t" => Ok(true),
        "0" | "false" | "no" | "off" | "n" | "f" => Ok(false),
        other => bail!("expected a boolean, got '{other}'"),
    }
}

fn parse_chat_ids(name: &str, raw: Option<&str>) -> Result<Vec<i64>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .with_context(|| format!("{name} must be a comma-separated list of integers, got '{s}'"))
        })
        .collect()
}

fn validate_path(name: &str, path: &str) -> Result<()> {
    if !path.starts_with('/') {
        bail!("{name} must start with '/', got '{path}'");
    }
    Ok(())
}
