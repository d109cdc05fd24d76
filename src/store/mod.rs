pub mod keyboards;
pub mod preferences;

use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use keyboards::{KeyboardState, Subject};
pub use preferences::Language;

/// Everything cached for one user.
#[derive(Debug, Clone, Serialize)]
pub struct UserData {
    pub language: Language,
    pub keyboards: BTreeMap<Subject, KeyboardState>,
}

struct State {
    conn: Connection,
    cache: HashMap<i64, UserData>,
}

/// Thread-safe SQLite store for user preferences and keyboard state,
/// fronted by a lazily populated per-user cache.
#[derive(Clone)]
pub struct Store {
    state: Arc<Mutex<State>>,
}

impl Store {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        Self::run_migrations(&conn)?;

        info!("Store initialized at: {}", path.display());
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                conn,
                cache: HashMap::new(),
            })),
        }
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS preferences (
                user_id INTEGER PRIMARY KEY,
                language INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS keyboards (
                user_id INTEGER NOT NULL,
                subject TEXT NOT NULL,
                message_id INTEGER,
                reply_id INTEGER,
                step INTEGER NOT NULL DEFAULT 1,
                current_page INTEGER,
                last_page INTEGER,
                query TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (user_id, subject)
            );
            ",
        )
        .context("Failed to run migrations")?;
        Ok(())
    }

    /// Serializable view of the cache, for the debug `/cache` command.
    pub async fn cache_snapshot(&self) -> serde_json::Value {
        let state = self.state.lock().await;
        let snapshot: BTreeMap<String, &UserData> = state
            .cache
            .iter()
            .map(|(id, data)| (id.to_string(), data))
            .collect();
        serde_json::to_value(snapshot).unwrap_or_default()
    }

    /// Run an arbitrary statement and return its rows as JSON values.
    /// The cache is dropped afterwards since the statement may have written.
    pub async fn execute_raw(&self, sql: &str) -> Result<Vec<Vec<serde_json::Value>>> {
        let mut state = self.state.lock().await;
        let rows = {
            let mut stmt = state.conn.prepare(sql).context("Failed to prepare statement")?;
            let columns = stmt.column_count();
            let rows = stmt
                .query_map([], |row| {
                    (0..columns)
                        .map(|i| row.get_ref(i).map(value_to_json))
                        .collect::<rusqlite::Result<Vec<_>>>()
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to run statement")?;
            rows
        };
        state.cache.clear();
        warn!("Raw SQL executed, user cache cleared");
        Ok(rows)
    }
}

impl State {
    /// Cached data for a user, loading (and creating) their rows on first use.
    fn user(&mut self, user_id: i64) -> Result<&mut UserData> {
        if !self.cache.contains_key(&user_id) {
            let data = load_user(&self.conn, user_id)?;
            self.cache.insert(user_id, data);
        }
        self.cache
            .get_mut(&user_id)
            .context("user cache entry missing after load")
    }
}

fn load_user(conn: &Connection, user_id: i64) -> Result<UserData> {
    conn.execute(
        "INSERT OR IGNORE INTO preferences (user_id) VALUES (?1)",
        rusqlite::params![user_id],
    )
    .context("Failed to create preferences row")?;

    let language: i64 = conn.query_row(
        "SELECT language FROM preferences WHERE user_id = ?1",
        rusqlite::params![user_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT subject, message_id, reply_id, step, current_page, last_page, query
         FROM keyboards WHERE user_id = ?1",
    )?;
    let keyboards = stmt
        .query_map(rusqlite::params![user_id], |row| {
            let subject: String = row.get(0)?;
            Ok((
                subject,
                KeyboardState {
                    message_id: row.get(1)?,
                    reply_id: row.get(2)?,
                    step: row.get(3)?,
                    current_page: row.get(4)?,
                    last_page: row.get(5)?,
                    query: row.get(6)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to load keyboard state")?
        .into_iter()
        .filter_map(|(subject, state)| match subject.parse::<Subject>() {
            Ok(subject) => Some((subject, state)),
            Err(_) => {
                warn!("Ignoring keyboard row with unknown subject '{}'", subject);
                None
            }
        })
        .collect();

    Ok(UserData {
        language: Language::from_id(language).unwrap_or_default(),
        keyboards,
    })
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => i.into(),
        ValueRef::Real(f) => f.into(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned().into(),
        ValueRef::Blob(b) => format!("<{} byte blob>", b.len()).into(),
    }
}
