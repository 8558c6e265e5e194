//! Local side store: a single SQLite file next to the host database that
//! holds visit/API logs, friend links, subscribers and AI caches.
//!
//! Row-level helpers never propagate errors. A failure is logged and surfaces
//! as `None`/`false`/empty so page rendering on the host is never aborted.
//! File-level operations (export, import, migration) return `StorageError`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::Serialize;

pub mod ai_cache;
pub mod archive;
pub mod links;
pub mod migrate;
pub mod subscribers;
pub mod visits;

pub type DbPool = Pool<SqliteConnectionManager>;
type Conn = PooledConnection<SqliteConnectionManager>;

/// Every table in the local store, in creation order.
pub const TABLES: [&str; 6] = [
    "visit_log",
    "api_log",
    "friend_links",
    "subscribers",
    "ai_translations",
    "ai_summaries",
];

pub const MAX_LANG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("local store unavailable: {0}")]
    Unavailable(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("{0}")]
    Invalid(String),
}

/// Content kinds that may carry AI translations and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Post,
    Page,
}

impl ContentType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "post" => Some(Self::Post),
            "page" => Some(Self::Page),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Page => "page",
        }
    }
}

/// Lowercase, keep only `[a-z0-9-]`, cap at 16 chars. Empty result is invalid.
pub fn normalize_lang(raw: &str) -> Option<String> {
    let lang: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .take(MAX_LANG_LEN)
        .collect();
    if lang.is_empty() {
        None
    } else {
        Some(lang)
    }
}

/// Split a free-form language list ("en, zh-CN;ja") into normalized, unique codes.
pub fn parse_languages(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in raw.split(|c: char| c == ',' || c == ';' || c == '|' || c.is_whitespace()) {
        if let Some(lang) = normalize_lang(token) {
            if !out.contains(&lang) {
                out.push(lang);
            }
        }
    }
    out
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Handle to the local store file. The pool is opened on first use and
/// memoized until `close()`.
pub struct LocalStorage {
    path: PathBuf,
    pool: Mutex<Option<DbPool>>,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lazily open the store and make sure the schema exists.
    /// Returns `None` when the file cannot be opened.
    pub fn pool(&self) -> Option<DbPool> {
        let mut slot = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pool) = slot.as_ref() {
            return Some(pool.clone());
        }
        match open_pool(&self.path) {
            Ok(pool) => {
                *slot = Some(pool.clone());
                Some(pool)
            }
            Err(e) => {
                log::warn!(
                    "[store] cannot open local store {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Drop the memoized pool so the file can be replaced on disk.
    pub fn close(&self) {
        let mut slot = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    pub(crate) fn conn(&self) -> Result<Conn, StorageError> {
        let pool = self
            .pool()
            .ok_or_else(|| StorageError::Unavailable(self.path.display().to_string()))?;
        Ok(pool.get()?)
    }

    /// Row counts for all six tables. Missing store → empty map.
    pub fn table_counts(&self) -> BTreeMap<&'static str, i64> {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("[store] table_counts: {}", e);
                return BTreeMap::new();
            }
        };
        count_tables(&conn)
    }
}

pub(crate) fn count_tables(conn: &Connection) -> BTreeMap<&'static str, i64> {
    TABLES
        .iter()
        .map(|table| {
            let n = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })
                .unwrap_or(0);
            (*table, n)
        })
        .collect()
}

fn open_pool(path: &Path) -> Result<DbPool, StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let manager = SqliteConnectionManager::file(path)
        .with_init(|c| c.execute_batch("PRAGMA busy_timeout = 5000;"));
    let pool = Pool::builder().max_size(4).build(manager)?;

    // WAL lets other requests keep reading while one writes
    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    ensure_schema(&conn)?;
    Ok(pool)
}

pub(crate) fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS visit_log (
            id INTEGER PRIMARY KEY,
            ip TEXT NOT NULL DEFAULT '',
            uri TEXT NOT NULL,
            cid INTEGER,
            ctype TEXT,
            referer TEXT,
            user_agent TEXT,
            created INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_visit_dedup ON visit_log(ip, uri, created);
        CREATE INDEX IF NOT EXISTS idx_visit_created ON visit_log(created);
        CREATE INDEX IF NOT EXISTS idx_visit_cid ON visit_log(cid);

        CREATE TABLE IF NOT EXISTS api_log (
            id INTEGER PRIMARY KEY,
            ip TEXT NOT NULL DEFAULT '',
            method TEXT NOT NULL,
            uri TEXT NOT NULL,
            status INTEGER NOT NULL DEFAULT 0,
            user_agent TEXT,
            created INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_api_created ON api_log(created);

        CREATE TABLE IF NOT EXISTS friend_links (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            avatar TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            link_type TEXT NOT NULL DEFAULT 'friend',
            email TEXT NOT NULL DEFAULT '',
            message TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pending',
            sort INTEGER NOT NULL DEFAULT 0,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_links_status ON friend_links(status);
        CREATE INDEX IF NOT EXISTS idx_links_url ON friend_links(url);

        CREATE TABLE IF NOT EXISTS subscribers (
            id INTEGER PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'active',
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscribers_status ON subscribers(status);

        CREATE TABLE IF NOT EXISTS ai_translations (
            id INTEGER PRIMARY KEY,
            cid INTEGER NOT NULL,
            ctype TEXT NOT NULL,
            lang TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL DEFAULT '',
            model TEXT NOT NULL DEFAULT '',
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            UNIQUE(cid, ctype, lang)
        );
        CREATE INDEX IF NOT EXISTS idx_translations_cid ON ai_translations(cid);

        CREATE TABLE IF NOT EXISTS ai_summaries (
            id INTEGER PRIMARY KEY,
            cid INTEGER NOT NULL,
            ctype TEXT NOT NULL,
            lang TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            model TEXT NOT NULL DEFAULT '',
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            UNIQUE(cid, ctype, lang)
        );
        CREATE INDEX IF NOT EXISTS idx_summaries_cid ON ai_summaries(cid);
        ",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lang_strips_and_caps() {
        assert_eq!(normalize_lang(" zh-CN "), Some("zh-cn".to_string()));
        assert_eq!(normalize_lang("pt_BR"), Some("ptbr".to_string()));
        assert_eq!(normalize_lang("!!!"), None);
        assert_eq!(normalize_lang(""), None);
        let long = normalize_lang("abcdefghijklmnopqrstuvwxyz").unwrap();
        assert_eq!(long.len(), MAX_LANG_LEN);
        assert_eq!(long, "abcdefghijklmnop");
    }

    #[test]
    fn parse_languages_dedups_in_order() {
        let langs = parse_languages("EN, zh-CN;ja |en  ZH-cn,,fr!");
        assert_eq!(langs, vec!["en", "zh-cn", "ja", "fr"]);
        assert!(parse_languages("  , ; ").is_empty());
    }

    #[test]
    fn parse_languages_truncates_tokens() {
        let langs = parse_languages("this-is-a-very-long-language-tag");
        assert_eq!(langs, vec!["this-is-a-very-l"]);
    }

    #[test]
    fn content_type_is_restricted() {
        assert_eq!(ContentType::parse("POST"), Some(ContentType::Post));
        assert_eq!(ContentType::parse("page"), Some(ContentType::Page));
        assert_eq!(ContentType::parse("attachment"), None);
        assert_eq!(ContentType::Page.as_str(), "page");
    }

    #[test]
    fn clip_counts_chars_not_bytes() {
        assert_eq!(clip("héllo", 2), "hé");
    }
}
