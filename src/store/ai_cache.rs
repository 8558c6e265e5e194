use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::{normalize_lang, now, ContentType, LocalStorage, StorageError};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Translation {
    pub cid: i64,
    pub ctype: String,
    pub lang: String,
    pub title: String,
    pub text: String,
    pub model: String,
    pub updated: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Summary {
    pub cid: i64,
    pub ctype: String,
    pub lang: String,
    pub summary: String,
    pub model: String,
    pub updated: i64,
}

/// Validated natural key of a cached AI result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    pub cid: i64,
    pub ctype: ContentType,
    pub lang: String,
}

impl CacheKey {
    pub fn new(cid: i64, ctype: &str, lang: &str) -> Option<Self> {
        if cid <= 0 {
            return None;
        }
        Some(Self {
            cid,
            ctype: ContentType::parse(ctype)?,
            lang: normalize_lang(lang)?,
        })
    }
}

impl LocalStorage {
    pub fn get_translation(&self, cid: i64, ctype: &str, lang: &str) -> Option<Translation> {
        let key = CacheKey::new(cid, ctype, lang)?;
        let conn = self.conn().map_err(|e| log::warn!("[store] get_translation: {}", e)).ok()?;
        conn.query_row(
            "SELECT cid, ctype, lang, title, text, model, updated FROM ai_translations
             WHERE cid = ?1 AND ctype = ?2 AND lang = ?3",
            params![key.cid, key.ctype.as_str(), key.lang],
            |row| {
                Ok(Translation {
                    cid: row.get(0)?,
                    ctype: row.get(1)?,
                    lang: row.get(2)?,
                    title: row.get(3)?,
                    text: row.get(4)?,
                    model: row.get(5)?,
                    updated: row.get(6)?,
                })
            },
        )
        .optional()
        .unwrap_or_else(|e| {
            log::warn!("[store] get_translation query: {}", e);
            None
        })
    }

    /// All cached translations of one content item, ordered by language.
    pub fn list_translations(&self, cid: i64, ctype: &str) -> Vec<Translation> {
        let ctype = match ContentType::parse(ctype) {
            Some(c) if cid > 0 => c,
            _ => return vec![],
        };
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(
            "SELECT cid, ctype, lang, title, text, model, updated FROM ai_translations
             WHERE cid = ?1 AND ctype = ?2 ORDER BY lang",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![cid, ctype.as_str()], |row| {
            Ok(Translation {
                cid: row.get(0)?,
                ctype: row.get(1)?,
                lang: row.get(2)?,
                title: row.get(3)?,
                text: row.get(4)?,
                model: row.get(5)?,
                updated: row.get(6)?,
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    pub fn save_translation(
        &self,
        cid: i64,
        ctype: &str,
        lang: &str,
        title: &str,
        text: &str,
        model: &str,
    ) -> bool {
        let key = match CacheKey::new(cid, ctype, lang) {
            Some(k) => k,
            None => return false,
        };
        let result = self
            .conn()
            .and_then(|conn| upsert_translation(&conn, &key, title, text, model));
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[store] save_translation failed: {}", e);
                false
            }
        }
    }

    pub fn get_summary(&self, cid: i64, ctype: &str, lang: &str) -> Option<Summary> {
        let key = CacheKey::new(cid, ctype, lang)?;
        let conn = self.conn().map_err(|e| log::warn!("[store] get_summary: {}", e)).ok()?;
        conn.query_row(
            "SELECT cid, ctype, lang, summary, model, updated FROM ai_summaries
             WHERE cid = ?1 AND ctype = ?2 AND lang = ?3",
            params![key.cid, key.ctype.as_str(), key.lang],
            |row| {
                Ok(Summary {
                    cid: row.get(0)?,
                    ctype: row.get(1)?,
                    lang: row.get(2)?,
                    summary: row.get(3)?,
                    model: row.get(4)?,
                    updated: row.get(5)?,
                })
            },
        )
        .optional()
        .unwrap_or_else(|e| {
            log::warn!("[store] get_summary query: {}", e);
            None
        })
    }

    pub fn save_summary(&self, cid: i64, ctype: &str, lang: &str, summary: &str, model: &str) -> bool {
        let key = match CacheKey::new(cid, ctype, lang) {
            Some(k) => k,
            None => return false,
        };
        let result = self
            .conn()
            .and_then(|conn| upsert_summary(&conn, &key, summary, model));
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[store] save_summary failed: {}", e);
                false
            }
        }
    }
}

// Native upsert first; older SQLite builds without ON CONFLICT DO UPDATE
// fall through to select-then-update/insert.

fn upsert_translation(
    conn: &Connection,
    key: &CacheKey,
    title: &str,
    text: &str,
    model: &str,
) -> Result<(), StorageError> {
    let ts = now();
    let native = conn.execute(
        "INSERT INTO ai_translations (cid, ctype, lang, title, text, model, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(cid, ctype, lang) DO UPDATE SET
            title = excluded.title,
            text = excluded.text,
            model = excluded.model,
            updated = excluded.updated",
        params![key.cid, key.ctype.as_str(), key.lang, title, text, model, ts],
    );
    if let Err(e) = native {
        log::debug!("[store] native upsert rejected, using fallback: {}", e);
        fallback_upsert_translation(conn, key, title, text, model, ts)?;
    }
    Ok(())
}

fn fallback_upsert_translation(
    conn: &Connection,
    key: &CacheKey,
    title: &str,
    text: &str,
    model: &str,
    ts: i64,
) -> Result<(), StorageError> {
    match find_id(conn, "ai_translations", key)? {
        Some(id) => {
            conn.execute(
                "UPDATE ai_translations SET title = ?1, text = ?2, model = ?3, updated = ?4
                 WHERE id = ?5",
                params![title, text, model, ts, id],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO ai_translations (cid, ctype, lang, title, text, model, created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![key.cid, key.ctype.as_str(), key.lang, title, text, model, ts],
            )?;
        }
    }
    Ok(())
}

fn upsert_summary(
    conn: &Connection,
    key: &CacheKey,
    summary: &str,
    model: &str,
) -> Result<(), StorageError> {
    let ts = now();
    let native = conn.execute(
        "INSERT INTO ai_summaries (cid, ctype, lang, summary, model, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(cid, ctype, lang) DO UPDATE SET
            summary = excluded.summary,
            model = excluded.model,
            updated = excluded.updated",
        params![key.cid, key.ctype.as_str(), key.lang, summary, model, ts],
    );
    if let Err(e) = native {
        log::debug!("[store] native upsert rejected, using fallback: {}", e);
        fallback_upsert_summary(conn, key, summary, model, ts)?;
    }
    Ok(())
}

fn fallback_upsert_summary(
    conn: &Connection,
    key: &CacheKey,
    summary: &str,
    model: &str,
    ts: i64,
) -> Result<(), StorageError> {
    match find_id(conn, "ai_summaries", key)? {
        Some(id) => {
            conn.execute(
                "UPDATE ai_summaries SET summary = ?1, model = ?2, updated = ?3 WHERE id = ?4",
                params![summary, model, ts, id],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO ai_summaries (cid, ctype, lang, summary, model, created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![key.cid, key.ctype.as_str(), key.lang, summary, model, ts],
            )?;
        }
    }
    Ok(())
}

fn find_id(conn: &Connection, table: &str, key: &CacheKey) -> Result<Option<i64>, StorageError> {
    let sql = format!(
        "SELECT id FROM {} WHERE cid = ?1 AND ctype = ?2 AND lang = ?3",
        table
    );
    Ok(conn
        .query_row(&sql, params![key.cid, key.ctype.as_str(), key.lang], |row| {
            row.get(0)
        })
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::super::ensure_schema;
    use super::*;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    fn rows(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn translation_fallback_inserts_then_updates() {
        let conn = memory_conn();
        let key = CacheKey::new(7, "post", "de").unwrap();

        fallback_upsert_translation(&conn, &key, "Hallo", "Welt", "m1", 100).unwrap();
        assert_eq!(rows(&conn, "ai_translations"), 1);

        fallback_upsert_translation(&conn, &key, "Hallo!", "Welt!", "m2", 200).unwrap();
        assert_eq!(rows(&conn, "ai_translations"), 1);
        let (title, text, model, created, updated): (String, String, String, i64, i64) = conn
            .query_row(
                "SELECT title, text, model, created, updated FROM ai_translations",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
        assert_eq!((title.as_str(), text.as_str(), model.as_str()), ("Hallo!", "Welt!", "m2"));
        assert_eq!((created, updated), (100, 200));

        let other = CacheKey::new(7, "post", "fr").unwrap();
        fallback_upsert_translation(&conn, &other, "Salut", "Monde", "m1", 300).unwrap();
        assert_eq!(rows(&conn, "ai_translations"), 2);
    }

    #[test]
    fn summary_fallback_inserts_then_updates() {
        let conn = memory_conn();
        let key = CacheKey::new(3, "page", "en").unwrap();

        fallback_upsert_summary(&conn, &key, "First.", "m1", 100).unwrap();
        fallback_upsert_summary(&conn, &key, "Second.", "m2", 150).unwrap();
        assert_eq!(rows(&conn, "ai_summaries"), 1);
        let (summary, model, updated): (String, String, i64) = conn
            .query_row("SELECT summary, model, updated FROM ai_summaries", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!((summary.as_str(), model.as_str(), updated), ("Second.", "m2", 150));

        let post = CacheKey::new(3, "post", "en").unwrap();
        fallback_upsert_summary(&conn, &post, "Post.", "m1", 160).unwrap();
        assert_eq!(rows(&conn, "ai_summaries"), 2);
    }
}
