use rusqlite::params;
use serde::Serialize;

use super::{now, LocalStorage, StorageError};

#[derive(Debug, Clone, Serialize)]
pub struct Subscriber {
    pub id: i64,
    pub email: String,
    pub status: String,
    pub created: i64,
    pub updated: i64,
}

pub(crate) fn valid_email(s: &str) -> bool {
    s.len() <= 254 && s.parse::<lettre::Address>().is_ok()
}

fn normalize_email(raw: &str) -> Result<String, StorageError> {
    let email = raw.trim().to_lowercase();
    if !valid_email(&email) {
        return Err(StorageError::Invalid("Invalid e-mail address".into()));
    }
    Ok(email)
}

impl LocalStorage {
    /// Add or reactivate a subscriber. Returns `true` when the address was
    /// not already active.
    pub fn subscribe(&self, email: &str) -> Result<bool, StorageError> {
        let email = normalize_email(email)?;
        let conn = self.conn()?;
        let ts = now();
        let changed = conn.execute(
            "INSERT INTO subscribers (email, status, created, updated) VALUES (?1, 'active', ?2, ?2)
             ON CONFLICT(email) DO UPDATE SET status = 'active', updated = excluded.updated
             WHERE subscribers.status <> 'active'",
            params![email, ts],
        )?;
        Ok(changed > 0)
    }

    pub fn unsubscribe(&self, email: &str) -> Result<bool, StorageError> {
        let email = normalize_email(email)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE subscribers SET status = 'unsubscribed', updated = ?1
             WHERE email = ?2 AND status = 'active'",
            params![now(), email],
        )?;
        Ok(changed > 0)
    }

    pub fn list_subscribers(&self, status: Option<&str>) -> Vec<Subscriber> {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("[store] list_subscribers: {}", e);
                return vec![];
            }
        };
        let mut stmt = match conn.prepare(
            "SELECT id, email, status, created, updated FROM subscribers
             WHERE ?1 IS NULL OR status = ?1 ORDER BY id DESC",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![status], |row| {
            Ok(Subscriber {
                id: row.get(0)?,
                email: row.get(1)?,
                status: row.get(2)?,
                created: row.get(3)?,
                updated: row.get(4)?,
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    pub fn count_subscribers(&self, status: Option<&str>) -> i64 {
        self.conn()
            .ok()
            .and_then(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM subscribers WHERE ?1 IS NULL OR status = ?1",
                    params![status],
                    |row| row.get(0),
                )
                .ok()
            })
            .unwrap_or(0)
    }
}
