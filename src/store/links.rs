use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::subscribers::valid_email;
use super::{clip, now, LocalStorage, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Pending,
    Approved,
    Rejected,
}

impl LinkStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendLink {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub avatar: String,
    pub description: String,
    pub link_type: String,
    pub email: String,
    pub message: String,
    pub status: String,
    pub sort: i64,
    pub created: i64,
    pub updated: i64,
}

/// Fields accepted from the admin editor and the public application form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkForm {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link_type: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sort: i64,
}

impl LinkForm {
    /// Trim and validate; returns the cleaned form or a user-facing reason.
    pub fn validated(&self) -> Result<LinkForm, StorageError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(StorageError::Invalid("Site name is required".into()));
        }
        let url = normalize_url(&self.url)
            .ok_or_else(|| StorageError::Invalid("Site URL must be an http(s) address".into()))?;
        let avatar = self.avatar.trim();
        if !avatar.is_empty() && normalize_url(avatar).is_none() {
            return Err(StorageError::Invalid("Avatar must be an http(s) address".into()));
        }
        let email = self.email.trim();
        if !email.is_empty() && !valid_email(email) {
            return Err(StorageError::Invalid("Invalid e-mail address".into()));
        }
        let link_type = self
            .link_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("friend");
        Ok(LinkForm {
            name: clip(name, 64),
            url,
            avatar: clip(avatar, 512),
            description: clip(self.description.trim(), 255),
            link_type: Some(clip(link_type, 32)),
            email: clip(email, 128),
            message: clip(self.message.trim(), 1000),
            sort: self.sort,
        })
    }
}

/// Accept only http(s) URLs; drops a trailing slash so duplicates compare equal.
pub fn normalize_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    parsed.host_str()?;
    Some(parsed.as_str().trim_end_matches('/').to_string())
}

impl FriendLink {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(FriendLink {
            id: row.get("id")?,
            name: row.get("name")?,
            url: row.get("url")?,
            avatar: row.get("avatar")?,
            description: row.get("description")?,
            link_type: row.get("link_type")?,
            email: row.get("email")?,
            message: row.get("message")?,
            status: row.get("status")?,
            sort: row.get("sort")?,
            created: row.get("created")?,
            updated: row.get("updated")?,
        })
    }
}

impl LocalStorage {
    pub fn list_links(&self, status: Option<LinkStatus>) -> Vec<FriendLink> {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("[store] list_links: {}", e);
                return vec![];
            }
        };
        let (sql, filter) = match status {
            Some(s) => (
                "SELECT * FROM friend_links WHERE status = ?1 ORDER BY sort ASC, id ASC",
                Some(s.as_str()),
            ),
            None => ("SELECT * FROM friend_links ORDER BY sort ASC, id ASC", None),
        };
        let mut stmt = match conn.prepare(sql) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        let rows = match filter {
            Some(f) => stmt.query_map(params![f], FriendLink::from_row),
            None => stmt.query_map([], FriendLink::from_row),
        };
        rows.map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn get_link(&self, id: i64) -> Option<FriendLink> {
        let conn = self.conn().ok()?;
        conn.query_row(
            "SELECT * FROM friend_links WHERE id = ?1",
            params![id],
            FriendLink::from_row,
        )
        .optional()
        .unwrap_or(None)
    }

    /// Admin-created links are published immediately.
    pub fn create_link(&self, form: &LinkForm) -> Result<i64, StorageError> {
        let form = form.validated()?;
        self.insert_link(&form, LinkStatus::Approved)
    }

    /// Visitor application; lands as `pending` unless the site is already
    /// listed or waiting for review.
    pub fn apply_link(&self, form: &LinkForm) -> Result<i64, StorageError> {
        let form = form.validated()?;
        let conn = self.conn()?;
        let taken: Option<String> = conn
            .query_row(
                "SELECT status FROM friend_links WHERE url = ?1 AND status IN ('pending', 'approved') LIMIT 1",
                params![form.url],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(status) = taken {
            let reason = if status == "approved" {
                "This site is already listed"
            } else {
                "An application for this site is already pending"
            };
            return Err(StorageError::Invalid(reason.into()));
        }
        drop(conn);
        self.insert_link(&form, LinkStatus::Pending)
    }

    fn insert_link(&self, form: &LinkForm, status: LinkStatus) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        let ts = now();
        conn.execute(
            "INSERT INTO friend_links
                (name, url, avatar, description, link_type, email, message, status, sort, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                form.name,
                form.url,
                form.avatar,
                form.description,
                form.link_type.as_deref().unwrap_or("friend"),
                form.email,
                form.message,
                status.as_str(),
                form.sort,
                ts
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_link(&self, id: i64, form: &LinkForm) -> Result<(), StorageError> {
        let form = form.validated()?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE friend_links SET name = ?1, url = ?2, avatar = ?3, description = ?4,
                link_type = ?5, email = ?6, message = ?7, sort = ?8, updated = ?9
             WHERE id = ?10",
            params![
                form.name,
                form.url,
                form.avatar,
                form.description,
                form.link_type.as_deref().unwrap_or("friend"),
                form.email,
                form.message,
                form.sort,
                now(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::Invalid(format!("Link {} not found", id)));
        }
        Ok(())
    }

    /// Move a link through review and return the updated row.
    pub fn set_link_status(&self, id: i64, status: LinkStatus) -> Result<FriendLink, StorageError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE friend_links SET status = ?1, updated = ?2 WHERE id = ?3",
            params![status.as_str(), now(), id],
        )?;
        if changed == 0 {
            return Err(StorageError::Invalid(format!("Link {} not found", id)));
        }
        Ok(conn.query_row(
            "SELECT * FROM friend_links WHERE id = ?1",
            params![id],
            FriendLink::from_row,
        )?)
    }

    pub fn delete_link(&self, id: i64) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM friend_links WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_url_accepts_http_only() {
        assert_eq!(
            normalize_url(" https://Example.com/ "),
            Some("https://example.com".to_string())
        );
        assert_eq!(
            normalize_url("http://blog.example.org/about/"),
            Some("http://blog.example.org/about".to_string())
        );
        assert_eq!(normalize_url("ftp://example.com"), None);
        assert_eq!(normalize_url("javascript:alert(1)"), None);
        assert_eq!(normalize_url("not a url"), None);
    }

    #[test]
    fn link_form_requires_name_and_url() {
        let form = LinkForm {
            name: "  ".into(),
            url: "https://example.com".into(),
            ..Default::default()
        };
        assert!(form.validated().is_err());

        let form = LinkForm {
            name: "Example".into(),
            url: "https://example.com/".into(),
            email: "bad-address".into(),
            ..Default::default()
        };
        assert!(form.validated().is_err());

        let form = LinkForm {
            name: " Example ".into(),
            url: "https://example.com/".into(),
            ..Default::default()
        };
        let clean = form.validated().unwrap();
        assert_eq!(clean.name, "Example");
        assert_eq!(clean.url, "https://example.com");
        assert_eq!(clean.link_type.as_deref(), Some("friend"));
    }
}
