use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::{clip, now, ContentType, LocalStorage, StorageError};

/// A repeat (ip, uri) up to this many seconds later, inclusive, counts as one visit.
pub const VISIT_DEDUP_SECS: i64 = 10;

const MAX_IP: usize = 64;
const MAX_URI: usize = 512;
const MAX_HEADER: usize = 512;

#[derive(Debug, Clone, Default)]
pub struct VisitEntry<'a> {
    pub ip: &'a str,
    pub uri: &'a str,
    pub cid: Option<i64>,
    pub ctype: Option<&'a str>,
    pub referer: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct ApiLogEntry<'a> {
    pub ip: &'a str,
    pub method: &'a str,
    pub uri: &'a str,
    pub status: u16,
    pub user_agent: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct Visit {
    pub id: i64,
    pub ip: String,
    pub uri: String,
    pub cid: Option<i64>,
    pub ctype: Option<String>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub created: i64,
}

#[derive(Debug, Serialize)]
pub struct CountEntry {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct VisitSummary {
    pub days: u32,
    pub total_views: i64,
    pub unique_ips: i64,
    pub daily: Vec<DailyCount>,
    pub top_uris: Vec<CountEntry>,
    pub top_referers: Vec<CountEntry>,
    pub browsers: Vec<CountEntry>,
    pub os: Vec<CountEntry>,
}

impl LocalStorage {
    /// Record a page visit. Returns `false` only when the visit could not be
    /// stored; a suppressed duplicate still counts as success.
    pub fn log_visit(&self, visit: &VisitEntry) -> bool {
        match self.record_visit_at(visit, now()) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("[store] log_visit failed: {}", e);
                false
            }
        }
    }

    /// Insert a visit at `ts` unless the same ip/uri was seen within the
    /// dedup window. `Ok(true)` means a row was written.
    pub(crate) fn record_visit_at(&self, visit: &VisitEntry, ts: i64) -> Result<bool, StorageError> {
        let uri = clip(visit.uri.trim(), MAX_URI);
        if uri.is_empty() {
            return Err(StorageError::Invalid("empty uri".into()));
        }
        let ip = clip(visit.ip.trim(), MAX_IP);
        let conn = self.conn()?;

        let seen: Option<i64> = conn
            .query_row(
                "SELECT id FROM visit_log WHERE ip = ?1 AND uri = ?2 AND created >= ?3 LIMIT 1",
                params![ip, uri, ts - VISIT_DEDUP_SECS],
                |row| row.get(0),
            )
            .optional()?;
        if seen.is_some() {
            return Ok(false);
        }

        let cid = visit.cid.filter(|c| *c > 0);
        let ctype = visit
            .ctype
            .and_then(ContentType::parse)
            .map(|c| c.as_str());
        conn.execute(
            "INSERT INTO visit_log (ip, uri, cid, ctype, referer, user_agent, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ip,
                uri,
                cid,
                ctype,
                visit.referer.map(|r| clip(r, MAX_HEADER)),
                visit.user_agent.map(|u| clip(u, MAX_HEADER)),
                ts
            ],
        )?;
        Ok(true)
    }

    pub fn log_api(&self, entry: &ApiLogEntry) -> bool {
        let result = self.conn().and_then(|conn| {
            conn.execute(
                "INSERT INTO api_log (ip, method, uri, status, user_agent, created)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    clip(entry.ip, MAX_IP),
                    clip(entry.method, 16),
                    clip(entry.uri, MAX_URI),
                    entry.status,
                    entry.user_agent.map(|u| clip(u, MAX_HEADER)),
                    now()
                ],
            )
            .map_err(StorageError::from)
        });
        match result {
            Ok(_) => true,
            Err(e) => {
                log::warn!("[store] log_api failed: {}", e);
                false
            }
        }
    }

    pub fn recent_visits(&self, limit: i64) -> Vec<Visit> {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("[store] recent_visits: {}", e);
                return vec![];
            }
        };
        let mut stmt = match conn.prepare(
            "SELECT id, ip, uri, cid, ctype, referer, user_agent, created
             FROM visit_log ORDER BY id DESC LIMIT ?1",
        ) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![limit], |row| {
            Ok(Visit {
                id: row.get(0)?,
                ip: row.get(1)?,
                uri: row.get(2)?,
                cid: row.get(3)?,
                ctype: row.get(4)?,
                referer: row.get(5)?,
                user_agent: row.get(6)?,
                created: row.get(7)?,
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    /// Dashboard numbers for the last `days` days, bucketed in `tz`.
    pub fn visit_summary(&self, days: u32, tz: Tz) -> VisitSummary {
        let days = days.clamp(1, 366);
        let mut summary = VisitSummary {
            days,
            total_views: 0,
            unique_ips: 0,
            daily: vec![],
            top_uris: vec![],
            top_referers: vec![],
            browsers: vec![],
            os: vec![],
        };
        let conn = match self.conn() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("[store] visit_summary: {}", e);
                return summary;
            }
        };

        let today = Utc::now().with_timezone(&tz).date_naive();
        let first_day = today - Duration::days(i64::from(days) - 1);
        let since = first_day
            .and_hms_opt(0, 0, 0)
            .and_then(|d| d.and_local_timezone(tz).earliest())
            .map(|d| d.timestamp())
            .unwrap_or_else(|| now() - i64::from(days) * 86_400);

        summary.total_views = conn
            .query_row(
                "SELECT COUNT(*) FROM visit_log WHERE created >= ?1",
                params![since],
                |row| row.get(0),
            )
            .unwrap_or(0);
        summary.unique_ips = conn
            .query_row(
                "SELECT COUNT(DISTINCT ip) FROM visit_log WHERE created >= ?1",
                params![since],
                |row| row.get(0),
            )
            .unwrap_or(0);

        let mut per_day: HashMap<String, i64> = HashMap::new();
        if let Ok(mut stmt) = conn.prepare("SELECT created FROM visit_log WHERE created >= ?1") {
            if let Ok(rows) = stmt.query_map(params![since], |row| row.get::<_, i64>(0)) {
                for ts in rows.flatten() {
                    if let Some(dt) = DateTime::from_timestamp(ts, 0) {
                        let key = dt.with_timezone(&tz).format("%Y-%m-%d").to_string();
                        *per_day.entry(key).or_insert(0) += 1;
                    }
                }
            }
        }
        summary.daily = (0..days)
            .map(|i| {
                let date = (first_day + Duration::days(i64::from(i)))
                    .format("%Y-%m-%d")
                    .to_string();
                let count = per_day.get(&date).copied().unwrap_or(0);
                DailyCount { date, count }
            })
            .collect();

        summary.top_uris = grouped_counts(
            &conn,
            "SELECT uri, COUNT(*) AS n FROM visit_log WHERE created >= ?1
             GROUP BY uri ORDER BY n DESC LIMIT 10",
            since,
        );
        summary.top_referers = grouped_counts(
            &conn,
            "SELECT referer, COUNT(*) AS n FROM visit_log
             WHERE created >= ?1 AND referer IS NOT NULL AND referer <> ''
             GROUP BY referer ORDER BY n DESC LIMIT 10",
            since,
        );

        let agents = grouped_counts(
            &conn,
            "SELECT COALESCE(user_agent, ''), COUNT(*) FROM visit_log
             WHERE created >= ?1 GROUP BY user_agent",
            since,
        );
        let (browsers, os) = agent_breakdown(&agents);
        summary.browsers = browsers;
        summary.os = os;
        summary
    }
}

fn grouped_counts(conn: &rusqlite::Connection, sql: &str, since: i64) -> Vec<CountEntry> {
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(_) => return vec![],
    };
    stmt.query_map(params![since], |row| {
        Ok(CountEntry {
            label: row.get(0)?,
            count: row.get(1)?,
        })
    })
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default()
}

/// Fold raw user-agent counts into browser and OS tallies, largest first.
fn agent_breakdown(agents: &[CountEntry]) -> (Vec<CountEntry>, Vec<CountEntry>) {
    let parser = woothee::parser::Parser::new();
    let mut browsers: HashMap<String, i64> = HashMap::new();
    let mut systems: HashMap<String, i64> = HashMap::new();
    for entry in agents {
        let (browser, os) = match parser.parse(&entry.label) {
            Some(r) => (r.name.to_string(), r.os.to_string()),
            None => ("UNKNOWN".to_string(), "UNKNOWN".to_string()),
        };
        *browsers.entry(browser).or_insert(0) += entry.count;
        *systems.entry(os).or_insert(0) += entry.count;
    }
    (sorted_counts(browsers), sorted_counts(systems))
}

fn sorted_counts(map: HashMap<String, i64>) -> Vec<CountEntry> {
    let mut out: Vec<CountEntry> = map
        .into_iter()
        .map(|(label, count)| CountEntry { label, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    out
}
