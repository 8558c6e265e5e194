use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono_tz::Tz;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::AppPaths;
use crate::db::DbPool;
use crate::deploy;
use crate::email::{self, OutgoingMail};
use crate::models::settings::Setting;
use crate::notify;
use crate::security::auth::AdminToken;
use crate::store::links::{LinkForm, LinkStatus};
use crate::store::LocalStorage;

use super::{blocking, detach, fail, ok_with};

pub const MIGRATED_KEY: &str = "local_storage_migrated_at";

/// Unix time of the last successful legacy migration.
pub fn migrated_at(pool: &DbPool) -> Option<i64> {
    Setting::get_parsed::<i64>(pool, MIGRATED_KEY).filter(|t| *t > 0)
}

fn site_timezone(pool: &DbPool) -> Tz {
    Setting::get_or(pool, "timezone", "UTC")
        .parse()
        .unwrap_or(Tz::UTC)
}

// ── Friend links ──────────────────────────────────────

#[get("/admin/links?<status>")]
pub fn links_list(
    _admin: AdminToken,
    store: &State<Arc<LocalStorage>>,
    status: Option<String>,
) -> Json<Value> {
    let filter = match status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None | Some("all") => None,
        Some(s) => match LinkStatus::parse(s) {
            Some(st) => Some(st),
            None => return Json(fail(format!("Unknown status {:?}", s))),
        },
    };
    Json(json!({ "ok": true, "links": store.list_links(filter) }))
}

#[post("/admin/links", format = "json", data = "<body>")]
pub fn links_create(
    _admin: AdminToken,
    store: &State<Arc<LocalStorage>>,
    body: Json<LinkForm>,
) -> Json<Value> {
    match store.create_link(&body) {
        Ok(id) => Json(json!({ "ok": true, "id": id })),
        Err(e) => Json(fail(e)),
    }
}

#[put("/admin/links/<id>", format = "json", data = "<body>")]
pub fn links_update(
    _admin: AdminToken,
    store: &State<Arc<LocalStorage>>,
    id: i64,
    body: Json<LinkForm>,
) -> Json<Value> {
    match store.update_link(id, &body) {
        Ok(()) => Json(json!({ "ok": true, "link": store.get_link(id) })),
        Err(e) => Json(fail(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
    /// Mail the applicant about the decision. Defaults to true.
    pub notify: Option<bool>,
}

/// Approve or reject an application (or move a link back to pending).
#[post("/admin/links/<id>/status", format = "json", data = "<body>")]
pub fn links_review(
    _admin: AdminToken,
    pool: &State<DbPool>,
    store: &State<Arc<LocalStorage>>,
    id: i64,
    body: Json<StatusRequest>,
) -> Json<Value> {
    let status = match LinkStatus::parse(&body.status) {
        Some(s) => s,
        None => return Json(fail(format!("Unknown status {:?}", body.status))),
    };
    let link = match store.set_link_status(id, status) {
        Ok(link) => link,
        Err(e) => return Json(fail(e)),
    };
    log::info!("[links] #{} {} → {}", link.id, link.url, status.as_str());

    if body.notify.unwrap_or(true) && status != LinkStatus::Pending {
        let pool = pool.inner().clone();
        let mailed = link.clone();
        detach(move || {
            notify::notify_link_result(&pool, &mailed);
        });
    }
    Json(json!({ "ok": true, "link": link }))
}

#[delete("/admin/links/<id>")]
pub fn links_delete(
    _admin: AdminToken,
    store: &State<Arc<LocalStorage>>,
    id: i64,
) -> Json<Value> {
    match store.delete_link(id) {
        Ok(true) => Json(json!({ "ok": true })),
        Ok(false) => Json(fail("Link not found")),
        Err(e) => Json(fail(e)),
    }
}

// ── Subscribers ───────────────────────────────────────

#[get("/admin/subscribers?<status>")]
pub fn subscribers_list(
    _admin: AdminToken,
    store: &State<Arc<LocalStorage>>,
    status: Option<String>,
) -> Json<Value> {
    let status = status.as_deref().map(str::trim).filter(|s| !s.is_empty() && *s != "all");
    Json(json!({
        "ok": true,
        "subscribers": store.list_subscribers(status),
        "active": store.count_subscribers(Some("active")),
        "total": store.count_subscribers(None),
    }))
}

// ── Visits ────────────────────────────────────────────

#[get("/admin/visits/summary?<days>")]
pub fn visits_summary(
    _admin: AdminToken,
    pool: &State<DbPool>,
    store: &State<Arc<LocalStorage>>,
    days: Option<u32>,
) -> Json<Value> {
    let tz = site_timezone(pool);
    let summary = store.visit_summary(days.unwrap_or(30), tz);
    Json(json!({ "ok": true, "timezone": tz.name(), "summary": summary }))
}

#[get("/admin/visits/recent?<limit>")]
pub fn visits_recent(
    _admin: AdminToken,
    store: &State<Arc<LocalStorage>>,
    limit: Option<i64>,
) -> Json<Value> {
    let limit = limit.unwrap_or(50).clamp(1, 500);
    Json(json!({ "ok": true, "visits": store.recent_visits(limit) }))
}

// ── Storage ───────────────────────────────────────────

#[get("/admin/storage")]
pub fn storage_status(
    _admin: AdminToken,
    pool: &State<DbPool>,
    store: &State<Arc<LocalStorage>>,
    paths: &State<AppPaths>,
) -> Json<Value> {
    Json(json!({
        "ok": true,
        "path": store.path(),
        "available": store.pool().is_some(),
        "counts": store.table_counts(),
        "migrated_at": migrated_at(pool),
        "exports": list_exports(&paths.export_dir),
    }))
}

fn list_exports(dir: &Path) -> Vec<Value> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return vec![],
    };
    let mut out: Vec<(String, u64)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let is_export = name.starts_with("local-export-") && name.ends_with(".zip");
            let size = e.metadata().ok()?.len();
            is_export.then_some((name, size))
        })
        .collect();
    out.sort_by(|a, b| b.0.cmp(&a.0));
    out.into_iter()
        .map(|(name, bytes)| json!({ "name": name, "bytes": bytes }))
        .collect()
}

/// Archive names are plain file names inside the export directory.
fn export_file(dir: &Path, name: &str) -> Option<PathBuf> {
    let name = name.trim();
    let plain = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy() == name)
        .unwrap_or(false);
    if !plain || !name.ends_with(".zip") {
        return None;
    }
    Some(dir.join(name))
}

#[post("/admin/storage/export")]
pub async fn storage_export(
    _admin: AdminToken,
    store: &State<Arc<LocalStorage>>,
    paths: &State<AppPaths>,
) -> Json<Value> {
    let store = store.inner().clone();
    let dir = paths.export_dir.clone();
    match blocking(move || store.export_zip(&dir)).await {
        Ok(Ok(report)) => Json(ok_with(&report)),
        Ok(Err(e)) => Json(fail(e)),
        Err(e) => Json(fail(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub file: String,
}

#[post("/admin/storage/import", format = "json", data = "<body>")]
pub async fn storage_import(
    _admin: AdminToken,
    store: &State<Arc<LocalStorage>>,
    paths: &State<AppPaths>,
    body: Json<ImportRequest>,
) -> Json<Value> {
    let archive = match export_file(&paths.export_dir, &body.file) {
        Some(p) if p.is_file() => p,
        Some(_) => return Json(fail("Archive not found")),
        None => return Json(fail("Invalid archive name")),
    };
    let store = store.inner().clone();
    match blocking(move || store.import_zip(&archive)).await {
        Ok(Ok(report)) => Json(ok_with(&report)),
        Ok(Err(e)) => Json(fail(e)),
        Err(e) => Json(fail(e)),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MigrateRequest {
    #[serde(default)]
    pub force: bool,
    pub prefix: Option<String>,
}

/// Copy legacy side tables out of the primary database. Runs once unless
/// `force` is set.
#[post("/admin/storage/migrate", format = "json", data = "<body>")]
pub async fn storage_migrate(
    _admin: AdminToken,
    pool: &State<DbPool>,
    store: &State<Arc<LocalStorage>>,
    body: Json<MigrateRequest>,
) -> Json<Value> {
    let done_at = migrated_at(pool);
    if done_at.is_some() && !body.force {
        return Json(json!({
            "ok": false,
            "error": "Legacy data was already migrated",
            "migrated_at": done_at,
        }));
    }
    let prefix = body
        .prefix
        .clone()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| Setting::get_or(pool, "legacy_table_prefix", "typecho_"));

    let source = pool.inner().clone();
    let store = store.inner().clone();
    let result = blocking(move || store.migrate_legacy(&source, &prefix)).await;
    match result {
        Ok(Ok(report)) => {
            let stamp = crate::store::now().to_string();
            if let Err(e) = Setting::set(pool, MIGRATED_KEY, &stamp) {
                log::warn!("[store] cannot record migration time: {}", e);
            }
            Json(ok_with(&report))
        }
        Ok(Err(e)) => Json(fail(e)),
        Err(e) => Json(fail(e)),
    }
}

// ── Mail ──────────────────────────────────────────────

#[get("/admin/mail/status")]
pub fn mail_status(_admin: AdminToken, pool: &State<DbPool>) -> Json<Value> {
    let settings = email::MailSettings::load(pool);
    Json(json!({
        "ok": true,
        "enabled": settings.enabled,
        "host": settings.host,
        "port": settings.port,
        "from": settings.from,
        "last": email::last_status(pool),
    }))
}

#[derive(Debug, Deserialize)]
pub struct MailTestRequest {
    pub to: Option<String>,
}

#[post("/admin/mail/test", format = "json", data = "<body>")]
pub async fn mail_test(
    _admin: AdminToken,
    pool: &State<DbPool>,
    body: Json<MailTestRequest>,
) -> Json<Value> {
    let to = body
        .to
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| Setting::get_or(pool, "admin_email", ""));
    if to.trim().is_empty() {
        return Json(fail("No recipient: set admin_email or pass \"to\""));
    }
    let site = Setting::get_or(pool, "site_name", "My Blog");
    let mail = OutgoingMail {
        to,
        subject: format!("[{}] Test mail", site),
        html: "<p>SMTP settings are working.</p>".to_string(),
    };
    let pool = pool.inner().clone();
    match blocking(move || email::send_mail(&pool, &mail)).await {
        Ok(Ok(())) => Json(json!({ "ok": true })),
        Ok(Err(e)) => Json(fail(e)),
        Err(e) => Json(fail(e)),
    }
}

// ── Activation ────────────────────────────────────────

/// Deploy the admin bundle and make sure the local store opens.
#[post("/admin/activate")]
pub async fn activate(
    _admin: AdminToken,
    store: &State<Arc<LocalStorage>>,
    paths: &State<AppPaths>,
) -> Json<Value> {
    let (src, dest) = (paths.bundle_src.clone(), paths.bundle_dest.clone());
    let deployed = match blocking(move || deploy::deploy_bundle(&src, &dest)).await {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => return Json(fail(e)),
        Err(e) => return Json(fail(e)),
    };
    Json(json!({
        "ok": true,
        "deploy": deployed,
        "local_store": store.pool().is_some(),
        "counts": store.table_counts(),
    }))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        links_list,
        links_create,
        links_update,
        links_review,
        links_delete,
        subscribers_list,
        visits_summary,
        visits_recent,
        storage_status,
        storage_export,
        storage_import,
        storage_migrate,
        mail_status,
        mail_test,
        activate
    ]
}
