use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::DbPool;
use crate::notify;
use crate::security::auth::{ClientIp, RequestMeta};
use crate::store::links::{LinkForm, LinkStatus};
use crate::store::visits::VisitEntry;
use crate::store::LocalStorage;

use super::{detach, fail, ok_with};

// ── Health ────────────────────────────────────────────

#[get("/health")]
pub fn health(store: &State<Arc<LocalStorage>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "local_store": store.pool().is_some(),
    }))
}

// ── Visit beacon ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct VisitRequest {
    pub uri: String,
    pub cid: Option<i64>,
    pub ctype: Option<String>,
    /// Document referrer as seen by the page; the beacon request's own
    /// Referer header points at the page itself.
    pub referer: Option<String>,
}

#[post("/visit", format = "json", data = "<body>")]
pub fn visit(
    store: &State<Arc<LocalStorage>>,
    ip: ClientIp,
    meta: RequestMeta,
    body: Json<VisitRequest>,
) -> Json<Value> {
    let referer = body
        .referer
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .or(meta.referer.as_deref());
    let entry = VisitEntry {
        ip: &ip.0,
        uri: &body.uri,
        cid: body.cid,
        ctype: body.ctype.as_deref(),
        referer,
        user_agent: meta.user_agent.as_deref(),
    };
    Json(json!({ "ok": store.log_visit(&entry) }))
}

// ── Friend links ──────────────────────────────────────

#[get("/links")]
pub fn links(store: &State<Arc<LocalStorage>>) -> Json<Value> {
    let links = store.list_links(Some(LinkStatus::Approved));
    Json(json!({ "ok": true, "links": links }))
}

#[post("/links/apply", format = "json", data = "<body>")]
pub fn link_apply(
    pool: &State<DbPool>,
    store: &State<Arc<LocalStorage>>,
    ip: ClientIp,
    body: Json<LinkForm>,
) -> Json<Value> {
    let id = match store.apply_link(&body) {
        Ok(id) => id,
        Err(e) => return Json(fail(e)),
    };
    log::info!("[links] application #{} for {} from {}", id, body.url.trim(), ip.0);

    if let Some(link) = store.get_link(id) {
        let pool = pool.inner().clone();
        detach(move || {
            notify::notify_link_application(&pool, &link);
        });
    }
    Json(json!({ "ok": true, "id": id, "status": LinkStatus::Pending }))
}

// ── Subscribers ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[post("/subscribe", format = "json", data = "<body>")]
pub fn subscribe(store: &State<Arc<LocalStorage>>, body: Json<EmailRequest>) -> Json<Value> {
    match store.subscribe(&body.email) {
        Ok(created) => Json(json!({ "ok": true, "subscribed": true, "new": created })),
        Err(e) => Json(fail(e)),
    }
}

#[post("/unsubscribe", format = "json", data = "<body>")]
pub fn unsubscribe(store: &State<Arc<LocalStorage>>, body: Json<EmailRequest>) -> Json<Value> {
    match store.unsubscribe(&body.email) {
        Ok(changed) => Json(json!({ "ok": true, "changed": changed })),
        Err(e) => Json(fail(e)),
    }
}

// ── Cached AI output ──────────────────────────────────

/// One translation when `lang` is given, otherwise every cached language.
#[get("/ai/translation?<cid>&<ctype>&<lang>")]
pub fn translation(
    store: &State<Arc<LocalStorage>>,
    cid: i64,
    ctype: Option<String>,
    lang: Option<String>,
) -> Json<Value> {
    let ctype = ctype.unwrap_or_else(|| "post".to_string());
    match lang {
        Some(lang) => match store.get_translation(cid, &ctype, &lang) {
            Some(t) => Json(json!({ "ok": true, "translation": t })),
            None => Json(fail("Translation not found")),
        },
        None => Json(ok_with(&json!({
            "translations": store.list_translations(cid, &ctype)
        }))),
    }
}

#[get("/ai/summary?<cid>&<ctype>&<lang>")]
pub fn summary(
    store: &State<Arc<LocalStorage>>,
    cid: i64,
    ctype: Option<String>,
    lang: String,
) -> Json<Value> {
    let ctype = ctype.unwrap_or_else(|| "post".to_string());
    match store.get_summary(cid, &ctype, &lang) {
        Some(s) => Json(json!({ "ok": true, "summary": s })),
        None => Json(fail("Summary not found")),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        health,
        visit,
        links,
        link_apply,
        subscribe,
        unsubscribe,
        translation,
        summary
    ]
}
