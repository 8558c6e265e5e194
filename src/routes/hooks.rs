//! Host lifecycle events. The blog host posts here from its own hooks; every
//! endpoint answers quickly and leaves mail delivery to background tasks.

use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::acl::Acl;
use crate::ai::tasks::{self, Moderation, ModerationAction};
use crate::ai::{AiConfig, Feature};
use crate::config::AppPaths;
use crate::db::DbPool;
use crate::deploy;
use crate::notify::{self, CommentEvent, PostEvent, RegistrationEvent};
use crate::security::auth::AdminToken;
use crate::store::LocalStorage;

use super::{blocking, detach, fail};

// ── Comment submitted ─────────────────────────────────

/// Resulting comment status: the model's verdict when moderation ran,
/// otherwise whatever the host proposed.
fn comment_status(proposed: &str, moderation: Option<&Moderation>) -> String {
    match moderation {
        Some(m) => m.action.as_str().to_string(),
        None => proposed.to_string(),
    }
}

#[post("/hooks/comment", format = "json", data = "<body>")]
pub async fn comment(
    _admin: AdminToken,
    pool: &State<DbPool>,
    body: Json<CommentEvent>,
) -> Json<Value> {
    let mut event = body.into_inner();
    let cfg = AiConfig::load(pool);

    let mut moderation_error = None;
    let moderation = if cfg.enabled && cfg.has_feature(Feature::Moderate) {
        let (author, mail, url, text) = (
            event.author.clone(),
            event.mail.clone(),
            event.url.clone(),
            event.text.clone(),
        );
        match blocking(move || tasks::moderate_comment(&cfg, &author, &mail, &url, &text)).await {
            Ok(Ok(m)) => Some(m),
            Ok(Err(e)) => {
                log::warn!("[hooks] comment moderation failed for cid {}: {}", event.cid, e);
                moderation_error = Some(e.to_string());
                None
            }
            Err(e) => {
                moderation_error = Some(e);
                None
            }
        }
    } else {
        None
    };

    event.status = comment_status(&event.status, moderation.as_ref());
    let spam = event.status == ModerationAction::Spam.as_str();
    if !spam {
        let pool = pool.inner().clone();
        let ev = event.clone();
        detach(move || {
            notify::notify_comment(&pool, &ev);
        });
    }

    Json(json!({
        "ok": true,
        "status": event.status,
        "moderation": moderation,
        "moderation_error": moderation_error,
        "notified": !spam,
    }))
}

// ── File upload ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UploadCheck {
    #[serde(default)]
    pub group: String,
    pub filename: String,
    pub size: u64,
}

#[post("/hooks/upload", format = "json", data = "<body>")]
pub fn upload(_admin: AdminToken, acl: Acl, body: Json<UploadCheck>) -> Json<Value> {
    let decision = acl.0.check(&body.group, &body.filename, body.size);
    if !decision.is_allowed() {
        log::info!(
            "[hooks] upload refused: {} ({} bytes, group {:?}): {}",
            body.filename,
            body.size,
            body.group,
            decision.message()
        );
    }
    Json(json!({
        "ok": decision.is_allowed(),
        "decision": decision,
        "message": decision.message(),
        "rule": acl.0.rule_for(&body.group),
    }))
}

// ── User registered ───────────────────────────────────

#[post("/hooks/register", format = "json", data = "<body>")]
pub fn register(
    _admin: AdminToken,
    pool: &State<DbPool>,
    body: Json<RegistrationEvent>,
) -> Json<Value> {
    let event = body.into_inner();
    if event.mail.trim().is_empty() {
        return Json(fail("Registration event without an e-mail address"));
    }
    let pool = pool.inner().clone();
    detach(move || {
        notify::notify_registration(&pool, &event);
    });
    Json(json!({ "ok": true }))
}

// ── Post published ────────────────────────────────────

#[post("/hooks/publish", format = "json", data = "<body>")]
pub fn publish(
    _admin: AdminToken,
    pool: &State<DbPool>,
    store: &State<Arc<LocalStorage>>,
    body: Json<PostEvent>,
) -> Json<Value> {
    let event = body.into_inner();
    let recipients = store.count_subscribers(Some("active"));
    let pool = pool.inner().clone();
    let store = store.inner().clone();
    detach(move || {
        let report = notify::notify_new_post(&pool, &store, &event);
        log::info!(
            "[hooks] new-post mail for {}: {} sent, {} failed",
            event.cid,
            report.sent,
            report.failed
        );
    });
    Json(json!({ "ok": true, "subscribers": recipients }))
}

// ── Bundle repair ─────────────────────────────────────

#[post("/hooks/heal")]
pub async fn heal(_admin: AdminToken, paths: &State<AppPaths>) -> Json<Value> {
    let (src, dest) = (paths.bundle_src.clone(), paths.bundle_dest.clone());
    match blocking(move || deploy::self_heal(&src, &dest)).await {
        Ok(Ok(restored)) => Json(json!({ "ok": true, "restored": restored })),
        Ok(Err(e)) => Json(fail(e)),
        Err(e) => Json(fail(e)),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![comment, upload, register, publish, heal]
}
