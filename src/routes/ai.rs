use std::collections::HashMap;
use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::ai::{self, tasks, AiConfig, ChatMessage, ChatOptions, Feature};
use crate::db::DbPool;
use crate::models::settings::Setting;
use crate::security::auth::AdminToken;
use crate::store::{normalize_lang, parse_languages, ContentType, LocalStorage};

use super::{blocking, fail, ok_with};

// ── Request Types ─────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AiConfigUpdate {
    pub enabled: Option<bool>,
    pub base_url: Option<String>,
    /// Blank keeps the stored key.
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub timeout: Option<u64>,
    pub features: Option<Vec<String>>,
    pub languages: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContentRequest {
    pub cid: Option<i64>,
    pub ctype: Option<String>,
    #[serde(default)]
    pub title: String,
    pub text: String,
    pub lang: String,
    /// Cache the result when `cid` is given. Defaults to true.
    pub save: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct SlugRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct ModerateRequest {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub url: String,
    pub text: String,
}

/// Cache target for a content request, if it names a valid one.
fn cache_target(req: &ContentRequest) -> Option<(i64, ContentType)> {
    if req.save == Some(false) {
        return None;
    }
    let cid = req.cid.filter(|c| *c > 0)?;
    let ctype = ContentType::parse(req.ctype.as_deref().unwrap_or("post"))?;
    Some((cid, ctype))
}

// ── Status & config ───────────────────────────────────

#[get("/admin/ai/status")]
pub fn ai_status(_admin: AdminToken, pool: &State<DbPool>) -> Json<Value> {
    let cfg = AiConfig::load(pool);
    let available: Vec<&str> = Feature::ALL.iter().map(|f| f.as_str()).collect();
    Json(json!({
        "ok": true,
        "config": cfg.public_view(),
        "available_features": available,
    }))
}

#[post("/admin/ai/config", format = "json", data = "<body>")]
pub fn ai_config_save(
    _admin: AdminToken,
    pool: &State<DbPool>,
    body: Json<AiConfigUpdate>,
) -> Json<Value> {
    let mut updates: HashMap<String, String> = HashMap::new();
    if let Some(enabled) = body.enabled {
        updates.insert("ai_enabled".into(), enabled.to_string());
    }
    if let Some(url) = &body.base_url {
        let url = url.trim();
        if !url.is_empty() && url::Url::parse(url).is_err() {
            return Json(fail("Base URL is not a valid URL"));
        }
        updates.insert("ai_base_url".into(), url.to_string());
    }
    if let Some(key) = body.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        updates.insert("ai_api_key".into(), key.to_string());
    }
    if let Some(model) = &body.model {
        updates.insert("ai_model".into(), model.trim().to_string());
    }
    if let Some(t) = body.temperature {
        updates.insert("ai_temperature".into(), t.to_string());
    }
    if let Some(t) = body.timeout {
        updates.insert("ai_timeout".into(), t.to_string());
    }
    if let Some(features) = &body.features {
        let parsed: Vec<&str> = features
            .iter()
            .filter_map(|f| Feature::parse(f))
            .map(|f| f.as_str())
            .collect();
        updates.insert("ai_features".into(), parsed.join(","));
    }
    if let Some(langs) = &body.languages {
        updates.insert("ai_languages".into(), parse_languages(langs).join(","));
    }

    if let Err(e) = Setting::set_many(pool, &updates) {
        return Json(fail(e));
    }
    log::info!("[ai] configuration updated ({} option(s))", updates.len());
    Json(json!({ "ok": true, "config": AiConfig::load(pool).public_view() }))
}

/// Round-trip a tiny prompt to verify endpoint, key and model.
#[post("/admin/ai/test")]
pub async fn ai_test(_admin: AdminToken, pool: &State<DbPool>) -> Json<Value> {
    let cfg = AiConfig::load(pool);
    let result = blocking(move || {
        ai::chat(
            &cfg,
            &[
                ChatMessage::system("Reply with the single word: pong"),
                ChatMessage::user("ping"),
            ],
            &ChatOptions {
                temperature: Some(0.0),
                max_tokens: Some(8),
            },
        )
    })
    .await;
    match result {
        Ok(Ok(c)) => Json(json!({ "ok": true, "reply": c.text, "model": c.model })),
        Ok(Err(e)) => Json(fail(e)),
        Err(e) => Json(fail(e)),
    }
}

// ── Tasks ─────────────────────────────────────────────

#[post("/admin/ai/translate", format = "json", data = "<body>")]
pub async fn translate(
    _admin: AdminToken,
    pool: &State<DbPool>,
    store: &State<Arc<LocalStorage>>,
    body: Json<ContentRequest>,
) -> Json<Value> {
    let req = body.into_inner();
    let lang = match normalize_lang(&req.lang) {
        Some(l) => l,
        None => return Json(fail("Invalid language code")),
    };
    let cfg = AiConfig::load(pool);
    let (title, text, task_lang) = (req.title.clone(), req.text.clone(), lang.clone());
    let result = blocking(move || tasks::translate(&cfg, &title, &text, &task_lang)).await;
    let translated = match result {
        Ok(Ok(t)) => t,
        Ok(Err(e)) => return Json(fail(e)),
        Err(e) => return Json(fail(e)),
    };

    let cached = cache_target(&req).map(|(cid, ctype)| {
        store.save_translation(
            cid,
            ctype.as_str(),
            &lang,
            &translated.title,
            &translated.text,
            &translated.model,
        )
    });
    Json(json!({
        "ok": true,
        "lang": lang,
        "title": translated.title,
        "text": translated.text,
        "model": translated.model,
        "cached": cached.unwrap_or(false),
    }))
}

#[post("/admin/ai/summarize", format = "json", data = "<body>")]
pub async fn summarize(
    _admin: AdminToken,
    pool: &State<DbPool>,
    store: &State<Arc<LocalStorage>>,
    body: Json<ContentRequest>,
) -> Json<Value> {
    let req = body.into_inner();
    let lang = match normalize_lang(&req.lang) {
        Some(l) => l,
        None => return Json(fail("Invalid language code")),
    };
    let cfg = AiConfig::load(pool);
    let (title, text, task_lang) = (req.title.clone(), req.text.clone(), lang.clone());
    let result = blocking(move || tasks::summarize(&cfg, &title, &text, &task_lang)).await;
    let summary = match result {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Json(fail(e)),
        Err(e) => return Json(fail(e)),
    };

    let cached = cache_target(&req).map(|(cid, ctype)| {
        store.save_summary(cid, ctype.as_str(), &lang, &summary.summary, &summary.model)
    });
    Json(json!({
        "ok": true,
        "lang": lang,
        "summary": summary.summary,
        "model": summary.model,
        "cached": cached.unwrap_or(false),
    }))
}

#[post("/admin/ai/polish", format = "json", data = "<body>")]
pub async fn polish(_admin: AdminToken, pool: &State<DbPool>, body: Json<TextRequest>) -> Json<Value> {
    let cfg = AiConfig::load(pool);
    let text = body.into_inner().text;
    match blocking(move || tasks::polish(&cfg, &text)).await {
        Ok(Ok(text)) => Json(json!({ "ok": true, "text": text })),
        Ok(Err(e)) => Json(fail(e)),
        Err(e) => Json(fail(e)),
    }
}

#[post("/admin/ai/slug", format = "json", data = "<body>")]
pub async fn slug(_admin: AdminToken, pool: &State<DbPool>, body: Json<SlugRequest>) -> Json<Value> {
    let cfg = AiConfig::load(pool);
    let title = body.into_inner().title;
    match blocking(move || tasks::slug(&cfg, &title)).await {
        Ok(Ok(slug)) => Json(json!({ "ok": true, "slug": slug })),
        Ok(Err(e)) => Json(fail(e)),
        Err(e) => Json(fail(e)),
    }
}

#[post("/admin/ai/moderate", format = "json", data = "<body>")]
pub async fn moderate(
    _admin: AdminToken,
    pool: &State<DbPool>,
    body: Json<ModerateRequest>,
) -> Json<Value> {
    let cfg = AiConfig::load(pool);
    let req = body.into_inner();
    let result = blocking(move || {
        tasks::moderate_comment(&cfg, &req.author, &req.email, &req.url, &req.text)
    })
    .await;
    match result {
        Ok(Ok(m)) => Json(ok_with(&m)),
        Ok(Err(e)) => Json(fail(e)),
        Err(e) => Json(fail(e)),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        ai_status,
        ai_config_save,
        ai_test,
        translate,
        summarize,
        polish,
        slug,
        moderate
    ]
}
