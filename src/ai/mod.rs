pub mod openai;
pub mod prompts;
pub mod tasks;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::DbPool;
use crate::models::settings::{is_truthy, Setting};
use crate::store::parse_languages;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const SNIPPET_CHARS: usize = 300;

// ── Errors ────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("AI assistant is disabled")]
    Disabled,
    #[error("AI API key is not configured")]
    MissingApiKey,
    #[error("AI feature '{}' is disabled", .0.as_str())]
    FeatureDisabled(Feature),
    #[error("failed to encode AI request: {0}")]
    Encode(String),
    #[error("AI request failed: {0}")]
    Transport(String),
    #[error("AI provider returned a non-JSON response (HTTP {status}): {snippet}")]
    NonJson { status: u16, snippet: String },
    #[error("AI provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("AI provider returned an empty reply")]
    EmptyReply,
}

// ── Features ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Translate,
    Summary,
    Polish,
    Slug,
    Moderate,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::Translate,
        Feature::Summary,
        Feature::Polish,
        Feature::Slug,
        Feature::Moderate,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "translate" | "translation" => Some(Self::Translate),
            "summary" | "summarize" => Some(Self::Summary),
            "polish" => Some(Self::Polish),
            "slug" => Some(Self::Slug),
            "moderate" | "moderation" => Some(Self::Moderate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Translate => "translate",
            Self::Summary => "summary",
            Self::Polish => "polish",
            Self::Slug => "slug",
            Self::Moderate => "moderate",
        }
    }
}

// ── Configuration ─────────────────────────────────────

/// AI options exactly as stored; numeric fields are `None` when blank or
/// unparseable.
#[derive(Debug, Clone, Default)]
pub struct AiSettings {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
    pub features: Vec<Feature>,
    pub languages: Vec<String>,
}

/// Normalized settings used for requests.
#[derive(Debug, Clone, Serialize)]
pub struct AiConfig {
    pub enabled: bool,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub features: Vec<Feature>,
    pub languages: Vec<String>,
}

impl AiSettings {
    pub fn load(pool: &DbPool) -> Self {
        Self::from_map(&Setting::get_group(pool, "ai_"))
    }

    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let get = |key: &str| map.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
        AiSettings {
            enabled: is_truthy(&get("ai_enabled")),
            base_url: get("ai_base_url"),
            api_key: get("ai_api_key"),
            model: get("ai_model"),
            temperature: get("ai_temperature").parse().ok(),
            timeout_secs: get("ai_timeout").parse().ok(),
            features: get("ai_features")
                .split(',')
                .filter_map(Feature::parse)
                .fold(Vec::new(), |mut acc, f| {
                    if !acc.contains(&f) {
                        acc.push(f);
                    }
                    acc
                }),
            languages: parse_languages(&get("ai_languages")),
        }
    }

    /// Clamp temperature to [0, 2] and timeout to [10, 300] s; fill blank
    /// model and base URL with defaults.
    pub fn runtime(&self) -> AiConfig {
        let temperature = self
            .temperature
            .filter(|t| t.is_finite())
            .unwrap_or(DEFAULT_TEMPERATURE)
            .clamp(0.0, 2.0);
        let timeout_secs = self
            .timeout_secs
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(10, 300);
        let model = if self.model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            self.model.clone()
        };
        let base_url = if self.base_url.is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            self.base_url.trim_end_matches('/').to_string()
        };
        AiConfig {
            enabled: self.enabled,
            base_url,
            api_key: self.api_key.clone(),
            model,
            temperature,
            timeout_secs,
            features: self.features.clone(),
            languages: self.languages.clone(),
        }
    }
}

impl AiConfig {
    pub fn load(pool: &DbPool) -> Self {
        AiSettings::load(pool).runtime()
    }

    /// Full chat-completions URL for the configured base.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn require(&self, feature: Feature) -> Result<(), AiError> {
        if !self.has_feature(feature) {
            return Err(AiError::FeatureDisabled(feature));
        }
        Ok(())
    }

    /// Safe-to-display view for the admin UI.
    pub fn public_view(&self) -> Value {
        json!({
            "enabled": self.enabled,
            "base_url": self.base_url,
            "endpoint": self.endpoint(),
            "model": self.model,
            "temperature": self.temperature,
            "timeout": self.timeout_secs,
            "features": self.features,
            "languages": self.languages,
            "api_key_set": !self.api_key.is_empty(),
            "api_key_hint": mask_key(&self.api_key),
        })
    }
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", chars[..3].iter().collect::<String>(), tail)
}

// ── Chat ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
}

/// Send one chat-completion request. Disabled or key-less configs fail
/// before any network traffic.
pub fn chat(
    cfg: &AiConfig,
    messages: &[ChatMessage],
    opts: &ChatOptions,
) -> Result<Completion, AiError> {
    if !cfg.enabled {
        return Err(AiError::Disabled);
    }
    if cfg.api_key.is_empty() {
        return Err(AiError::MissingApiKey);
    }

    let mut body = json!({
        "model": cfg.model,
        "messages": messages,
        "temperature": opts.temperature.unwrap_or(cfg.temperature).clamp(0.0, 2.0),
    });
    if let Some(max) = opts.max_tokens {
        body["max_tokens"] = json!(max);
    }

    let (status, raw) = openai::post_chat(cfg, &body)?;
    read_completion(status, &raw, &cfg.model)
}

/// Turn an HTTP status and body into a completion or a descriptive error.
pub fn read_completion(status: u16, body: &str, fallback_model: &str) -> Result<Completion, AiError> {
    let parsed = serde_json::from_str::<Value>(body);

    if status >= 400 {
        let message = parsed
            .ok()
            .and_then(|v| upstream_message(&v))
            .unwrap_or_else(|| snippet(body));
        return Err(AiError::Http { status, message });
    }

    let json = parsed.map_err(|_| AiError::NonJson {
        status,
        snippet: snippet(body),
    })?;

    if let Some(message) = json.get("error").and_then(|_| upstream_message(&json)) {
        return Err(AiError::Http { status, message });
    }

    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if text.is_empty() {
        return Err(AiError::EmptyReply);
    }
    let model = json
        .get("model")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .unwrap_or(fallback_model)
        .to_string();
    Ok(Completion { text, model })
}

fn upstream_message(v: &Value) -> Option<String> {
    let msg = v
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .or_else(|| v.get("error").and_then(|e| e.as_str()))
        .or_else(|| v.get("message").and_then(|m| m.as_str()))?;
    let msg = msg.trim();
    if msg.is_empty() {
        None
    } else {
        Some(msg.to_string())
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    let mut out: String = trimmed.chars().take(SNIPPET_CHARS).collect();
    if trimmed.chars().count() > SNIPPET_CHARS {
        out.push('…');
    }
    out
}

// ── Reply parsing ─────────────────────────────────────

/// Pull a JSON object out of a model reply. Handles bare JSON, code fences
/// and prose around the object by slicing from the first `{` to the last `}`.
pub fn parse_json_from_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}
