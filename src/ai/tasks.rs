//! The five assistant tasks. Each one sends a fixed system prompt plus the
//! user content and turns the reply into a typed result. When the reply has
//! no usable JSON key, the raw reply text is taken as the answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{chat, parse_json_from_text, prompts, AiConfig, AiError, ChatMessage, ChatOptions, Feature};

/// Longest input forwarded to the model, in characters.
pub const MAX_INPUT_CHARS: usize = 12_000;
pub const MAX_SLUG_LEN: usize = 80;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TranslationResult {
    pub title: String,
    pub text: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SummaryResult {
    pub summary: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Approved,
    Waiting,
    Spam,
}

impl ModerationAction {
    /// Exact match only; anything else is treated as "needs review".
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" => Self::Approved,
            "spam" => Self::Spam,
            _ => Self::Waiting,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Waiting => "waiting",
            Self::Spam => "spam",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Moderation {
    pub action: ModerationAction,
    pub reason: String,
    pub model: String,
}

fn clip_input(text: &str) -> String {
    text.chars().take(MAX_INPUT_CHARS).collect()
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn ask(cfg: &AiConfig, system: String, user: String) -> Result<super::Completion, AiError> {
    chat(
        cfg,
        &[ChatMessage::system(system), ChatMessage::user(user)],
        &ChatOptions::default(),
    )
}

// ── Translate ─────────────────────────────────────────

pub fn translate(cfg: &AiConfig, title: &str, text: &str, lang: &str) -> Result<TranslationResult, AiError> {
    cfg.require(Feature::Translate)?;
    let reply = ask(
        cfg,
        prompts::translate_system(lang),
        prompts::translate_user(title, &clip_input(text)),
    )?;
    let (title, text) = parse_translation(&reply.text, title).ok_or(AiError::EmptyReply)?;
    Ok(TranslationResult {
        title,
        text,
        model: reply.model,
    })
}

/// `None` when the reply carries no usable body text.
pub fn parse_translation(reply: &str, original_title: &str) -> Option<(String, String)> {
    let Some(v) = parse_json_from_text(reply) else {
        return non_blank(reply).map(|text| (original_title.to_string(), text));
    };
    let title = str_field(&v, "title").unwrap_or_else(|| original_title.to_string());
    let text = match ["text", "content"].into_iter().find(|k| v.get(*k).is_some()) {
        Some(key) => str_field(&v, key)?,
        None => non_blank(reply)?,
    };
    Some((title, text))
}

// ── Summarize ─────────────────────────────────────────

pub fn summarize(cfg: &AiConfig, title: &str, text: &str, lang: &str) -> Result<SummaryResult, AiError> {
    cfg.require(Feature::Summary)?;
    let reply = ask(
        cfg,
        prompts::summarize_system(lang),
        prompts::summarize_user(title, &clip_input(text)),
    )?;
    Ok(SummaryResult {
        summary: parse_keyed(&reply.text, "summary").ok_or(AiError::EmptyReply)?,
        model: reply.model,
    })
}

/// Value of `key` in the reply's JSON object. A reply without an object, or
/// an object without `key`, is itself the answer. A blank value is `None`.
pub fn parse_keyed(reply: &str, key: &str) -> Option<String> {
    match parse_json_from_text(reply) {
        Some(v) if v.get(key).is_some() => str_field(&v, key),
        _ => non_blank(reply),
    }
}

// ── Polish ────────────────────────────────────────────

pub fn polish(cfg: &AiConfig, text: &str) -> Result<String, AiError> {
    cfg.require(Feature::Polish)?;
    let reply = ask(cfg, prompts::polish_system(), clip_input(text))?;
    parse_keyed(&reply.text, "text").ok_or(AiError::EmptyReply)
}

// ── Slug ──────────────────────────────────────────────

pub fn slug(cfg: &AiConfig, title: &str) -> Result<String, AiError> {
    cfg.require(Feature::Slug)?;
    let reply = ask(cfg, prompts::slug_system(), clip_input(title))?;
    parse_slug(&reply.text, title).ok_or(AiError::EmptyReply)
}

/// Slugify the model's answer; fall back to the title itself. A JSON reply
/// without a usable `slug` goes straight to the title.
pub fn parse_slug(reply: &str, title: &str) -> Option<String> {
    let candidate = match parse_json_from_text(reply) {
        Some(v) => str_field(&v, "slug").unwrap_or_default(),
        None => reply.trim().to_string(),
    };
    let from_reply = limit_slug(&slug::slugify(candidate.lines().next().unwrap_or("")));
    if !from_reply.is_empty() {
        return Some(from_reply);
    }
    let from_title = limit_slug(&slug::slugify(title));
    if from_title.is_empty() {
        None
    } else {
        Some(from_title)
    }
}

fn limit_slug(s: &str) -> String {
    if s.len() <= MAX_SLUG_LEN {
        return s.to_string();
    }
    // slugify output is ASCII, so byte slicing is safe
    let cut = &s[..MAX_SLUG_LEN];
    match cut.rfind('-') {
        Some(i) if i > 0 => cut[..i].to_string(),
        _ => cut.trim_end_matches('-').to_string(),
    }
}

// ── Moderate ──────────────────────────────────────────

pub fn moderate_comment(
    cfg: &AiConfig,
    author: &str,
    email: &str,
    url: &str,
    text: &str,
) -> Result<Moderation, AiError> {
    cfg.require(Feature::Moderate)?;
    let reply = ask(
        cfg,
        prompts::moderate_system(),
        prompts::moderate_user(author, email, url, &clip_input(text)),
    )?;
    let (action, reason) = parse_moderation(&reply.text);
    Ok(Moderation {
        action,
        reason,
        model: reply.model,
    })
}

pub fn parse_moderation(reply: &str) -> (ModerationAction, String) {
    match parse_json_from_text(reply) {
        Some(v) => {
            let action = str_field(&v, "action")
                .map(|a| ModerationAction::parse(&a))
                .unwrap_or(ModerationAction::Waiting);
            let reason = str_field(&v, "reason").unwrap_or_default();
            (action, reason)
        }
        None => (
            ModerationAction::Waiting,
            "Unparseable moderation reply".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_reply_variants() {
        let (t, x) = parse_translation(
            "```json\n{\"title\": \"Hallo\", \"text\": \"Welt\"}\n```",
            "Hello",
        )
        .unwrap();
        assert_eq!((t.as_str(), x.as_str()), ("Hallo", "Welt"));

        let (t, x) = parse_translation("{\"content\": \"Bonjour\"}", "Hello").unwrap();
        assert_eq!((t.as_str(), x.as_str()), ("Hello", "Bonjour"));

        let (t, x) = parse_translation("  Plain translated body  ", "Hello").unwrap();
        assert_eq!((t.as_str(), x.as_str()), ("Hello", "Plain translated body"));

        assert_eq!(parse_translation("{\"title\": \"Hallo\", \"text\": \"\"}", "Hello"), None);
        assert_eq!(parse_translation("   ", "Hello"), None);
    }

    #[test]
    fn keyed_reply_falls_back_to_raw_text() {
        assert_eq!(
            parse_keyed("{\"summary\": \" Short. \"}", "summary").as_deref(),
            Some("Short.")
        );
        assert_eq!(
            parse_keyed("{\"other\": 1}", "summary").as_deref(),
            Some("{\"other\": 1}")
        );
        assert_eq!(
            parse_keyed("A summary without JSON.", "summary").as_deref(),
            Some("A summary without JSON.")
        );
    }

    #[test]
    fn blank_keyed_value_is_not_an_answer() {
        assert_eq!(parse_keyed("{\"summary\": \"\"}", "summary"), None);
        assert_eq!(parse_keyed("```json\n{\"text\": \"  \"}\n```", "text"), None);
        assert_eq!(parse_keyed("{\"summary\": 3}", "summary"), None);
        assert_eq!(parse_keyed("", "summary"), None);
    }

    #[test]
    fn slug_is_sanitized() {
        assert_eq!(
            parse_slug("{\"slug\": \"Rust Async_Patterns!\"}", "x").as_deref(),
            Some("rust-async-patterns")
        );
        assert_eq!(
            parse_slug("hello-world\nsome explanation", "x").as_deref(),
            Some("hello-world")
        );
        assert_eq!(parse_slug("{\"slug\": \"\"}", "My Title").as_deref(), Some("my-title"));
        assert_eq!(
            parse_slug("```json\n{\"slug\": \"\"}\n```", "My Title").as_deref(),
            Some("my-title")
        );
        assert_eq!(parse_slug("{\"other\": \"x\"}", "My Title").as_deref(), Some("my-title"));
        assert_eq!(parse_slug("", "").as_deref(), None);
    }

    #[test]
    fn long_slug_is_cut_at_word_boundary() {
        let long = "word-".repeat(30);
        let s = parse_slug(&format!("{{\"slug\": \"{}\"}}", long), "x").unwrap();
        assert!(s.len() <= MAX_SLUG_LEN);
        assert!(!s.ends_with('-'));
        assert!(s.starts_with("word-word"));
    }

    #[test]
    fn moderation_defaults_to_waiting() {
        assert_eq!(
            parse_moderation("{\"action\": \"spam\", \"reason\": \"link farm\"}"),
            (ModerationAction::Spam, "link farm".to_string())
        );
        assert_eq!(
            parse_moderation("```json\n{\"action\":\"APPROVED\"}\n```").0,
            ModerationAction::Approved
        );
        assert_eq!(parse_moderation("{\"action\": \"delete\"}").0, ModerationAction::Waiting);
        assert_eq!(parse_moderation("{\"reason\": \"?\"}").0, ModerationAction::Waiting);
        assert_eq!(parse_moderation("I think it's fine").0, ModerationAction::Waiting);
    }

    #[test]
    fn tasks_respect_feature_flags() {
        let mut cfg = super::super::AiSettings::default().runtime();
        cfg.enabled = true;
        cfg.api_key = "sk-test".into();
        cfg.features = vec![Feature::Translate];
        assert!(matches!(polish(&cfg, "text"), Err(AiError::FeatureDisabled(Feature::Polish))));
        assert!(matches!(
            moderate_comment(&cfg, "a", "b", "c", "d"),
            Err(AiError::FeatureDisabled(Feature::Moderate))
        ));
    }
}
