use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;

use super::{AiConfig, AiError};

/// POST the request body to the chat-completions endpoint and hand back the
/// raw status and body. Interpreting the reply is up to the caller.
pub fn post_chat(cfg: &AiConfig, body: &Value) -> Result<(u16, String), AiError> {
    let payload = serde_json::to_vec(body).map_err(|e| AiError::Encode(e.to_string()))?;

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .connect_timeout(Duration::from_secs(cfg.timeout_secs.min(10)))
        .user_agent(concat!("sidedesk/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AiError::Transport(format!("HTTP client error: {}", e)))?;

    let url = cfg.endpoint();
    log::debug!("[ai] POST {} model={}", url, cfg.model);

    let resp = client
        .post(&url)
        .bearer_auth(&cfg.api_key)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .body(payload)
        .send()
        .map_err(|e| AiError::Transport(e.to_string()))?;

    let status = resp.status().as_u16();
    let text = resp
        .text()
        .map_err(|e| AiError::Transport(format!("failed to read response body: {}", e)))?;

    if status >= 400 {
        log::warn!("[ai] {} returned HTTP {}", url, status);
    }
    Ok((status, text))
}
