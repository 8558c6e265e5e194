pub mod admin_api;
pub mod ai;
pub mod api;
pub mod hooks;

use serde::Serialize;
use serde_json::{json, Value};

// ── Helpers ───────────────────────────────────────────

/// `{"ok": false, "error": ...}`
pub fn fail(error: impl std::fmt::Display) -> Value {
    json!({ "ok": false, "error": error.to_string() })
}

/// Merge a serializable payload into `{"ok": true, ...}`. Non-object
/// payloads land under `data`.
pub fn ok_with<T: Serialize>(payload: &T) -> Value {
    match serde_json::to_value(payload) {
        Ok(Value::Object(mut map)) => {
            map.insert("ok".into(), Value::Bool(true));
            Value::Object(map)
        }
        Ok(other) => json!({ "ok": true, "data": other }),
        Err(e) => fail(e),
    }
}

/// Run blocking work (SQLite file swaps, SMTP, outbound HTTP) off the async
/// executor.
pub async fn blocking<T, F>(f: F) -> Result<T, String>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    rocket::tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| format!("background task failed: {}", e))
}

/// Fire-and-forget variant for notifications.
pub fn detach<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    rocket::tokio::task::spawn_blocking(f);
}

pub fn routes() -> Vec<rocket::Route> {
    let mut all = api::routes();
    all.extend(admin_api::routes());
    all.extend(ai::routes());
    all.extend(hooks::routes());
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_with_merges_objects() {
        let v = ok_with(&json!({"count": 3}));
        assert_eq!(v, json!({"ok": true, "count": 3}));
        let v = ok_with(&vec![1, 2]);
        assert_eq!(v, json!({"ok": true, "data": [1, 2]}));
    }
}
