use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use sha2::{Digest, Sha256};

use crate::db::DbPool;
use crate::models::settings::Setting;

pub const TOKEN_KEY: &str = "admin_api_token";

// ── Client IP request guard ──

/// Extracts the real client IP from the request.
/// Checks headers in priority order:
///   1. CF-Connecting-IP (Cloudflare)
///   2. True-Client-IP (Cloudflare Enterprise / Akamai)
///   3. X-Real-IP (nginx proxy_set_header)
///   4. X-Forwarded-For (first IP in the chain)
///   5. Rocket's client_ip() (socket peer address)
pub struct ClientIp(pub String);

pub fn client_ip(request: &Request<'_>) -> String {
    let headers = request.headers();
    for name in ["CF-Connecting-IP", "True-Client-IP", "X-Real-IP"] {
        if let Some(ip) = headers.get_one(name) {
            let ip = ip.trim();
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }

    // X-Forwarded-For: client, proxy1, proxy2
    if let Some(ip) = headers
        .get_one("X-Forwarded-For")
        .and_then(|fwd| fwd.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return ip.to_string();
    }

    request
        .client_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_default()
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(ClientIp(client_ip(request)))
    }
}

// ── Browser metadata guard ──

/// User agent and referer as sent by the client.
pub struct RequestMeta {
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestMeta {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let header = |name: &str| {
            request
                .headers()
                .get_one(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Outcome::Success(RequestMeta {
            user_agent: header("User-Agent"),
            referer: header("Referer"),
        })
    }
}

// ── Admin token guard ──

/// Guard: request carries the `admin_api_token` either as
/// `Authorization: Bearer <token>` or `X-Admin-Token: <token>`.
pub struct AdminToken;

fn presented_token<'a>(request: &'a Request<'_>) -> Option<&'a str> {
    let headers = request.headers();
    headers
        .get_one("Authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get_one("X-Admin-Token"))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Compare digests so the check does not short-circuit on the first
/// differing byte of the secret.
pub fn token_matches(presented: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminToken {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let pool = match request.rocket().state::<DbPool>() {
            Some(p) => p,
            None => return Outcome::Error((Status::InternalServerError, ())),
        };
        let presented = match presented_token(request) {
            Some(t) => t,
            None => return Outcome::Error((Status::Unauthorized, ())),
        };
        let expected = Setting::get(pool, TOKEN_KEY).unwrap_or_default();
        if token_matches(presented, expected.trim()) {
            Outcome::Success(AdminToken)
        } else {
            log::warn!("Rejected admin API call from {}", client_ip(request));
            Outcome::Error((Status::Unauthorized, ()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        assert!(token_matches("abc123", "abc123"));
        assert!(!token_matches("abc124", "abc123"));
        assert!(!token_matches("", ""));
        assert!(!token_matches("abc123", ""));
    }
}
