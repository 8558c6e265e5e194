use std::sync::Arc;

use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Request, Response};

use crate::security::auth::client_ip;
use crate::store::visits::ApiLogEntry;
use crate::store::LocalStorage;

/// Records every `/api` request into the local store's `api_log`.
/// The visit beacon itself is excluded; it has its own table.
pub struct ApiLogFairing;

pub fn should_log(path: &str) -> bool {
    (path == "/api" || path.starts_with("/api/")) && path != "/api/visit" && path != "/api/health"
}

#[rocket::async_trait]
impl Fairing for ApiLogFairing {
    fn info(&self) -> Info {
        Info {
            name: "API Request Logger",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let path = request.uri().path().to_string();
        if !should_log(&path) {
            return;
        }

        let store = match request.rocket().state::<Arc<LocalStorage>>() {
            Some(s) => s,
            None => return,
        };

        let ip = client_ip(request);
        let uri = request.uri().to_string();
        let entry = ApiLogEntry {
            ip: &ip,
            method: request.method().as_str(),
            uri: &uri,
            status: response.status().code,
            user_agent: request.headers().get_one("User-Agent"),
        };
        store.log_api(&entry);
    }
}
