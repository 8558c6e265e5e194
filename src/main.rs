#[macro_use]
extern crate rocket;

use std::sync::Arc;

use rocket::fairing::{Fairing, Info, Kind};
use rocket::fs::{FileServer, Options};
use rocket::http::Header;
use rocket::serde::json::Json;
use rocket::Request;
use serde_json::{json, Value};

mod acl;
mod ai;
mod analytics;
mod boot;
mod config;
mod db;
mod deploy;
mod email;
mod models;
mod notify;
mod routes;
mod security;
mod store;

#[cfg(test)]
mod tests;

use config::AppPaths;
use store::LocalStorage;

pub struct NoCacheApi;

#[rocket::async_trait]
impl Fairing for NoCacheApi {
    fn info(&self) -> Info {
        Info { name: "No-Cache API Responses", kind: Kind::Response }
    }

    async fn on_response<'r>(&self, req: &'r rocket::Request<'_>, res: &mut rocket::Response<'r>) {
        if req.uri().path().starts_with("/api") {
            res.set_header(Header::new("Cache-Control", "no-store, no-cache, must-revalidate, max-age=0"));
        }
    }
}

#[catch(401)]
fn unauthorized() -> Json<Value> {
    Json(json!({ "ok": false, "error": "Missing or invalid admin token" }))
}

#[catch(404)]
fn not_found(req: &Request) -> Json<Value> {
    Json(json!({ "ok": false, "error": format!("No route for {}", req.uri().path()) }))
}

#[catch(422)]
fn unprocessable() -> Json<Value> {
    Json(json!({ "ok": false, "error": "Malformed request body" }))
}

#[catch(500)]
fn server_error() -> Json<Value> {
    Json(json!({ "ok": false, "error": "Internal server error" }))
}

#[launch]
fn rocket() -> _ {
    env_logger::init();

    let rocket = rocket::build();
    let paths = AppPaths::from_figment(rocket.figment());

    // Boot check: verify/create directories, repair the admin bundle
    boot::run(&paths);

    let pool = db::init_pool(&paths.primary_db).expect("Failed to initialize database pool");
    db::run_migrations(&pool).expect("Failed to run database migrations");
    db::seed_defaults(&pool).expect("Failed to seed default settings");

    let local = Arc::new(LocalStorage::new(paths.local_db.clone()));
    if local.pool().is_none() {
        log::warn!(
            "Local store {} is unavailable; logging and caches are disabled until it opens",
            paths.local_db.display()
        );
    }

    log::info!("Admin UI served from /admin, API mounted at /api");

    let bundle_dest = paths.bundle_dest.clone();
    rocket
        .manage(pool)
        .manage(local)
        .manage(paths)
        .attach(analytics::ApiLogFairing)
        .attach(NoCacheApi)
        .mount("/admin", FileServer::new(bundle_dest, Options::Index | Options::Missing))
        .mount("/api", routes::routes())
        .register("/", catchers![unauthorized, not_found, unprocessable, server_error])
}
