use std::path::PathBuf;

use rocket::figment::Figment;
use serde::Deserialize;

/// File layout, read from the `sidedesk` table of Rocket's configuration
/// (`[default.sidedesk]` in Rocket.toml or `ROCKET_SIDEDESK={...}`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppPaths {
    /// Host primary database (options and legacy side tables).
    #[serde(default = "default_primary_db")]
    pub primary_db: PathBuf,
    /// Local side store file.
    #[serde(default = "default_local_db")]
    pub local_db: PathBuf,
    /// Where export archives are written.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    /// Static admin bundle shipped with the service.
    #[serde(default = "default_bundle_src")]
    pub bundle_src: PathBuf,
    /// Deployed copy served to the browser.
    #[serde(default = "default_bundle_dest")]
    pub bundle_dest: PathBuf,
}

fn default_primary_db() -> PathBuf {
    PathBuf::from("data/primary.db")
}

fn default_local_db() -> PathBuf {
    PathBuf::from("data/local/sidedesk.db")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("data/exports")
}

fn default_bundle_src() -> PathBuf {
    PathBuf::from("assets/admin")
}

fn default_bundle_dest() -> PathBuf {
    PathBuf::from("public/admin")
}

impl Default for AppPaths {
    fn default() -> Self {
        AppPaths {
            primary_db: default_primary_db(),
            local_db: default_local_db(),
            export_dir: default_export_dir(),
            bundle_src: default_bundle_src(),
            bundle_dest: default_bundle_dest(),
        }
    }
}

impl AppPaths {
    /// Missing section means defaults; a malformed one is logged and ignored.
    pub fn from_figment(figment: &Figment) -> Self {
        if !figment.contains("sidedesk") {
            return AppPaths::default();
        }
        match figment.extract_inner::<AppPaths>("sidedesk") {
            Ok(paths) => paths,
            Err(e) => {
                log::warn!("Invalid [sidedesk] configuration, using defaults: {}", e);
                AppPaths::default()
            }
        }
    }
}
