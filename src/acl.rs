//! Per-group upload rules stored as JSON in the `acl_config` option.

use std::collections::HashMap;

use rocket::request::{FromRequest, Outcome, Request};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;
use crate::models::settings::Setting;

pub const ACL_KEY: &str = "acl_config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: f64,
    #[serde(default)]
    pub allowed_types: Vec<String>,
}

fn default_max_upload_mb() -> f64 {
    2.0
}

impl Default for Rule {
    fn default() -> Self {
        Rule {
            max_upload_mb: default_max_upload_mb(),
            allowed_types: ["jpg", "jpeg", "png", "gif", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Rule {
    pub fn allows_type(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.allowed_types.iter().any(|t| {
            let t = t.trim().trim_start_matches('.');
            t == "*" || t.eq_ignore_ascii_case(&ext)
        })
    }

    pub fn max_bytes(&self) -> u64 {
        if self.max_upload_mb <= 0.0 || !self.max_upload_mb.is_finite() {
            return 0;
        }
        (self.max_upload_mb * 1024.0 * 1024.0) as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AclConfig {
    #[serde(default)]
    pub default: Rule,
    #[serde(default)]
    pub groups: HashMap<String, Rule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UploadDecision {
    Allowed,
    TooLarge { max_bytes: u64 },
    TypeNotAllowed { ext: String },
}

impl UploadDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, UploadDecision::Allowed)
    }

    pub fn message(&self) -> String {
        match self {
            UploadDecision::Allowed => "ok".to_string(),
            UploadDecision::TooLarge { max_bytes } => format!(
                "File exceeds the upload limit of {:.1} MB",
                *max_bytes as f64 / (1024.0 * 1024.0)
            ),
            UploadDecision::TypeNotAllowed { ext } if ext.is_empty() => {
                "Files without an extension are not allowed".to_string()
            }
            UploadDecision::TypeNotAllowed { ext } => {
                format!("File type .{} is not allowed", ext)
            }
        }
    }
}

impl AclConfig {
    /// Malformed or missing JSON falls back to the built-in default rule.
    pub fn load(pool: &DbPool) -> Self {
        Setting::get_json(pool, ACL_KEY).unwrap_or_default()
    }

    pub fn rule_for(&self, group: &str) -> &Rule {
        self.groups
            .get(group.trim())
            .or_else(|| {
                self.groups
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(group.trim()))
                    .map(|(_, rule)| rule)
            })
            .unwrap_or(&self.default)
    }

    pub fn check(&self, group: &str, filename: &str, size: u64) -> UploadDecision {
        let rule = self.rule_for(group);
        let ext = extension(filename);
        if !rule.allows_type(&ext) {
            return UploadDecision::TypeNotAllowed { ext };
        }
        let max_bytes = rule.max_bytes();
        if size > max_bytes {
            return UploadDecision::TooLarge { max_bytes };
        }
        UploadDecision::Allowed
    }
}

fn extension(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(i) if i > 0 => name[i + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

// ── Request guard ──

/// ACL parsed at most once per request.
pub struct Acl(pub AclConfig);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Acl {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let cfg = request.local_cache(|| {
            request
                .rocket()
                .state::<DbPool>()
                .map(AclConfig::load)
                .unwrap_or_default()
        });
        Outcome::Success(Acl(cfg.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_parsing() {
        assert_eq!(extension("photo.JPG"), "jpg");
        assert_eq!(extension("dir.v2/archive.tar.gz"), "gz");
        assert_eq!(extension(".hidden"), "");
        assert_eq!(extension("README"), "");
    }

    #[test]
    fn wildcard_allows_everything() {
        let rule = Rule {
            max_upload_mb: 1.0,
            allowed_types: vec!["*".into()],
        };
        assert!(rule.allows_type("exe"));
        assert!(rule.allows_type(""));
    }

    #[test]
    fn zero_limit_blocks_uploads() {
        let rule = Rule {
            max_upload_mb: 0.0,
            allowed_types: vec!["png".into()],
        };
        assert_eq!(rule.max_bytes(), 0);
    }
}
