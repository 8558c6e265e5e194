use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rand::RngCore;
use rusqlite::params;

/// Pool over the host's primary database: plugin options plus the legacy
/// side tables that predate the local store.
pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_pool(path: &Path) -> Result<DbPool, Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder().max_size(10).build(manager)?;

    // Enable WAL mode for better concurrent read performance
    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    conn.execute_batch(
        "
        -- Plugin options (key-value)
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        );
        ",
    )?;

    Ok(())
}

pub fn seed_defaults(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    let defaults = vec![
        // General
        ("site_name", "My Blog"),
        ("site_url", "http://localhost:8000"),
        ("admin_email", ""),
        ("timezone", "UTC"),
        // Legacy tables in the primary database carry the host table prefix
        ("legacy_table_prefix", "typecho_"),
        ("local_storage_migrated_at", ""),
        // AI
        ("ai_enabled", "false"),
        ("ai_base_url", ""),
        ("ai_api_key", ""),
        ("ai_model", "gpt-4o-mini"),
        ("ai_temperature", "0.7"),
        ("ai_timeout", "60"),
        ("ai_features", "translate,summary,polish,slug"),
        ("ai_languages", "en,zh-cn,ja"),
        // Upload / group rules
        (
            "acl_config",
            r#"{"default":{"max_upload_mb":2,"allowed_types":["jpg","jpeg","png","gif","webp"]},"groups":{"administrator":{"max_upload_mb":64,"allowed_types":["*"]},"editor":{"max_upload_mb":16,"allowed_types":["jpg","jpeg","png","gif","webp","svg","pdf","zip"]}}}"#,
        ),
        // Mail
        ("mail_enabled", "false"),
        ("mail_smtp_host", ""),
        ("mail_smtp_port", "587"),
        ("mail_smtp_user", ""),
        ("mail_smtp_pass", ""),
        ("mail_smtp_secure", "starttls"),
        ("mail_from", ""),
        ("mail_from_name", ""),
        ("mail_last_status", ""),
        ("notify_comment_admin", "true"),
        ("notify_comment_reply", "true"),
        ("notify_link_apply", "true"),
        ("notify_link_result", "true"),
        ("notify_register", "true"),
        ("notify_publish", "false"),
    ];

    for (key, value) in defaults {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }

    // Seed the admin API token if not set
    let token_exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM settings WHERE key = 'admin_api_token' AND value <> ''",
        [],
        |row| row.get(0),
    )?;

    if token_exists == 0 {
        let mut bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        conn.execute(
            "INSERT INTO settings (key, value) VALUES ('admin_api_token', ?1)
             ON CONFLICT(key) DO UPDATE SET value = ?1",
            params![token],
        )?;
        log::info!("Generated admin API token (stored in option admin_api_token)");
    }

    Ok(())
}
