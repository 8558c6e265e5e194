#![cfg(test)]

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::collections::HashMap;
use std::fs;
use std::io::Write;

use crate::acl::{AclConfig, UploadDecision};
use crate::db::{run_migrations, seed_defaults, DbPool};
use crate::email::templates;
use crate::models::settings::Setting;
use crate::routes::admin_api::{migrated_at, MIGRATED_KEY};
use crate::store::links::{LinkForm, LinkStatus};
use crate::store::visits::{ApiLogEntry, VisitEntry};
use crate::store::archive::swap_in;
use crate::store::{LocalStorage, StorageError, TABLES};

/// Atomic counter for unique shared-cache DB names so parallel tests don't collide.
static TEST_DB_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// Fresh in-memory primary database with migrations and seed defaults applied.
/// Named shared-cache so every pooled connection sees the same data.
fn test_pool() -> DbPool {
    let id = TEST_DB_COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    let uri = format!("file:sidedesk_test_{}?mode=memory&cache=shared", id);
    let manager = SqliteConnectionManager::file(uri);
    let pool = Pool::builder()
        .max_size(2)
        .build(manager)
        .expect("Failed to create test pool");
    run_migrations(&pool).expect("Failed to run migrations");
    seed_defaults(&pool).expect("Failed to seed defaults");
    pool
}

/// Local store inside its own temp directory. Keep the guard alive.
fn test_store() -> (tempfile::TempDir, LocalStorage) {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStorage::new(dir.path().join("data").join("local.db"));
    (dir, store)
}

fn visit<'a>(ip: &'a str, uri: &'a str) -> VisitEntry<'a> {
    VisitEntry {
        ip,
        uri,
        cid: Some(7),
        ctype: Some("post"),
        referer: Some("https://search.example.com/?q=rust"),
        user_agent: Some(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        ),
    }
}

fn link_form(name: &str, url: &str) -> LinkForm {
    LinkForm {
        name: name.into(),
        url: url.into(),
        email: "owner@example.org".into(),
        ..Default::default()
    }
}

/// One row in each of the six tables.
fn populate(store: &LocalStorage) {
    assert!(store.log_visit(&visit("10.0.0.1", "/hello")));
    assert!(store.log_api(&ApiLogEntry {
        ip: "10.0.0.1",
        method: "GET",
        uri: "/api/links",
        status: 200,
        user_agent: None,
    }));
    store.create_link(&link_form("Friend", "https://friend.example.com")).unwrap();
    store.subscribe("reader@example.com").unwrap();
    assert!(store.save_translation(7, "post", "ja", "こんにちは", "本文", "gpt-4o-mini"));
    assert!(store.save_summary(7, "post", "en", "Short.", "gpt-4o-mini"));
}

// ═══════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════

#[test]
fn settings_set_and_get() {
    let pool = test_pool();
    Setting::set(&pool, "test_key", "hello").unwrap();
    assert_eq!(Setting::get(&pool, "test_key"), Some("hello".to_string()));
    Setting::set(&pool, "test_key", "again").unwrap();
    assert_eq!(Setting::get(&pool, "test_key"), Some("again".to_string()));
}

#[test]
fn settings_get_or_treats_blank_as_missing() {
    let pool = test_pool();
    assert_eq!(Setting::get_or(&pool, "nonexistent", "fallback"), "fallback");
    Setting::set(&pool, "blank", "   ").unwrap();
    assert_eq!(Setting::get_or(&pool, "blank", "fallback"), "fallback");
}

#[test]
fn settings_set_many_and_group() {
    let pool = test_pool();
    let mut updates = HashMap::new();
    updates.insert("ai_model".to_string(), "local-model".to_string());
    updates.insert("ai_enabled".to_string(), "true".to_string());
    Setting::set_many(&pool, &updates).unwrap();

    let group = Setting::get_group(&pool, "ai_");
    assert_eq!(group.get("ai_model").map(String::as_str), Some("local-model"));
    assert!(group.keys().all(|k| k.starts_with("ai_")));
    assert!(Setting::get_bool(&pool, "ai_enabled"));
    assert_eq!(Setting::get_parsed::<u64>(&pool, "ai_timeout"), Some(60));
}

#[test]
fn migration_gate_reads_unix_timestamp() {
    let pool = test_pool();
    assert_eq!(migrated_at(&pool), None);

    Setting::set(&pool, MIGRATED_KEY, "1700000000").unwrap();
    assert_eq!(migrated_at(&pool), Some(1_700_000_000));

    Setting::set(&pool, MIGRATED_KEY, "not-a-time").unwrap();
    assert_eq!(migrated_at(&pool), None);
}

#[test]
fn seed_generates_admin_token_once() {
    let pool = test_pool();
    let token = Setting::get(&pool, "admin_api_token").unwrap();
    assert_eq!(token.len(), 48);
    seed_defaults(&pool).unwrap();
    assert_eq!(Setting::get(&pool, "admin_api_token").unwrap(), token);
}

#[test]
fn seed_keeps_existing_values() {
    let pool = test_pool();
    Setting::set(&pool, "site_name", "Custom").unwrap();
    seed_defaults(&pool).unwrap();
    assert_eq!(Setting::get(&pool, "site_name").unwrap(), "Custom");
}

// ═══════════════════════════════════════════════════════════
// Visits & API log
// ═══════════════════════════════════════════════════════════

#[test]
fn visit_dedup_window() {
    let (_dir, store) = test_store();
    let v = visit("203.0.113.9", "/posts/rust");
    let t = 1_700_000_000;
    assert!(store.record_visit_at(&v, t).unwrap());
    assert!(!store.record_visit_at(&v, t + 5).unwrap());
    assert!(!store.record_visit_at(&v, t + 10).unwrap());
    assert!(store.record_visit_at(&v, t + 11).unwrap());

    // Different uri or ip is a separate visit
    assert!(store.record_visit_at(&visit("203.0.113.9", "/about"), t + 1).unwrap());
    assert!(store.record_visit_at(&visit("198.51.100.2", "/posts/rust"), t + 1).unwrap());
    assert_eq!(store.table_counts()["visit_log"], 4);
}

#[test]
fn log_visit_soft_failures() {
    let (_dir, store) = test_store();
    assert!(!store.log_visit(&visit("1.2.3.4", "   ")));
    assert!(store.log_visit(&visit("1.2.3.4", "/a")));
    // Immediate duplicate is suppressed but still reported as success
    assert!(store.log_visit(&visit("1.2.3.4", "/a")));
    assert_eq!(store.table_counts()["visit_log"], 1);
}

#[test]
fn log_visit_drops_invalid_content_type() {
    let (_dir, store) = test_store();
    let mut v = visit("1.2.3.4", "/media/1");
    v.ctype = Some("attachment");
    v.cid = Some(-3);
    assert!(store.log_visit(&v));
    let recent = store.recent_visits(1);
    assert_eq!(recent[0].ctype, None);
    assert_eq!(recent[0].cid, None);
}

#[test]
fn long_fields_are_truncated() {
    let (_dir, store) = test_store();
    let uri = format!("/{}", "x".repeat(2000));
    let ip = "9".repeat(200);
    assert!(store.log_visit(&VisitEntry {
        ip: &ip,
        uri: &uri,
        ..Default::default()
    }));
    let recent = store.recent_visits(1);
    assert_eq!(recent[0].uri.chars().count(), 512);
    assert_eq!(recent[0].ip.chars().count(), 64);
}

#[test]
fn unavailable_store_fails_softly() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, "not a directory").unwrap();
    // Parent "directory" is a regular file, so the store cannot be created
    let store = LocalStorage::new(blocker.join("local.db"));
    assert!(store.pool().is_none());
    assert!(!store.log_visit(&visit("1.2.3.4", "/a")));
    assert!(store.get_translation(1, "post", "en").is_none());
    assert!(!store.save_summary(1, "post", "en", "s", "m"));
    assert!(store.list_links(None).is_empty());
    assert!(store.table_counts().is_empty());
}

#[test]
fn visit_summary_counts() {
    let (_dir, store) = test_store();
    assert!(store.log_visit(&visit("10.0.0.1", "/a")));
    assert!(store.log_visit(&visit("10.0.0.2", "/a")));
    assert!(store.log_visit(&visit("10.0.0.1", "/b")));
    let summary = store.visit_summary(7, chrono_tz::Tz::UTC);
    assert_eq!(summary.total_views, 3);
    assert_eq!(summary.unique_ips, 2);
    assert_eq!(summary.daily.len(), 7);
    assert_eq!(summary.daily.iter().map(|d| d.count).sum::<i64>(), 3);
    assert_eq!(summary.top_uris[0].label, "/a");
    assert_eq!(summary.top_uris[0].count, 2);
    assert_eq!(summary.browsers[0].label, "Chrome");
    assert_eq!(summary.browsers[0].count, 3);
}

#[test]
fn api_log_records_without_dedup() {
    let (_dir, store) = test_store();
    let entry = ApiLogEntry {
        ip: "10.0.0.1",
        method: "POST",
        uri: "/api/subscribe",
        status: 200,
        user_agent: Some("curl/8.0"),
    };
    assert!(store.log_api(&entry));
    assert!(store.log_api(&entry));
    assert_eq!(store.table_counts()["api_log"], 2);
}

// ═══════════════════════════════════════════════════════════
// AI caches
// ═══════════════════════════════════════════════════════════

#[test]
fn translation_round_trip_and_overwrite() {
    let (_dir, store) = test_store();
    assert!(store.get_translation(7, "post", "en").is_none());
    assert!(store.save_translation(7, "post", "EN", "Hello", "Body", "m1"));

    let t = store.get_translation(7, "post", "en").unwrap();
    assert_eq!((t.title.as_str(), t.text.as_str(), t.model.as_str()), ("Hello", "Body", "m1"));

    assert!(store.save_translation(7, "post", "en", "Hello 2", "Body 2", "m2"));
    let t = store.get_translation(7, "post", "en").unwrap();
    assert_eq!(t.title, "Hello 2");
    assert_eq!(t.model, "m2");
    assert_eq!(store.table_counts()["ai_translations"], 1);

    // Same cid as a page is a different row
    assert!(store.get_translation(7, "page", "en").is_none());
}

#[test]
fn translation_rejects_invalid_keys() {
    let (_dir, store) = test_store();
    assert!(!store.save_translation(0, "post", "en", "t", "x", "m"));
    assert!(!store.save_translation(-1, "post", "en", "t", "x", "m"));
    assert!(!store.save_translation(1, "attachment", "en", "t", "x", "m"));
    assert!(!store.save_translation(1, "post", "!!", "t", "x", "m"));
    assert!(store.get_translation(1, "post", "").is_none());
    assert_eq!(store.table_counts()["ai_translations"], 0);
}

#[test]
fn list_translations_per_content() {
    let (_dir, store) = test_store();
    assert!(store.save_translation(3, "post", "ja", "t", "x", "m"));
    assert!(store.save_translation(3, "post", "zh-CN", "t", "x", "m"));
    assert!(store.save_translation(4, "post", "ja", "t", "x", "m"));
    let langs: Vec<String> = store
        .list_translations(3, "post")
        .into_iter()
        .map(|t| t.lang)
        .collect();
    assert_eq!(langs.len(), 2);
    assert!(langs.contains(&"zh-cn".to_string()));
}

#[test]
fn summary_round_trip() {
    let (_dir, store) = test_store();
    assert!(store.save_summary(9, "page", "en", "First.", "m"));
    assert!(store.save_summary(9, "page", "en", "Second.", "m"));
    let s = store.get_summary(9, "page", "en").unwrap();
    assert_eq!(s.summary, "Second.");
    assert_eq!(store.table_counts()["ai_summaries"], 1);
}

// ═══════════════════════════════════════════════════════════
// Friend links
// ═══════════════════════════════════════════════════════════

#[test]
fn link_application_lifecycle() {
    let (_dir, store) = test_store();
    let id = store
        .apply_link(&link_form("Alice", "https://alice.example.com/"))
        .unwrap();
    let link = store.get_link(id).unwrap();
    assert_eq!(link.status, "pending");
    assert_eq!(link.url, "https://alice.example.com");
    assert_eq!(link.link_type, "friend");

    // A second application for the same site is refused while pending
    assert!(matches!(
        store.apply_link(&link_form("Alice again", "https://alice.example.com")),
        Err(StorageError::Invalid(_))
    ));
    assert!(store.list_links(Some(LinkStatus::Approved)).is_empty());

    let approved = store.set_link_status(id, LinkStatus::Approved).unwrap();
    assert_eq!(approved.status, "approved");
    assert_eq!(store.list_links(Some(LinkStatus::Approved)).len(), 1);
    assert!(store
        .apply_link(&link_form("Alice", "https://alice.example.com"))
        .is_err());

    store.set_link_status(id, LinkStatus::Rejected).unwrap();
    // Rejected applicants may apply again
    assert!(store
        .apply_link(&link_form("Alice", "https://alice.example.com"))
        .is_ok());
}

#[test]
fn link_validation() {
    let (_dir, store) = test_store();
    assert!(store.apply_link(&link_form("", "https://x.example.com")).is_err());
    assert!(store.apply_link(&link_form("X", "ftp://x.example.com")).is_err());
    assert!(store.apply_link(&link_form("X", "javascript:alert(1)")).is_err());
    let mut bad_mail = link_form("X", "https://x.example.com");
    bad_mail.email = "nope".into();
    assert!(store.apply_link(&bad_mail).is_err());
    assert_eq!(store.table_counts()["friend_links"], 0);
}

#[test]
fn link_admin_crud() {
    let (_dir, store) = test_store();
    let id = store.create_link(&link_form("Bob", "https://bob.example.com")).unwrap();
    assert_eq!(store.get_link(id).unwrap().status, "approved");

    let mut form = link_form("Bob's Blog", "https://blog.bob.example.com");
    form.sort = 5;
    store.update_link(id, &form).unwrap();
    let link = store.get_link(id).unwrap();
    assert_eq!(link.name, "Bob's Blog");
    assert_eq!(link.sort, 5);

    assert!(store.delete_link(id).unwrap());
    assert!(!store.delete_link(id).unwrap());
    assert!(store.get_link(id).is_none());
    assert!(store.set_link_status(id, LinkStatus::Approved).is_err());
}

// ═══════════════════════════════════════════════════════════
// Subscribers
// ═══════════════════════════════════════════════════════════

#[test]
fn subscribe_unsubscribe_resubscribe() {
    let (_dir, store) = test_store();
    assert!(store.subscribe("Reader@Example.com").unwrap());
    assert!(!store.subscribe("reader@example.com").unwrap());
    assert_eq!(store.count_subscribers(Some("active")), 1);

    assert!(store.unsubscribe("reader@example.com").unwrap());
    assert!(!store.unsubscribe("reader@example.com").unwrap());
    assert_eq!(store.count_subscribers(Some("active")), 0);
    assert_eq!(store.count_subscribers(None), 1);

    assert!(store.subscribe("reader@example.com").unwrap());
    let subs = store.list_subscribers(Some("active"));
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].email, "reader@example.com");
}

#[test]
fn subscribe_rejects_bad_address() {
    let (_dir, store) = test_store();
    assert!(matches!(
        store.subscribe("not an email"),
        Err(StorageError::Invalid(_))
    ));
    assert_eq!(store.count_subscribers(None), 0);
}

// ═══════════════════════════════════════════════════════════
// Export / import
// ═══════════════════════════════════════════════════════════

#[test]
fn export_then_import_restores_all_tables() {
    let (dir, store) = test_store();
    populate(&store);
    let before = store.table_counts();
    assert!(TABLES.iter().all(|t| before[t] == 1));

    let exports = dir.path().join("exports");
    let report = store.export_zip(&exports).unwrap();
    let name = report.archive.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("local-export-") && name.ends_with(".zip"));
    assert_eq!(report.meta.filename, "local.db");
    assert!(report.meta.sha256.is_some());

    // Lose the store entirely
    store.close();
    fs::remove_file(store.path()).unwrap();
    crate::store::archive::remove_wal_files(store.path());
    assert!(store.table_counts().values().all(|n| *n == 0));

    let imported = store.import_zip(&report.archive).unwrap();
    assert_eq!(imported.counts, before);
    assert!(imported.backup.is_some());
    assert_eq!(store.table_counts(), before);
    let t = store.get_translation(7, "post", "ja").unwrap();
    assert_eq!(t.title, "こんにちは");
}

#[test]
fn import_rejects_checksum_mismatch() {
    let (dir, store) = test_store();
    populate(&store);
    let before = store.table_counts();

    let archive = dir.path().join("tampered.zip");
    {
        let file = fs::File::create(&archive).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let opts = zip::write::SimpleFileOptions::default();
        zip.start_file("meta.json", opts).unwrap();
        zip.write_all(
            br#"{"version":1,"exported_at":"2024-01-01T00:00:00Z","filename":"local.db","sha256":"00"}"#,
        )
        .unwrap();
        zip.start_file("local.db", opts).unwrap();
        zip.write_all(b"definitely not sqlite").unwrap();
        zip.finish().unwrap();
    }

    assert!(matches!(
        store.import_zip(&archive),
        Err(StorageError::Invalid(_))
    ));
    assert_eq!(store.table_counts(), before);
}

#[test]
fn import_rejects_archive_without_meta() {
    let (dir, store) = test_store();
    let archive = dir.path().join("bare.zip");
    {
        let mut zip = zip::ZipWriter::new(fs::File::create(&archive).unwrap());
        zip.start_file("local.db", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"x").unwrap();
        zip.finish().unwrap();
    }
    assert!(store.import_zip(&archive).is_err());
}

// ═══════════════════════════════════════════════════════════
// Legacy migration
// ═══════════════════════════════════════════════════════════

fn legacy_tables(pool: &DbPool) {
    let conn = pool.get().unwrap();
    conn.execute_batch(
        "CREATE TABLE typecho_visit_log (
            id INTEGER PRIMARY KEY, ip TEXT, uri TEXT, cid INTEGER, ctype TEXT,
            referer TEXT, user_agent TEXT, created INTEGER, legacy_extra TEXT
         );
         CREATE TABLE typecho_ai_translations (
            id INTEGER PRIMARY KEY, cid INTEGER, ctype TEXT, lang TEXT,
            title TEXT, text TEXT, model TEXT, created INTEGER, updated INTEGER
         );",
    )
    .unwrap();
    let mut stmt = conn
        .prepare(
            "INSERT INTO typecho_visit_log (id, ip, uri, cid, ctype, referer, user_agent, created)
             VALUES (?1, '10.0.0.1', ?2, NULL, NULL, NULL, NULL, ?3)",
        )
        .unwrap();
    // More rows than one batch, with gaps in the ids
    for i in 1..=1205i64 {
        stmt.execute(rusqlite::params![i * 2, format!("/p/{}", i), 1_700_000_000 + i])
            .unwrap();
    }
    conn.execute(
        "INSERT INTO typecho_ai_translations VALUES (42, 5, 'post', 'ja', 'T', 'X', 'm', 1, 2)",
        [],
    )
    .unwrap();
}

#[test]
fn migration_copies_rows_and_keeps_ids() {
    let pool = test_pool();
    legacy_tables(&pool);
    let (_dir, store) = test_store();
    assert!(store.log_visit(&visit("1.1.1.1", "/before")));

    let report = store.migrate_legacy(&pool, "typecho_").unwrap();
    assert_eq!(report.total_rows, 1206);
    assert!(report.backup.is_some());
    let skipped: Vec<&str> = report
        .tables
        .iter()
        .filter(|t| t.skipped)
        .map(|t| t.table)
        .collect();
    assert_eq!(skipped, vec!["api_log", "friend_links", "subscribers", "ai_summaries"]);

    let counts = store.table_counts();
    // Pre-existing row (id 1) sits next to the copied even ids
    assert_eq!(counts["visit_log"], 1206);
    assert_eq!(counts["ai_translations"], 1);
    let t = store.get_translation(5, "post", "ja").unwrap();
    assert_eq!(t.title, "T");
    let newest = store.recent_visits(1);
    assert_eq!(newest[0].id, 2410);
    assert_eq!(newest[0].uri, "/p/1205");
}

#[test]
fn migration_rolls_back_on_bad_table() {
    let pool = test_pool();
    legacy_tables(&pool);
    {
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "CREATE TABLE typecho_subscribers (id TEXT, email TEXT, status TEXT, created INTEGER, updated INTEGER);
             INSERT INTO typecho_subscribers VALUES ('abc', 'x@example.com', 'active', 1, 1);",
        )
        .unwrap();
    }
    let (dir, store) = test_store();
    populate(&store);
    let before = store.table_counts();

    assert!(store.migrate_legacy(&pool, "typecho_").is_err());
    assert_eq!(store.table_counts(), before);

    // No working copy or backup left behind
    let leftovers: Vec<String> = fs::read_dir(dir.path().join("data"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.contains(".migrate-tmp") || n.contains(".bak-"))
        .collect();
    assert!(leftovers.is_empty(), "leftovers: {:?}", leftovers);
}

#[test]
fn migration_rejects_unsafe_prefix() {
    let pool = test_pool();
    let (_dir, store) = test_store();
    assert!(matches!(
        store.migrate_legacy(&pool, "x\"; DROP TABLE settings; --"),
        Err(StorageError::Invalid(_))
    ));
}

#[test]
fn swap_in_keeps_backup_of_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("local.db");
    let staged = dir.path().join("local.db.import-tmp");
    fs::write(&target, b"old").unwrap();
    fs::write(&staged, b"new").unwrap();

    let backup = swap_in(&staged, &target).unwrap().unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"new");
    assert_eq!(fs::read(&backup).unwrap(), b"old");
    assert!(!staged.exists());
}

#[test]
fn failed_swap_removes_working_copy() {
    let dir = tempfile::tempdir().unwrap();

    // Backup step fails: the target is a directory
    let target = dir.path().join("busy.db");
    fs::create_dir(&target).unwrap();
    fs::write(target.join("keep"), b"x").unwrap();
    let staged = dir.path().join("busy.db.migrate-tmp");
    fs::write(&staged, b"new").unwrap();
    assert!(swap_in(&staged, &target).is_err());
    assert!(!staged.exists());
    assert!(target.join("keep").exists());

    // Rename step fails: the target directory does not exist
    let target = dir.path().join("missing").join("local.db");
    let staged = dir.path().join("local.db.import-tmp");
    fs::write(&staged, b"new").unwrap();
    assert!(swap_in(&staged, &target).is_err());
    assert!(!staged.exists());
    assert!(!target.exists());
}

// ═══════════════════════════════════════════════════════════
// ACL
// ═══════════════════════════════════════════════════════════

#[test]
fn acl_seeded_rules() {
    let pool = test_pool();
    let acl = AclConfig::load(&pool);

    assert_eq!(acl.check("administrator", "backup.tar.gz", 50 * 1024 * 1024), UploadDecision::Allowed);
    assert_eq!(acl.check("editor", "doc.PDF", 1024), UploadDecision::Allowed);
    assert!(matches!(
        acl.check("editor", "tool.exe", 1024),
        UploadDecision::TypeNotAllowed { .. }
    ));
    assert!(matches!(
        acl.check("subscriber", "photo.png", 3 * 1024 * 1024),
        UploadDecision::TooLarge { .. }
    ));
    assert_eq!(acl.check("subscriber", "photo.png", 1024), UploadDecision::Allowed);
}

#[test]
fn acl_malformed_json_falls_back_to_default() {
    let pool = test_pool();
    Setting::set(&pool, "acl_config", "{not json").unwrap();
    let acl = AclConfig::load(&pool);
    assert_eq!(acl, AclConfig::default());
    assert_eq!(acl.check("administrator", "a.jpg", 10), UploadDecision::Allowed);
    assert!(!acl.check("administrator", "a.zip", 10).is_allowed());
}

// ═══════════════════════════════════════════════════════════
// Mail templates
// ═══════════════════════════════════════════════════════════

#[test]
fn templates_use_site_settings_and_overrides() {
    let pool = test_pool();
    Setting::set(&pool, "site_name", "Rusty Notes").unwrap();
    let mut vars = HashMap::new();
    vars.insert("title", "Ownership <explained>".to_string());
    vars.insert("author", "Ann".to_string());
    vars.insert("mail", "ann@example.com".to_string());
    vars.insert("text", "Great post".to_string());

    let (subject, body) = templates::compose(&pool, &templates::COMMENT_ADMIN, &vars);
    assert_eq!(subject, "[Rusty Notes] New comment on \"Ownership <explained>\"");
    assert!(body.contains("Ownership &lt;explained&gt;"));
    assert!(body.contains("Great post"));

    Setting::set(&pool, "mail_tpl_comment_admin_subject", "{{author}} wrote\non {{site_name}}").unwrap();
    let (subject, _) = templates::compose(&pool, &templates::COMMENT_ADMIN, &vars);
    assert_eq!(subject, "Ann wrote on Rusty Notes");
}

#[test]
fn mail_failure_is_recorded() {
    let pool = test_pool();
    let mail = crate::email::OutgoingMail {
        to: "reader@example.com".into(),
        subject: "Hello".into(),
        html: "<p>hi</p>".into(),
    };
    // mail_enabled is false by default, so nothing leaves the process
    assert!(crate::email::send_mail(&pool, &mail).is_err());
    let status = crate::email::last_status(&pool).unwrap();
    assert!(!status.ok);
    assert_eq!(status.to, "reader@example.com");
}

#[test]
fn disabled_notifications_send_nothing() {
    let pool = test_pool();
    let (_dir, store) = test_store();
    store.subscribe("reader@example.com").unwrap();
    let report = crate::notify::notify_new_post(
        &pool,
        &store,
        &crate::notify::PostEvent {
            cid: 1,
            title: "Hello".into(),
            permalink: "https://blog.example.com/hello".into(),
            excerpt: String::new(),
        },
    );
    // notify_publish defaults to off
    assert_eq!((report.sent, report.failed), (0, 0));

    Setting::set(&pool, "notify_publish", "true").unwrap();
    let report = crate::notify::notify_new_post(
        &pool,
        &store,
        &crate::notify::PostEvent {
            cid: 1,
            title: "Hello".into(),
            permalink: String::new(),
            excerpt: String::new(),
        },
    );
    // SMTP is disabled, so the attempt is counted as failed, not propagated
    assert_eq!((report.sent, report.failed), (0, 1));
}
