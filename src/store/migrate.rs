//! One-time copy of the legacy side tables from the host database into the
//! local store file. Rows keep their original ids.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Transaction};
use serde::Serialize;

use super::archive::{discard, sibling, swap_in};
use super::{ensure_schema, LocalStorage, StorageError, TABLES};

pub const MIGRATION_BATCH: i64 = 1000;

/// Read access to legacy tables in the host's primary database.
pub trait LegacySource {
    /// Column names of `table`; empty when the table does not exist.
    fn columns(&self, table: &str) -> Result<Vec<String>, StorageError>;

    /// Up to `limit` rows with `id > after_id`, ordered by id, projected onto `columns`.
    fn fetch_batch(
        &self,
        table: &str,
        columns: &[&str],
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<Vec<Value>>, StorageError>;
}

impl LegacySource for crate::db::DbPool {
    fn columns(&self, table: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.get()?;
        table_columns(&conn, table)
    }

    fn fetch_batch(
        &self,
        table: &str,
        columns: &[&str],
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<Vec<Value>>, StorageError> {
        let conn = self.get()?;
        let sql = format!(
            "SELECT {} FROM \"{}\" WHERE id > ?1 ORDER BY id LIMIT ?2",
            quoted(columns),
            table
        );
        let mut stmt = conn.prepare(&sql)?;
        let width = columns.len();
        let rows = stmt.query_map(params![after_id, limit], |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<Value>>>()
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[derive(Debug, Serialize)]
pub struct TableReport {
    pub table: &'static str,
    pub source: String,
    pub rows: i64,
    pub skipped: bool,
}

#[derive(Debug, Serialize)]
pub struct MigrationReport {
    pub tables: Vec<TableReport>,
    pub total_rows: i64,
    pub backup: Option<PathBuf>,
}

fn quoted(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(cols)
}

fn valid_prefix(prefix: &str) -> bool {
    prefix.len() <= 32 && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl LocalStorage {
    /// Copy `<prefix><table>` for every local table from `source` into a
    /// working copy of the store, then swap it in. The previous file is kept
    /// as `<file>.bak-<timestamp>`. On failure the store file is untouched and
    /// the working copy is deleted.
    pub fn migrate_legacy(
        &self,
        source: &dyn LegacySource,
        prefix: &str,
    ) -> Result<MigrationReport, StorageError> {
        if !valid_prefix(prefix) {
            return Err(StorageError::Invalid(format!(
                "Invalid table prefix {:?}",
                prefix
            )));
        }
        let target = self.path().to_path_buf();
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let work = sibling(&target, ".migrate-tmp");
        discard(&work);

        self.checkpoint_if_open();
        if target.exists() {
            if let Err(e) = fs::copy(&target, &work) {
                discard(&work);
                return Err(e.into());
            }
        }

        let tables = match copy_into(&work, source, prefix) {
            Ok(tables) => tables,
            Err(e) => {
                log::warn!("[store] legacy migration aborted: {}", e);
                discard(&work);
                return Err(e);
            }
        };

        self.close();
        let backup = swap_in(&work, &target)?;

        let total_rows: i64 = tables.iter().map(|t| t.rows).sum();
        log::info!(
            "[store] migrated {} legacy row(s) into {}",
            total_rows,
            target.display()
        );
        Ok(MigrationReport {
            tables,
            total_rows,
            backup,
        })
    }
}

fn copy_into(
    work: &Path,
    source: &dyn LegacySource,
    prefix: &str,
) -> Result<Vec<TableReport>, StorageError> {
    let mut conn = Connection::open(work)?;
    ensure_schema(&conn)?;
    let tx = conn.transaction()?;
    match copy_tables(&tx, source, prefix) {
        Ok(reports) => {
            tx.commit()?;
            Ok(reports)
        }
        Err(e) => {
            tx.rollback()?;
            Err(e)
        }
    }
}

fn copy_tables(
    tx: &Transaction,
    source: &dyn LegacySource,
    prefix: &str,
) -> Result<Vec<TableReport>, StorageError> {
    let mut reports = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let legacy = format!("{}{}", prefix, table);
        let src_cols = source.columns(&legacy)?;
        if src_cols.is_empty() {
            reports.push(TableReport {
                table,
                source: legacy,
                rows: 0,
                skipped: true,
            });
            continue;
        }

        let dest_cols = table_columns(tx, table)?;
        let cols: Vec<&str> = dest_cols
            .iter()
            .filter(|c| src_cols.contains(*c))
            .map(String::as_str)
            .collect();
        let id_idx = cols
            .iter()
            .position(|c| *c == "id")
            .ok_or_else(|| StorageError::Invalid(format!("{} has no id column", legacy)))?;

        let placeholders = vec!["?"; cols.len()].join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            table,
            quoted(&cols),
            placeholders
        );

        let mut after = 0i64;
        let mut rows = 0i64;
        loop {
            let batch = source.fetch_batch(&legacy, &cols, after, MIGRATION_BATCH)?;
            if batch.is_empty() {
                break;
            }
            let mut stmt = tx.prepare_cached(&sql)?;
            for row in &batch {
                stmt.execute(params_from_iter(row.iter()))?;
            }
            after = match batch.last().map(|r| &r[id_idx]) {
                Some(Value::Integer(id)) => *id,
                _ => {
                    return Err(StorageError::Invalid(format!(
                        "{} has a non-integer id",
                        legacy
                    )))
                }
            };
            rows += batch.len() as i64;
            if (batch.len() as i64) < MIGRATION_BATCH {
                break;
            }
        }
        log::info!("[store] {} -> {}: {} row(s)", legacy, table, rows);
        reports.push(TableReport {
            table,
            source: legacy,
            rows,
            skipped: false,
        });
    }
    Ok(reports)
}
