use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{count_tables, ensure_schema, LocalStorage, StorageError};

pub const ARCHIVE_VERSION: u32 = 1;
pub const META_NAME: &str = "meta.json";

/// `meta.json` stored next to the database file inside an export archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub version: u32,
    pub exported_at: String,
    pub filename: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExportReport {
    pub archive: PathBuf,
    pub bytes: u64,
    pub meta: ArchiveMeta,
}

#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub restored: String,
    pub backup: Option<PathBuf>,
    pub counts: BTreeMap<&'static str, i64>,
}

/// `<file><suffix>` in the same directory, e.g. `local.db.bak-20260101_120000`.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn backup_path(path: &Path) -> PathBuf {
    sibling(
        path,
        &format!(".bak-{}", Utc::now().format("%Y%m%d_%H%M%S")),
    )
}

/// Remove WAL side files left by a previous database at `path`.
pub(crate) fn remove_wal_files(path: &Path) {
    for suffix in ["-wal", "-shm"] {
        let side = sibling(path, suffix);
        if side.exists() {
            if let Err(e) = fs::remove_file(&side) {
                log::warn!("[store] cannot remove {}: {}", side.display(), e);
            }
        }
    }
}

/// Delete a working file and its WAL side files.
pub(crate) fn discard(work: &Path) {
    if work.exists() {
        if let Err(e) = fs::remove_file(work) {
            log::warn!("[store] cannot remove {}: {}", work.display(), e);
        }
    }
    remove_wal_files(work);
}

/// Replace `target` with `staged`, keeping a timestamped backup of the old
/// file. The pool must already be closed. On failure `staged` is removed and
/// `target` is left as it was.
pub(crate) fn swap_in(staged: &Path, target: &Path) -> Result<Option<PathBuf>, StorageError> {
    let result = (|| -> Result<Option<PathBuf>, StorageError> {
        let backup = if target.exists() {
            let backup = backup_path(target);
            fs::copy(target, &backup)?;
            Some(backup)
        } else {
            None
        };
        remove_wal_files(staged);
        fs::rename(staged, target)?;
        remove_wal_files(target);
        Ok(backup)
    })();
    if let Err(e) = &result {
        log::warn!("[store] cannot swap {} into place: {}", staged.display(), e);
        discard(staged);
    }
    result
}

fn sha256_file(path: &Path) -> Result<String, StorageError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Open a candidate database file and make sure SQLite accepts it.
fn verify_database(path: &Path) -> Result<(), StorageError> {
    let conn = Connection::open(path)?;
    let status: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if status != "ok" {
        return Err(StorageError::Invalid(format!(
            "Archive database failed integrity check: {}",
            status
        )));
    }
    // Archives from older versions may predate some tables
    ensure_schema(&conn)?;
    Ok(())
}

impl LocalStorage {
    /// Flush the WAL into the main file, but only if the store is already open.
    pub(crate) fn checkpoint_if_open(&self) {
        let pool = self
            .pool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(pool) = pool {
            if let Ok(conn) = pool.get() {
                if let Err(e) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
                    log::warn!("[store] checkpoint failed: {}", e);
                }
            }
        }
    }

    fn file_name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "local.db".to_string())
    }

    /// Write `local-export-<timestamp>.zip` into `dest_dir`.
    pub fn export_zip(&self, dest_dir: &Path) -> Result<ExportReport, StorageError> {
        fs::create_dir_all(dest_dir)?;
        let stamp = Utc::now();
        let filename = self.file_name();
        let snapshot = dest_dir.join(format!(".{}.snapshot", filename));
        if snapshot.exists() {
            fs::remove_file(&snapshot)?;
        }

        // VACUUM INTO gives a consistent single-file copy even with a live WAL
        {
            let conn = self.conn()?;
            let target = snapshot.to_string_lossy().into_owned();
            conn.execute("VACUUM INTO ?1", rusqlite::params![target])?;
        }

        let result = (|| -> Result<ExportReport, StorageError> {
            let meta = ArchiveMeta {
                version: ARCHIVE_VERSION,
                exported_at: stamp.to_rfc3339(),
                filename: filename.clone(),
                sha256: Some(sha256_file(&snapshot)?),
            };
            let archive = dest_dir.join(format!(
                "local-export-{}.zip",
                stamp.format("%Y%m%d_%H%M%S")
            ));
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            let mut zip = ZipWriter::new(File::create(&archive)?);
            zip.start_file(filename.as_str(), options)?;
            io::copy(&mut File::open(&snapshot)?, &mut zip)?;
            zip.start_file(META_NAME, options)?;
            let meta_json = serde_json::to_vec_pretty(&meta)
                .map_err(|e| StorageError::Invalid(e.to_string()))?;
            zip.write_all(&meta_json)?;
            zip.finish()?;

            let bytes = fs::metadata(&archive)?.len();
            Ok(ExportReport {
                archive,
                bytes,
                meta,
            })
        })();

        let _ = fs::remove_file(&snapshot);
        if let Ok(report) = &result {
            log::info!(
                "[store] exported local store to {} ({} bytes)",
                report.archive.display(),
                report.bytes
            );
        }
        result
    }

    /// Replace the store with the database inside an export archive.
    /// The current file is kept as `<file>.bak-<timestamp>`.
    pub fn import_zip(&self, archive: &Path) -> Result<ImportReport, StorageError> {
        let mut zip = ZipArchive::new(File::open(archive)?)?;

        let meta: ArchiveMeta = {
            let mut entry = zip
                .by_name(META_NAME)
                .map_err(|_| StorageError::Invalid("Archive has no meta.json".into()))?;
            let mut raw = String::new();
            entry.read_to_string(&mut raw)?;
            serde_json::from_str(&raw)
                .map_err(|e| StorageError::Invalid(format!("Invalid meta.json: {}", e)))?
        };
        if meta.version == 0 || meta.version > ARCHIVE_VERSION {
            return Err(StorageError::Invalid(format!(
                "Unsupported archive version {}",
                meta.version
            )));
        }
        let inner_ok = Path::new(&meta.filename)
            .file_name()
            .map(|n| n.to_string_lossy() == meta.filename.as_str())
            .unwrap_or(false);
        if !inner_ok {
            return Err(StorageError::Invalid("Archive names an invalid database file".into()));
        }

        let target = self.path().to_path_buf();
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let staged = sibling(&target, ".import-tmp");
        {
            let mut entry = zip.by_name(&meta.filename).map_err(|_| {
                StorageError::Invalid(format!("Archive is missing {}", meta.filename))
            })?;
            let mut out = File::create(&staged)?;
            io::copy(&mut entry, &mut out)?;
            out.sync_all()?;
        }

        let checked = (|| -> Result<(), StorageError> {
            if let Some(expected) = &meta.sha256 {
                let actual = sha256_file(&staged)?;
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(StorageError::Invalid("Archive checksum mismatch".into()));
                }
            }
            verify_database(&staged)
        })();
        if let Err(e) = checked {
            discard(&staged);
            return Err(e);
        }

        self.checkpoint_if_open();
        self.close();

        let backup = swap_in(&staged, &target)?;

        let counts = {
            let conn = self.conn()?;
            count_tables(&conn)
        };
        log::info!(
            "[store] imported {} (exported {}), backup: {:?}",
            meta.filename,
            meta.exported_at,
            backup
        );
        Ok(ImportReport {
            restored: meta.exported_at,
            backup,
            counts,
        })
    }
}
