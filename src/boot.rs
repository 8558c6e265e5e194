use log::{error, info, warn};
use std::fs;
use std::path::Path;
use std::process;

use crate::config::AppPaths;
use crate::deploy;

fn ensure_dir(dir: &Path, errors: &mut u32) {
    if dir.as_os_str().is_empty() || dir.exists() {
        return;
    }
    match fs::create_dir_all(dir) {
        Ok(_) => info!("  Created directory: {}", dir.display()),
        Err(e) => {
            error!("  FAILED to create directory {}: {}", dir.display(), e);
            *errors += 1;
        }
    }
}

fn writable(dir: &Path) -> Result<(), std::io::Error> {
    let test_file = dir.join(".write_test");
    fs::write(&test_file, "test")?;
    let _ = fs::remove_file(&test_file);
    Ok(())
}

/// Run all boot checks. Call this before Rocket launches.
/// Creates missing directories, repairs the deployed admin bundle and
/// aborts if the data directories are unusable.
pub fn run(paths: &AppPaths) {
    info!("sidedesk boot check starting...");

    let mut warnings = 0u32;
    let mut errors = 0u32;

    // ── 1. Directories ─────────────────────────────────
    let db_dirs = [
        paths.primary_db.parent(),
        paths.local_db.parent(),
    ];
    for dir in db_dirs.into_iter().flatten() {
        ensure_dir(dir, &mut errors);
    }
    ensure_dir(&paths.export_dir, &mut errors);

    // ── 2. Data directories writable ───────────────────
    if let Some(dir) = paths.local_db.parent().filter(|d| d.exists()) {
        if let Err(e) = writable(dir) {
            error!("  Local store directory not writable: {}", e);
            errors += 1;
        }
    }
    if paths.export_dir.exists() {
        if let Err(e) = writable(&paths.export_dir) {
            warn!("  Export directory not writable: {} (exports will fail)", e);
            warnings += 1;
        }
    }

    // ── 3. Admin bundle ────────────────────────────────
    if !paths.bundle_src.is_dir() {
        warn!(
            "  Admin bundle not found at {} (admin UI unavailable)",
            paths.bundle_src.display()
        );
        warnings += 1;
    } else if !paths.bundle_dest.exists() {
        match deploy::deploy_bundle(&paths.bundle_src, &paths.bundle_dest) {
            Ok(report) => info!("  Deployed admin bundle ({} files)", report.files),
            Err(e) => {
                warn!("  Admin bundle deploy failed: {}", e);
                warnings += 1;
            }
        }
    } else {
        match deploy::self_heal(&paths.bundle_src, &paths.bundle_dest) {
            Ok(restored) if !restored.is_empty() => {
                info!("  Restored {} missing admin file(s)", restored.len())
            }
            Ok(_) => {}
            Err(e) => {
                warn!("  Admin bundle self-heal failed: {}", e);
                warnings += 1;
            }
        }
    }

    // ── 4. Rocket.toml exists ───────────────────────────
    if !Path::new("Rocket.toml").exists() {
        warn!("  Rocket.toml not found, using default config");
        warnings += 1;
    }

    // ── Summary ─────────────────────────────────────────
    if errors > 0 {
        error!(
            "Boot check FAILED: {} error(s), {} warning(s). Aborting.",
            errors, warnings
        );
        process::exit(1);
    }

    if warnings > 0 {
        warn!(
            "Boot check passed with {} warning(s). Some features may not work correctly.",
            warnings
        );
    } else {
        info!("Boot check passed. All systems go.");
    }
}
