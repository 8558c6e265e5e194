//! Deploys the static admin bundle into the public directory and repairs
//! it when files go missing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub const MANIFEST_NAME: &str = ".sidedesk-manifest";

#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

/// Relative paths of every regular file below `root`, sorted.
pub fn list_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    collect(root, Path::new(""), &mut out)?;
    out.sort();
    Ok(out)
}

fn collect(root: &Path, rel: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(root.join(rel))? {
        let entry = entry?;
        let name = entry.file_name();
        if name == MANIFEST_NAME {
            continue;
        }
        let rel_path = rel.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect(root, &rel_path, out)?;
        } else if file_type.is_file() {
            out.push(rel_path);
        }
    }
    Ok(())
}

fn copy_one(src: &Path, dest: &Path, rel: &Path) -> io::Result<u64> {
    let target = dest.join(rel);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src.join(rel), &target)
}

/// Copy the whole bundle and record what was deployed.
pub fn deploy_bundle(src: &Path, dest: &Path) -> io::Result<DeployReport> {
    if !src.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("admin bundle not found at {}", src.display()),
        ));
    }
    fs::create_dir_all(dest)?;
    let files = list_files(src)?;
    let mut bytes = 0;
    for rel in &files {
        bytes += copy_one(src, dest, rel)?;
    }

    let manifest = files
        .iter()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(dest.join(MANIFEST_NAME), manifest)?;

    log::info!(
        "[deploy] {} file(s), {} bytes → {}",
        files.len(),
        bytes,
        dest.display()
    );
    Ok(DeployReport {
        source: src.to_path_buf(),
        destination: dest.to_path_buf(),
        files: files.len(),
        bytes,
    })
}

/// Restore bundle files that disappeared from `dest`. Existing files are
/// left alone. Returns the restored relative paths.
pub fn self_heal(src: &Path, dest: &Path) -> io::Result<Vec<PathBuf>> {
    if !src.is_dir() {
        return Ok(Vec::new());
    }
    let mut restored = Vec::new();
    for rel in list_files(src)? {
        if dest.join(&rel).exists() {
            continue;
        }
        copy_one(src, dest, &rel)?;
        restored.push(rel);
    }
    if !restored.is_empty() {
        log::warn!(
            "[deploy] restored {} missing bundle file(s) in {}",
            restored.len(),
            dest.display()
        );
    }
    Ok(restored)
}
