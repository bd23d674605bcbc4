//! Archive validation and safe extraction.
//!
//! Uploaded archives are untrusted. Every archive goes through a
//! write-free [`scan`] pass first so a hostile upload cannot exhaust
//! disk before validation completes, then [`extract`] streams entries to
//! disk while refusing anything that would escape the destination
//! directory (zip-slip).
//!
//! All functions here do blocking I/O; async callers wrap them in
//! `spawn_blocking`.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// OS housekeeping files that carry no project content.
const METADATA_PREFIXES: &[&str] = &["__MACOSX/"];
const METADATA_BASENAMES: &[&str] = &[".DS_Store", "Thumbs.db"];

/// Manifest file that marks a front-end project root.
const PROJECT_MANIFEST: &str = "package.json";

/// Ceilings applied during the scan pass.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_files: usize,
    pub max_total_bytes: u64,
}

/// Result of the write-free scan pass.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveSummary {
    pub file_count: usize,
    pub total_uncompressed_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive contains {count} files (limit {max})")]
    TooManyFiles { count: usize, max: usize },

    #[error("archive expands to {bytes} bytes (limit {max})")]
    TooLarge { bytes: u64, max: u64 },

    #[error("archive entry '{0}' escapes the extraction directory")]
    PathTraversal(String),

    #[error("archive is not a readable zip: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<ArchiveError> for CoreError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::TooManyFiles { .. }
            | ArchiveError::TooLarge { .. }
            | ArchiveError::PathTraversal(_)
            | ArchiveError::Zip(_) => CoreError::Validation(err.to_string()),
            ArchiveError::Io(e) => CoreError::Internal(format!("archive I/O: {e}")),
        }
    }
}

/// Iterate every entry without writing data, enforcing the configured
/// file-count and uncompressed-size ceilings.
pub fn scan(archive_path: &Path, limits: &ArchiveLimits) -> Result<ArchiveSummary, ArchiveError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let mut file_count = 0usize;
    let mut total_bytes = 0u64;

    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        if entry.is_dir() || is_metadata_entry(entry.name()) {
            continue;
        }
        file_count += 1;
        total_bytes = total_bytes.saturating_add(entry.size());

        if file_count > limits.max_files {
            return Err(ArchiveError::TooManyFiles {
                count: file_count,
                max: limits.max_files,
            });
        }
        if total_bytes > limits.max_total_bytes {
            return Err(ArchiveError::TooLarge {
                bytes: total_bytes,
                max: limits.max_total_bytes,
            });
        }
    }

    Ok(ArchiveSummary {
        file_count,
        total_uncompressed_bytes: total_bytes,
    })
}

/// Extract every content entry of `archive_path` under `dest`.
///
/// Entries are streamed straight to disk (`io::copy`); nothing is
/// buffered whole in memory. The byte ceiling is re-enforced against
/// the bytes actually inflated, since the sizes declared in the central
/// directory are attacker-controlled and may understate the real
/// output. Returns the number of files written.
pub fn extract(
    archive_path: &Path,
    dest: &Path,
    limits: &ArchiveLimits,
) -> Result<usize, ArchiveError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    std::fs::create_dir_all(dest)?;

    let mut written = 0usize;
    let mut total_bytes = 0u64;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if is_metadata_entry(entry.name()) {
            continue;
        }

        // enclosed_name() rejects absolute paths and any `..` escape.
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::PathTraversal(entry.name().to_string()))?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        // One byte past the remaining budget is enough to detect the
        // overrun without inflating the rest of a hostile entry.
        let budget = (limits.max_total_bytes - total_bytes).saturating_add(1);
        let copied = io::copy(&mut (&mut entry).take(budget), &mut out)?;
        total_bytes = total_bytes.saturating_add(copied);
        if total_bytes > limits.max_total_bytes {
            return Err(ArchiveError::TooLarge {
                bytes: total_bytes,
                max: limits.max_total_bytes,
            });
        }
        written += 1;
    }

    Ok(written)
}

/// Breadth-limited search for the shallowest directory containing the
/// project manifest. Ties are impossible: breadth-first order means the
/// first hit has the fewest path segments.
pub fn locate_project_root(dest: &Path, max_depth: usize) -> Option<PathBuf> {
    let mut frontier = vec![dest.to_path_buf()];

    for _ in 0..=max_depth {
        let mut next = Vec::new();
        for dir in &frontier {
            if dir.join(PROJECT_MANIFEST).is_file() {
                return Some(dir.clone());
            }
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            let mut children: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            children.sort();
            next.extend(children);
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }

    None
}

fn is_metadata_entry(name: &str) -> bool {
    if METADATA_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return true;
    }
    let basename = name.rsplit('/').next().unwrap_or(name);
    METADATA_BASENAMES.contains(&basename)
}
