// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! On-disk asset cache.
//!
//! # Layout
//!
//! ```text
//! <root>/<asset id>/
//!   <file name>      # downloaded content, exactly one
//!   timestamp        # last access, 8 bytes: little-endian i64 microseconds since epoch
//! ```
//!
//! Content is written to `<file name>.part` and renamed into place, so an
//! interrupted write never looks like a cached asset.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::types::AssetId;
use crate::error::{AssetError, AssetResult};

/// Name of the access marker inside every asset directory.
pub const MARKER_FILE: &str = "timestamp";

/// Suffix of content files still being written.
pub const PART_SUFFIX: &str = ".part";

const MARKER_LEN: usize = 8;

/// Outcome of an eviction sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Asset directories examined.
    pub scanned: usize,
    /// Directories deleted because they outlived the retention window.
    pub evicted: usize,
    /// Directories younger than the retention window.
    pub retained: usize,
    /// Directories without a readable marker, left untouched.
    pub skipped: usize,
    /// Expired directories that could not be deleted.
    pub failed: usize,
}

/// One cached asset as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Directory name (the asset id).
    pub asset_id: String,
    /// Content file, if present.
    pub file: Option<PathBuf>,
    /// Last access recorded in the marker.
    pub last_access: Option<DateTime<Utc>>,
}

/// Maps asset ids to cache directories under one root.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// A store rooted at `root`. Nothing is created until first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if needed.
    pub fn ensure_root(&self) -> AssetResult<()> {
        fs::create_dir_all(&self.root).map_err(AssetError::fs(&self.root))
    }

    /// Directory of an asset (may not exist).
    pub fn asset_dir(&self, asset_id: &AssetId) -> PathBuf {
        self.root.join(asset_id.as_str())
    }

    /// Cached content file of an asset, without touching its marker.
    pub fn content_file(&self, asset_id: &AssetId) -> Option<PathBuf> {
        find_content_file(&self.asset_dir(asset_id))
    }

    /// Cache lookup: the content file, with the access marker refreshed to `now`.
    pub fn lookup(&self, asset_id: &AssetId, now: DateTime<Utc>) -> Option<PathBuf> {
        let dir = self.asset_dir(asset_id);
        let file = find_content_file(&dir)?;

        if let Err(e) = write_marker(&dir, now) {
            warn!(asset_id = %asset_id, error = %e, "Failed to refresh access marker");
        }
        debug!(asset_id = %asset_id, path = %file.display(), "Cache hit");
        Some(file)
    }

    /// Store downloaded content as `<root>/<asset id>/<filename>`.
    ///
    /// If the directory already holds content (a concurrent download got
    /// there first) that file is kept and returned. On failure the asset
    /// directory is removed so no half-written entry remains.
    pub fn persist(
        &self,
        asset_id: &AssetId,
        filename: &str,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> AssetResult<PathBuf> {
        self.ensure_root()?;
        let dir = self.asset_dir(asset_id);

        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if let Some(existing) = find_content_file(&dir) {
                    warn!(
                        asset_id = %asset_id,
                        path = %existing.display(),
                        "Asset was already cached, keeping the existing file"
                    );
                    write_marker(&dir, now)?;
                    return Ok(existing);
                }
            }
            Err(e) => return Err(AssetError::fs(&dir)(e)),
        }

        let result = write_content(&dir, filename, bytes, now);
        if result.is_err() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!(path = %dir.display(), error = %e, "Failed to clean up asset directory");
            }
        }
        result
    }

    /// Delete every asset whose marker is at least `retention` older than `now`.
    ///
    /// Entries with a missing, unreadable or malformed marker are left alone.
    pub fn sweep_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> SweepReport {
        let mut report = SweepReport::default();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(root = %self.root.display(), error = %e, "Nothing to sweep");
                return report;
            }
        };

        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let dir = entry.path();
            report.scanned += 1;

            let Some(last_access) = read_marker(&dir) else {
                report.skipped += 1;
                continue;
            };

            if now.signed_duration_since(last_access) < retention {
                report.retained += 1;
                continue;
            }

            match fs::remove_dir_all(&dir) {
                Ok(()) => {
                    info!(path = %dir.display(), last_access = %last_access, "Evicted stale asset");
                    report.evicted += 1;
                }
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Failed to evict stale asset");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// All asset directories currently on disk, sorted by id.
    pub fn entries(&self) -> AssetResult<Vec<CacheEntry>> {
        let read = match fs::read_dir(&self.root) {
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AssetError::fs(&self.root)(e)),
        };

        let mut entries: Vec<CacheEntry> = read
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| {
                let dir = entry.path();
                CacheEntry {
                    asset_id: entry.file_name().to_string_lossy().into_owned(),
                    file: find_content_file(&dir),
                    last_access: read_marker(&dir),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
        Ok(entries)
    }
}

fn write_content(
    dir: &Path,
    filename: &str,
    bytes: &[u8],
    now: DateTime<Utc>,
) -> AssetResult<PathBuf> {
    write_marker(dir, now)?;

    let target = dir.join(filename);
    let partial = dir.join(format!("{}{}", filename, PART_SUFFIX));
    fs::write(&partial, bytes).map_err(AssetError::fs(&partial))?;
    fs::rename(&partial, &target).map_err(AssetError::fs(&target))?;
    Ok(target)
}

/// First regular file in `dir` that is neither the marker nor a partial write.
fn find_content_file(dir: &Path) -> Option<PathBuf> {
    fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .find(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name != MARKER_FILE && !name.ends_with(PART_SUFFIX)
        })
        .map(|entry| entry.path())
}

/// Write the access marker of the asset directory `dir`.
pub fn write_marker(dir: &Path, at: DateTime<Utc>) -> AssetResult<()> {
    let path = dir.join(MARKER_FILE);
    fs::write(&path, encode_marker(at)).map_err(AssetError::fs(&path))
}

/// Read the access marker of `dir`; `None` when absent or malformed.
pub fn read_marker(dir: &Path) -> Option<DateTime<Utc>> {
    let bytes = fs::read(dir.join(MARKER_FILE)).ok()?;
    decode_marker(&bytes)
}

fn encode_marker(at: DateTime<Utc>) -> [u8; MARKER_LEN] {
    at.timestamp_micros().to_le_bytes()
}

fn decode_marker(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let raw: [u8; MARKER_LEN] = bytes.try_into().ok()?;
    DateTime::from_timestamp_micros(i64::from_le_bytes(raw))
}
