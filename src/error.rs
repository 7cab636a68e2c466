// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for assetcache.
//!
//! None of these cross the download API: a failed request resolves its
//! handle to an invalid [`AssetFile`](crate::AssetFile). They exist so that the
//! stages can propagate with `?` and log a precise reason.

use std::path::PathBuf;

use thiserror::Error;

use crate::net::DispatchError;

/// Errors raised while serving an asset request.
#[derive(Debug, Error)]
pub enum AssetError {
    /// The identifier cannot be used as a cache directory name.
    #[error("invalid asset id {id:?}: {reason}")]
    InvalidAssetId { id: String, reason: &'static str },

    /// The outbound call could not even be started.
    #[error("could not dispatch request for asset {asset_id}: {source}")]
    Dispatch {
        asset_id: String,
        #[source]
        source: DispatchError,
    },

    /// The outbound call completed but reported failure.
    #[error("request for asset {asset_id} failed: {message}")]
    Transport { asset_id: String, message: String },

    /// A successful metadata response lacked a usable field.
    #[error("metadata for asset {asset_id} has no usable {field}")]
    Parse { asset_id: String, field: &'static str },

    /// Directory or file creation failed.
    #[error("filesystem operation failed on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manager has been shut down.
    #[error("asset manager is shut down")]
    ShutDown,
}

/// Result alias used throughout the crate.
pub type AssetResult<T> = Result<T, AssetError>;

impl AssetError {
    /// Build a closure mapping an I/O error on `path` to [`AssetError::Filesystem`].
    pub(crate) fn fs(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| AssetError::Filesystem { path, source }
    }
}

/// Formats an error message with title, causes and fixes for terminal output.
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = format!("[✗] {}\n", title);

    if !causes.is_empty() {
        output.push_str("\nPossible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
    }

    if !fixes.is_empty() {
        output.push_str("\nTry these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
    }

    output
}
