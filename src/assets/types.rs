// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Asset identifiers, resolved files and caller-facing result handles.

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::error::AssetError;

/// Polling interval used by [`AssetHandle::wait_timeout`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Opaque identifier of a downloadable asset.
///
/// The identifier doubles as the name of the asset's cache directory, so it is
/// validated as a single, safe path component on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(String);

impl AssetId {
    /// Longest accepted identifier, in bytes (a common file name limit).
    pub const MAX_LEN: usize = 255;

    /// Trim and validate a raw identifier.
    pub fn new(raw: &str) -> Result<Self, AssetError> {
        let id = raw.trim();
        let reject = |reason: &'static str| AssetError::InvalidAssetId {
            id: id.to_string(),
            reason,
        };

        if id.is_empty() {
            return Err(reject("identifier is empty"));
        }
        if id.len() > Self::MAX_LEN {
            return Err(reject("identifier is too long"));
        }
        if id == "." || id == ".." {
            return Err(reject("identifier is a relative path segment"));
        }
        if id.contains(|c: char| matches!(c, '/' | '\\' | '\0')) {
            return Err(reject("identifier contains a path separator"));
        }

        Ok(Self(id.to_string()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AssetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Outcome of a download: a file on disk, or nothing.
///
/// Every failure (dispatch, transport, parse, filesystem) surfaces to callers
/// as an invalid file; the reason is logged where it happens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetFile {
    path: Option<PathBuf>,
}

impl AssetFile {
    /// A valid file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// The invalid file.
    pub fn invalid() -> Self {
        Self { path: None }
    }

    pub fn is_valid(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn into_path(self) -> Option<PathBuf> {
        self.path
    }
}

enum HandleState {
    Waiting(oneshot::Receiver<AssetFile>),
    Done(AssetFile),
}

/// Handle to the eventual result of a download request.
///
/// Requests never block the caller; a consumer decides whether to poll
/// ([`try_get`](Self::try_get)), block ([`wait`](Self::wait)), or await
/// ([`resolve`](Self::resolve)). Dropping the handle does not cancel the
/// underlying download.
pub struct AssetHandle {
    asset_id: String,
    state: HandleState,
}

impl AssetHandle {
    /// A handle that is already resolved.
    pub(crate) fn ready(asset_id: impl Into<String>, file: AssetFile) -> Self {
        Self {
            asset_id: asset_id.into(),
            state: HandleState::Done(file),
        }
    }

    /// A handle resolved later by the background worker.
    pub(crate) fn pending(
        asset_id: impl Into<String>,
        receiver: oneshot::Receiver<AssetFile>,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            state: HandleState::Waiting(receiver),
        }
    }

    /// The (trimmed) identifier this handle was requested for.
    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    /// Check without blocking whether the result is available.
    pub fn is_ready(&mut self) -> bool {
        self.poll().is_some()
    }

    /// Get the result without blocking, if available.
    pub fn try_get(&mut self) -> Option<AssetFile> {
        self.poll().cloned()
    }

    /// Block the current thread until the result is available.
    ///
    /// Must not be called from within an async runtime; use
    /// [`resolve`](Self::resolve) there instead.
    pub fn wait(self) -> AssetFile {
        match self.state {
            HandleState::Done(file) => file,
            HandleState::Waiting(receiver) => receiver.blocking_recv().unwrap_or_default(),
        }
    }

    /// Block for at most `timeout`, returning `None` if the result is still pending.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<AssetFile> {
        let start = Instant::now();

        loop {
            if let Some(file) = self.poll() {
                return Some(file.clone());
            }
            if start.elapsed() >= timeout {
                return None;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Await the result.
    pub async fn resolve(self) -> AssetFile {
        match self.state {
            HandleState::Done(file) => file,
            HandleState::Waiting(receiver) => receiver.await.unwrap_or_default(),
        }
    }

    fn poll(&mut self) -> Option<&AssetFile> {
        if let HandleState::Waiting(receiver) = &mut self.state {
            let file = match receiver.try_recv() {
                Ok(file) => file,
                Err(TryRecvError::Empty) => return None,
                // The producer went away without answering.
                Err(TryRecvError::Closed) => AssetFile::invalid(),
            };
            self.state = HandleState::Done(file);
        }

        match &self.state {
            HandleState::Done(file) => Some(file),
            HandleState::Waiting(_) => None,
        }
    }
}

impl fmt::Debug for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            HandleState::Waiting(_) => "pending",
            HandleState::Done(file) if file.is_valid() => "ready",
            HandleState::Done(_) => "invalid",
        };
        f.debug_struct("AssetHandle")
            .field("asset_id", &self.asset_id)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_id_trims_whitespace() {
        let id = AssetId::new("  1234567890 \n").unwrap();
        assert_eq!(id.as_str(), "1234567890");
    }

    #[test]
    fn test_asset_id_rejects_unsafe_components() {
        for raw in ["", "   ", ".", "..", "../etc", "a/b", "a\\b", "nul\0byte"] {
            assert!(AssetId::new(raw).is_err(), "{raw:?} should be rejected");
        }
        assert!(AssetId::new(&"x".repeat(AssetId::MAX_LEN + 1)).is_err());
        assert!(AssetId::new("..hidden").is_ok());
    }

    #[test]
    fn test_ready_handle() {
        let mut handle = AssetHandle::ready("42", AssetFile::new("/tmp/42/file.bin"));
        assert!(handle.is_ready());
        assert_eq!(handle.try_get().unwrap().path(), Some(Path::new("/tmp/42/file.bin")));
        assert!(handle.wait().is_valid());
    }

    #[test]
    fn test_pending_handle_resolves_once_sent() {
        let (tx, rx) = oneshot::channel();
        let mut handle = AssetHandle::pending("42", rx);
        assert!(!handle.is_ready());
        assert!(handle.wait_timeout(Duration::from_millis(20)).is_none());

        tx.send(AssetFile::new("/cache/42/a.glb")).unwrap();
        let file = handle.wait_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(file.path(), Some(Path::new("/cache/42/a.glb")));
        // Resolved results stay available.
        assert!(handle.is_ready());
    }

    #[test]
    fn test_dropped_sender_resolves_invalid() {
        let (tx, rx) = oneshot::channel::<AssetFile>();
        let mut handle = AssetHandle::pending("42", rx);
        drop(tx);
        assert!(handle.is_ready());
        assert!(!handle.wait().is_valid());
    }

    #[tokio::test]
    async fn test_resolve_awaits_result() {
        let (tx, rx) = oneshot::channel();
        let handle = AssetHandle::pending("7", rx);
        tokio::spawn(async move {
            let _ = tx.send(AssetFile::new("/cache/7/x"));
        });
        assert!(handle.resolve().await.is_valid());
    }
}
