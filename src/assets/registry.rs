// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Registries of in-flight operations and the callers waiting on them.
//!
//! Both registries and the waiter map live behind the manager's single mutex.
//! An operation is owned by its registry until the worker takes it out to
//! process its response; waiters are keyed by asset id so that concurrent
//! requests for the same asset share one pipeline.

use std::collections::HashMap;

use tokio::sync::oneshot;

use super::types::{AssetFile, AssetId};
use crate::net::{FetchResponse, MetadataResponse, PendingResponse, Polled};

/// An outbound call that has been dispatched but not yet drained.
#[derive(Debug)]
pub(crate) struct PendingOperation<R> {
    pub asset_id: AssetId,
    /// File name to use when the response does not advertise one.
    pub filename_hint: String,
    /// Content URL, for download operations.
    pub url: Option<String>,
    pub response: PendingResponse<R>,
}

pub(crate) type MetadataOperation = PendingOperation<MetadataResponse>;
pub(crate) type DownloadOperation = PendingOperation<FetchResponse>;

#[derive(Debug, Default)]
pub(crate) struct Registries {
    metadata: Vec<MetadataOperation>,
    downloads: Vec<DownloadOperation>,
    waiters: HashMap<AssetId, Vec<oneshot::Sender<AssetFile>>>,
}

impl Registries {
    /// Wait on an asset already in flight, if any.
    pub fn join(&mut self, asset_id: &AssetId) -> Option<oneshot::Receiver<AssetFile>> {
        let waiters = self.waiters.get_mut(asset_id)?;
        let (sender, receiver) = oneshot::channel();
        waiters.push(sender);
        Some(receiver)
    }

    /// Mark an asset as in flight, returning the first waiter.
    pub fn begin(&mut self, asset_id: &AssetId) -> oneshot::Receiver<AssetFile> {
        let (sender, receiver) = oneshot::channel();
        self.waiters.entry(asset_id.clone()).or_default().push(sender);
        receiver
    }

    pub fn push_metadata(&mut self, operation: MetadataOperation) {
        self.metadata.push(operation);
    }

    pub fn push_download(&mut self, operation: DownloadOperation) {
        self.downloads.push(operation);
    }

    /// Remove the newest metadata operation whose response is available.
    ///
    /// The response is `None` when its producer vanished without answering.
    pub fn take_ready_metadata(&mut self) -> Option<(MetadataOperation, Option<MetadataResponse>)> {
        take_ready(&mut self.metadata)
    }

    /// Remove the newest download operation whose response is available.
    pub fn take_ready_download(&mut self) -> Option<(DownloadOperation, Option<FetchResponse>)> {
        take_ready(&mut self.downloads)
    }

    /// Resolve every waiter of `asset_id` with `file`; the asset is no longer in flight.
    ///
    /// Returns how many waiters were still listening.
    pub fn fulfil(&mut self, asset_id: &AssetId, file: &AssetFile) -> usize {
        self.waiters
            .remove(asset_id)
            .unwrap_or_default()
            .into_iter()
            .map(|sender| sender.send(file.clone()))
            .filter(Result::is_ok)
            .count()
    }

    /// Drop all operations and resolve every waiter as invalid.
    pub fn abandon_all(&mut self) -> usize {
        self.metadata.clear();
        self.downloads.clear();
        let ids: Vec<AssetId> = self.waiters.keys().cloned().collect();
        ids.iter()
            .map(|id| self.fulfil(id, &AssetFile::invalid()))
            .sum()
    }

    /// Number of (metadata, download) operations in flight.
    pub fn counts(&self) -> (usize, usize) {
        (self.metadata.len(), self.downloads.len())
    }
}

fn take_ready<R>(
    operations: &mut Vec<PendingOperation<R>>,
) -> Option<(PendingOperation<R>, Option<R>)> {
    for index in (0..operations.len()).rev() {
        let response = match operations[index].response.poll() {
            Polled::Pending => continue,
            Polled::Ready(response) => Some(response),
            Polled::Lost => None,
        };
        return Some((operations.remove(index), response));
    }
    None
}
