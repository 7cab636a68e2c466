// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Asset manager and its background worker.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use super::pipeline;
use super::registry::{DownloadOperation, MetadataOperation, PendingOperation, Registries};
use super::store::{CacheStore, SweepReport};
use super::types::{AssetFile, AssetHandle, AssetId};
use crate::clock::{Clock, SystemClock};
use crate::config::AssetConfig;
use crate::error::{AssetError, AssetResult};
use crate::net::{
    DispatchError, FetchResponse, FetchService, HttpTransport, MetadataResponse, MetadataService,
};
use crate::sync::resilient_lock;

/// Name of the background worker thread.
const WORKER_THREAD_NAME: &str = "assetcache-worker";

/// Downloads assets once and serves them from the disk cache afterwards.
///
/// Requests return immediately with an [`AssetHandle`]. A cache hit is
/// resolved on the spot; a miss is dispatched to the network collaborators and
/// completed by a single background thread, started with the first miss and
/// stopped by [`shutdown`](Self::shutdown) or drop.
pub struct AssetManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// State shared between callers and the worker thread.
struct Shared {
    config: AssetConfig,
    store: CacheStore,
    metadata: Arc<dyn MetadataService>,
    fetch: Arc<dyn FetchService>,
    clock: Arc<dyn Clock>,
    registries: Mutex<Registries>,
    stopped: AtomicBool,
}

impl AssetManager {
    /// Create a manager with the given collaborators and the system clock.
    pub fn new(
        config: AssetConfig,
        metadata: Arc<dyn MetadataService>,
        fetch: Arc<dyn FetchService>,
    ) -> Self {
        Self::with_clock(config, metadata, fetch, Arc::new(SystemClock))
    }

    /// Create a manager with an explicit clock.
    pub fn with_clock(
        config: AssetConfig,
        metadata: Arc<dyn MetadataService>,
        fetch: Arc<dyn FetchService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = CacheStore::new(config.resolve_root());
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                metadata,
                fetch,
                clock,
                registries: Mutex::new(Registries::default()),
                stopped: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Create a manager talking HTTP for both stages.
    pub fn from_config(config: AssetConfig) -> Result<Self, DispatchError> {
        let transport = Arc::new(HttpTransport::from_config(&config)?);
        Ok(Self::new(config, transport.clone(), transport))
    }

    /// Request an asset by id, resolving its location through the metadata service.
    pub fn download_asset(&self, asset_id: &str) -> AssetHandle {
        self.request(asset_id, None)
    }

    /// Request an asset whose content URL is already known.
    ///
    /// The metadata service is never consulted; the asset id doubles as the
    /// file name unless the server advertises one.
    pub fn download_asset_from_url(&self, asset_id: &str, url: &str) -> AssetHandle {
        self.request(asset_id, Some(url))
    }

    /// Run an eviction sweep now, on the calling thread.
    pub fn sweep_now(&self) -> SweepReport {
        self.shared.sweep()
    }

    /// Number of (metadata, download) operations in flight.
    pub fn pending_operations(&self) -> (usize, usize) {
        resilient_lock(&self.shared.registries).counts()
    }

    pub fn is_worker_running(&self) -> bool {
        resilient_lock(&self.worker).is_some()
    }

    pub fn store(&self) -> &CacheStore {
        &self.shared.store
    }

    pub fn config(&self) -> &AssetConfig {
        &self.shared.config
    }

    /// Stop the worker and resolve all outstanding handles as invalid.
    ///
    /// Cache hits keep working afterwards; misses resolve invalid at once.
    pub fn shutdown(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(worker) = resilient_lock(&self.worker).take() {
            if worker.join().is_err() {
                error!("Asset worker thread panicked");
            }
        }

        let abandoned = resilient_lock(&self.shared.registries).abandon_all();
        if abandoned > 0 {
            warn!(abandoned, "Shut down with requests still in flight");
        }
        info!("Asset manager shut down");
    }

    fn request(&self, raw_id: &str, url: Option<&str>) -> AssetHandle {
        let asset_id = match AssetId::new(raw_id) {
            Ok(asset_id) => asset_id,
            Err(e) => {
                warn!(error = %e, "Rejected asset request");
                return AssetHandle::ready(raw_id.trim(), AssetFile::invalid());
            }
        };

        if let Err(e) = self.shared.store.ensure_root() {
            error!(asset_id = %asset_id, error = %e, "Cache root unavailable");
            return AssetHandle::ready(asset_id.as_str(), AssetFile::invalid());
        }

        // Join, hit, or claim under the lock so that one asset never runs
        // through the pipeline twice at the same time.
        let receiver = {
            let mut registries = resilient_lock(&self.shared.registries);

            if let Some(receiver) = registries.join(&asset_id) {
                debug!(asset_id = %asset_id, "Joining in-flight request");
                return AssetHandle::pending(asset_id.as_str(), receiver);
            }

            if let Some(path) = self.shared.store.lookup(&asset_id, self.shared.clock.now()) {
                return AssetHandle::ready(asset_id.as_str(), AssetFile::new(path));
            }

            if self.shared.stopped.load(Ordering::Acquire) {
                warn!(
                    asset_id = %asset_id,
                    error = %AssetError::ShutDown,
                    "Cache miss after shutdown"
                );
                return AssetHandle::ready(asset_id.as_str(), AssetFile::invalid());
            }

            registries.begin(&asset_id)
        };

        let dispatched = match url {
            None => self.shared.dispatch_metadata(&asset_id).map(|op| {
                resilient_lock(&self.shared.registries).push_metadata(op);
            }),
            Some(url) => self
                .shared
                .dispatch_download(&asset_id, url, asset_id.as_str())
                .map(|op| {
                    resilient_lock(&self.shared.registries).push_download(op);
                }),
        };

        match dispatched {
            Ok(()) => self.ensure_worker(),
            // Logged by the dispatcher; the handle becomes ready as invalid.
            Err(_) => self.shared.fulfil(&asset_id, AssetFile::invalid()),
        }

        AssetHandle::pending(asset_id.as_str(), receiver)
    }

    fn ensure_worker(&self) {
        let mut worker = resilient_lock(&self.worker);
        if worker.is_some() || self.shared.stopped.load(Ordering::Acquire) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || shared.run_worker())
        {
            Ok(handle) => *worker = Some(handle),
            // Requests stay registered; the next request retries the start.
            Err(e) => error!(error = %e, "Failed to start asset worker"),
        }
    }
}

impl Drop for AssetManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn run_worker(&self) {
        info!(root = %self.store.root().display(), "Asset worker started");
        let mut swept = false;

        while !self.stopped.load(Ordering::Acquire) {
            let drained = self.drain_metadata() + self.drain_downloads();
            if drained > 0 {
                debug!(drained, "Worker tick");
            }

            if !swept {
                self.sweep();
                swept = true;
            }

            thread::sleep(self.config.poll_interval());
        }

        info!("Asset worker stopped");
    }

    fn sweep(&self) -> SweepReport {
        let report = self
            .store
            .sweep_expired(self.clock.now(), self.config.retention());
        debug!(
            scanned = report.scanned,
            evicted = report.evicted,
            skipped = report.skipped,
            "Eviction sweep finished"
        );
        report
    }

    fn dispatch_metadata(&self, asset_id: &AssetId) -> AssetResult<MetadataOperation> {
        match self.metadata.query(asset_id) {
            Ok(response) => Ok(PendingOperation {
                asset_id: asset_id.clone(),
                filename_hint: String::new(),
                url: None,
                response,
            }),
            Err(source) => {
                warn!(asset_id = %asset_id, error = %source, "Failed to dispatch metadata query");
                Err(AssetError::Dispatch {
                    asset_id: asset_id.to_string(),
                    source,
                })
            }
        }
    }

    fn dispatch_download(
        &self,
        asset_id: &AssetId,
        url: &str,
        filename_hint: &str,
    ) -> AssetResult<DownloadOperation> {
        match self.fetch.fetch(url) {
            Ok(response) => Ok(PendingOperation {
                asset_id: asset_id.clone(),
                filename_hint: filename_hint.to_string(),
                url: Some(url.to_string()),
                response,
            }),
            Err(source) => {
                warn!(asset_id = %asset_id, url, error = %source, "Failed to dispatch download");
                Err(AssetError::Dispatch {
                    asset_id: asset_id.to_string(),
                    source,
                })
            }
        }
    }

    fn fulfil(&self, asset_id: &AssetId, file: AssetFile) {
        let delivered = resilient_lock(&self.registries).fulfil(asset_id, &file);
        debug!(asset_id = %asset_id, valid = file.is_valid(), delivered, "Request resolved");
    }

    /// Handle up to the drain limit of completed metadata queries.
    fn drain_metadata(&self) -> usize {
        let mut processed = 0;

        while processed < self.config.drain_limit() {
            let Some((operation, response)) = resilient_lock(&self.registries).take_ready_metadata()
            else {
                break;
            };
            processed += 1;

            let asset_id = operation.asset_id.clone();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.complete_metadata(operation, response)
            }));

            match outcome {
                // Still in flight in the download registry.
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(asset_id = %asset_id, error = %e, "Metadata stage failed");
                    self.fulfil(&asset_id, AssetFile::invalid());
                }
                Err(_) => {
                    error!(asset_id = %asset_id, "Metadata stage panicked");
                    self.fulfil(&asset_id, AssetFile::invalid());
                }
            }
        }

        processed
    }

    /// Handle up to the drain limit of completed downloads.
    fn drain_downloads(&self) -> usize {
        let mut processed = 0;

        while processed < self.config.drain_limit() {
            let Some((operation, response)) = resilient_lock(&self.registries).take_ready_download()
            else {
                break;
            };
            processed += 1;

            let asset_id = operation.asset_id.clone();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.complete_download(operation, response)
            }));

            let file = match outcome {
                Ok(Ok(path)) => AssetFile::new(path),
                Ok(Err(e)) => {
                    warn!(asset_id = %asset_id, error = %e, "Download stage failed");
                    AssetFile::invalid()
                }
                Err(_) => {
                    error!(asset_id = %asset_id, "Download stage panicked");
                    AssetFile::invalid()
                }
            };
            self.fulfil(&asset_id, file);
        }

        processed
    }

    fn complete_metadata(
        &self,
        operation: MetadataOperation,
        response: Option<MetadataResponse>,
    ) -> AssetResult<()> {
        let asset_id = operation.asset_id;
        let response = require_success(&asset_id, response)?;

        let resolved = pipeline::parse_metadata(&response.body).map_err(|field| AssetError::Parse {
            asset_id: asset_id.to_string(),
            field,
        })?;
        debug!(asset_id = %asset_id, url = %resolved.url, "Resolved content location");

        let next = self.dispatch_download(&asset_id, &resolved.url, &resolved.filename)?;
        resilient_lock(&self.registries).push_download(next);
        Ok(())
    }

    fn complete_download(
        &self,
        operation: DownloadOperation,
        response: Option<FetchResponse>,
    ) -> AssetResult<PathBuf> {
        let asset_id = operation.asset_id;
        let response = require_success(&asset_id, response)?;

        let filename = pipeline::resolve_filename(&response, &operation.filename_hint);
        let path = self
            .store
            .persist(&asset_id, &filename, &response.bytes, self.clock.now())?;

        info!(
            asset_id = %asset_id,
            url = operation.url.as_deref().unwrap_or_default(),
            path = %path.display(),
            bytes = response.bytes.len(),
            "Asset downloaded"
        );
        Ok(path)
    }
}

/// Success flag and error text shared by both response types.
trait Outcome {
    fn succeeded(&self) -> bool;
    fn error(&self) -> &str;
}

impl Outcome for MetadataResponse {
    fn succeeded(&self) -> bool {
        self.succeeded
    }

    fn error(&self) -> &str {
        &self.error
    }
}

impl Outcome for FetchResponse {
    fn succeeded(&self) -> bool {
        self.succeeded
    }

    fn error(&self) -> &str {
        &self.error
    }
}

/// Unwrap a response that arrived and reports success.
fn require_success<R: Outcome>(asset_id: &AssetId, response: Option<R>) -> AssetResult<R> {
    let message = match response {
        Some(response) if response.succeeded() => return Ok(response),
        Some(response) => response.error().to_string(),
        None => "response was dropped before completion".to_string(),
    };
    Err(AssetError::Transport {
        asset_id: asset_id.to_string(),
        message,
    })
}
