// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! assetcache - Asset download and disk cache library
//!
//! Download once, serve from disk afterwards.
//!
//! An asset id is resolved to a content URL by a metadata service, the content
//! is fetched and stored under `<root>/<asset id>/`, and later requests are
//! answered from disk. Entries not accessed for the retention window are
//! evicted when the background worker starts.
//!
//! # Core Modules
//!
//! - [`assets`] - Manager, handles, cache store and the resolution pipeline
//! - [`net`] - Network collaborator traits and the HTTP transport
//! - [`config`] - JSON configuration with environment overrides
//! - [`clock`] - Time source used for access markers and eviction
//! - [`error`] - Error types and terminal error formatting

pub mod assets;
pub mod clock;
pub mod colors;
pub mod config;
pub mod error;
pub mod net;
pub mod sync;
pub mod utils;

// Re-export commonly used types from assets
pub use assets::{
    AssetFile, AssetHandle, AssetId, AssetManager, CacheEntry, CacheStore, SweepReport,
};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, AssetConfig};
pub use net::{
    DispatchError, FetchResponse, FetchService, HttpTransport, MetadataResponse,
    MetadataService, PendingResponse, Responder,
};
pub use utils::mask_sensitive;

// Re-export error utilities
pub use error::{format_error, AssetError, AssetResult};
