// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Asset download and cache manager
//!
//! This module turns asset ids into files on disk:
//! - Cache hits are answered immediately from `<root>/<asset id>/`
//! - Misses go through a metadata query, then a content fetch
//! - Entries untouched for the retention window are evicted
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │ AssetManager    │────▶│ Background      │
//! │ (handles)       │     │ Worker (thread) │
//! └────────┬────────┘     └────────┬────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ CacheStore      │     │ MetadataService │
//! │ (disk + marker) │     │ FetchService    │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use assetcache::assets::AssetManager;
//! use assetcache::config::AssetConfig;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = AssetConfig::default();
//! let manager = AssetManager::from_config(config)?;
//!
//! // Returns at once; a cache hit is already ready
//! let handle = manager.download_asset("1234");
//!
//! // Block until the download finishes
//! let file = handle.wait();
//! if let Some(path) = file.path() {
//!     println!("Asset at {}", path.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod manager;
pub mod pipeline;
pub(crate) mod registry;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use manager::AssetManager;
pub use pipeline::{ResolvedAsset, FALLBACK_FILENAME};
pub use store::{CacheEntry, CacheStore, SweepReport, MARKER_FILE};
pub use types::{AssetFile, AssetHandle, AssetId};
