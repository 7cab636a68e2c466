// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Network collaborators used by the resolution pipeline.
//!
//! The manager talks to two services:
//!
//! - a [`MetadataService`] that turns an asset id into a response from which a
//!   content URL and file name can be extracted, and
//! - a [`FetchService`] that downloads the bytes behind a URL.
//!
//! Both start their work and return immediately with a [`PendingResponse`]
//! that the background worker polls without blocking. [`HttpTransport`]
//! implements both over HTTP; tests substitute their own implementations.

pub mod http;

use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::assets::AssetId;

pub use http::HttpTransport;

/// Reasons an outbound call could not be started.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A required setting is missing.
    #[error("transport is not configured: missing {0}")]
    NotConfigured(&'static str),

    /// The request URL is malformed or uses an unsupported scheme.
    #[error("invalid request url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request thread could not be spawned.
    #[error("could not start request: {0}")]
    Spawn(#[from] std::io::Error),

    /// The HTTP client could not be built.
    #[error("http client unavailable: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result of polling a [`PendingResponse`].
#[derive(Debug)]
pub enum Polled<T> {
    /// The response arrived.
    Ready(T),
    /// Still in flight.
    Pending,
    /// The producer dropped without answering.
    Lost,
}

/// An in-flight response that can be checked without blocking.
#[derive(Debug)]
pub struct PendingResponse<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> PendingResponse<T> {
    /// Create a pending response together with the [`Responder`] that completes it.
    pub fn channel() -> (Responder<T>, Self) {
        let (sender, receiver) = oneshot::channel();
        (Responder { sender }, Self { receiver })
    }

    /// A response that is already complete.
    pub fn ready(value: T) -> Self {
        let (responder, pending) = Self::channel();
        responder.respond(value);
        pending
    }

    /// Zero-timeout check for the response.
    pub fn poll(&mut self) -> Polled<T> {
        match self.receiver.try_recv() {
            Ok(value) => Polled::Ready(value),
            Err(TryRecvError::Empty) => Polled::Pending,
            Err(TryRecvError::Closed) => Polled::Lost,
        }
    }
}

/// Producer side of a [`PendingResponse`].
#[derive(Debug)]
pub struct Responder<T> {
    sender: oneshot::Sender<T>,
}

impl<T> Responder<T> {
    /// Complete the response. Returns `false` if nobody is listening anymore.
    pub fn respond(self, value: T) -> bool {
        self.sender.send(value).is_ok()
    }
}

/// Response of a metadata query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataResponse {
    /// Whether the query succeeded.
    pub succeeded: bool,
    /// HTTP status, 0 when no response was received.
    pub status: u16,
    /// Response body (JSON).
    pub body: String,
    /// Error description when `succeeded` is false.
    pub error: String,
}

impl MetadataResponse {
    pub fn success(body: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            status: 200,
            body: body.into(),
            error: String::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            status: 0,
            body: String::new(),
            error: error.into(),
        }
    }
}

/// Response of a content fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    /// Whether the fetch succeeded.
    pub succeeded: bool,
    /// HTTP status, 0 when no response was received.
    pub status: u16,
    /// Raw content.
    pub bytes: Vec<u8>,
    /// Response headers as received.
    pub headers: Vec<(String, String)>,
    /// Error description when `succeeded` is false.
    pub error: String,
}

impl FetchResponse {
    pub fn success(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            succeeded: true,
            status: 200,
            bytes: bytes.into(),
            headers: Vec::new(),
            error: String::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            status: 0,
            bytes: Vec::new(),
            headers: Vec::new(),
            error: error.into(),
        }
    }

    /// Add a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup; the first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Resolves an asset id into content metadata.
pub trait MetadataService: Send + Sync {
    /// Start a metadata query for `asset_id`.
    fn query(&self, asset_id: &AssetId) -> Result<PendingResponse<MetadataResponse>, DispatchError>;
}

/// Downloads content from a URL.
pub trait FetchService: Send + Sync {
    /// Start fetching `url`.
    fn fetch(&self, url: &str) -> Result<PendingResponse<FetchResponse>, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_response_lifecycle() {
        let (responder, mut pending) = PendingResponse::<u32>::channel();
        assert!(matches!(pending.poll(), Polled::Pending));
        assert!(responder.respond(7));
        assert!(matches!(pending.poll(), Polled::Ready(7)));
    }

    #[test]
    fn test_dropped_responder_is_lost() {
        let (responder, mut pending) = PendingResponse::<u32>::channel();
        drop(responder);
        assert!(matches!(pending.poll(), Polled::Lost));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = FetchResponse::success(b"abc".to_vec())
            .with_header("Content-Type", "model/gltf-binary")
            .with_header("content-disposition", "attachment; filename=\"a.glb\"");
        assert_eq!(response.header("CONTENT-DISPOSITION"), Some("attachment; filename=\"a.glb\""));
        assert_eq!(response.header("content-type"), Some("model/gltf-binary"));
        assert_eq!(response.header("etag"), None);
    }
}
