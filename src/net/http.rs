// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP implementation of the network collaborators.
//!
//! Each request runs on its own short-lived thread with a blocking
//! `reqwest` client and reports back through a [`PendingResponse`], so a
//! dispatch never blocks the caller.

use std::thread;
use std::time::Duration;

use reqwest::Url;

use super::{
    DispatchError, FetchResponse, FetchService, MetadataResponse, MetadataService, PendingResponse,
};
use crate::assets::AssetId;
use crate::config::AssetConfig;

/// Longest body excerpt kept in error messages.
const ERROR_BODY_EXCERPT: usize = 200;

/// Metadata and content client over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    metadata_endpoint: Option<String>,
    access_token: Option<String>,
}

impl HttpTransport {
    /// Build a transport from configuration.
    pub fn from_config(config: &AssetConfig) -> Result<Self, DispatchError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("assetcache/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            metadata_endpoint: config
                .metadata_endpoint
                .as_ref()
                .map(|endpoint| endpoint.trim_end_matches('/').to_string()),
            access_token: config.access_token.clone(),
        })
    }

    /// Run `job` on a new thread and hand back its eventual result.
    fn spawn<T, F>(&self, name: &str, job: F) -> Result<PendingResponse<T>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (responder, pending) = PendingResponse::channel();
        thread::Builder::new().name(name.to_string()).spawn(move || {
            // The worker may have been shut down meanwhile; nothing to do then.
            let _ = responder.respond(job());
        })?;
        Ok(pending)
    }
}

impl MetadataService for HttpTransport {
    fn query(
        &self,
        asset_id: &AssetId,
    ) -> Result<PendingResponse<MetadataResponse>, DispatchError> {
        let endpoint = self
            .metadata_endpoint
            .as_deref()
            .ok_or(DispatchError::NotConfigured("metadata_endpoint"))?;
        let url = metadata_url(endpoint, asset_id)?;

        let client = self.client.clone();
        let token = self.access_token.clone();

        self.spawn("assetcache-metadata", move || {
            let mut request = client.get(url).header(reqwest::header::ACCEPT, "application/json");
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }

            let response = match request.send() {
                Ok(response) => response,
                Err(e) => return MetadataResponse::failure(e.to_string()),
            };
            let status = response.status();

            match response.text() {
                Ok(body) if status.is_success() => MetadataResponse {
                    status: status.as_u16(),
                    ..MetadataResponse::success(body)
                },
                Ok(body) => MetadataResponse {
                    status: status.as_u16(),
                    ..MetadataResponse::failure(format!("HTTP {}: {}", status, excerpt(&body)))
                },
                Err(e) => MetadataResponse {
                    status: status.as_u16(),
                    ..MetadataResponse::failure(e.to_string())
                },
            }
        })
    }
}

impl FetchService for HttpTransport {
    fn fetch(&self, url: &str) -> Result<PendingResponse<FetchResponse>, DispatchError> {
        let url = content_url(url)?;
        let client = self.client.clone();

        self.spawn("assetcache-fetch", move || {
            let response = match client.get(url).send() {
                Ok(response) => response,
                Err(e) => return FetchResponse::failure(e.to_string()),
            };
            let status = response.status();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_string(), value.to_string()))
                })
                .collect();

            if !status.is_success() {
                return FetchResponse {
                    status: status.as_u16(),
                    headers,
                    ..FetchResponse::failure(format!("HTTP {}", status))
                };
            }

            match response.bytes() {
                Ok(bytes) => FetchResponse {
                    status: status.as_u16(),
                    headers,
                    ..FetchResponse::success(bytes.to_vec())
                },
                Err(e) => FetchResponse {
                    status: status.as_u16(),
                    headers,
                    ..FetchResponse::failure(e.to_string())
                },
            }
        })
    }
}

/// `{endpoint}/{asset_id}`, with the id percent-encoded as one path segment.
fn metadata_url(endpoint: &str, asset_id: &AssetId) -> Result<Url, DispatchError> {
    let invalid = |reason: &str| DispatchError::InvalidUrl {
        url: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let mut url = Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("unsupported scheme"));
    }
    url.path_segments_mut()
        .map_err(|_| invalid("endpoint cannot carry a path"))?
        .pop_if_empty()
        .push(asset_id.as_str());
    Ok(url)
}

fn content_url(raw: &str) -> Result<Url, DispatchError> {
    let url = Url::parse(raw.trim()).map_err(|e| DispatchError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DispatchError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    Ok(url)
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_EXCERPT) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}
