//! Fetching metainfo descriptors from remote URLs.
//!
//! Bodies are streamed and refused once they exceed [`MAX_DESCRIPTOR_BYTES`],
//! whether or not the server announced a Content-Length.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use super::{Descriptor, DescriptorError};

/// Largest accepted descriptor (32 MiB).
pub const MAX_DESCRIPTOR_BYTES: usize = 32 * 1024 * 1024;

/// Default connect timeout for descriptor fetches.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default overall timeout for descriptor fetches.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Errors from fetching a remote descriptor.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL is malformed or not http(s).
    #[error("invalid descriptor URL: {url}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
    },

    /// Network-level failure.
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL being fetched.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL being fetched.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// Body exceeds the accepted size.
    #[error("remote descriptor too large: {len} bytes from {url} (limit {limit})")]
    TooLarge {
        /// The URL being fetched.
        url: String,
        /// Announced or observed length.
        len: u64,
        /// Accepted maximum.
        limit: usize,
    },

    /// Body is not a valid descriptor.
    #[error("invalid remote descriptor from {url}: {source}")]
    Invalid {
        /// The URL being fetched.
        url: String,
        /// Validation failure.
        #[source]
        source: DescriptorError,
    },
}

/// Downloads `.torrent` descriptors over HTTP(S).
#[derive(Debug, Clone)]
pub struct RemoteDescriptorFetcher {
    client: Client,
    max_bytes: usize,
}

impl RemoteDescriptorFetcher {
    /// Creates a fetcher with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .gzip(true)
            .user_agent(concat!("seedbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| FetchError::Network {
                url: String::new(),
                source,
            })?;
        Ok(Self {
            client,
            max_bytes: MAX_DESCRIPTOR_BYTES,
        })
    }

    /// Overrides the size limit.
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes.min(MAX_DESCRIPTOR_BYTES);
        self
    }

    /// Fetches and validates the descriptor at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] for malformed URLs, network failures, non-2xx
    /// responses, oversized bodies, or payloads that are not metainfo.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &str) -> Result<Descriptor, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
            });
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(announced) = response.content_length()
            && announced > self.max_bytes as u64
        {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                len: announced,
                limit: self.max_bytes,
            });
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_reqwest_error(url, e))?;
            if body.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    len: (body.len() + chunk.len()) as u64,
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(bytes = body.len(), "fetched remote descriptor");

        Descriptor::metainfo(body).map_err(|source| FetchError::Invalid {
            url: url.to_string(),
            source,
        })
    }
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            source: error,
        }
    }
}
