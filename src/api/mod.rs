//! Authenticated storefront API client.
//!
//! Wraps a single `reqwest::Client` (created once, reused for connection
//! pooling) with the bearer token and the API/web base URLs. Both bases are
//! overridable so tests can point the client at a mock server.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default HTTP connect timeout (30 seconds).
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
const READ_TIMEOUT_SECS: u64 = 300;

/// Production API base.
const DEFAULT_API_BASE: &str = "https://api.itch.io/";

/// Production web base.
const DEFAULT_WEB_BASE: &str = "https://itch.io/";

/// Errors produced by API requests.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level error (DNS resolution, connection refused, TLS, timeout).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} from {url}")]
    Status {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Canonical reason phrase for the status, when known.
        reason: String,
    },

    /// Response body was not the expected JSON shape.
    #[error("malformed response from {url}: {source}")]
    Decode {
        /// The URL whose response failed to decode.
        url: String,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// A URL could not be constructed from the configured base.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl ApiError {
    /// Creates a network error with URL context.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error from a response status.
    pub fn status(url: impl Into<String>, status: reqwest::StatusCode) -> Self {
        Self::Status {
            url: url.into(),
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
        }
    }

    /// Creates a decode error with URL context.
    pub fn decode(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }

    /// Creates an invalid-URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

/// Authenticated client for the storefront API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    token: String,
    api_base: Url,
    web_base: Url,
}

impl ApiClient {
    /// Creates a client against the production API with the given token.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration.
    /// This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(token: impl Into<String>) -> Self {
        let api_base = Url::parse(DEFAULT_API_BASE).expect("default API base is a valid URL");
        let web_base = Url::parse(DEFAULT_WEB_BASE).expect("default web base is a valid URL");
        Self::with_base_urls(token, api_base, web_base)
    }

    /// Creates a client against explicit API and web bases.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_base_urls(token: impl Into<String>, api_base: Url, web_base: Url) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self {
            client,
            token: token.into(),
            api_base,
            web_base,
        }
    }

    /// Returns the API token this client authenticates with.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn api_url(&self, path: &str) -> Result<Url, ApiError> {
        self.api_base
            .join(path)
            .map_err(|_| ApiError::invalid_url(format!("{}{path}", self.api_base)))
    }

    /// GETs `path` relative to the API base and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] on transport failure, [`ApiError::Status`]
    /// on an error status, and [`ApiError::Decode`] if the body is not the
    /// expected shape.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.api_url(path)?;
        self.get_json_url(&url).await
    }

    /// GETs an absolute URL with the auth header and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// Same as [`get_json`](Self::get_json).
    pub async fn get_json_url<T: DeserializeOwned>(&self, url: &Url) -> Result<T, ApiError> {
        debug!(url = %url, "GET json");
        let response = self
            .client
            .get(url.clone())
            .header(AUTHORIZATION, &self.token)
            .send()
            .await
            .map_err(|e| ApiError::network(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::status(url.as_str(), status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(url.as_str(), e))?;
        serde_json::from_str(&body).map_err(|e| ApiError::decode(url.as_str(), e))
    }

    /// POSTs to `path` relative to the API base (empty body) and decodes the
    /// JSON response. Used for one-time download session tickets.
    ///
    /// # Errors
    ///
    /// Same as [`get_json`](Self::get_json).
    pub async fn post_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.api_url(path)?;
        debug!(url = %url, "POST json");
        let response = self
            .client
            .post(url.clone())
            .header(AUTHORIZATION, &self.token)
            .send()
            .await
            .map_err(|e| ApiError::network(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::status(url.as_str(), status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(url.as_str(), e))?;
        serde_json::from_str(&body).map_err(|e| ApiError::decode(url.as_str(), e))
    }

    /// Performs a streaming GET for a signed download URL.
    ///
    /// The response is returned regardless of status; the caller inspects
    /// status and headers to classify non-file responses.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] if the request cannot be sent.
    pub async fn get_download(&self, url: &Url) -> Result<reqwest::Response, ApiError> {
        debug!(url = %url, "GET download stream");
        self.client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ApiError::network(url.as_str(), e))
    }

    /// Fetches a storefront HTML page without authentication.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] on transport failure or
    /// [`ApiError::Status`] on an error status.
    pub async fn get_text(&self, url: &Url) -> Result<String, ApiError> {
        debug!(url = %url, "GET page");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ApiError::network(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::status(url.as_str(), status));
        }

        response
            .text()
            .await
            .map_err(|e| ApiError::network(url.as_str(), e))
    }

    /// Builds the signed download URL for an upload.
    ///
    /// The download-key id is included only when the entitlement has one; the
    /// session uuid is the one-time ticket from the download-sessions
    /// endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if the URL cannot be constructed.
    pub fn download_url(
        &self,
        upload_id: u64,
        download_key_id: Option<u64>,
        uuid: &str,
    ) -> Result<Url, ApiError> {
        let mut url = self.api_url(&format!("uploads/{upload_id}/download"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api_key", &self.token);
            if let Some(key) = download_key_id {
                query.append_pair("download_key_id", &key.to_string());
            }
            query.append_pair("uuid", uuid);
        }
        Ok(url)
    }

    /// Builds the URL of a publisher's storefront page.
    ///
    /// Publishers live on subdomains of the production storefront; under an
    /// overridden web base (tests, mirrors) they are path components.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if the URL cannot be constructed.
    pub fn publisher_page_url(&self, publisher: &str) -> Result<Url, ApiError> {
        if self.web_base.host_str() == Some("itch.io") {
            let raw = format!("{}://{publisher}.itch.io/", self.web_base.scheme());
            Url::parse(&raw).map_err(|_| ApiError::invalid_url(raw))
        } else {
            self.web_base
                .join(&format!("{publisher}/"))
                .map_err(|_| ApiError::invalid_url(format!("{}{publisher}/", self.web_base)))
        }
    }

    /// Builds the URL of a game page's public metadata document.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if the URL cannot be constructed.
    pub fn game_data_url(&self, publisher: &str, title: &str) -> Result<Url, ApiError> {
        let base = self.publisher_page_url(publisher)?;
        base.join(&format!("{title}/data.json"))
            .map_err(|_| ApiError::invalid_url(format!("{base}{title}/data.json")))
    }
}
