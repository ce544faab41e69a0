//! Login flows: API-key exchange and cookie-session web login.
//!
//! Both flows are fatal on failure; nothing else in a run starts without a
//! valid token or session.

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::scrape::hidden_input;

/// Errors produced during login. All variants abort the run.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Network-level failure during a login request.
    #[error("network error during login: {source}")]
    Network {
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The server rejected the login with an error status.
    #[error("login rejected with HTTP {status}")]
    Rejected {
        /// The HTTP status code.
        status: u16,
    },

    /// The server answered but refused the credentials.
    #[error("login failed: {reason}")]
    Denied {
        /// Server-provided or derived reason.
        reason: String,
    },

    /// The login page did not contain a `csrf_token` field to submit.
    #[error("login page did not contain a csrf_token field")]
    MissingCsrf,

    /// The login response was not the expected JSON shape.
    #[error("malformed login response: {source}")]
    Malformed {
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    key: Option<LoginKey>,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LoginKey {
    key: String,
}

/// An authenticated web session (cookie jar) for storefront page operations
/// such as bundle claiming.
#[derive(Debug, Clone)]
pub struct WebSession {
    client: Client,
}

impl WebSession {
    fn new(client: Client) -> Self {
        Self { client }
    }

    /// Returns the underlying cookie-carrying client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Exchanges credentials for an API key via the storefront login endpoint.
///
/// # Errors
///
/// Returns [`AuthError`] if the request fails, the server rejects the
/// credentials, or the response is malformed.
pub async fn login_api(
    api_base: &Url,
    username: &str,
    password: &str,
) -> Result<String, AuthError> {
    let url = api_base.join("login").map_err(|_| AuthError::Denied {
        reason: format!("invalid API base: {api_base}"),
    })?;

    debug!(url = %url, "requesting API key");
    let response = Client::new()
        .post(url)
        .form(&[
            ("username", username),
            ("password", password),
            ("source", "desktop"),
        ])
        .send()
        .await
        .map_err(|source| AuthError::Network { source })?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Rejected {
            status: status.as_u16(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|source| AuthError::Network { source })?;
    let parsed: LoginResponse =
        serde_json::from_str(&body).map_err(|source| AuthError::Malformed { source })?;

    if !parsed.success {
        let reason = parsed
            .errors
            .first()
            .cloned()
            .unwrap_or_else(|| "server reported success=false".to_string());
        return Err(AuthError::Denied { reason });
    }

    let key = parsed.key.ok_or_else(|| AuthError::Denied {
        reason: "login succeeded but no key was returned".to_string(),
    })?;

    info!("API key obtained");
    Ok(key.key)
}

/// Logs in through the web form and returns a cookie-authenticated session.
///
/// The login page is fetched first so the form can be submitted with a valid
/// CSRF token.
///
/// # Errors
///
/// Returns [`AuthError`] if any request fails, the CSRF token is missing, or
/// the server rejects the credentials.
pub async fn login_web(
    web_base: &Url,
    username: &str,
    password: &str,
) -> Result<WebSession, AuthError> {
    let url = web_base.join("login").map_err(|_| AuthError::Denied {
        reason: format!("invalid web base: {web_base}"),
    })?;

    #[allow(clippy::expect_used)]
    let client = Client::builder()
        .cookie_store(true)
        .build()
        .expect("failed to build HTTP client with static configuration");

    debug!(url = %url, "fetching login page");
    let page = client
        .get(url.clone())
        .send()
        .await
        .map_err(|source| AuthError::Network { source })?
        .text()
        .await
        .map_err(|source| AuthError::Network { source })?;

    let csrf_token = hidden_input(&page, "csrf_token").ok_or(AuthError::MissingCsrf)?;

    debug!(url = %url, "submitting login form");
    let response = client
        .post(url)
        .form(&[
            ("username", username),
            ("password", password),
            ("csrf_token", csrf_token.as_str()),
        ])
        .send()
        .await
        .map_err(|source| AuthError::Network { source })?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Rejected {
            status: status.as_u16(),
        });
    }

    info!("web session established");
    Ok(WebSession::new(client))
}
