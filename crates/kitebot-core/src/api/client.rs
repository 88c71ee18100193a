//! API client for the Kite Connect v3 REST API.
//!
//! Covers only what the bot needs: the login URL, exchanging a
//! `request_token` for a session, renewing an access token, the profile
//! probe, and holdings.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Url};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::models::{Holding, Profile};

use super::{ApiError, Brokerage};

// ============================================================================
// Constants
// ============================================================================

/// Base URL for REST endpoints
const API_BASE_URL: &str = "https://api.kite.trade";

/// Base URL for the interactive login page
const LOGIN_BASE_URL: &str = "https://kite.zerodha.com";

/// API version header value required on every request
const KITE_VERSION: &str = "3";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Response envelope: `{"status": "success", "data": ...}`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: Option<String>,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

/// SHA-256 hex digest of `api_key + token + api_secret`, as required by
/// the session and renewal endpoints.
pub fn checksum(api_key: &str, token: &str, api_secret: &str) -> String {
    let digest = Sha256::digest(format!("{}{}{}", api_key, token, api_secret).as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Kite Connect client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct KiteClient {
    client: Client,
    api_key: String,
    api_secret: String,
    api_base: String,
    login_base: String,
    access_token: Option<String>,
}

impl KiteClient {
    /// Create a client for the production endpoints
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Result<Self> {
        Self::with_base_urls(api_key, api_secret, API_BASE_URL, LOGIN_BASE_URL)
    }

    /// Create a client pointed at custom endpoints (used by tests)
    pub fn with_base_urls(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        api_base: impl Into<String>,
        login_base: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            login_base: login_base.into().trim_end_matches('/').to_string(),
            access_token: None,
        })
    }

    /// Build the interactive login URL, optionally overriding the redirect
    pub fn login_url(&self, redirect_uri: Option<&str>) -> Result<String> {
        let mut params = vec![("api_key", self.api_key.as_str()), ("v", KITE_VERSION)];
        if let Some(redirect) = redirect_uri {
            params.push(("redirect_uri", redirect));
        }
        let url = Url::parse_with_params(&format!("{}/connect/login", self.login_base), &params)
            .context("Failed to build login URL")?;
        Ok(url.into())
    }

    fn require_api_key(&self) -> Result<&str> {
        if self.api_key.is_empty() {
            return Err(ApiError::MissingCredential("KITE_API_KEY").into());
        }
        Ok(&self.api_key)
    }

    fn require_api_secret(&self) -> Result<&str> {
        if self.api_secret.is_empty() {
            return Err(ApiError::MissingCredential("KITE_API_SECRET").into());
        }
        Ok(&self.api_secret)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert("X-Kite-Version", header::HeaderValue::from_static(KITE_VERSION));
        if let Some(ref token) = self.access_token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("token {}:{}", self.api_key, token))?,
            );
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    /// Unwrap the `data` field of a successful envelope.
    /// `null` or missing data comes back as `None`.
    async fn read_data<T: DeserializeOwned>(
        response: reqwest::Response,
        url: &str,
    ) -> Result<Option<T>> {
        let response = Self::check_response(response).await?;
        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse JSON response from {}", url))?;

        if envelope.status.as_deref() == Some("error") {
            let message = envelope.message.unwrap_or_else(|| "unknown error".to_string());
            return Err(ApiError::InvalidResponse(message).into());
        }
        Ok(envelope.data)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.require_api_key()?;
        let url = format!("{}{}", self.api_base, path);
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers()?)
            .send()
            .await
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to send GET request to {}", url))?;

        Self::read_data(response, &url).await
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.api_base, path);
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .form(form)
            .send()
            .await
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to send POST request to {}", url))?;

        Self::read_data(response, &url).await
    }

    /// POST a token together with its checksum and return the session fields
    async fn exchange(
        &self,
        path: &str,
        token_field: &str,
        token: &str,
    ) -> Result<Map<String, Value>> {
        let api_key = self.require_api_key()?;
        let api_secret = self.require_api_secret()?;
        let digest = checksum(api_key, token, api_secret);

        let data: Option<Map<String, Value>> = self
            .post_form(
                path,
                &[
                    ("api_key", api_key),
                    (token_field, token),
                    ("checksum", digest.as_str()),
                ],
            )
            .await?;

        data.ok_or_else(|| ApiError::InvalidResponse(format!("{} returned no data", path)).into())
    }
}

#[async_trait]
impl Brokerage for KiteClient {
    fn with_access_token(&self, access_token: &str) -> Self {
        // Cheap clone, shares connection pool
        let mut client = self.clone();
        client.access_token = Some(access_token.to_string());
        client
    }

    fn login_url(&self, redirect_uri: Option<&str>) -> Result<String> {
        KiteClient::login_url(self, redirect_uri)
    }

    async fn generate_session(&self, request_token: &str) -> Result<Map<String, Value>> {
        self.exchange("/session/token", "request_token", request_token)
            .await
            .context("Failed to generate session")
    }

    async fn renew_access_token(&self, refresh_token: &str) -> Result<Map<String, Value>> {
        self.exchange("/session/refresh_token", "refresh_token", refresh_token)
            .await
            .context("Failed to renew access token")
    }

    async fn profile(&self) -> Result<Profile> {
        let profile: Option<Profile> = self.get("/user/profile").await?;
        Ok(profile.unwrap_or_default())
    }

    async fn holdings(&self) -> Result<Vec<Holding>> {
        let holdings: Option<Vec<Holding>> = self.get("/portfolio/holdings").await?;
        Ok(holdings.unwrap_or_default())
    }
}
