//! In-memory brokerage for tests.
//!
//! Enabled for this crate's own tests and, through the `test-utils`
//! feature, for downstream crates' tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::api::Brokerage;
use crate::models::{Holding, Profile};

/// One-time login code that `generate_session` accepts
pub const GOOD_REQUEST_TOKEN: &str = "good";

/// Brokerage double: a fixed set of valid access tokens, an optional
/// renewal response and a canned holdings list. Clones share state and
/// call counters.
#[derive(Clone, Default)]
pub struct FakeBroker {
    bound_token: Option<String>,
    valid_tokens: Arc<Mutex<Vec<String>>>,
    renewal: Arc<Mutex<Option<Map<String, Value>>>>,
    holdings: Arc<Mutex<Vec<Holding>>>,
    holdings_error: Arc<Mutex<Option<String>>>,
    profile_calls: Arc<AtomicUsize>,
    renew_calls: Arc<AtomicUsize>,
    session_calls: Arc<AtomicUsize>,
}

impl FakeBroker {
    pub fn accepting(tokens: &[&str]) -> Self {
        let broker = Self::default();
        *lock(&broker.valid_tokens) = tokens.iter().map(|t| t.to_string()).collect();
        broker
    }

    /// Renewal succeeds with `fields`; their access token becomes valid
    pub fn renewing_with(self, fields: Value) -> Self {
        if let Some(token) = fields.get("access_token").and_then(|v| v.as_str()) {
            lock(&self.valid_tokens).push(token.to_string());
        }
        *lock(&self.renewal) = Some(object(fields));
        self
    }

    pub fn with_holdings(self, holdings: Vec<Holding>) -> Self {
        *lock(&self.holdings) = holdings;
        self
    }

    pub fn failing_holdings(self, message: &str) -> Self {
        *lock(&self.holdings_error) = Some(message.to_string());
        self
    }

    pub fn bound_token(&self) -> Option<&str> {
        self.bound_token.as_deref()
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub fn session_calls(&self) -> usize {
        self.session_calls.load(Ordering::SeqCst)
    }
}

/// Unwrap a `json!({...})` literal into its map
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Brokerage for FakeBroker {
    fn with_access_token(&self, access_token: &str) -> Self {
        let mut client = self.clone();
        client.bound_token = Some(access_token.to_string());
        client
    }

    fn login_url(&self, redirect_uri: Option<&str>) -> Result<String> {
        let mut url = "https://login.example/connect/login?api_key=test&v=3".to_string();
        if let Some(redirect) = redirect_uri {
            url.push_str("&redirect_uri=");
            url.push_str(redirect);
        }
        Ok(url)
    }

    async fn generate_session(&self, request_token: &str) -> Result<Map<String, Value>> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        if request_token != GOOD_REQUEST_TOKEN {
            anyhow::bail!("Token is invalid or has expired.");
        }
        lock(&self.valid_tokens).push("fresh".to_string());
        Ok(object(json!({
            "user_id": "AB1234",
            "access_token": "fresh",
            "refresh_token": "ref",
            "public_token": "pub"
        })))
    }

    async fn renew_access_token(&self, _refresh_token: &str) -> Result<Map<String, Value>> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.renewal)
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Invalid refresh token"))
    }

    async fn profile(&self) -> Result<Profile> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        let valid = match self.bound_token {
            Some(ref token) => lock(&self.valid_tokens).contains(token),
            None => false,
        };
        if !valid {
            anyhow::bail!("Incorrect `api_key` or `access_token`.");
        }
        Ok(Profile::default())
    }

    async fn holdings(&self) -> Result<Vec<Holding>> {
        if let Some(message) = lock(&self.holdings_error).clone() {
            anyhow::bail!(message);
        }
        Ok(lock(&self.holdings).clone())
    }
}
