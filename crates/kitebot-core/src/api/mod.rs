//! REST API client module for Kite Connect.
//!
//! `KiteClient` talks to the brokerage; the `Brokerage` trait is the seam
//! the session manager and the front-ends are generic over.
//!
//! Every authenticated call sends `Authorization: token <api_key>:<access_token>`.
//! Access tokens are obtained from the login callback's one-time
//! `request_token` and renewed with a refresh token.

pub mod client;
pub mod error;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::models::{Holding, Profile};

pub use client::KiteClient;
pub use error::ApiError;

/// Operations the bot needs from the brokerage.
///
/// Implementors are cheap to clone; `with_access_token` returns a handle
/// bound to one access token that shares the underlying connection pool.
#[async_trait]
pub trait Brokerage: Clone + Send + Sync + 'static {
    /// Bind a handle to the given access token
    fn with_access_token(&self, access_token: &str) -> Self;

    /// Interactive login page, with an optional redirect override
    fn login_url(&self, redirect_uri: Option<&str>) -> Result<String>;

    /// Exchange a one-time login code for session fields
    async fn generate_session(&self, request_token: &str) -> Result<Map<String, Value>>;

    /// Mint a new access token from a refresh token
    async fn renew_access_token(&self, refresh_token: &str) -> Result<Map<String, Value>>;

    /// Lightweight authenticated call used to probe a token
    async fn profile(&self) -> Result<Profile>;

    async fn holdings(&self) -> Result<Vec<Holding>>;
}
