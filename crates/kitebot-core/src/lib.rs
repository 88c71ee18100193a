//! Core library for kitebot.
//!
//! Everything that does not depend on the chat platform or the HTTP
//! listener lives here:
//! - `auth`: the persisted token record and the session manager
//! - `api`: the Kite Connect REST client
//! - `models`: holdings and profile types returned by the API
//! - `format`: portfolio profit/loss and table rendering
//! - `config`: environment-sourced settings

pub mod api;
pub mod auth;
pub mod config;
pub mod format;
pub mod models;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use api::{ApiError, Brokerage, KiteClient};
pub use auth::{NotReadyReason, SessionManager, SessionStatus, TokenRecord, TokenStore};
pub use config::Config;
