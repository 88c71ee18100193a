//! Authentication module for managing the brokerage session.
//!
//! This module provides:
//! - `TokenStore`: the single persisted `TokenRecord` (one JSON file)
//! - `SessionManager`: probe-then-renew access to an authenticated client
//!
//! Access tokens are probed before use and renewed from the refresh token
//! only when the probe fails.

pub mod session;
pub mod token_store;

pub use session::{NotReadyReason, SessionManager, SessionStatus};
pub use token_store::{TokenRecord, TokenStore};
