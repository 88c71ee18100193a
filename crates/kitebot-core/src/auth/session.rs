use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::api::Brokerage;

use super::{TokenRecord, TokenStore};

/// Why no authenticated client could be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReadyReason {
    /// Nothing has been saved yet (or the token file is unreadable)
    NoSession,
    /// The access token failed the probe and there is no refresh token
    Expired,
    /// The refresh token could not be exchanged for a new access token
    RenewalFailed,
}

/// Outcome of [`SessionManager::ensure_ready`]
#[derive(Debug, Clone)]
pub enum SessionStatus<B> {
    /// A client bound to a working access token
    Ready(B),
    NotReady(NotReadyReason),
}

impl<B> SessionStatus<B> {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionStatus::Ready(_))
    }
}

/// Produces authenticated brokerage clients from the saved token record,
/// renewing the access token when it stops working.
pub struct SessionManager<B> {
    store: TokenStore,
    broker: B,
}

impl<B: Brokerage> SessionManager<B> {
    /// `broker` is the unauthenticated base client
    pub fn new(store: TokenStore, broker: B) -> Self {
        Self { store, broker }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Return a client bound to a usable access token, if one can be had.
    ///
    /// The cached access token is probed first; the refresh token is only
    /// spent when the probe fails, and at most once per call.
    pub async fn ensure_ready(&self) -> SessionStatus<B> {
        let Some(record) = self.store.load() else {
            debug!("No saved session");
            return SessionStatus::NotReady(NotReadyReason::NoSession);
        };

        if let Some(ref access_token) = record.access_token {
            let client = self.broker.with_access_token(access_token);
            match client.profile().await {
                Ok(_) => {
                    debug!("Saved access token is valid");
                    return SessionStatus::Ready(client);
                }
                Err(e) => {
                    info!(error = %e, "Saved access token failed the probe");
                }
            }
        }

        let Some(ref refresh_token) = record.refresh_token else {
            return SessionStatus::NotReady(NotReadyReason::Expired);
        };

        match self.renew(&record, refresh_token).await {
            Ok(client) => {
                info!("Access token renewed");
                SessionStatus::Ready(client)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                SessionStatus::NotReady(NotReadyReason::RenewalFailed)
            }
        }
    }

    async fn renew(&self, record: &TokenRecord, refresh_token: &str) -> Result<B> {
        let fields = self.broker.renew_access_token(refresh_token).await?;
        let merged = record.merge(fields)?;
        let access_token = merged
            .access_token
            .clone()
            .context("Renewal response contained no access token")?;

        self.store
            .save(merged)
            .context("Failed to persist renewed tokens")?;

        Ok(self.broker.with_access_token(&access_token))
    }

    /// Exchange a one-time login code and persist the new session.
    pub async fn establish(&self, request_token: &str) -> Result<TokenRecord> {
        let fields = self.broker.generate_session(request_token).await?;
        let record = TokenRecord::from_fields(fields)?;
        if !record.has_access_token() {
            anyhow::bail!("Session response contained no access token");
        }

        let saved = self.store.save(record)?;
        info!(path = %self.store.path().display(), "New session saved");
        Ok(saved)
    }
}
