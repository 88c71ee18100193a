//! kitebot - Telegram bot that reports a Kite Connect portfolio snapshot.
//!
//! Two things run side by side: an HTTP listener that receives the Kite
//! login redirect (`GET /callback`) and the Telegram command loop.
//! They share the session manager and, through it, the token file.

mod bot;
mod server;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use kitebot_core::{Brokerage, Config, KiteClient, SessionManager, SessionStatus, TokenStore};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log filter used when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "kitebot=info,kitebot_core=info";

/// File name prefix for the daily rolling log
const LOG_FILE_PREFIX: &str = "kitebot.log";

/// State shared by the callback listener and the command handlers.
pub struct AppState<B> {
    pub config: Config,
    pub session: SessionManager<B>,
}

pub type SharedState<B> = Arc<AppState<B>>;

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, and also to a daily file when a log directory is
/// configured. The returned guard must stay alive to flush the file writer.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());
    info!("kitebot v{}", env!("CARGO_PKG_VERSION"));

    let missing = config.missing_required();
    if !missing.is_empty() {
        warn!(
            missing = ?missing,
            "⚠️ Missing environment variables; brokerage and bot calls will fail until they are set"
        );
    }

    let broker = KiteClient::new(
        config.api_key.clone().unwrap_or_default(),
        config.api_secret.clone().unwrap_or_default(),
    )?;
    let store = TokenStore::new(config.tokens_file.clone());
    info!(path = %store.path().display(), "Using token file");

    let state: SharedState<KiteClient> = Arc::new(AppState {
        config: config.clone(),
        session: SessionManager::new(store, broker),
    });

    // Start the login callback listener
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind callback listener on {}", addr))?;
    info!(addr = %addr, "Callback listener ready");

    let app = server::router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Callback listener stopped");
        }
    });

    validate_saved_session(&state).await;

    let token = config
        .telegram_token
        .clone()
        .context("TELEGRAM_BOT_TOKEN is required to start the bot")?;

    info!("Bot started. Waiting for Telegram commands.");
    bot::run(token, state).await;

    info!("kitebot shutting down");
    Ok(())
}

/// Probe (and if needed renew) a saved session once at startup so the log
/// shows whether a fresh login is required.
async fn validate_saved_session<B: Brokerage>(state: &AppState<B>) {
    if state.session.store().load().is_none() {
        info!("No saved session. Use /login to authenticate.");
        return;
    }

    info!("Attempting to validate or refresh saved tokens at startup...");
    match state.session.ensure_ready().await {
        SessionStatus::Ready(_) => info!("Tokens valid/refreshed at startup."),
        SessionStatus::NotReady(reason) => {
            warn!(reason = ?reason, "Saved tokens invalid/refresh failed. Use /login.")
        }
    }
}
