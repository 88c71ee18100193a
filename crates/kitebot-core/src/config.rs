//! Application configuration management.
//!
//! All settings come from the environment (a `.env` file is loaded by the
//! binary before this runs). Missing brokerage or bot credentials are not
//! fatal: they are reported by [`Config::missing_required`] so the caller
//! can warn and keep going.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application name used for the default token file location
const APP_NAME: &str = "kitebot";

/// Token file name
const TOKENS_FILE: &str = "tokens.json";

/// Port the login callback listens on when `PORT` is unset
const DEFAULT_PORT: u16 = 5000;

const DEFAULT_HOST: &str = "0.0.0.0";

#[derive(Debug, Clone, Default)]
pub struct Config {
    // ── Kite Connect ────────────────────────────────────────────────────
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Appended to the login URL when set
    pub redirect_url: Option<String>,

    // ── Telegram ────────────────────────────────────────────────────────
    pub telegram_token: Option<String>,

    // ── Callback listener ───────────────────────────────────────────────
    pub host: String,
    pub port: u16,

    // ── Storage / logging ───────────────────────────────────────────────
    pub tokens_file: PathBuf,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable lookup.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match var("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT: {}", raw))?,
            None => DEFAULT_PORT,
        };

        Ok(Config {
            api_key: var("KITE_API_KEY"),
            api_secret: var("KITE_API_SECRET"),
            redirect_url: var("REDIRECT_URL"),
            telegram_token: var("TELEGRAM_BOT_TOKEN"),
            host: var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            tokens_file: var("KITEBOT_TOKENS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(default_tokens_file),
            log_dir: var("KITEBOT_LOG_DIR").map(PathBuf::from),
        })
    }

    /// Names of required variables that are not set.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.api_key.is_none() {
            missing.push("KITE_API_KEY");
        }
        if self.api_secret.is_none() {
            missing.push("KITE_API_SECRET");
        }
        if self.telegram_token.is_none() {
            missing.push("TELEGRAM_BOT_TOKEN");
        }
        missing
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_tokens_file() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join(APP_NAME).join(TOKENS_FILE),
        None => PathBuf::from(TOKENS_FILE),
    }
}
