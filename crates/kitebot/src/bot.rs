//! Telegram command handling.
//!
//! Replies are computed by [`reply_for`], which only needs the shared
//! state; [`answer`] sends them through Telegram.

use kitebot_core::format::render_snapshot;
use kitebot_core::{Brokerage, KiteClient, SessionStatus};
use teloxide::dptree;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{LinkPreviewOptions, ParseMode};
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use crate::{AppState, SharedState};

const HELP_TEXT: &str =
    "👋 Hello! Use /login to authenticate Kite, then /snapshot to view portfolio.";

const SESSION_EXPIRED_TEXT: &str =
    "⚠️ Session missing/expired. Please use /login and complete the flow.";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "show help")]
    Start,
    #[command(description = "get the Kite login link")]
    Login,
    #[command(description = "show a portfolio snapshot")]
    Snapshot,
    #[command(description = "same as /snapshot")]
    Portfolio,
}

/// A chat reply; `html` selects Telegram's HTML parse mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub html: bool,
    pub link_preview: bool,
}

impl Reply {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: false,
            link_preview: true,
        }
    }

    fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: true,
            link_preview: false,
        }
    }
}

/// Run the command loop until the process is interrupted.
pub async fn run(token: String, state: SharedState<KiteClient>) {
    let bot = Bot::new(token);

    let handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(answer);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn answer(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: SharedState<KiteClient>,
) -> ResponseResult<()> {
    info!(command = ?cmd, chat_id = %msg.chat.id, "Command received");

    let reply = reply_for(&cmd, &state).await;
    let mut request = bot.send_message(msg.chat.id, reply.text);
    if reply.html {
        request = request.parse_mode(ParseMode::Html);
    }
    if !reply.link_preview {
        request = request.link_preview_options(no_link_preview());
    }
    request.await?;
    Ok(())
}

fn no_link_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

pub async fn reply_for<B: Brokerage>(cmd: &Command, state: &AppState<B>) -> Reply {
    match cmd {
        Command::Start => Reply::plain(HELP_TEXT),
        Command::Login => login_reply(state),
        Command::Snapshot | Command::Portfolio => snapshot_reply(state).await,
    }
}

fn login_reply<B: Brokerage>(state: &AppState<B>) -> Reply {
    let redirect = state.config.redirect_url.as_deref();
    match state.session.broker().login_url(redirect) {
        Ok(url) => Reply::plain(format!("🔐 Click to login to Kite:\n{}", url)),
        Err(e) => {
            warn!(error = %e, "Failed to build login URL");
            Reply::plain(format!("❌ Could not build login URL: {}", e))
        }
    }
}

async fn snapshot_reply<B: Brokerage>(state: &AppState<B>) -> Reply {
    let client = match state.session.ensure_ready().await {
        SessionStatus::Ready(client) => client,
        SessionStatus::NotReady(reason) => {
            info!(reason = ?reason, "Snapshot requested without a usable session");
            return Reply::plain(SESSION_EXPIRED_TEXT);
        }
    };

    match client.holdings().await {
        Ok(holdings) if holdings.is_empty() => Reply::plain(render_snapshot(&holdings)),
        Ok(holdings) => Reply::html(render_snapshot(&holdings)),
        Err(e) => {
            warn!(error = %e, "Failed to fetch holdings");
            Reply::plain(format!("❌ Error fetching portfolio: {}", e))
        }
    }
}
