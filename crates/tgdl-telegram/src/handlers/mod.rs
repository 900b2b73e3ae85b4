//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - validates auth
//! - extracts the link(s) / arguments
//! - calls into `tgdl-core` (item pipeline, batch controller, task tracker)

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use tgdl_core::domain::UserId;
use tgdl_core::security::is_authorized;

use crate::router::AppState;
mod commands;
mod download;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| u.id.0);

    if !is_authorized(
        user_id.map(|id| UserId(id as i64)),
        &state.cfg.allowed_users,
    ) {
        tracing::info!(user_id = ?user_id, chat_id = msg.chat.id.0, "unauthorized message");
        let _ = bot
            .send_message(
                msg.chat.id,
                "Unauthorized. Contact the bot owner for access.",
            )
            .await;
        return Ok(());
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };

    if text.starts_with('/') {
        return commands::handle_command(msg.clone(), state).await;
    }

    download::handle_link_message(&msg, text, state).await;
    Ok(())
}
