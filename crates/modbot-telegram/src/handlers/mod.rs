//! Telegram update handlers.
//!
//! Commands are answered directly; every other text (or caption) goes through
//! the moderation pipeline, one message at a time per chat.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use crate::router::AppState;
mod commands;
mod text;

pub use text::{moderate, IncomingText};

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;

    if msg.from().map(|u| u.is_bot).unwrap_or(true) {
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(bot, msg, state).await;
        }
    }

    let Some(incoming) = IncomingText::from_message(&msg) else {
        return Ok(());
    };

    let _guard = state.chat_locks.lock_chat(chat_id).await;
    moderate(&state, incoming).await;
    Ok(())
}
