use std::sync::Arc;

use teloxide::types::Message;

use tgdl_core::{
    domain::{ChatId, MessageId},
    fetch::{error_notice, ItemRequest, Mode},
    link::find_post_link,
};

use crate::router::AppState;

/// A plain message: fetch the first post link it contains.
pub(crate) async fn handle_link_message(msg: &Message, text: &str, state: Arc<AppState>) {
    let chat = ChatId(msg.chat.id.0);
    match find_post_link(text) {
        Some(url) => spawn_single(state, url, chat, MessageId(msg.id.0)),
        None if msg.chat.is_private() => {
            let _ = state
                .messenger
                .send_html(chat, "<b>Please send a valid Telegram post URL.</b>")
                .await;
        }
        None => {}
    }
}

/// Run one fetch-and-deliver as a tracked task and reply with its outcome.
pub(crate) fn spawn_single(state: Arc<AppState>, url: String, chat: ChatId, trigger: MessageId) {
    // Captured now: a /killall issued later must still reach this task.
    let cancel = state.cancel.token();
    let tasks = state.tasks.clone();
    tasks.spawn(async move {
        tracing::info!(%url, chat = chat.0, "single download");
        let req = ItemRequest {
            url,
            chat,
            trigger,
            candidates: None,
            mode: Mode::Single,
            cancel,
        };
        let reply = match state.pipeline.process(req).await {
            Ok(outcome) => {
                tracing::info!(?outcome, "single download finished");
                outcome.notice()
            }
            Err(e) => {
                tracing::warn!(error = %e, "single download failed");
                Some(error_notice(&e))
            }
        };
        if let Some(reply) = reply {
            let _ = state.messenger.send_html(chat, &reply).await;
        }
    });
}
