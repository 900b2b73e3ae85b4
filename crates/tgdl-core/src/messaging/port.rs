use std::path::Path;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{ChatAction, MessagingCapabilities, OutgoingMedia},
    Result,
};

/// Bot-side messaging port.
///
/// The downloader only talks to the requesting chat through this trait; the
/// Telegram adapter implements it on top of the Bot API.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;
    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()>;
    async fn delete_message(&self, msg: MessageRef) -> Result<()>;

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;

    /// Upload a single local file.
    async fn send_media(&self, chat_id: ChatId, media: &OutgoingMedia) -> Result<MessageRef>;

    /// Upload up to `max_album_len` files as one album.
    async fn send_album(&self, chat_id: ChatId, items: &[OutgoingMedia]) -> Result<()>;

    async fn send_document(
        &self,
        chat_id: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<MessageRef>;
}
