use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    media::{file_name_for, RemoteMessage},
    messaging::{port::MessagingPort, types::OutgoingMedia},
    ports::{GroupContext, MediaGroupHandler, MediaTransfer, MessageSource},
    progress::TransferProgress,
    Result,
};

/// Default media-group handler: download every member and re-send them as
/// albums of at most `max_album_len` items.
pub struct AlbumRelay {
    source: Arc<dyn MessageSource>,
    transfer: Arc<dyn MediaTransfer>,
    messenger: Arc<dyn MessagingPort>,
}

impl AlbumRelay {
    pub fn new(
        source: Arc<dyn MessageSource>,
        transfer: Arc<dyn MediaTransfer>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            source,
            transfer,
            messenger,
        }
    }
}

#[async_trait]
impl MediaGroupHandler for AlbumRelay {
    async fn process(&self, ctx: &GroupContext, message: &RemoteMessage) -> Result<bool> {
        let members = self.source.fetch_group(message).await?;
        let caps = self.messenger.capabilities();
        tokio::fs::create_dir_all(&ctx.work_dir).await?;

        let mut items = Vec::new();
        for member in &members {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let Some(media) = &member.media else {
                continue;
            };
            let dest = ctx.work_dir.join(file_name_for(member.id, &media.info));
            let progress = TransferProgress::new();
            match self.transfer.download(member, &dest, &progress).await {
                Ok(path) => items.push(OutgoingMedia {
                    kind: media.info.kind.upload_kind().album_compatible(),
                    path,
                    caption: member.rendered_text(caps.max_caption_len),
                }),
                Err(e) => {
                    tracing::warn!(message_id = member.id, error = %e, "skipping album member");
                }
            }
        }

        if items.is_empty() || ctx.cancel.is_cancelled() {
            return Ok(false);
        }

        let mut result = Ok(());
        for chunk in items.chunks(caps.max_album_len.max(1)) {
            if let Err(e) = self.messenger.send_album(ctx.chat, chunk).await {
                result = Err(e);
                break;
            }
        }
        for item in &items {
            let _ = tokio::fs::remove_file(&item.path).await;
        }
        result.map(|()| true)
    }
}
