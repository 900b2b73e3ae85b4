//! Ports to the user session (message lookup + media transfer).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChatCandidate, ChatId},
    media::RemoteMessage,
    progress::TransferProgress,
    Result,
};

/// Message lookup through the authenticated user session.
///
/// Failures are `Error::Service` tagged with a `ServiceErrorKind`.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// `Ok(None)` when the id does not resolve to a usable message.
    async fn fetch(&self, chat: &ChatCandidate, message_id: i32) -> Result<Option<RemoteMessage>>;

    /// Every member of the album `message` belongs to, in id order.
    async fn fetch_group(&self, message: &RemoteMessage) -> Result<Vec<RemoteMessage>>;

    /// Resolve and cache the chat ahead of a batch. Best effort.
    async fn warm_up(&self, chat: &ChatCandidate) -> Result<()>;
}

/// Media download through the user session.
#[async_trait]
pub trait MediaTransfer: Send + Sync {
    /// Download the media of `message` to `dest`, reporting into `progress`.
    async fn download(
        &self,
        message: &RemoteMessage,
        dest: &Path,
        progress: &TransferProgress,
    ) -> Result<PathBuf>;
}

/// Where a media group is delivered and with what cancellation.
#[derive(Clone, Debug)]
pub struct GroupContext {
    pub chat: ChatId,
    pub work_dir: PathBuf,
    pub cancel: CancellationToken,
}

/// Handles posts that belong to a media group.
#[async_trait]
pub trait MediaGroupHandler: Send + Sync {
    /// `Ok(true)` when at least one member was delivered.
    async fn process(&self, ctx: &GroupContext, message: &RemoteMessage) -> Result<bool>;
}
