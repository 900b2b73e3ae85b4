//! Single-item fetch-and-deliver: resolve a post link, fetch it through the
//! user session and re-send its content to the requesting chat.

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    dedup::DedupCache,
    domain::{ChatCandidate, ChatId, ItemKey, MessageId, MessageRef},
    errors::{Error, ServiceErrorKind},
    formatting::escape_html,
    limits::SizePolicy,
    link,
    locks::ItemLocks,
    media::{file_name_for, RemoteMedia, RemoteMessage},
    messaging::{port::MessagingPort, types::OutgoingMedia},
    ports::{GroupContext, MediaGroupHandler, MediaTransfer, MessageSource},
    progress::{StatusTicker, TransferProgress},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Delivered within the dedup TTL.
    Cached,
    /// Media group with nothing extractable.
    NoMedia,
    /// Rejected by the size policy (the chat was told).
    TooLarge,
    /// Retries exhausted on a transient service failure.
    Transient(String),
    /// No media and no text.
    Empty,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Downloaded,
    Skipped(SkipReason),
    Failed(String),
    Cancelled,
}

impl Outcome {
    /// Reply shown for a single `/dl`. Batches stay quiet.
    pub fn notice(&self) -> Option<String> {
        match self {
            Self::Downloaded | Self::Skipped(SkipReason::TooLarge) => None,
            Self::Skipped(SkipReason::Cached) => {
                Some("<b>Cached:</b> Already downloaded recently.".to_string())
            }
            Self::Skipped(SkipReason::NoMedia) => Some(
                "<b>Could not extract any valid media from the media group.</b>".to_string(),
            ),
            Self::Skipped(SkipReason::Empty) => {
                Some("<b>No media or text found in the post URL.</b>".to_string())
            }
            Self::Skipped(SkipReason::Transient(e)) | Self::Failed(e) => {
                Some(format!("<b>❌ {}</b>", escape_html(e)))
            }
            Self::Cancelled => Some("<b>⛔ Download cancelled.</b>".to_string()),
        }
    }
}

/// Reply for a request that failed before delivery started.
pub fn error_notice(err: &Error) -> String {
    match err.service_kind() {
        Some(ServiceErrorKind::UnknownPeer) => {
            "<b>Make sure the user client is part of the chat.</b>".to_string()
        }
        _ => format!("<b>❌ {}</b>", escape_html(&err.to_string())),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Single,
    Batch,
}

/// One post to fetch and deliver.
#[derive(Clone, Debug)]
pub struct ItemRequest {
    pub url: String,
    /// Chat that asked, and receives the content.
    pub chat: ChatId,
    /// Message that triggered the request; names the scratch directory.
    pub trigger: MessageId,
    /// Replaces the candidates parsed from `url` (batch jobs pin theirs).
    pub candidates: Option<Vec<ChatCandidate>>,
    pub mode: Mode,
    pub cancel: CancellationToken,
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Extra attempts after the first failed transfer.
    pub retries: u32,
    pub backoff_step: Duration,
    pub backoff_cap: Duration,
    pub download_dir: PathBuf,
    pub progress_interval: Duration,
    pub sizes: SizePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff_step: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(5),
            download_dir: PathBuf::from("downloads"),
            progress_interval: Duration::from_secs(3),
            sizes: SizePolicy::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            retries: cfg.retry_downloads,
            download_dir: cfg.download_dir.clone(),
            progress_interval: cfg.progress_interval,
            sizes: SizePolicy {
                max_download: cfg.max_download_size,
                max_upload: cfg.max_upload_size,
            },
            ..Self::default()
        }
    }

    /// Wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt).min(self.backoff_cap)
    }
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

enum Attempt {
    Delivered,
    Cancelled,
    Failed(Error),
}

pub struct ItemPipeline {
    source: Arc<dyn MessageSource>,
    transfer: Arc<dyn MediaTransfer>,
    groups: Arc<dyn MediaGroupHandler>,
    messenger: Arc<dyn MessagingPort>,
    dedup: DedupCache,
    locks: ItemLocks,
    settings: PipelineSettings,
}

impl ItemPipeline {
    pub fn new(
        source: Arc<dyn MessageSource>,
        transfer: Arc<dyn MediaTransfer>,
        groups: Arc<dyn MediaGroupHandler>,
        messenger: Arc<dyn MessagingPort>,
        dedup: DedupCache,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            transfer,
            groups,
            messenger,
            dedup,
            locks: ItemLocks::new(),
            settings,
        }
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }

    pub fn locks(&self) -> &ItemLocks {
        &self.locks
    }

    pub fn source(&self) -> &Arc<dyn MessageSource> {
        &self.source
    }

    /// `Err` means the post could not be resolved or fetched at all.
    pub async fn process(&self, req: ItemRequest) -> Result<Outcome> {
        let cancel = req.cancel.clone();
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let url = link::strip_query(req.url.trim()).to_string();
        let post = link::resolve(&url)?;
        let candidates = match &req.candidates {
            Some(pinned) if !pinned.is_empty() => pinned.clone(),
            _ => post.candidates.clone(),
        };

        let Some(fetched) =
            until_cancelled(&cancel, self.fetch_first(&candidates, post.message_id)).await
        else {
            return Ok(Outcome::Cancelled);
        };
        let (chosen, message) = fetched?;

        let key = ItemKey::new(chosen, post.message_id);
        if self.dedup.is_recent(&key) {
            tracing::debug!(item = %key, "served from dedup cache");
            return Ok(Outcome::Skipped(SkipReason::Cached));
        }

        let Some(guard) = until_cancelled(&cancel, self.locks.acquire(key.clone())).await else {
            return Ok(Outcome::Cancelled);
        };
        // Whoever held the lock before us may have just delivered this item.
        if self.dedup.is_recent(&key) {
            return Ok(Outcome::Skipped(SkipReason::Cached));
        }

        tracing::info!(url = %url, item = %key, "downloading post");
        let outcome = self.deliver(&req, &candidates, message).await;
        if outcome == Outcome::Downloaded {
            self.dedup.mark_downloaded(key);
        }
        guard.release();
        Ok(outcome)
    }

    async fn fetch_first(
        &self,
        candidates: &[ChatCandidate],
        message_id: i32,
    ) -> Result<(ChatCandidate, RemoteMessage)> {
        let mut last_err = None;
        for candidate in candidates {
            match self.source.fetch(candidate, message_id).await {
                Ok(Some(message)) => return Ok((candidate.clone(), message)),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(chat = %candidate, message_id, error = %e, "candidate failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            Error::service(
                ServiceErrorKind::NotFound,
                "Failed to fetch message with any chat id variant",
            )
        }))
    }

    async fn deliver(
        &self,
        req: &ItemRequest,
        candidates: &[ChatCandidate],
        message: RemoteMessage,
    ) -> Outcome {
        let work_dir = self
            .settings
            .download_dir
            .join(format!("{}-{}", req.chat.0, req.trigger.0));

        if message.grouped_id.is_some() {
            let ctx = GroupContext {
                chat: req.chat,
                work_dir: work_dir.clone(),
                cancel: req.cancel.clone(),
            };
            let result = until_cancelled(&req.cancel, self.groups.process(&ctx, &message)).await;
            remove_dir(&work_dir).await;
            return match result {
                None => Outcome::Cancelled,
                Some(Ok(true)) => Outcome::Downloaded,
                Some(Ok(false)) => Outcome::Skipped(SkipReason::NoMedia),
                Some(Err(e)) => {
                    tracing::error!(error = %e, "media group error");
                    Outcome::Failed(e.to_string())
                }
            };
        }

        if let Some(media) = message.media.clone() {
            let outcome = self
                .deliver_media(req, candidates, message, &media, &work_dir)
                .await;
            remove_dir(&work_dir).await;
            return outcome;
        }

        if let Some(html) = message.rendered_text(self.messenger.capabilities().max_message_len) {
            return match until_cancelled(&req.cancel, self.messenger.send_html(req.chat, &html)).await
            {
                None => Outcome::Cancelled,
                Some(Ok(_)) => Outcome::Downloaded,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "reply text error");
                    Outcome::Failed(e.to_string())
                }
            };
        }

        Outcome::Skipped(SkipReason::Empty)
    }

    async fn deliver_media(
        &self,
        req: &ItemRequest,
        candidates: &[ChatCandidate],
        message: RemoteMessage,
        media: &RemoteMedia,
        work_dir: &Path,
    ) -> Outcome {
        if let Some(size) = media.info.size {
            if !self
                .settings
                .sizes
                .check(size, self.messenger.as_ref(), req.chat)
                .await
            {
                return Outcome::Skipped(SkipReason::TooLarge);
            }
        }

        if let Err(e) = tokio::fs::create_dir_all(work_dir).await {
            return Outcome::Failed(e.to_string());
        }
        let dest = work_dir.join(file_name_for(message.id, &media.info));

        let status = match self
            .messenger
            .send_html(req.chat, "<b>📥 Downloading Progress...</b>")
            .await
        {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(error = %e, "could not create progress message");
                None
            }
        };

        let outcome = self
            .transfer_with_retries(req, candidates, message, &dest, status)
            .await;

        if let Some(status) = status {
            if let Err(e) = self.messenger.delete_message(status).await {
                tracing::debug!(error = %e, "could not delete progress message");
            }
        }
        outcome
    }

    async fn transfer_with_retries(
        &self,
        req: &ItemRequest,
        candidates: &[ChatCandidate],
        mut message: RemoteMessage,
        dest: &Path,
        status: Option<MessageRef>,
    ) -> Outcome {
        let attempts = self.settings.retries + 1;
        let mut last_err = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                // File references expire; a fresh copy of the message carries new ones.
                match until_cancelled(&req.cancel, self.refetch(candidates, message.id)).await {
                    None => return Outcome::Cancelled,
                    Some(Some(fresh)) => message = fresh,
                    Some(None) => {}
                }
            }

            let label = match req.mode {
                Mode::Single => "📥 Downloading Progress".to_string(),
                Mode::Batch => format!("📥 Downloading Progress (Attempt {attempt}/{attempts})"),
            };

            match self.transfer_once(req, &message, dest, status, &label).await {
                Attempt::Delivered => return Outcome::Downloaded,
                Attempt::Cancelled => {
                    tracing::info!(url = %req.url, "download cancelled");
                    return Outcome::Cancelled;
                }
                Attempt::Failed(e) => {
                    tracing::info!(url = %req.url, attempt, error = %e, "download attempt failed");
                    last_err = Some(e);
                }
            }

            if attempt < attempts {
                let wait = self.settings.backoff(attempt);
                if until_cancelled(&req.cancel, tokio::time::sleep(wait))
                    .await
                    .is_none()
                {
                    return Outcome::Cancelled;
                }
            }
        }

        match last_err {
            Some(e) if e.is_transient() => Outcome::Skipped(SkipReason::Transient(e.to_string())),
            Some(e) => Outcome::Failed(e.to_string()),
            None => Outcome::Failed("Unknown error".to_string()),
        }
    }

    async fn refetch(&self, candidates: &[ChatCandidate], message_id: i32) -> Option<RemoteMessage> {
        for candidate in candidates {
            if let Ok(Some(m)) = self.source.fetch(candidate, message_id).await {
                if m.media.is_some() {
                    return Some(m);
                }
            }
        }
        None
    }

    async fn transfer_once(
        &self,
        req: &ItemRequest,
        message: &RemoteMessage,
        dest: &Path,
        status: Option<MessageRef>,
        label: &str,
    ) -> Attempt {
        let Some(media) = &message.media else {
            return Attempt::Failed(Error::service(
                ServiceErrorKind::MediaEmpty,
                "MEDIA_EMPTY: message has no media",
            ));
        };

        let progress = Arc::new(TransferProgress::new());
        let ticker = status.map(|s| {
            StatusTicker::start(
                Arc::clone(&self.messenger),
                s,
                label.to_string(),
                Arc::clone(&progress),
                self.settings.progress_interval,
            )
        });
        let downloaded =
            until_cancelled(&req.cancel, self.transfer.download(message, dest, &progress)).await;
        drop(ticker);

        let path = match downloaded {
            None => {
                remove_file(dest).await;
                return Attempt::Cancelled;
            }
            Some(Err(e)) => {
                remove_file(dest).await;
                return Attempt::Failed(e);
            }
            Some(Ok(path)) => path,
        };
        tracing::info!(path = %path.display(), "downloaded media");

        if let Some(status) = status {
            let _ = self
                .messenger
                .edit_html(status, "<b>📤 Uploading...</b>")
                .await;
        }

        let caps = self.messenger.capabilities();
        let kind = media.info.kind.upload_kind();
        let outgoing = OutgoingMedia {
            kind,
            path: path.clone(),
            caption: message.rendered_text(caps.max_caption_len),
        };
        let _ = self.messenger.send_chat_action(req.chat, kind.chat_action()).await;
        let sent = until_cancelled(&req.cancel, self.messenger.send_media(req.chat, &outgoing)).await;
        remove_file(&path).await;

        match sent {
            None => Attempt::Cancelled,
            Some(Ok(_)) => Attempt::Delivered,
            Some(Err(e)) => Attempt::Failed(e),
        }
    }
}

async fn remove_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "cleanup failed");
        }
    }
}

async fn remove_dir(path: &Path) {
    let _ = tokio::fs::remove_dir_all(path).await;
}
