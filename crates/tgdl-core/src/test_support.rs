//! In-memory fakes for the ports, shared by the unit tests.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    album::AlbumRelay,
    batch::{BatchController, BatchSettings},
    dedup::DedupCache,
    domain::{ChatCandidate, ChatId, MessageId, MessageRef},
    errors::{Error, ServiceErrorKind},
    fetch::{ItemPipeline, PipelineSettings},
    media::{MediaHandle, MediaInfo, MediaKind, RemoteMedia, RemoteMessage},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, MessagingCapabilities, OutgoingMedia},
    },
    ports::{MediaTransfer, MessageSource},
    progress::TransferProgress,
    tasks::{CancelSignal, TaskTracker},
    Result,
};

pub fn chan() -> ChatCandidate {
    ChatCandidate::Username("chan".to_string())
}

/// Poll `cond` until it holds; panics after a few seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[derive(Default)]
pub struct FakeSource {
    messages: Mutex<HashMap<(ChatCandidate, i32), RemoteMessage>>,
    broken_chats: Mutex<HashMap<ChatCandidate, ServiceErrorKind>>,
    panics: Mutex<HashSet<i32>>,
    gates: Mutex<HashMap<i32, Arc<Notify>>>,
    fetches: Mutex<HashMap<i32, usize>>,
    warmed: Mutex<Vec<ChatCandidate>>,
}

impl FakeSource {
    fn add(&self, chat: ChatCandidate, id: i32, grouped_id: Option<i64>, text: &str, media: Option<MediaInfo>) {
        let message = RemoteMessage {
            chat: chat.clone(),
            id,
            grouped_id,
            text: text.to_string(),
            html: None,
            media: media.map(|info| RemoteMedia {
                info,
                handle: MediaHandle::empty(),
            }),
        };
        self.messages.lock().unwrap().insert((chat, id), message);
    }

    pub fn add_text(&self, chat: ChatCandidate, id: i32, text: &str) {
        self.add(chat, id, None, text, None);
    }

    /// Text post that also carries its entity-rendered HTML.
    pub fn add_formatted(&self, chat: ChatCandidate, id: i32, text: &str, html: &str) {
        self.add(chat.clone(), id, None, text, None);
        if let Some(m) = self.messages.lock().unwrap().get_mut(&(chat, id)) {
            m.html = Some(html.to_string());
        }
    }

    pub fn add_media(&self, chat: ChatCandidate, id: i32, kind: MediaKind, caption: &str) {
        self.add(chat, id, None, caption, Some(media_info(kind, Some(1024))));
    }

    pub fn add_media_sized(&self, chat: ChatCandidate, id: i32, kind: MediaKind, size: u64) {
        self.add(chat, id, None, "", Some(media_info(kind, Some(size))));
    }

    pub fn add_group_member(
        &self,
        chat: ChatCandidate,
        id: i32,
        grouped_id: i64,
        kind: MediaKind,
        caption: &str,
    ) {
        self.add(chat, id, Some(grouped_id), caption, Some(media_info(kind, Some(1024))));
    }

    pub fn fail_chat(&self, chat: ChatCandidate, kind: ServiceErrorKind) {
        self.broken_chats.lock().unwrap().insert(chat, kind);
    }

    pub fn panic_on(&self, id: i32) {
        self.panics.lock().unwrap().insert(id);
    }

    /// The next fetch of `id` blocks until the returned `Notify` fires.
    pub fn gate(&self, id: i32) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(id, gate.clone());
        gate
    }

    pub fn fetches(&self, id: i32) -> usize {
        self.fetches.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn warmed(&self) -> Vec<ChatCandidate> {
        self.warmed.lock().unwrap().clone()
    }
}

fn media_info(kind: MediaKind, size: Option<u64>) -> MediaInfo {
    MediaInfo {
        kind,
        file_name: None,
        size,
        mime: None,
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn fetch(&self, chat: &ChatCandidate, message_id: i32) -> Result<Option<RemoteMessage>> {
        *self.fetches.lock().unwrap().entry(message_id).or_default() += 1;

        let gate = self.gates.lock().unwrap().remove(&message_id);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let should_panic = self.panics.lock().unwrap().contains(&message_id);
        if should_panic {
            panic!("fake source blew up on {message_id}");
        }

        let broken = self.broken_chats.lock().unwrap().get(chat).copied();
        if let Some(kind) = broken {
            return Err(Error::service(kind, format!("{kind:?} for {chat}")));
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&(chat.clone(), message_id))
            .cloned())
    }

    async fn fetch_group(&self, message: &RemoteMessage) -> Result<Vec<RemoteMessage>> {
        let mut out: Vec<RemoteMessage> = self
            .messages
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.chat == message.chat && m.grouped_id == message.grouped_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.id);
        Ok(out)
    }

    async fn warm_up(&self, chat: &ChatCandidate) -> Result<()> {
        self.warmed.lock().unwrap().push(chat.clone());
        Ok(())
    }
}

/// Writes a small file per download; failures and latency are scripted per message id.
#[derive(Default)]
pub struct FakeTransfer {
    delay: Duration,
    /// message id -> (error kind, failures left)
    failures: Mutex<HashMap<i32, (ServiceErrorKind, usize)>>,
    attempts: Mutex<HashMap<i32, usize>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeTransfer {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail_always(&self, id: i32, kind: ServiceErrorKind) {
        self.fail_times(id, kind, usize::MAX);
    }

    pub fn fail_times(&self, id: i32, kind: ServiceErrorKind, times: usize) {
        self.failures.lock().unwrap().insert(id, (kind, times));
    }

    pub fn attempts(&self, id: i32) -> usize {
        self.attempts.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTransfer for FakeTransfer {
    async fn download(
        &self,
        message: &RemoteMessage,
        dest: &Path,
        progress: &TransferProgress,
    ) -> Result<PathBuf> {
        *self.attempts.lock().unwrap().entry(message.id).or_default() += 1;

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let failure = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&message.id) {
                Some((kind, left)) if *left > 0 => {
                    *left -= 1;
                    Some(*kind)
                }
                _ => None,
            }
        };
        if let Some(kind) = failure {
            let text = match kind {
                ServiceErrorKind::FileReferenceExpired => "FILE_REFERENCE_EXPIRED".to_string(),
                other => format!("{other:?}"),
            };
            return Err(Error::service(kind, text));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, b"data").await?;
        progress.update(4, 4);
        Ok(dest.to_path_buf())
    }
}

#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    sends: Mutex<Vec<(ChatId, String)>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    deletes: Mutex<Vec<MessageRef>>,
    media: Mutex<Vec<(ChatId, OutgoingMedia)>>,
    albums: Mutex<Vec<Vec<OutgoingMedia>>>,
}

impl FakeMessenger {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1),
            ..Default::default()
        }
    }

    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        let id = *guard;
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(id),
        }
    }

    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sends.lock().unwrap().clone()
    }

    /// Sent texts, minus the transient progress messages.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|(_, t)| t)
            .filter(|t| !t.contains("Downloading Progress"))
            .collect()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<MessageRef> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn media(&self) -> Vec<(ChatId, OutgoingMedia)> {
        self.media.lock().unwrap().clone()
    }

    pub fn albums(&self) -> Vec<Vec<OutgoingMedia>> {
        self.albums.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities::default()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.sends.lock().unwrap().push((chat_id, html.to_string()));
        Ok(self.alloc(chat_id))
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.edits.lock().unwrap().push((msg, html.to_string()));
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.deletes.lock().unwrap().push(msg);
        Ok(())
    }

    async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
        Ok(())
    }

    async fn send_media(&self, chat_id: ChatId, media: &OutgoingMedia) -> Result<MessageRef> {
        self.media.lock().unwrap().push((chat_id, media.clone()));
        Ok(self.alloc(chat_id))
    }

    async fn send_album(&self, _chat_id: ChatId, items: &[OutgoingMedia]) -> Result<()> {
        self.albums.lock().unwrap().push(items.to_vec());
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        _path: &Path,
        _caption: Option<&str>,
    ) -> Result<MessageRef> {
        Ok(self.alloc(chat_id))
    }
}

/// Pipeline + batch controller wired to fakes, with no delays unless asked.
pub struct Harness {
    pub source: Arc<FakeSource>,
    pub transfer: Arc<FakeTransfer>,
    pub messenger: Arc<FakeMessenger>,
    pub pipeline: Arc<ItemPipeline>,
    pub tasks: Arc<TaskTracker>,
    pub cancel: Arc<CancelSignal>,
    pub batch: BatchController,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(FakeTransfer::default(), Duration::ZERO)
    }

    pub fn with_transfer_delay(delay: Duration) -> Self {
        Self::build(FakeTransfer::with_delay(delay), Duration::ZERO)
    }

    pub fn with_item_delay(delay: Duration) -> Self {
        Self::build(FakeTransfer::default(), delay)
    }

    fn build(transfer: FakeTransfer, item_delay: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::default());
        let transfer = Arc::new(transfer);
        let messenger = Arc::new(FakeMessenger::new());

        let groups = Arc::new(AlbumRelay::new(
            source.clone(),
            transfer.clone(),
            messenger.clone(),
        ));
        let settings = PipelineSettings {
            backoff_step: Duration::ZERO,
            backoff_cap: Duration::ZERO,
            download_dir: dir.path().to_path_buf(),
            progress_interval: Duration::from_millis(20),
            ..PipelineSettings::default()
        };
        let pipeline = Arc::new(ItemPipeline::new(
            source.clone(),
            transfer.clone(),
            groups,
            messenger.clone(),
            DedupCache::new(Duration::from_secs(900), 200),
            settings,
        ));

        let tasks = Arc::new(TaskTracker::new());
        let cancel = Arc::new(CancelSignal::new());
        let batch = BatchController::new(
            pipeline.clone(),
            messenger.clone(),
            tasks.clone(),
            cancel.clone(),
            BatchSettings { item_delay },
        );

        Self {
            source,
            transfer,
            messenger,
            pipeline,
            tasks,
            cancel,
            batch,
            dir,
        }
    }
}
