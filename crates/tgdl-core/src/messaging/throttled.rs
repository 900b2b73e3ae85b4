//! Outbound pacing for the Bot API.
//!
//! A download bot mostly edits one status message per transfer and then
//! uploads into the same chat, so spacing is tracked per chat with a tighter
//! budget for groups. A stalled transfer re-renders the same progress text;
//! those edits are dropped here instead of costing a request (and a
//! "message is not modified" error).

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, MessagingCapabilities, OutgoingMedia},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Spacing between any two calls (~30/s overall).
    pub global_interval: Duration,
    /// Spacing within one private chat (~1/s).
    pub private_interval: Duration,
    /// Spacing within one group or channel (~20/min).
    pub group_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_interval: Duration::from_millis(35),
            private_interval: Duration::from_millis(1000),
            group_interval: Duration::from_millis(3000),
        }
    }
}

impl ThrottleConfig {
    fn chat_interval(&self, chat: ChatId) -> Duration {
        // Groups, supergroups and channels have negative ids.
        if chat.0 < 0 {
            self.group_interval
        } else {
            self.private_interval
        }
    }
}

#[derive(Default)]
struct Schedule {
    global_next: Option<Instant>,
    chat_next: HashMap<ChatId, Instant>,
    /// Last text written to each live status message.
    last_edit: HashMap<MessageRef, String>,
}

pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    schedule: Mutex<Schedule>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            schedule: Mutex::new(Schedule::default()),
        }
    }

    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Book the next free slot for `chat` and return how long to wait for it.
    fn reserve(&self, chat: ChatId) -> Duration {
        let now = Instant::now();
        let mut s = self.schedule();

        let global = s.global_next.map_or(now, |t| t.max(now));
        let per_chat = s.chat_next.get(&chat).map_or(now, |t| (*t).max(now));
        let slot = global.max(per_chat);

        s.global_next = Some(slot + self.cfg.global_interval);
        s.chat_next.insert(chat, slot + self.cfg.chat_interval(chat));
        // Chats idle past their slot need no entry.
        s.chat_next.retain(|_, next| *next > now);

        slot.saturating_duration_since(now)
    }

    async fn pace(&self, chat: ChatId) {
        let wait = self.reserve(chat);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.pace(chat_id).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        if self.schedule().last_edit.get(&msg).is_some_and(|last| last == html) {
            return Ok(());
        }
        self.pace(msg.chat_id).await;
        self.inner.edit_html(msg, html).await?;
        self.schedule().last_edit.insert(msg, html.to_string());
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.schedule().last_edit.remove(&msg);
        self.pace(msg.chat_id).await;
        self.inner.delete_message(msg).await
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.pace(chat_id).await;
        self.inner.send_chat_action(chat_id, action).await
    }

    async fn send_media(&self, chat_id: ChatId, media: &OutgoingMedia) -> Result<MessageRef> {
        self.pace(chat_id).await;
        self.inner.send_media(chat_id, media).await
    }

    async fn send_album(&self, chat_id: ChatId, items: &[OutgoingMedia]) -> Result<()> {
        self.pace(chat_id).await;
        self.inner.send_album(chat_id, items).await
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<MessageRef> {
        self.pace(chat_id).await;
        self.inner.send_document(chat_id, path, caption).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use crate::test_support::FakeMessenger;

    fn throttled(cfg: ThrottleConfig) -> (Arc<FakeMessenger>, ThrottledMessenger) {
        let fake = Arc::new(FakeMessenger::new());
        let messenger = ThrottledMessenger::new(fake.clone(), cfg);
        (fake, messenger)
    }

    fn unpaced() -> ThrottleConfig {
        ThrottleConfig {
            global_interval: Duration::ZERO,
            private_interval: Duration::ZERO,
            group_interval: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn groups_get_the_wider_spacing() {
        let (_, m) = throttled(ThrottleConfig {
            global_interval: Duration::ZERO,
            private_interval: Duration::from_secs(1),
            group_interval: Duration::from_secs(10),
        });

        assert!(m.reserve(ChatId(-100)).is_zero());
        let group_wait = m.reserve(ChatId(-100));
        assert!(group_wait > Duration::from_secs(9), "got {group_wait:?}");

        // other chats are not held back by the group
        assert!(m.reserve(ChatId(7)).is_zero());
        let private_wait = m.reserve(ChatId(7));
        assert!(private_wait > Duration::ZERO && private_wait <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn global_spacing_applies_across_chats() {
        let (_, m) = throttled(ThrottleConfig {
            global_interval: Duration::from_secs(10),
            ..unpaced()
        });
        assert!(m.reserve(ChatId(1)).is_zero());
        assert!(m.reserve(ChatId(2)) > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn repeated_progress_text_is_not_resent() {
        let (fake, m) = throttled(unpaced());
        let status = MessageRef {
            chat_id: ChatId(1),
            message_id: MessageId(9),
        };

        m.edit_html(status, "10%").await.unwrap();
        m.edit_html(status, "10%").await.unwrap();
        m.edit_html(status, "20%").await.unwrap();
        assert_eq!(fake.edits().len(), 2);

        // a deleted message forgets its last text
        m.delete_message(status).await.unwrap();
        m.edit_html(status, "20%").await.unwrap();
        assert_eq!(fake.edits().len(), 3);
    }
}
