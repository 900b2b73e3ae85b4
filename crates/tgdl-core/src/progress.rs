//! Transfer progress counters and the ticker that mirrors them into a status message.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::task::JoinHandle;

use crate::{domain::MessageRef, formatting, messaging::port::MessagingPort};

/// Bytes moved so far for one transfer. Written by the adapter, read by the ticker.
#[derive(Debug)]
pub struct TransferProgress {
    done: AtomicU64,
    total: AtomicU64,
    started: Instant,
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self {
            done: AtomicU64::new(0),
            total: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl TransferProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, done: u64, total: u64) {
        self.done.store(done, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Periodically edits `status` with the state of `progress` until stopped.
///
/// Edits are skipped while nothing moved, so an idle transfer costs no API calls.
pub struct StatusTicker {
    handle: JoinHandle<()>,
}

impl StatusTicker {
    pub fn start(
        messenger: Arc<dyn MessagingPort>,
        status: MessageRef,
        label: String,
        progress: Arc<TransferProgress>,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut last_done = 0;
            loop {
                tokio::time::sleep(interval).await;
                let done = progress.done();
                if done == last_done {
                    continue;
                }
                last_done = done;
                let text =
                    formatting::transfer_status(&label, done, progress.total(), progress.elapsed());
                if let Err(e) = messenger.edit_html(status, &text).await {
                    tracing::debug!(error = %e, "progress edit failed");
                }
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for StatusTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeMessenger;
    use crate::domain::{ChatId, MessageId};

    #[tokio::test]
    async fn ticker_edits_only_when_progress_moves() {
        let messenger = Arc::new(FakeMessenger::new());
        let status = MessageRef {
            chat_id: ChatId(1),
            message_id: MessageId(9),
        };
        let progress = Arc::new(TransferProgress::new());
        let ticker = StatusTicker::start(
            messenger.clone(),
            status,
            "📥 Downloading".to_string(),
            progress.clone(),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(messenger.edits().is_empty());

        progress.update(10, 100);
        tokio::time::sleep(Duration::from_millis(50)).await;
        ticker.stop();

        let edits = messenger.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].0, status);
        assert!(edits[0].1.contains("10.0%"));
    }
}
