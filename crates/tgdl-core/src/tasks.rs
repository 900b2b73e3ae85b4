//! Tracked background tasks and the process-wide cancellation switch.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{
    sync::watch,
    task::{AbortHandle, JoinHandle},
};
use tokio_util::sync::CancellationToken;

/// Re-armable global kill switch.
///
/// Work captures the token current at launch; `trigger` cancels it and
/// `rearm` installs a fresh one for whatever starts next.
#[derive(Debug, Default)]
pub struct CancelSignal {
    current: Mutex<CancellationToken>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.lock().clone()
    }

    pub fn trigger(&self) {
        self.lock().cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.lock().is_cancelled()
    }

    /// Install a fresh token if the current one was cancelled.
    pub fn rearm(&self) {
        let mut tok = self.lock();
        if tok.is_cancelled() {
            *tok = CancellationToken::new();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registry of in-flight tasks. Membership ends when the task finishes,
/// panics or is aborted.
pub struct TaskTracker {
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<u64, AbortHandle>>>,
    count_tx: watch::Sender<usize>,
}

impl Default for TaskTracker {
    fn default() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            count_tx,
        }
    }
}

struct Membership {
    id: u64,
    tasks: Arc<Mutex<HashMap<u64, AbortHandle>>>,
    count_tx: watch::Sender<usize>,
}

impl Drop for Membership {
    fn drop(&mut self) {
        let mut map = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(&self.id);
        self.count_tx.send_replace(map.len());
    }
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let membership = Membership {
            id,
            tasks: Arc::clone(&self.tasks),
            count_tx: self.count_tx.clone(),
        };

        // Hold the map lock across spawn so the task cannot finish (and remove
        // itself) before it is registered.
        let mut map = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let handle = tokio::spawn(async move {
            let _membership = membership;
            fut.await
        });
        map.insert(id, handle.abort_handle());
        self.count_tx.send_replace(map.len());
        handle
    }

    pub fn active(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_idle(&self) -> bool {
        self.active() == 0
    }

    /// Hard-abort everything still registered.
    pub fn abort_all(&self) {
        let map = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for handle in map.values() {
            handle.abort();
        }
    }

    /// Resolves once no tracked task remains.
    pub async fn wait_idle(&self) {
        let mut rx = self.count_tx.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// `/killall`: signal everything, give tasks `grace` to wind down, re-arm.
///
/// Returns how many tracked tasks are still running afterwards.
pub async fn kill_all(tasks: &TaskTracker, cancel: &CancelSignal, grace: Duration) -> usize {
    cancel.trigger();
    tracing::info!(active = tasks.active(), "cancellation requested");

    let _ = tokio::time::timeout(grace, tasks.wait_idle()).await;

    cancel.rearm();
    let remaining = tasks.active();
    tracing::info!(remaining, "cancellation window closed");
    remaining
}

/// Process exit: signal everything, wait up to `grace`, then hard-abort what
/// is left. Unlike [`kill_all`] the signal stays triggered.
///
/// Returns how many tasks had to be aborted.
pub async fn shutdown(tasks: &TaskTracker, cancel: &CancelSignal, grace: Duration) -> usize {
    cancel.trigger();
    tracing::info!(active = tasks.active(), "shutting down");

    if tokio::time::timeout(grace, tasks.wait_idle()).await.is_ok() {
        return 0;
    }
    let stuck = tasks.active();
    tracing::warn!(stuck, "aborting tasks that outlived the shutdown grace");
    tasks.abort_all();
    tasks.wait_idle().await;
    stuck
}
