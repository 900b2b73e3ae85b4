use std::{sync::Arc, time::Instant};

use teloxide::{
    dispatching::Dispatcher,
    dptree,
    prelude::*,
    types::{BotCommand, Update},
};

use tgdl_core::{
    album::AlbumRelay,
    batch::{BatchController, BatchSettings},
    config::Config,
    dedup::DedupCache,
    fetch::{ItemPipeline, PipelineSettings},
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    ports::{MediaTransfer, MessageSource},
    tasks::{self, CancelSignal, TaskTracker},
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub pipeline: Arc<ItemPipeline>,
    pub batch: BatchController,
    pub tasks: Arc<TaskTracker>,
    pub cancel: Arc<CancelSignal>,
    pub started: Instant,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        source: Arc<dyn MessageSource>,
        transfer: Arc<dyn MediaTransfer>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        let groups = Arc::new(AlbumRelay::new(
            source.clone(),
            transfer.clone(),
            messenger.clone(),
        ));
        let pipeline = Arc::new(ItemPipeline::new(
            source,
            transfer,
            groups,
            messenger.clone(),
            DedupCache::new(cfg.dedup_ttl, cfg.dedup_max_entries),
            PipelineSettings::from_config(&cfg),
        ));
        let tasks = Arc::new(TaskTracker::new());
        let cancel = Arc::new(CancelSignal::new());
        let batch = BatchController::new(
            pipeline.clone(),
            messenger.clone(),
            tasks.clone(),
            cancel.clone(),
            BatchSettings::from_config(&cfg),
        );

        Self {
            cfg,
            messenger,
            pipeline,
            batch,
            tasks,
            cancel,
            started: Instant::now(),
        }
    }
}

pub fn bot_commands() -> Vec<BotCommand> {
    [
        ("start", "Welcome message"),
        ("help", "How to use the bot"),
        ("dl", "Download a single post"),
        ("bdl", "Batch download a range of posts"),
        ("pause", "Pause the running batch"),
        ("continue", "Resume a paused batch"),
        ("killall", "Cancel every running download"),
        ("logs", "Send the log file"),
        ("stats", "Bot and batch status"),
    ]
    .into_iter()
    .map(|(cmd, desc)| BotCommand::new(cmd, desc))
    .collect()
}

pub async fn run_polling(
    cfg: Arc<Config>,
    source: Arc<dyn MessageSource>,
    transfer: Arc<dyn MediaTransfer>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(bot = %me.username(), "bot started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed"),
    }
    tracing::info!(
        download_dir = %cfg.download_dir.display(),
        allowed_users = cfg.allowed_users.len(),
        "configuration loaded"
    );

    if let Err(e) = bot.set_my_commands(bot_commands()).await {
        tracing::warn!(error = %e, "could not register bot commands");
    }

    // Progress edits and uploads go through the pacer; the adapter still retries on RetryAfter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let state = Arc::new(AppState::new(cfg, source, transfer, messenger));

    let handler = dptree::entry()
        .inspect(|u: Update, state: Arc<AppState>| {
            if state.cfg.debug_updates {
                tracing::info!(update = ?u, "incoming update");
            }
        })
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state.clone()])
        .build();

    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        match token.shutdown() {
            Ok(stopped) => stopped.await,
            Err(e) => tracing::warn!(error = %e, "dispatcher was not running"),
        }
    });

    dispatcher.dispatch().await;
    tracing::info!("dispatcher stopped");

    // Let in-flight downloads remove their scratch files and status messages.
    let aborted = tasks::shutdown(&state.tasks, &state.cancel, state.cfg.shutdown_grace).await;
    tracing::info!(aborted, "shutdown complete");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        tracing::info!("received SIGINT");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                tracing::info!("received SIGTERM");
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_user_command() {
        let names: Vec<String> = bot_commands().into_iter().map(|c| c.command).collect();
        assert_eq!(
            names,
            ["start", "help", "dl", "bdl", "pause", "continue", "killall", "logs", "stats"]
        );
    }
}
