use std::sync::Arc;

use teloxide::prelude::*;

use tgdl_core::{
    batch::{BatchStart, BatchStatus},
    domain::{ChatId, MessageId, UserId},
    formatting::{escape_html, job_line},
    link::{find_post_link, is_post_link},
    system,
    tasks::kill_all,
    Error,
};

use crate::router::AppState;

use super::download::spawn_single;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Whole remainder, so `/pause my batch` names the job `my batch`.
fn optional_arg(arg: &str) -> Option<&str> {
    Some(arg.trim()).filter(|a| !a.is_empty())
}

/// Outside private chats the command may belong to another bot.
fn unknown_command_reply(cmd: &str, private: bool) -> Option<String> {
    private.then(|| {
        format!(
            "Unknown command: <code>/{}</code>. Send /help for the list.",
            escape_html(cmd)
        )
    })
}

const WELCOME: &str = "👋 <b>Welcome to Media Downloader Bot!</b>\n\n\
I can grab photos, videos, audio, and documents from any Telegram post.\n\
Just send me a link (paste it directly or use <code>/dl &lt;link&gt;</code>),\n\
or reply to a message with <code>/dl</code>.\n\n\
ℹ️ Use <code>/help</code> to view all commands and examples.\n\
🔒 Make sure the user client is part of the chat.\n\n\
Ready? Send me a Telegram post link!";

const HELP: &str = "💡 <b>Media Downloader Bot Help</b>\n\n\
➤ <b>Download Media</b>\n\
   – Send <code>/dl &lt;post_URL&gt;</code> <b>or</b> just paste a Telegram post link.\n\n\
➤ <b>Batch Download</b>\n\
   – Send <code>/bdl start_link end_link</code> to grab a series of posts in one go.\n\
     💡 Example: <code>/bdl https://t.me/mychannel/100 https://t.me/mychannel/120</code>\n\
   – <code>/pause [name]</code> stops after the current post, <code>/continue [name]</code> resumes it.\n\n\
➤ <b>Requirements</b>\n\
   – Make sure the user client is part of the chat.\n\n\
➤ <b>If the bot hangs</b>\n\
   – Send <code>/killall</code> to cancel any pending downloads.\n\n\
➤ <b>Command Summary</b>\n\
   • <code>/start</code> – Welcome &amp; basic usage.\n\
   • <code>/help</code> – This help message.\n\
   • <code>/dl &lt;post_URL&gt;</code> – Download single post media/text.\n\
   • <code>/bdl &lt;start_link&gt; &lt;end_link&gt;</code> – Batch range download.\n\
   • <code>/pause [name]</code> / <code>/continue [name]</code> – Pause or resume a batch.\n\
   • <code>/killall</code> – Cancel all active downloads.\n\
   • <code>/logs</code> – Get recent log file.\n\
   • <code>/stats</code> – Runtime &amp; resource stats.";

const BDL_USAGE: &str = "🚀 <b>Batch Download Process</b>\n\
<code>/bdl start_link end_link</code>\n\n\
💡 <b>Example:</b>\n\
<code>/bdl https://t.me/mychannel/100 https://t.me/mychannel/120</code>";

fn error_reply(e: &Error) -> String {
    format!("<b>❌ {}</b>", escape_html(&e.to_string()))
}

/// Both range ends, if `arg` is exactly two post links.
fn batch_args(arg: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = arg.split_whitespace().collect();
    match parts.as_slice() {
        [start, end] if is_post_link(start) && is_post_link(end) => {
            Some((start.to_string(), end.to_string()))
        }
        _ => None,
    }
}

/// The `/stats` batch section.
fn batch_section(status: &BatchStatus) -> String {
    let mut lines = vec!["\n\n<b>📦 Batches</b>".to_string()];
    match &status.running {
        Some(job) => lines.push(format!("Running: {}", job_line(job))),
        None => lines.push("Running: (none)".to_string()),
    }
    if status.paused.is_empty() {
        lines.push("Paused: (none)".to_string());
    } else {
        lines.push("Paused:".to_string());
        lines.extend(status.paused.iter().map(|j| format!("• {}", job_line(j))));
    }
    if let Some(job) = &status.last_finished {
        lines.push(format!("Last finished: {}", job_line(job)));
    }
    lines.join("\n")
}

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);
    let trigger = MessageId(msg.id.0);

    let (cmd, arg) = parse_command(text);
    tracing::debug!(command = %cmd, user_id = user_id.0, chat_id = chat_id.0, "command");

    let reply = |body: String| {
        let messenger = state.messenger.clone();
        async move {
            if let Err(e) = messenger.send_html(chat_id, &body).await {
                tracing::warn!(error = %e, "reply failed");
            }
        }
    };

    match cmd.as_str() {
        "start" => {
            if msg.chat.is_private() {
                reply(WELCOME.to_string()).await;
            } else {
                reply("Send /help in PM for full usage.".to_string()).await;
            }
        }

        "help" => {
            if msg.chat.is_private() {
                reply(HELP.to_string()).await;
            } else {
                reply(format!(
                    "Use /dl &lt;t.me/link&gt; or reply /dl to a link. Full help below (send /help in PM for cleaner view):\n\n{HELP}"
                ))
                .await;
            }
        }

        "dl" => {
            let url = arg.split_whitespace().next().map(str::to_string).or_else(|| {
                msg.reply_to_message()
                    .and_then(|m| m.text().or_else(|| m.caption()))
                    .and_then(find_post_link)
            });
            match url {
                Some(url) => spawn_single(state.clone(), url, chat_id, trigger),
                None => reply("<b>Provide a post URL after the /dl command.</b>".to_string()).await,
            }
        }

        "bdl" => {
            let Some((start_url, end_url)) = batch_args(&arg) else {
                reply(BDL_USAGE.to_string()).await;
                return Ok(());
            };
            let started = state
                .batch
                .start(BatchStart {
                    start_url,
                    end_url,
                    chat: chat_id,
                    trigger,
                    initiator: user_id,
                })
                .await;
            // The runner announces itself; only failures need a reply here.
            if let Err(e) = started {
                tracing::info!(error = %e, "batch rejected");
                reply(error_reply(&e)).await;
            }
        }

        "pause" => match state.batch.pause(user_id, optional_arg(&arg)) {
            Ok(name) => {
                reply(format!(
                    "<b>⏸️ Pause requested.</b> The batch stops after the current post and is saved as <code>{}</code>.",
                    escape_html(&name)
                ))
                .await
            }
            Err(e) => reply(error_reply(&e)).await,
        },

        "continue" => match state.batch.resume(optional_arg(&arg)) {
            Ok(job) => {
                reply(format!(
                    "<b>Resumed <code>{}</code>.</b> Use /pause again to pause.",
                    escape_html(&job.name)
                ))
                .await
            }
            Err(e) => reply(error_reply(&e)).await,
        },

        "killall" => {
            if state.tasks.is_idle() && !state.cancel.is_triggered() {
                reply("<b>No active tasks.</b>".to_string()).await;
                return Ok(());
            }
            reply("<b>⛔ Cancellation requested. Stopping active downloads...</b>".to_string())
                .await;
            let remaining = kill_all(&state.tasks, &state.cancel, state.cfg.killall_grace).await;
            tracing::info!(remaining, "killall finished");
            reply(format!(
                "<b>✅ Cancellation complete. Remaining active tasks: {remaining}.</b>"
            ))
            .await;
        }

        "logs" => {
            let path = state.cfg.log_file.clone();
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                if let Err(e) = state
                    .messenger
                    .send_document(chat_id, &path, Some("<b>Logs</b>"))
                    .await
                {
                    tracing::warn!(error = %e, "sending logs failed");
                    reply(error_reply(&e)).await;
                }
            } else {
                reply("<b>Not exists</b>".to_string()).await;
            }
        }

        "stats" => {
            let stats = system::collect(state.started, &state.cfg.download_dir).await;
            let body = format!(
                "{}{}",
                system::render(&stats),
                batch_section(&state.batch.status())
            );
            reply(body).await;
        }

        _ => {
            if let Some(body) = unknown_command_reply(&cmd, msg.chat.is_private()) {
                reply(body).await;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgdl_core::batch::{JobSnapshot, JobState};

    fn job(name: &str, state: JobState) -> JobSnapshot {
        JobSnapshot {
            name: name.to_string(),
            state,
            pause_requested: false,
            start_id: 1,
            end_id: 10,
            next_id: 4,
            downloaded: 2,
            skipped: 1,
            failed: 0,
        }
    }

    #[test]
    fn parses_command_with_bot_suffix() {
        assert_eq!(
            parse_command("/DL@my_bot  https://t.me/c/1/2"),
            ("dl".to_string(), "https://t.me/c/1/2".to_string())
        );
        assert_eq!(parse_command("/pause"), ("pause".to_string(), String::new()));
        assert_eq!(optional_arg("  my batch "), Some("my batch"));
        assert_eq!(optional_arg("pauseA"), Some("pauseA"));
        assert_eq!(optional_arg("   "), None);
    }

    #[test]
    fn unknown_commands_are_answered_only_in_private() {
        let reply = unknown_command_reply("f<o", true).unwrap();
        assert!(reply.contains("<code>/f&lt;o</code>"));
        assert_eq!(unknown_command_reply("other_bot_cmd", false), None);
    }

    #[test]
    fn batch_args_need_exactly_two_links() {
        assert_eq!(
            batch_args("https://t.me/chan/100 https://t.me/chan/120"),
            Some((
                "https://t.me/chan/100".to_string(),
                "https://t.me/chan/120".to_string()
            ))
        );
        assert_eq!(batch_args("https://t.me/chan/100"), None);
        assert_eq!(batch_args("a b"), None);
    }

    #[test]
    fn batch_section_lists_running_and_paused_jobs() {
        let status = BatchStatus {
            running: Some(job("batch_1", JobState::Running)),
            paused: vec![job("pause1", JobState::Paused)],
            last_finished: None,
        };
        let text = batch_section(&status);
        assert!(text.contains("Running: <code>batch_1</code>"));
        assert!(text.contains("• <code>pause1</code>"));
        assert!(!text.contains("Last finished"));

        let idle = batch_section(&BatchStatus {
            running: None,
            paused: vec![],
            last_finished: Some(job("batch_0", JobState::Completed)),
        });
        assert!(idle.contains("Running: (none)"));
        assert!(idle.contains("Paused: (none)"));
        assert!(idle.contains("Last finished: <code>batch_0</code>"));
    }
}
