//! Formatting utilities (Telegram HTML, sizes, durations, progress, batch reports).

use std::time::Duration;

use crate::batch::JobSnapshot;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Escape `text` after cutting it to `max_chars` characters.
///
/// Cutting happens before escaping so an entity is never split.
pub fn escape_truncated(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return escape_html(text);
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", escape_html(&cut))
}

/// `1536` → `1.50 KiB`.
pub fn readable_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// `3725s` → `1h 2m 5s`; zero components are omitted.
pub fn readable_time(d: Duration) -> String {
    let mut secs = d.as_secs();
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3600;
    secs %= 3600;
    let minutes = secs / 60;
    secs %= 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }
    parts.join(" ")
}

/// Ten-cell bar for `done / total`.
pub fn progress_bar(done: u64, total: u64) -> String {
    const CELLS: u64 = 10;
    let filled = if total == 0 {
        0
    } else {
        (done.min(total) * CELLS / total) as usize
    };
    format!(
        "[{}{}]",
        "█".repeat(filled),
        "░".repeat(CELLS as usize - filled)
    )
}

/// Body of the status message edited while a file transfers.
pub fn transfer_status(label: &str, done: u64, total: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64().max(0.001);
    let speed = (done as f64 / secs) as u64;
    let percent = if total == 0 {
        0.0
    } else {
        done.min(total) as f64 * 100.0 / total as f64
    };
    let eta = if speed == 0 || total <= done {
        "-".to_string()
    } else {
        readable_time(Duration::from_secs((total - done) / speed))
    };

    format!(
        "<b>{}</b>\n{} {percent:.1}%\n<b>Size:</b> {} / {}\n<b>Speed:</b> {}/s\n<b>ETA:</b> {eta}\n<b>Elapsed:</b> {}",
        escape_html(label),
        progress_bar(done, total),
        readable_size(done),
        readable_size(total),
        readable_size(speed),
        readable_time(elapsed),
    )
}

fn counters_line(job: &JobSnapshot) -> String {
    format!(
        "Downloaded: <code>{}</code> | Skipped: <code>{}</code> | Failed: <code>{}</code>",
        job.downloaded, job.skipped, job.failed
    )
}

pub fn batch_started(job: &JobSnapshot) -> String {
    format!(
        "📥 <b>Downloading posts {}–{}…</b> (job: <code>{}</code>)",
        job.start_id,
        job.end_id,
        escape_html(&job.name)
    )
}

pub fn batch_resumed(job: &JobSnapshot) -> String {
    format!(
        "▶️ <b>Resuming <code>{}</code></b> at <code>{}</code> (remaining {})",
        escape_html(&job.name),
        job.next_id,
        job.remaining()
    )
}

pub fn batch_paused(job: &JobSnapshot) -> String {
    let name = escape_html(&job.name);
    format!(
        "<b>⏸️ Batch Paused</b>\nName: <code>{name}</code>\nNext ID: <code>{}</code> of <code>{}</code>\n{}\nResume with <code>/continue {name}</code>",
        job.next_id,
        job.end_id,
        counters_line(job)
    )
}

pub fn batch_completed(job: &JobSnapshot) -> String {
    format!(
        "<b>✅ Batch Process Complete!</b>\n━━━━━━━━━━━━━━━━━━━\n📥 <b>Downloaded</b> : <code>{}</code> post(s)\n⏭️ <b>Skipped</b>    : <code>{}</code> (no content)\n❌ <b>Failed</b>     : <code>{}</code> error(s)",
        job.downloaded, job.skipped, job.failed
    )
}

pub fn batch_cancelled(job: &JobSnapshot) -> String {
    format!(
        "<b>⛔ Batch <code>{}</code> cancelled</b> at <code>{}</code>\n{}",
        escape_html(&job.name),
        job.next_id,
        counters_line(job)
    )
}

/// One line per job for `/stats`.
pub fn job_line(job: &JobSnapshot) -> String {
    format!(
        "<code>{}</code> {}–{} next <code>{}</code> ({}) ↓{} ⏭{} ✗{}",
        escape_html(&job.name),
        job.start_id,
        job.end_id,
        job.next_id,
        job.progress(),
        job.downloaded,
        job.skipped,
        job.failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::JobState;

    fn snapshot() -> JobSnapshot {
        JobSnapshot {
            name: "pause1".to_string(),
            state: JobState::Paused,
            pause_requested: false,
            start_id: 100,
            end_id: 120,
            next_id: 105,
            downloaded: 3,
            skipped: 1,
            failed: 1,
        }
    }

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn truncation_never_splits_entities() {
        assert_eq!(escape_truncated("a<b", 10), "a&lt;b");
        assert_eq!(escape_truncated("<<<<<", 3), "&lt;&lt;…");
    }

    #[test]
    fn sizes_and_times_are_readable() {
        assert_eq!(readable_size(512), "512 B");
        assert_eq!(readable_size(1536), "1.50 KiB");
        assert_eq!(readable_size(50 * 1024 * 1024), "50.00 MiB");
        assert_eq!(readable_time(Duration::from_secs(0)), "0s");
        assert_eq!(readable_time(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(readable_time(Duration::from_secs(90_000)), "1d 1h");
    }

    #[test]
    fn progress_bar_is_clamped() {
        assert_eq!(progress_bar(0, 0), "[░░░░░░░░░░]");
        assert_eq!(progress_bar(5, 10), "[█████░░░░░]");
        assert_eq!(progress_bar(50, 10), "[██████████]");
    }

    #[test]
    fn transfer_status_mentions_label_and_sizes() {
        let s = transfer_status("📥 Downloading", 512, 1024, Duration::from_secs(1));
        assert!(s.contains("📥 Downloading"));
        assert!(s.contains("50.0%"));
        assert!(s.contains("512 B / 1.00 KiB"));
    }

    #[test]
    fn batch_reports_carry_resume_point_and_counters() {
        let job = snapshot();
        let paused = batch_paused(&job);
        assert!(paused.contains("Next ID: <code>105</code> of <code>120</code>"));
        assert!(paused.contains("/continue pause1"));
        assert!(paused.contains("Downloaded: <code>3</code> | Skipped: <code>1</code> | Failed: <code>1</code>"));

        assert!(batch_resumed(&job).contains("remaining 16"));
        assert!(job_line(&job).contains("(5/21)"));
    }
}
