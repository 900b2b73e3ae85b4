use crate::{domain::ChatId, formatting, messaging::port::MessagingPort};

pub const DEFAULT_MAX_DOWNLOAD: u64 = 2 * 1024 * 1024 * 1024;
/// Bot API ceiling for uploads from local files.
pub const DEFAULT_MAX_UPLOAD: u64 = 50 * 1024 * 1024;

/// File-size gate applied before a transfer starts.
#[derive(Clone, Copy, Debug)]
pub struct SizePolicy {
    pub max_download: u64,
    pub max_upload: u64,
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self {
            max_download: DEFAULT_MAX_DOWNLOAD,
            max_upload: DEFAULT_MAX_UPLOAD,
        }
    }
}

impl SizePolicy {
    /// First limit `size` violates, as `(what, limit)`.
    pub fn violation(&self, size: u64) -> Option<(&'static str, u64)> {
        if size > self.max_download {
            Some(("download", self.max_download))
        } else if size > self.max_upload {
            Some(("upload", self.max_upload))
        } else {
            None
        }
    }

    /// `false` rejects the file; the chat has then already been told why.
    pub async fn check(&self, size: u64, messenger: &dyn MessagingPort, chat: ChatId) -> bool {
        let Some((what, limit)) = self.violation(size) else {
            return true;
        };
        tracing::info!(size, limit, what, "file rejected by size policy");
        let text = format!(
            "<b>❌ The file size ({}) exceeds the {} limit of {}.</b>",
            formatting::readable_size(size),
            what,
            formatting::readable_size(limit)
        );
        if let Err(e) = messenger.send_html(chat, &text).await {
            tracing::warn!(error = %e, "failed to report size rejection");
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeMessenger;

    #[test]
    fn download_limit_wins_over_upload_limit() {
        let policy = SizePolicy {
            max_download: 100,
            max_upload: 10,
        };
        assert_eq!(policy.violation(10), None);
        assert_eq!(policy.violation(11), Some(("upload", 10)));
        assert_eq!(policy.violation(101), Some(("download", 100)));
    }

    #[tokio::test]
    async fn rejection_notifies_the_chat() {
        let messenger = FakeMessenger::new();
        let policy = SizePolicy::default();

        assert!(policy.check(1024, &messenger, ChatId(1)).await);
        assert!(messenger.sent().is_empty());

        assert!(!policy.check(60 * 1024 * 1024, &messenger, ChatId(1)).await);
        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("upload limit of 50.00 MiB"));
    }
}
