//! Source-side message model, as seen through the user session.

use std::{any::Any, fmt, sync::Arc};

use crate::{domain::ChatCandidate, formatting::escape_truncated, messaging::types::UploadKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StickerKind {
    Animated,
    Video,
    Static,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Voice,
    VideoNote,
    Animation,
    Sticker(StickerKind),
    Document,
}

impl MediaKind {
    pub fn upload_kind(self) -> UploadKind {
        match self {
            Self::Photo => UploadKind::Photo,
            Self::Video | Self::VideoNote => UploadKind::Video,
            Self::Audio => UploadKind::Audio,
            Self::Voice => UploadKind::Voice,
            Self::Animation => UploadKind::Animation,
            Self::Sticker(_) => UploadKind::Sticker,
            Self::Document => UploadKind::Document,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaInfo {
    pub kind: MediaKind,
    pub file_name: Option<String>,
    pub size: Option<u64>,
    pub mime: Option<String>,
}

/// Opaque adapter payload needed to download the media again.
#[derive(Clone)]
pub struct MediaHandle(Arc<dyn Any + Send + Sync>);

impl MediaHandle {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self(Arc::new(inner))
    }

    /// A handle with nothing behind it (tests, synthetic messages).
    pub fn empty() -> Self {
        Self::new(())
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MediaHandle(..)")
    }
}

#[derive(Clone, Debug)]
pub struct RemoteMedia {
    pub info: MediaInfo,
    pub handle: MediaHandle,
}

/// A post fetched from the source chat.
#[derive(Clone, Debug)]
pub struct RemoteMessage {
    /// Candidate form the message was fetched through.
    pub chat: ChatCandidate,
    pub id: i32,
    /// Album id when the post is part of a media group.
    pub grouped_id: Option<i64>,
    /// Text, or the caption for media posts.
    pub text: String,
    /// `text` with its entities rendered as Telegram HTML.
    pub html: Option<String>,
    pub media: Option<RemoteMedia>,
}

impl RemoteMessage {
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Reply body for this post, `None` when it has no text.
    ///
    /// Formatting is kept while the plain text fits in `max_chars`; longer
    /// posts fall back to truncated escaped text so no tag is cut in half.
    pub fn rendered_text(&self, max_chars: usize) -> Option<String> {
        if !self.has_text() {
            return None;
        }
        match &self.html {
            Some(html) if self.text.chars().count() <= max_chars => Some(html.clone()),
            _ => Some(escape_truncated(&self.text, max_chars)),
        }
    }
}

/// Local file name for a downloaded message.
pub fn file_name_for(message_id: i32, info: &MediaInfo) -> String {
    let named = |ext: &str| {
        info.file_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{message_id}.{ext}"))
    };
    let name = match info.kind {
        MediaKind::Document => info
            .file_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| message_id.to_string()),
        MediaKind::Video => named("mp4"),
        MediaKind::Audio => named("mp3"),
        MediaKind::Voice => format!("{message_id}.ogg"),
        MediaKind::VideoNote => format!("{message_id}.mp4"),
        MediaKind::Animation => named("gif"),
        MediaKind::Sticker(StickerKind::Animated) => format!("{message_id}.tgs"),
        MediaKind::Sticker(StickerKind::Video) => format!("{message_id}.webm"),
        MediaKind::Sticker(StickerKind::Static) => format!("{message_id}.webp"),
        MediaKind::Photo => format!("{message_id}.jpg"),
    };
    sanitize_file_name(&name)
}

/// Keep only the last path component and drop characters that break paths.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "file".to_string(),
        s => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(kind: MediaKind, file_name: Option<&str>) -> MediaInfo {
        MediaInfo {
            kind,
            file_name: file_name.map(str::to_string),
            size: None,
            mime: None,
        }
    }

    #[test]
    fn file_names_follow_media_kind() {
        assert_eq!(file_name_for(5, &info(MediaKind::Photo, None)), "5.jpg");
        assert_eq!(file_name_for(5, &info(MediaKind::Video, None)), "5.mp4");
        assert_eq!(
            file_name_for(5, &info(MediaKind::Video, Some("clip.mkv"))),
            "clip.mkv"
        );
        assert_eq!(file_name_for(5, &info(MediaKind::Voice, Some("x.oga"))), "5.ogg");
        assert_eq!(
            file_name_for(5, &info(MediaKind::Sticker(StickerKind::Animated), None)),
            "5.tgs"
        );
        assert_eq!(
            file_name_for(5, &info(MediaKind::Sticker(StickerKind::Static), None)),
            "5.webp"
        );
        assert_eq!(file_name_for(5, &info(MediaKind::Document, None)), "5");
        assert_eq!(
            file_name_for(5, &info(MediaKind::Document, Some("report.pdf"))),
            "report.pdf"
        );
    }

    fn text_message(text: &str, html: Option<&str>) -> RemoteMessage {
        RemoteMessage {
            chat: ChatCandidate::Username("chan".to_string()),
            id: 1,
            grouped_id: None,
            text: text.to_string(),
            html: html.map(str::to_string),
            media: None,
        }
    }

    #[test]
    fn rendered_text_prefers_formatting_while_it_fits() {
        let formatted = text_message("hi there", Some("<i>hi</i> there"));
        assert_eq!(formatted.rendered_text(100).as_deref(), Some("<i>hi</i> there"));
        // too long: escaped plain text, cut at the limit
        assert_eq!(formatted.rendered_text(4).as_deref(), Some("hi …"));

        let plain = text_message("a<b", None);
        assert_eq!(plain.rendered_text(100).as_deref(), Some("a&lt;b"));
        assert_eq!(text_message("  ", Some("  ")).rendered_text(100), None);
    }

    #[test]
    fn file_names_cannot_escape_the_download_dir() {
        assert_eq!(
            file_name_for(1, &info(MediaKind::Document, Some("../../etc/passwd"))),
            "passwd"
        );
        assert_eq!(file_name_for(1, &info(MediaKind::Document, Some(".."))), "file");
    }

    #[test]
    fn handle_downcasts_to_the_stored_type() {
        let h = MediaHandle::new(42u32);
        assert_eq!(h.downcast_ref::<u32>(), Some(&42));
        assert!(h.downcast_ref::<String>().is_none());
    }
}
