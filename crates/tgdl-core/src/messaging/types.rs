use std::path::PathBuf;

/// Outgoing "chat action" (typing / uploading indicator).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadPhoto,
    UploadVideo,
    UploadVoice,
    UploadDocument,
}

/// How a downloaded file is re-sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UploadKind {
    Photo,
    Video,
    Audio,
    Voice,
    Animation,
    Sticker,
    Document,
}

impl UploadKind {
    pub fn chat_action(self) -> ChatAction {
        match self {
            Self::Photo => ChatAction::UploadPhoto,
            Self::Video | Self::Animation => ChatAction::UploadVideo,
            Self::Audio | Self::Voice => ChatAction::UploadVoice,
            Self::Sticker | Self::Document => ChatAction::UploadDocument,
        }
    }

    /// Albums only take photos, videos, audio and documents.
    pub fn album_compatible(self) -> Self {
        match self {
            Self::Photo | Self::Video | Self::Audio | Self::Document => self,
            Self::Animation => Self::Video,
            Self::Voice => Self::Audio,
            Self::Sticker => Self::Document,
        }
    }
}

/// A local file ready to upload, with its (HTML) caption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMedia {
    pub kind: UploadKind,
    pub path: PathBuf,
    pub caption: Option<String>,
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_html: bool,
    pub supports_edit: bool,
    pub max_message_len: usize,
    pub max_caption_len: usize,
    pub max_album_len: usize,
}

impl Default for MessagingCapabilities {
    fn default() -> Self {
        Self {
            supports_html: true,
            supports_edit: true,
            max_message_len: 4096,
            max_caption_len: 1024,
            max_album_len: 10,
        }
    }
}
