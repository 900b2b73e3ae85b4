//! grammers message/media → core message model.

use grammers_client::{
    grammers_tl_types as tl,
    session::defs::{PeerAuth, PeerId, PeerRef},
    types::{media::Document, photo_sizes::VecExt, Media, Message},
};
use tgdl_core::{
    domain::ChatCandidate,
    media::{MediaHandle, MediaInfo, MediaKind, RemoteMedia, RemoteMessage, StickerKind},
};

/// What `MediaHandle` carries for this adapter.
pub(crate) struct SourceMedia(pub Media);

pub(crate) fn remote_message(chat: &ChatCandidate, msg: &Message) -> RemoteMessage {
    RemoteMessage {
        chat: chat.clone(),
        id: msg.id(),
        grouped_id: msg.grouped_id(),
        text: msg.text().to_string(),
        // Without entities `html_text` returns the raw text, which is not HTML.
        html: msg
            .fmt_entities()
            .filter(|entities| !entities.is_empty())
            .map(|_| msg.html_text()),
        media: msg.media().and_then(|media| {
            let info = media_info(&media)?;
            Some(RemoteMedia {
                info,
                handle: MediaHandle::new(SourceMedia(media)),
            })
        }),
    }
}

/// `None` for media we cannot download (polls, venues, web previews...).
fn media_info(media: &Media) -> Option<MediaInfo> {
    match media {
        Media::Photo(photo) => Some(MediaInfo {
            kind: MediaKind::Photo,
            file_name: None,
            size: photo.thumbs().largest().map(|t| t.size() as u64),
            mime: None,
        }),
        Media::Document(doc) => Some(document_info(doc, false)),
        Media::Sticker(sticker) => Some(document_info(&sticker.document, true)),
        _ => None,
    }
}

fn document_info(doc: &Document, is_sticker: bool) -> MediaInfo {
    let mime = doc.mime_type().map(str::to_string);
    let attributes = match &doc.raw.document {
        Some(tl::enums::Document::Document(d)) => d.attributes.as_slice(),
        _ => &[],
    };
    let name = doc.name();

    MediaInfo {
        kind: classify(attributes, mime.as_deref(), is_sticker),
        file_name: (!name.is_empty()).then(|| name.to_string()),
        size: u64::try_from(doc.size()).ok(),
        mime,
    }
}

pub(crate) fn classify(
    attributes: &[tl::enums::DocumentAttribute],
    mime: Option<&str>,
    is_sticker: bool,
) -> MediaKind {
    use tl::enums::DocumentAttribute as A;

    let sticker = is_sticker || attributes.iter().any(|a| matches!(a, A::Sticker(_)));
    if sticker {
        return MediaKind::Sticker(sticker_kind(mime));
    }
    if attributes.iter().any(|a| matches!(a, A::Animated)) {
        return MediaKind::Animation;
    }
    for attr in attributes {
        match attr {
            A::Audio(a) if a.voice => return MediaKind::Voice,
            A::Audio(_) => return MediaKind::Audio,
            A::Video(v) if v.round_message => return MediaKind::VideoNote,
            A::Video(_) => return MediaKind::Video,
            _ => {}
        }
    }
    MediaKind::Document
}

pub(crate) fn sticker_kind(mime: Option<&str>) -> StickerKind {
    match mime {
        Some("application/x-tgsticker") => StickerKind::Animated,
        Some("video/webm") => StickerKind::Video,
        _ => StickerKind::Static,
    }
}

/// Bot API dialog id → peer reference with ambient authority.
pub(crate) fn dialog_peer(dialog_id: i64) -> PeerRef {
    let id = if dialog_id <= -1_000_000_000_000 {
        PeerId::channel(-dialog_id - 1_000_000_000_000)
    } else if dialog_id < 0 {
        PeerId::chat(-dialog_id)
    } else {
        PeerId::user(dialog_id)
    };
    PeerRef {
        id,
        auth: PeerAuth::default(),
    }
}

/// Ids scanned around `id` when collecting its album.
pub(crate) fn group_window(id: i32) -> Vec<i32> {
    ((id - 9).max(1)..=id.saturating_add(10)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(voice: bool) -> tl::enums::DocumentAttribute {
        tl::types::DocumentAttributeAudio {
            voice,
            duration: 3,
            title: None,
            performer: None,
            waveform: None,
        }
        .into()
    }

    #[test]
    fn documents_are_classified_by_attribute() {
        use tl::enums::DocumentAttribute as A;

        assert_eq!(classify(&[audio(true)], None, false), MediaKind::Voice);
        assert_eq!(classify(&[audio(false)], None, false), MediaKind::Audio);
        assert_eq!(
            classify(&[A::Animated], Some("video/mp4"), false),
            MediaKind::Animation
        );
        assert_eq!(classify(&[], Some("application/pdf"), false), MediaKind::Document);
    }

    #[test]
    fn sticker_formats_follow_mime() {
        assert_eq!(
            classify(&[], Some("application/x-tgsticker"), true),
            MediaKind::Sticker(StickerKind::Animated)
        );
        assert_eq!(sticker_kind(Some("video/webm")), StickerKind::Video);
        assert_eq!(sticker_kind(Some("image/webp")), StickerKind::Static);
    }

    #[test]
    fn group_window_stays_positive() {
        assert_eq!(group_window(3), (1..=13).collect::<Vec<_>>());
        let w = group_window(100);
        assert_eq!((w[0], w[w.len() - 1], w.len()), (91, 110, 20));
    }
}
