//! Post link parsing (`https://t.me/...`) into candidate chat ids + message id.

use std::sync::OnceLock;

use regex::Regex;

use crate::{domain::ChatCandidate, errors::Error, Result};

const INVALID_NUMERIC: &str = "Invalid post URL. Must end with a numeric ID.";
const INVALID_LINK: &str = "Please send a valid Telegram post URL.";

/// A parsed post link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostLink {
    /// Ordered forms to try against the user session.
    pub candidates: Vec<ChatCandidate>,
    pub message_id: i32,
    pub thread_id: Option<i32>,
}

/// Drop the query string (`?single`, `?comment=...`).
pub fn strip_query(url: &str) -> &str {
    url.split_once('?').map(|(head, _)| head).unwrap_or(url)
}

/// Parse a post link.
///
/// Private chats use `t.me/c/<id>/<msg>`; the Bot API form of those ids is
/// `-100<id>`, so both variants are returned as candidates.
pub fn resolve(url: &str) -> Result<PostLink> {
    let url = strip_query(url.trim()).trim_end_matches('/');
    let parts: Vec<&str> = url.split('/').collect();

    let num = |s: &str| s.parse::<i32>().map_err(|_| Error::Input(INVALID_NUMERIC.to_string()));

    let (raw_chat, thread_id, message_id) = match parts.len() {
        7 if parts[3] == "c" => (
            parts[4],
            Some(num(parts[5])?),
            num(parts[6])?,
        ),
        6 if parts[3] == "c" => (parts[4], None, num(parts[5])?),
        6 => (parts[3], Some(num(parts[4])?), num(parts[5])?),
        5 => {
            if parts[3] == "m" {
                return Err(Error::Input(
                    "Invalid ClientType used to parse this message link".to_string(),
                ));
            }
            (parts[3], None, num(parts[4])?)
        }
        _ => return Err(Error::Input(INVALID_LINK.to_string())),
    };

    if raw_chat.is_empty() {
        return Err(Error::Input(INVALID_LINK.to_string()));
    }

    Ok(PostLink {
        candidates: chat_candidates(raw_chat),
        message_id,
        thread_id,
    })
}

fn chat_candidates(raw: &str) -> Vec<ChatCandidate> {
    let Ok(id) = raw.parse::<i64>() else {
        return vec![ChatCandidate::Username(raw.trim_start_matches('@').to_string())];
    };

    let mut out = vec![ChatCandidate::Numeric(id)];
    let text = id.to_string();
    let alt = match text.strip_prefix("-100") {
        Some(rest) => rest.parse::<i64>().ok(),
        None => format!("-100{text}").parse::<i64>().ok(),
    };
    if let Some(alt) = alt {
        if alt != id {
            out.push(ChatCandidate::Numeric(alt));
        }
    }
    out
}

/// Everything but the last path segment: the shared part of a range.
pub fn link_prefix(url: &str) -> String {
    let url = strip_query(url.trim()).trim_end_matches('/');
    url.rsplit_once('/')
        .map(|(head, _)| head.to_string())
        .unwrap_or_else(|| url.to_string())
}

/// Candidates present in both lists (in `a` order), followed by the rest of `a`.
///
/// Returns an empty list when the two links share no chat form.
pub fn overlap_candidates(a: &[ChatCandidate], b: &[ChatCandidate]) -> Vec<ChatCandidate> {
    let overlap: Vec<ChatCandidate> = a.iter().filter(|c| b.contains(c)).cloned().collect();
    if overlap.is_empty() {
        return overlap;
    }
    let rest: Vec<ChatCandidate> = a.iter().filter(|c| !overlap.contains(c)).cloned().collect();
    overlap.into_iter().chain(rest).collect()
}

pub fn is_post_link(s: &str) -> bool {
    s.starts_with("https://t.me/")
}

/// First `t.me` post link in a free-form message.
pub fn find_post_link(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?:https?://)?(?:www\.)?(?:t|telegram)\.me/[^\s]+").expect("static regex")
    });
    let found = re.find(text)?.as_str();
    let path = found
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.");
    let path = path.split_once('/').map(|(_, p)| p).unwrap_or("");
    Some(format!("https://t.me/{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_username_link() {
        let link = resolve("https://t.me/itsSmartDev/547").unwrap();
        assert_eq!(
            link.candidates,
            vec![ChatCandidate::Username("itsSmartDev".to_string())]
        );
        assert_eq!(link.message_id, 547);
        assert_eq!(link.thread_id, None);
    }

    #[test]
    fn private_link_yields_both_id_forms() {
        let link = resolve("https://t.me/c/1234567890/42?single").unwrap();
        assert_eq!(
            link.candidates,
            vec![
                ChatCandidate::Numeric(1234567890),
                ChatCandidate::Numeric(-1001234567890)
            ]
        );
        assert_eq!(link.message_id, 42);
    }

    #[test]
    fn prefixed_id_also_tries_stripped_form() {
        let link = resolve("https://t.me/c/-1001234567890/7").unwrap();
        assert_eq!(
            link.candidates,
            vec![
                ChatCandidate::Numeric(-1001234567890),
                ChatCandidate::Numeric(1234567890)
            ]
        );
    }

    #[test]
    fn thread_links_keep_thread_id() {
        let link = resolve("https://t.me/c/123/5/9").unwrap();
        assert_eq!(link.thread_id, Some(5));
        assert_eq!(link.message_id, 9);

        let link = resolve("https://t.me/group/10/11").unwrap();
        assert_eq!(link.thread_id, Some(10));
        assert_eq!(link.message_id, 11);
    }

    #[test]
    fn rejects_bad_links() {
        assert!(matches!(
            resolve("https://t.me/channel/abc"),
            Err(Error::Input(m)) if m.contains("numeric")
        ));
        assert!(matches!(resolve("https://t.me/m/abc"), Err(Error::Input(_))));
        assert!(matches!(resolve("https://t.me/channel"), Err(Error::Input(_))));
        assert!(matches!(resolve("not a link"), Err(Error::Input(_))));
    }

    #[test]
    fn prefix_and_overlap() {
        assert_eq!(
            link_prefix("https://t.me/c/123/100?single"),
            "https://t.me/c/123"
        );

        let a = resolve("https://t.me/c/123/100").unwrap().candidates;
        let b = resolve("https://t.me/c/-100123/120").unwrap().candidates;
        let merged = overlap_candidates(&a, &b);
        assert_eq!(
            merged,
            vec![ChatCandidate::Numeric(123), ChatCandidate::Numeric(-100123)]
        );

        let other = resolve("https://t.me/other/1").unwrap().candidates;
        assert!(overlap_candidates(&a, &other).is_empty());
    }

    #[test]
    fn finds_link_in_free_text() {
        assert_eq!(
            find_post_link("look at t.me/chan/5 please").as_deref(),
            Some("https://t.me/chan/5")
        );
        assert_eq!(
            find_post_link("https://telegram.me/c/1/2").as_deref(),
            Some("https://t.me/c/1/2")
        );
        assert_eq!(find_post_link("nothing here"), None);
    }
}
