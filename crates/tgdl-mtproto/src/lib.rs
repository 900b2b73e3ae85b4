//! MTProto user-session adapter.
//!
//! Implements `MessageSource` + `MediaTransfer` on top of `grammers-client`.
//! Post lookups go through the user account because bots cannot read
//! arbitrary channel history.

mod convert;
mod session;

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use grammers_client::types::Peer;
use tgdl_core::{
    domain::ChatCandidate,
    errors::{Error, ServiceErrorKind},
    media::RemoteMessage,
    ports::{MediaTransfer, MessageSource},
    progress::TransferProgress,
    Result,
};
use tokio::io::AsyncWriteExt;

pub use session::{decode_session_string, UserSession};

use convert::{dialog_peer, group_window, remote_message, SourceMedia};

fn service_error(context: &str, err: impl fmt::Display) -> Error {
    let text = err.to_string();
    Error::service(
        ServiceErrorKind::from_rpc_text(&text),
        format!("{context}: {text}"),
    )
}

pub struct MtprotoSource {
    session: UserSession,
    peers: Mutex<HashMap<ChatCandidate, Peer>>,
}

impl MtprotoSource {
    pub fn new(session: UserSession) -> Self {
        Self {
            session,
            peers: Mutex::new(HashMap::new()),
        }
    }

    fn cached_peer(&self, chat: &ChatCandidate) -> Option<Peer> {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(chat)
            .cloned()
    }

    async fn peer(&self, chat: &ChatCandidate) -> Result<Peer> {
        if let Some(peer) = self.cached_peer(chat) {
            return Ok(peer);
        }

        let client = self.session.client();
        let peer = match chat {
            ChatCandidate::Numeric(id) => client
                .resolve_peer(dialog_peer(*id))
                .await
                .map_err(|e| service_error("resolve peer", e))?,
            ChatCandidate::Username(name) => client
                .resolve_username(name)
                .await
                .map_err(|e| service_error("resolve username", e))?
                .ok_or_else(|| {
                    Error::service(
                        ServiceErrorKind::UnknownPeer,
                        format!("USERNAME_NOT_OCCUPIED: @{name}"),
                    )
                })?,
        };

        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chat.clone(), peer.clone());
        Ok(peer)
    }
}

#[async_trait]
impl MessageSource for MtprotoSource {
    async fn fetch(&self, chat: &ChatCandidate, message_id: i32) -> Result<Option<RemoteMessage>> {
        let peer = self.peer(chat).await?;
        let messages = self
            .session
            .client()
            .get_messages_by_id(&peer, &[message_id])
            .await
            .map_err(|e| service_error("get messages", e))?;

        Ok(messages
            .into_iter()
            .flatten()
            .next()
            .map(|m| remote_message(chat, &m)))
    }

    async fn fetch_group(&self, message: &RemoteMessage) -> Result<Vec<RemoteMessage>> {
        let Some(group) = message.grouped_id else {
            return Ok(vec![message.clone()]);
        };
        let peer = self.peer(&message.chat).await?;
        let ids = group_window(message.id);
        let messages = self
            .session
            .client()
            .get_messages_by_id(&peer, &ids)
            .await
            .map_err(|e| service_error("get media group", e))?;

        let mut members: Vec<RemoteMessage> = messages
            .into_iter()
            .flatten()
            .filter(|m| m.grouped_id() == Some(group))
            .map(|m| remote_message(&message.chat, &m))
            .collect();
        members.sort_by_key(|m| m.id);
        tracing::debug!(group, members = members.len(), "media group collected");
        Ok(members)
    }

    async fn warm_up(&self, chat: &ChatCandidate) -> Result<()> {
        self.peer(chat).await.map(|_| ())
    }
}

#[async_trait]
impl MediaTransfer for MtprotoSource {
    async fn download(
        &self,
        message: &RemoteMessage,
        dest: &Path,
        progress: &TransferProgress,
    ) -> Result<PathBuf> {
        let media = message
            .media
            .as_ref()
            .ok_or_else(|| Error::service(ServiceErrorKind::MediaEmpty, "MEDIA_EMPTY"))?;
        let SourceMedia(inner) = media
            .handle
            .downcast_ref::<SourceMedia>()
            .ok_or_else(|| Error::External("media handle from another adapter".to_string()))?;
        let total = media.info.size.unwrap_or(0);

        let mut file = tokio::fs::File::create(dest).await?;
        let mut download = self.session.client().iter_download(inner);
        let mut done = 0u64;
        progress.update(0, total);
        while let Some(chunk) = download
            .next()
            .await
            .map_err(|e| service_error("download", e))?
        {
            file.write_all(&chunk).await?;
            done += chunk.len() as u64;
            progress.update(done, total.max(done));
        }
        file.flush().await?;

        tracing::debug!(message_id = message.id, bytes = done, path = %dest.display(), "downloaded");
        Ok(dest.to_path_buf())
    }
}
