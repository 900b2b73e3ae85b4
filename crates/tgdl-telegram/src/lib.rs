//! Telegram adapter (teloxide).
//!
//! This crate implements the `tgdl-core` MessagingPort over Telegram Bot API
//! and hosts the dispatcher + command handlers.

use std::path::Path;

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{
        InputFile, InputMedia, InputMediaAudio, InputMediaDocument, InputMediaPhoto,
        InputMediaVideo, ParseMode,
    },
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use tgdl_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, MessagingCapabilities, OutgoingMedia, UploadKind},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    fn message_ref(chat_id: ChatId, msg: &Message) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        tracing::warn!(retry_after = ?d, "bot api flood wait");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

fn album_item(item: &OutgoingMedia) -> InputMedia {
    let file = InputFile::file(item.path.clone());
    let caption = item.caption.clone();
    match item.kind.album_compatible() {
        UploadKind::Photo => {
            let mut m = InputMediaPhoto::new(file).parse_mode(ParseMode::Html);
            if let Some(c) = caption {
                m = m.caption(c);
            }
            InputMedia::Photo(m)
        }
        UploadKind::Video => {
            let mut m = InputMediaVideo::new(file).parse_mode(ParseMode::Html);
            if let Some(c) = caption {
                m = m.caption(c);
            }
            InputMedia::Video(m)
        }
        UploadKind::Audio => {
            let mut m = InputMediaAudio::new(file).parse_mode(ParseMode::Html);
            if let Some(c) = caption {
                m = m.caption(c);
            }
            InputMedia::Audio(m)
        }
        _ => {
            let mut m = InputMediaDocument::new(file).parse_mode(ParseMode::Html);
            if let Some(c) = caption {
                m = m.caption(c);
            }
            InputMedia::Document(m)
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities::default()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(true)
            })
            .await?;

        Ok(Self::message_ref(chat_id, &msg))
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .edit_message_text(
                    Self::tg_chat(msg.chat_id),
                    Self::tg_msg_id(msg.message_id),
                    html.to_string(),
                )
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
        })
        .await?;
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        let tg_action = match action {
            ChatAction::Typing => teloxide::types::ChatAction::Typing,
            ChatAction::UploadPhoto => teloxide::types::ChatAction::UploadPhoto,
            ChatAction::UploadVideo => teloxide::types::ChatAction::UploadVideo,
            ChatAction::UploadVoice => teloxide::types::ChatAction::UploadVoice,
            ChatAction::UploadDocument => teloxide::types::ChatAction::UploadDocument,
        };
        self.with_retry(|| self.bot.send_chat_action(Self::tg_chat(chat_id), tg_action))
            .await?;
        Ok(())
    }

    async fn send_media(&self, chat_id: ChatId, media: &OutgoingMedia) -> Result<MessageRef> {
        let chat = Self::tg_chat(chat_id);
        let file = || InputFile::file(media.path.clone());
        let caption = media.caption.clone().unwrap_or_default();

        let msg = match media.kind {
            UploadKind::Photo => {
                self.with_retry(|| {
                    self.bot
                        .send_photo(chat, file())
                        .caption(caption.clone())
                        .parse_mode(ParseMode::Html)
                })
                .await?
            }
            UploadKind::Video => {
                self.with_retry(|| {
                    self.bot
                        .send_video(chat, file())
                        .caption(caption.clone())
                        .parse_mode(ParseMode::Html)
                })
                .await?
            }
            UploadKind::Audio => {
                self.with_retry(|| {
                    self.bot
                        .send_audio(chat, file())
                        .caption(caption.clone())
                        .parse_mode(ParseMode::Html)
                })
                .await?
            }
            UploadKind::Voice => {
                self.with_retry(|| {
                    self.bot
                        .send_voice(chat, file())
                        .caption(caption.clone())
                        .parse_mode(ParseMode::Html)
                })
                .await?
            }
            UploadKind::Animation => {
                self.with_retry(|| {
                    self.bot
                        .send_animation(chat, file())
                        .caption(caption.clone())
                        .parse_mode(ParseMode::Html)
                })
                .await?
            }
            // Stickers carry no caption.
            UploadKind::Sticker => self.with_retry(|| self.bot.send_sticker(chat, file())).await?,
            UploadKind::Document => {
                self.with_retry(|| {
                    self.bot
                        .send_document(chat, file())
                        .caption(caption.clone())
                        .parse_mode(ParseMode::Html)
                })
                .await?
            }
        };

        Ok(Self::message_ref(chat_id, &msg))
    }

    async fn send_album(&self, chat_id: ChatId, items: &[OutgoingMedia]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let media: Vec<InputMedia> = items.iter().map(album_item).collect();
        self.with_retry(|| self.bot.send_media_group(Self::tg_chat(chat_id), media.clone()))
            .await?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<MessageRef> {
        let path = path.to_path_buf();
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_document(Self::tg_chat(chat_id), InputFile::file(path.clone()))
                    .parse_mode(ParseMode::Html);
                if let Some(c) = caption {
                    req = req.caption(c.to_string());
                }
                req
            })
            .await?;
        Ok(Self::message_ref(chat_id, &msg))
    }
}
