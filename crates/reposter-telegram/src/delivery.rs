//! Bot API delivery: send, delete and pin template messages.

use std::time::Duration;

use async_trait::async_trait;
use reposter_core::config::TelegramConfig;
use reposter_core::{Delivery, DeliveryError, MessageKind, Template};
use teloxide::prelude::*;
use teloxide::types::{InputFile, LinkPreviewOptions, MessageId, Recipient};
use teloxide::{ApiError, RequestError};
use tracing::{debug, info, warn};

use crate::entities::to_entities;
use crate::error::TelegramError;
use crate::keyboard;

/// Backoff before each attempt to remove a "message pinned" notice.
const PIN_NOTICE_BACKOFF: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(6),
];

pub struct TelegramDelivery {
    bot: Bot,
    clean_pin_notifications: bool,
}

impl TelegramDelivery {
    pub fn new(config: &TelegramConfig) -> Result<Self, TelegramError> {
        let token = config.bot_token.trim();
        if token.is_empty() {
            return Err(TelegramError::NoToken);
        }
        let mut bot = Bot::new(token);
        if let Some(raw) = config.api_url.as_deref() {
            let url = raw
                .parse::<reqwest::Url>()
                .map_err(|e| TelegramError::InvalidApiUrl {
                    url: raw.to_string(),
                    reason: e.to_string(),
                })?;
            bot = bot.set_api_url(url);
        }
        Ok(Self {
            bot,
            clean_pin_notifications: config.clean_pin_notifications,
        })
    }

    /// Confirm the token works; returns the bot's username.
    pub async fn check(&self) -> Result<String, TelegramError> {
        let me = self.bot.get_me().await?;
        Ok(me.username().to_string())
    }

    async fn send_media(
        &self,
        to: Recipient,
        template: &Template,
    ) -> Result<Message, DeliveryError> {
        let media = template
            .media
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| {
                DeliveryError::Unsupported(format!("{} template has no media", template.kind))
            })?;
        let file = input_file(media);
        let caption = template.content.clone();
        let entities = to_entities(&template.entities);
        let markup = keyboard::build(&template.buttons);

        let result = match template.kind {
            MessageKind::Photo => {
                let mut req = self
                    .bot
                    .send_photo(to, file)
                    .caption(caption)
                    .caption_entities(entities);
                if let Some(m) = markup {
                    req = req.reply_markup(m);
                }
                req.await
            }
            MessageKind::Video => {
                let mut req = self
                    .bot
                    .send_video(to, file)
                    .caption(caption)
                    .caption_entities(entities);
                if let Some(m) = markup {
                    req = req.reply_markup(m);
                }
                req.await
            }
            MessageKind::Document => {
                let mut req = self
                    .bot
                    .send_document(to, file)
                    .caption(caption)
                    .caption_entities(entities);
                if let Some(m) = markup {
                    req = req.reply_markup(m);
                }
                req.await
            }
            MessageKind::Audio => {
                let mut req = self
                    .bot
                    .send_audio(to, file)
                    .caption(caption)
                    .caption_entities(entities);
                if let Some(m) = markup {
                    req = req.reply_markup(m);
                }
                req.await
            }
            MessageKind::Text => {
                return Err(DeliveryError::Unsupported("text template has no media".into()))
            }
        };
        result.map_err(map_error)
    }

    async fn send_text(&self, to: Recipient, template: &Template) -> Result<Message, DeliveryError> {
        if template.content.trim().is_empty() {
            return Err(DeliveryError::Unsupported("empty text template".into()));
        }
        let mut req = self
            .bot
            .send_message(to, template.content.clone())
            .entities(to_entities(&template.entities))
            .link_preview_options(no_link_preview());
        if let Some(m) = keyboard::build(&template.buttons) {
            req = req.reply_markup(m);
        }
        req.await.map_err(map_error)
    }

    fn spawn_pin_notice_cleanup(&self, to: Recipient, pinned: MessageId) {
        let bot = self.bot.clone();
        let notice = MessageId(pinned.0 + 1);
        tokio::spawn(async move {
            for (attempt, delay) in PIN_NOTICE_BACKOFF.iter().enumerate() {
                tokio::time::sleep(*delay).await;
                match bot.delete_message(to.clone(), notice).await {
                    Ok(_) => {
                        debug!(message_id = notice.0, "Telegram: pin notice removed");
                        return;
                    }
                    Err(RequestError::Api(ApiError::MessageToDeleteNotFound)) => return,
                    Err(e) => {
                        debug!(attempt = attempt + 1, error = %e, "Telegram: pin notice not removed yet");
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Delivery for TelegramDelivery {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, chat_id: &str, template: &Template) -> Result<String, DeliveryError> {
        let to = recipient(chat_id)?;
        let msg = if template.kind.has_media() {
            self.send_media(to, template).await?
        } else {
            self.send_text(to, template).await?
        };
        info!(%chat_id, message_id = msg.id.0, kind = %template.kind, "Telegram: message sent");
        Ok(msg.id.0.to_string())
    }

    async fn delete(&self, chat_id: &str, message_id: &str) -> Result<(), DeliveryError> {
        let to = recipient(chat_id)?;
        let id = message_id_of(message_id)?;
        match self.bot.delete_message(to, id).await {
            Ok(_) => Ok(()),
            Err(RequestError::Api(ApiError::MessageToDeleteNotFound)) => {
                debug!(%chat_id, %message_id, "Telegram: message already gone");
                Ok(())
            }
            Err(e) => Err(map_error(e)),
        }
    }

    async fn pin(&self, chat_id: &str, message_id: &str) -> Result<(), DeliveryError> {
        let to = recipient(chat_id)?;
        let id = message_id_of(message_id)?;
        self.bot
            .pin_chat_message(to.clone(), id)
            .disable_notification(true)
            .await
            .map_err(map_error)?;
        if self.clean_pin_notifications {
            self.spawn_pin_notice_cleanup(to, id);
        }
        Ok(())
    }
}

/// Numeric ids address chats directly; anything else is a public username.
pub fn recipient(chat_id: &str) -> Result<Recipient, DeliveryError> {
    let chat_id = chat_id.trim();
    if chat_id.is_empty() {
        return Err(DeliveryError::InvalidTarget("empty chat id".into()));
    }
    if let Ok(id) = chat_id.parse::<i64>() {
        return Ok(Recipient::Id(ChatId(id)));
    }
    let name = chat_id.trim_start_matches('@');
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(DeliveryError::InvalidTarget(chat_id.to_string()));
    }
    Ok(Recipient::ChannelUsername(format!("@{name}")))
}

fn message_id_of(raw: &str) -> Result<MessageId, DeliveryError> {
    raw.trim()
        .parse::<i32>()
        .map(MessageId)
        .map_err(|_| DeliveryError::InvalidMessageId(raw.to_string()))
}

/// Text messages go out without a link preview card.
fn no_link_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// URLs are fetched by Telegram; anything else is an uploaded file id.
fn input_file(media: &str) -> InputFile {
    let media = media.trim();
    if media.starts_with("http://") || media.starts_with("https://") {
        if let Ok(url) = media.parse::<reqwest::Url>() {
            return InputFile::url(url);
        }
    }
    InputFile::file_id(media.to_string())
}

fn map_error(e: RequestError) -> DeliveryError {
    match e {
        RequestError::Api(api) => DeliveryError::Rejected(api.to_string()),
        RequestError::Network(err) => DeliveryError::Transport(err.to_string()),
        RequestError::RetryAfter(after) => {
            warn!(?after, "Telegram: rate limited");
            DeliveryError::Transport(format!("rate limited, retry after {after:?}"))
        }
        other => DeliveryError::Platform(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_chat_ids_are_direct() {
        assert_eq!(
            recipient("-1001234567890").unwrap(),
            Recipient::Id(ChatId(-1001234567890))
        );
    }

    #[test]
    fn usernames_get_a_single_at_prefix() {
        assert_eq!(
            recipient("mychannel").unwrap(),
            Recipient::ChannelUsername("@mychannel".into())
        );
        assert_eq!(
            recipient("@mychannel").unwrap(),
            Recipient::ChannelUsername("@mychannel".into())
        );
    }

    #[test]
    fn bad_targets_are_rejected() {
        assert!(matches!(recipient(""), Err(DeliveryError::InvalidTarget(_))));
        assert!(matches!(recipient("@"), Err(DeliveryError::InvalidTarget(_))));
        assert!(matches!(
            recipient("two words"),
            Err(DeliveryError::InvalidTarget(_))
        ));
    }

    #[test]
    fn message_ids_must_be_numeric() {
        assert_eq!(message_id_of("42").unwrap(), MessageId(42));
        assert!(matches!(
            message_id_of("abc"),
            Err(DeliveryError::InvalidMessageId(_))
        ));
    }

    #[test]
    fn missing_token_is_an_error() {
        let cfg = TelegramConfig::default();
        assert!(matches!(TelegramDelivery::new(&cfg), Err(TelegramError::NoToken)));
    }

    #[test]
    fn invalid_api_url_is_an_error() {
        let cfg = TelegramConfig {
            bot_token: "123:abc".into(),
            api_url: Some("not a url".into()),
            ..TelegramConfig::default()
        };
        assert!(matches!(
            TelegramDelivery::new(&cfg),
            Err(TelegramError::InvalidApiUrl { .. })
        ));
    }

    #[test]
    fn text_messages_disable_link_previews() {
        assert!(no_link_preview().is_disabled);
        assert!(no_link_preview().url.is_none());
    }

    #[test]
    fn api_rejections_map_to_rejected() {
        let err = map_error(RequestError::Api(ApiError::BotBlocked));
        assert!(matches!(err, DeliveryError::Rejected(_)));
    }
}
