//! Stored formatting spans to Telegram message entities.
//!
//! Offsets and lengths are carried over untouched; they are UTF-16 code
//! units, which is what Telegram reported when the template was captured.

use reposter_core::FormatSpan;
use teloxide::types::{MessageEntity, MessageEntityKind};
use tracing::debug;

/// Convert one span. Returns `None` for kinds the gateway does not replay
/// (user mentions, custom emoji) and for text links with a broken URL.
pub fn to_entity(span: &FormatSpan) -> Option<MessageEntity> {
    let kind = match span.kind.as_str() {
        "bold" => MessageEntityKind::Bold,
        "italic" => MessageEntityKind::Italic,
        "underline" => MessageEntityKind::Underline,
        "strikethrough" => MessageEntityKind::Strikethrough,
        "spoiler" => MessageEntityKind::Spoiler,
        "code" => MessageEntityKind::Code,
        "pre" => MessageEntityKind::Pre {
            language: span.language.clone(),
        },
        "text_link" => {
            let url = span.url.as_deref()?.parse::<reqwest::Url>().ok()?;
            MessageEntityKind::TextLink { url }
        }
        "url" => MessageEntityKind::Url,
        "mention" => MessageEntityKind::Mention,
        "hashtag" => MessageEntityKind::Hashtag,
        "cashtag" => MessageEntityKind::Cashtag,
        "bot_command" => MessageEntityKind::BotCommand,
        "email" => MessageEntityKind::Email,
        "phone_number" => MessageEntityKind::PhoneNumber,
        _ => return None,
    };
    Some(MessageEntity::new(kind, span.offset, span.length))
}

/// Convert every span, dropping the ones [`to_entity`] rejects.
pub fn to_entities(spans: &[FormatSpan]) -> Vec<MessageEntity> {
    spans
        .iter()
        .filter_map(|span| {
            let entity = to_entity(span);
            if entity.is_none() {
                debug!(kind = %span.kind, offset = span.offset, "formatting span dropped");
            }
            entity
        })
        .collect()
}
