use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::{ScheduleMode, TimePoint};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

row_id!(
    /// Primary key of a channel group.
    GroupId
);
row_id!(
    /// Primary key of a channel row (not the platform chat id).
    ChannelId
);
row_id!(TemplateId);
row_id!(
    /// Primary key of a send record.
    RecordId
);

/// Operation kind of a send record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendKind {
    /// Delete the previous message on the channel, then send.
    Repost,
    /// Send additively; previous content stays.
    Push,
}

impl fmt::Display for SendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SendKind::Repost => "repost",
            SendKind::Push => "push",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "repost" => Ok(SendKind::Repost),
            "push" => Ok(SendKind::Push),
            other => Err(format!("unknown send kind: {other}")),
        }
    }
}

/// Lifecycle state of a send record.
///
/// `Pending` and `Retry` are in flight; `Sent` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Pending,
    Sent,
    Failed,
    Retry,
}

impl SendStatus {
    pub fn is_in_flight(self) -> bool {
        matches!(self, SendStatus::Pending | SendStatus::Retry)
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SendStatus::Pending => "pending",
            SendStatus::Sent => "sent",
            SendStatus::Failed => "failed",
            SendStatus::Retry => "retry",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SendStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SendStatus::Pending),
            "sent" => Ok(SendStatus::Sent),
            "failed" => Ok(SendStatus::Failed),
            "retry" => Ok(SendStatus::Retry),
            other => Err(format!("unknown send status: {other}")),
        }
    }
}

/// Payload type of a template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Photo,
    Video,
    Document,
    Audio,
}

impl MessageKind {
    /// Media kinds carry `Template::media` and send `content` as the caption.
    pub fn has_media(self) -> bool {
        !matches!(self, MessageKind::Text)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageKind::Text => "text",
            MessageKind::Photo => "photo",
            MessageKind::Video => "video",
            MessageKind::Document => "document",
            MessageKind::Audio => "audio",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "photo" => Ok(MessageKind::Photo),
            "video" => Ok(MessageKind::Video),
            "document" => Ok(MessageKind::Document),
            "audio" => Ok(MessageKind::Audio),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// A URL button shown under the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub url: String,
}

/// A rich-text formatting span.
///
/// Mirrors the platform's entity shape so stored JSON can be copied from an
/// incoming message verbatim. `offset` and `length` are in UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpan {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Content delivered to every channel of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub title: String,
    /// Message text, or the caption for media kinds.
    pub content: String,
    pub kind: MessageKind,
    /// Platform media reference (file id or URL) for media kinds.
    pub media: Option<String>,
    /// Keyboard rows, top to bottom.
    pub buttons: Vec<Vec<InlineButton>>,
    pub entities: Vec<FormatSpan>,
}

/// A named set of channels sharing one template and one schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub template_id: TemplateId,
    pub mode: ScheduleMode,
    /// Minutes between reposts in [`ScheduleMode::Frequency`].
    pub frequency_minutes: u32,
    /// Times of day for [`ScheduleMode::Timepoints`].
    pub timepoints: Vec<TimePoint>,
    pub is_active: bool,
    pub auto_pin: bool,
}

/// One delivery endpoint of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub group_id: GroupId,
    /// Platform chat identifier: numeric id or `@username`.
    pub chat_id: String,
    pub title: String,
    /// Last message delivered by a repost; deleted before the next one.
    pub last_message_id: Option<String>,
    pub is_active: bool,
}

/// Work item and audit row: one per (group, channel, scheduled attempt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRecord {
    pub id: RecordId,
    pub group_id: GroupId,
    pub chat_id: String,
    /// Remote message id, set once the record is sent.
    pub message_id: Option<String>,
    pub kind: SendKind,
    pub status: SendStatus,
    /// Text of the most recent failure.
    pub error: Option<String>,
    pub retry_count: u32,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a send record; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSendRecord {
    pub group_id: GroupId,
    pub chat_id: String,
    pub kind: SendKind,
    pub scheduled_at: DateTime<Utc>,
}

impl NewSendRecord {
    pub fn pending(
        group_id: GroupId,
        chat_id: impl Into<String>,
        kind: SendKind,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id,
            chat_id: chat_id.into(),
            kind,
            scheduled_at: at,
        }
    }
}

/// Aggregate counters over a group's send history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendStatistics {
    pub total_sent: u64,
    pub total_failed: u64,
    /// Records still in flight (`pending` or `retry`).
    pub total_pending: u64,
    pub last_sent_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            SendStatus::Pending,
            SendStatus::Sent,
            SendStatus::Failed,
            SendStatus::Retry,
        ] {
            assert_eq!(s.to_string().parse::<SendStatus>().unwrap(), s);
        }
        assert!("queued".parse::<SendStatus>().is_err());
    }

    #[test]
    fn only_pending_and_retry_are_in_flight() {
        assert!(SendStatus::Pending.is_in_flight());
        assert!(SendStatus::Retry.is_in_flight());
        assert!(!SendStatus::Sent.is_in_flight());
        assert!(!SendStatus::Failed.is_in_flight());
    }

    #[test]
    fn format_span_reads_platform_entity_json() {
        let json = r#"[{"type":"bold","offset":0,"length":5},
                       {"type":"text_link","offset":6,"length":4,"url":"https://example.com"}]"#;
        let spans: Vec<FormatSpan> = serde_json::from_str(json).unwrap();
        assert_eq!(spans[0].kind, "bold");
        assert_eq!(spans[1].url.as_deref(), Some("https://example.com"));
        assert!(spans[0].language.is_none());
    }
}
