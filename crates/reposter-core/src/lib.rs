//! `reposter-core`: shared model, configuration and the delivery seam.
//!
//! Everything the scheduling engine, the SQLite store and the Telegram
//! adapter need to agree on lives here, so the leaf crates never depend on
//! each other.

pub mod config;
pub mod delivery;
pub mod error;
pub mod schedule;
pub mod types;

pub use config::ReposterConfig;
pub use delivery::{Delivery, DeliveryError};
pub use error::{CoreError, Result};
pub use schedule::{parse_time_points, ScheduleMode, TimePoint};
pub use types::{
    Channel, ChannelId, FormatSpan, Group, GroupId, InlineButton, MessageKind, NewSendRecord,
    RecordId, SendKind, SendRecord, SendStatistics, SendStatus, Template, TemplateId,
};
