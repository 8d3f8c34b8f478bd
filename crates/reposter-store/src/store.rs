use chrono::{DateTime, Utc};
use reposter_core::{
    Channel, ChannelId, Group, GroupId, NewSendRecord, RecordId, SendRecord, Template, TemplateId,
};

use crate::error::Result;

/// Persistence gateway consumed by the scheduling engine.
///
/// Calls are synchronous and short; implementations must be `Send + Sync`
/// because the dispatch workers share one instance.
pub trait Store: Send + Sync {
    /// All groups with `is_active` set.
    fn active_groups(&self) -> Result<Vec<Group>>;

    /// A group by id, active or not. `NotFound` if absent.
    fn group(&self, id: GroupId) -> Result<Group>;

    /// Every channel of a group, active or not, in insertion order.
    fn channels_for_group(&self, id: GroupId) -> Result<Vec<Channel>>;

    fn template(&self, id: TemplateId) -> Result<Template>;

    /// Insert a `pending` record and return its id.
    fn create_record(&self, record: &NewSendRecord) -> Result<RecordId>;

    fn record(&self, id: RecordId) -> Result<SendRecord>;

    /// Persist the mutable fields of a record: status, error, retry count,
    /// message id, scheduled-at and sent-at.
    fn update_record(&self, record: &SendRecord) -> Result<()>;

    /// In-flight records with `scheduled_at <= now`, oldest first.
    fn due_records(&self, now: DateTime<Utc>) -> Result<Vec<SendRecord>>;

    /// In-flight records for one (group, channel) pair.
    fn in_flight_records(&self, group: GroupId, chat_id: &str) -> Result<Vec<SendRecord>>;

    /// The `limit` most recently created records of a group, newest first.
    fn recent_records(&self, group: GroupId, limit: usize) -> Result<Vec<SendRecord>>;

    /// Set or clear a channel's last delivered message id.
    fn set_channel_last_message(&self, channel: ChannelId, message_id: Option<&str>)
        -> Result<()>;

    /// Delete `pending` repost rows left behind by a previous process.
    /// Returns the number of rows removed.
    fn purge_stale_pending(&self) -> Result<usize>;
}
