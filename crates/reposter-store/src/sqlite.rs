use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use reposter_core::{
    Channel, ChannelId, FormatSpan, Group, GroupId, InlineButton, MessageKind, NewSendRecord,
    RecordId, ScheduleMode, SendRecord, SendStatistics, Template, TemplateId, TimePoint,
};
use rusqlite::{types::Type, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument, warn};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::store::Store;

const RECORD_COLUMNS: &str = "id, group_id, chat_id, message_id, kind, status, error,
     retry_count, scheduled_at, sent_at, created_at, updated_at";

const GROUP_COLUMNS: &str = "id, name, description, template_id, schedule_mode,
     frequency_minutes, timepoints, is_active, auto_pin";

const CHANNEL_COLUMNS: &str = "id, group_id, chat_id, title, last_message_id, is_active";

/// Insert payload for a template.
#[derive(Debug, Clone, Default)]
pub struct NewTemplate {
    pub title: String,
    pub content: String,
    pub kind: MessageKind,
    pub media: Option<String>,
    pub buttons: Vec<Vec<InlineButton>>,
    pub entities: Vec<FormatSpan>,
}

/// Insert payload for a group.
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub description: String,
    pub template_id: TemplateId,
    pub mode: ScheduleMode,
    pub frequency_minutes: u32,
    pub timepoints: Vec<TimePoint>,
    pub auto_pin: bool,
}

impl NewGroup {
    /// A frequency-mode group firing every `minutes`.
    pub fn every(name: impl Into<String>, template_id: TemplateId, minutes: u32) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            template_id,
            mode: ScheduleMode::Frequency,
            frequency_minutes: minutes,
            timepoints: Vec::new(),
            auto_pin: false,
        }
    }
}

/// SQLite-backed [`Store`].
///
/// Wraps a single connection in a `Mutex`; every call holds it only for the
/// duration of one or two statements.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an open connection, running the schema migration first.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    // --- operator-side writes ----------------------------------------------

    pub fn create_template(&self, new: &NewTemplate) -> Result<Template> {
        let now = ts(&Utc::now());
        let buttons = serde_json::to_string(&new.buttons)?;
        let entities = serde_json::to_string(&new.entities)?;
        let db = self.conn()?;
        db.execute(
            "INSERT INTO templates
             (title, content, message_kind, media, buttons, entities, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            rusqlite::params![
                new.title,
                new.content,
                new.kind.to_string(),
                new.media,
                buttons,
                entities,
                now
            ],
        )?;
        let id = TemplateId(db.last_insert_rowid());
        info!(template_id = %id, title = %new.title, "template created");
        Ok(Template {
            id,
            title: new.title.clone(),
            content: new.content.clone(),
            kind: new.kind,
            media: new.media.clone(),
            buttons: new.buttons.clone(),
            entities: new.entities.clone(),
        })
    }

    pub fn create_group(&self, new: &NewGroup) -> Result<Group> {
        let now = ts(&Utc::now());
        let timepoints = serde_json::to_string(&new.timepoints)?;
        let id = {
            let db = self.conn()?;
            db.execute(
                "INSERT INTO channel_groups
                 (name, description, template_id, schedule_mode, frequency_minutes,
                  timepoints, is_active, auto_pin, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?8)",
                rusqlite::params![
                    new.name,
                    new.description,
                    new.template_id.0,
                    new.mode.to_string(),
                    new.frequency_minutes,
                    timepoints,
                    new.auto_pin,
                    now
                ],
            )?;
            GroupId(db.last_insert_rowid())
        };
        info!(group_id = %id, name = %new.name, mode = %new.mode, "group created");
        self.group(id)
    }

    pub fn add_channel(&self, group: GroupId, chat_id: &str, title: &str) -> Result<Channel> {
        let now = ts(&Utc::now());
        let id = {
            let db = self.conn()?;
            db.execute(
                "INSERT INTO channels
                 (group_id, chat_id, title, last_message_id, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, NULL, 1, ?4, ?4)",
                rusqlite::params![group.0, chat_id, title, now],
            )?;
            ChannelId(db.last_insert_rowid())
        };
        info!(group_id = %group, channel_id = %id, %chat_id, "channel added");
        Ok(Channel {
            id,
            group_id: group,
            chat_id: chat_id.to_string(),
            title: title.to_string(),
            last_message_id: None,
            is_active: true,
        })
    }

    pub fn set_group_active(&self, id: GroupId, active: bool) -> Result<()> {
        let n = self.conn()?.execute(
            "UPDATE channel_groups SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![active, ts(&Utc::now()), id.0],
        )?;
        if n == 0 {
            return Err(not_found("group", id.0));
        }
        info!(group_id = %id, active, "group activation changed");
        Ok(())
    }

    pub fn set_auto_pin(&self, id: GroupId, auto_pin: bool) -> Result<()> {
        let n = self.conn()?.execute(
            "UPDATE channel_groups SET auto_pin = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![auto_pin, ts(&Utc::now()), id.0],
        )?;
        if n == 0 {
            return Err(not_found("group", id.0));
        }
        Ok(())
    }

    pub fn set_channel_active(&self, id: ChannelId, active: bool) -> Result<()> {
        let n = self.conn()?.execute(
            "UPDATE channels SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![active, ts(&Utc::now()), id.0],
        )?;
        if n == 0 {
            return Err(not_found("channel", id.0));
        }
        Ok(())
    }

    /// Replace a group's schedule. The parameters of the other mode are kept.
    pub fn update_schedule(
        &self,
        id: GroupId,
        mode: ScheduleMode,
        frequency_minutes: Option<u32>,
        timepoints: Option<&[TimePoint]>,
    ) -> Result<Group> {
        let current = self.group(id)?;
        let frequency = frequency_minutes.unwrap_or(current.frequency_minutes);
        let points = match timepoints {
            Some(p) => serde_json::to_string(p)?,
            None => serde_json::to_string(&current.timepoints)?,
        };
        self.conn()?.execute(
            "UPDATE channel_groups
             SET schedule_mode = ?1, frequency_minutes = ?2, timepoints = ?3, updated_at = ?4
             WHERE id = ?5",
            rusqlite::params![mode.to_string(), frequency, points, ts(&Utc::now()), id.0],
        )?;
        info!(group_id = %id, %mode, "group schedule updated");
        self.group(id)
    }

    /// Every group, active or not, by id.
    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {GROUP_COLUMNS} FROM channel_groups ORDER BY id"
        ))?;
        let rows = stmt.query_map([], row_to_group)?;
        Ok(collect_rows(rows, "group"))
    }

    #[instrument(skip(self), fields(group_id = %group))]
    pub fn send_statistics(&self, group: GroupId) -> Result<SendStatistics> {
        let db = self.conn()?;
        let (sent, failed, pending, last): (i64, i64, i64, Option<String>) = db.query_row(
            "SELECT
                 COALESCE(SUM(status = 'sent'), 0),
                 COALESCE(SUM(status = 'failed'), 0),
                 COALESCE(SUM(status IN ('pending', 'retry')), 0),
                 MAX(CASE WHEN status = 'sent' THEN sent_at END)
             FROM send_records WHERE group_id = ?1",
            [group.0],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        let last_sent_at = last
            .map(|s| parse_ts_str(&s))
            .transpose()
            .map_err(|e| StoreError::Database(conversion_error(3, e)))?;
        Ok(SendStatistics {
            total_sent: sent as u64,
            total_failed: failed as u64,
            total_pending: pending as u64,
            last_sent_at,
        })
    }
}

impl Store for SqliteStore {
    fn active_groups(&self) -> Result<Vec<Group>> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {GROUP_COLUMNS} FROM channel_groups WHERE is_active = 1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([], row_to_group)?;
        Ok(collect_rows(rows, "group"))
    }

    fn group(&self, id: GroupId) -> Result<Group> {
        let db = self.conn()?;
        db.query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM channel_groups WHERE id = ?1"),
            [id.0],
            row_to_group,
        )
        .optional()?
        .ok_or_else(|| not_found("group", id.0))
    }

    fn channels_for_group(&self, id: GroupId) -> Result<Vec<Channel>> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE group_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([id.0], row_to_channel)?;
        Ok(collect_rows(rows, "channel"))
    }

    fn template(&self, id: TemplateId) -> Result<Template> {
        let db = self.conn()?;
        db.query_row(
            "SELECT id, title, content, message_kind, media, buttons, entities
             FROM templates WHERE id = ?1",
            [id.0],
            row_to_template,
        )
        .optional()?
        .ok_or_else(|| not_found("template", id.0))
    }

    #[instrument(skip(self, record), fields(group_id = %record.group_id, chat_id = %record.chat_id, kind = %record.kind))]
    fn create_record(&self, record: &NewSendRecord) -> Result<RecordId> {
        let now = ts(&Utc::now());
        let db = self.conn()?;
        db.execute(
            "INSERT INTO send_records
             (group_id, chat_id, message_id, kind, status, error, retry_count,
              scheduled_at, sent_at, created_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, 'pending', NULL, 0, ?4, NULL, ?5, ?5)",
            rusqlite::params![
                record.group_id.0,
                record.chat_id,
                record.kind.to_string(),
                ts(&record.scheduled_at),
                now
            ],
        )?;
        let id = RecordId(db.last_insert_rowid());
        debug!(record_id = %id, "send record created");
        Ok(id)
    }

    fn record(&self, id: RecordId) -> Result<SendRecord> {
        let db = self.conn()?;
        db.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM send_records WHERE id = ?1"),
            [id.0],
            row_to_record,
        )
        .optional()?
        .ok_or_else(|| not_found("send record", id.0))
    }

    #[instrument(skip(self, record), fields(record_id = %record.id, status = %record.status))]
    fn update_record(&self, record: &SendRecord) -> Result<()> {
        let n = self.conn()?.execute(
            "UPDATE send_records
             SET message_id = ?1, status = ?2, error = ?3, retry_count = ?4,
                 scheduled_at = ?5, sent_at = ?6, updated_at = ?7
             WHERE id = ?8",
            rusqlite::params![
                record.message_id,
                record.status.to_string(),
                record.error,
                record.retry_count,
                ts(&record.scheduled_at),
                record.sent_at.as_ref().map(ts),
                ts(&Utc::now()),
                record.id.0
            ],
        )?;
        if n == 0 {
            return Err(not_found("send record", record.id.0));
        }
        Ok(())
    }

    fn due_records(&self, now: DateTime<Utc>) -> Result<Vec<SendRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM send_records
             WHERE status IN ('pending', 'retry') AND scheduled_at <= ?1
             ORDER BY scheduled_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map([ts(&now)], row_to_record)?;
        strict_rows(rows)
    }

    fn in_flight_records(&self, group: GroupId, chat_id: &str) -> Result<Vec<SendRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM send_records
             WHERE group_id = ?1 AND chat_id = ?2 AND status IN ('pending', 'retry')
             ORDER BY id"
        ))?;
        let rows = stmt.query_map(rusqlite::params![group.0, chat_id], row_to_record)?;
        strict_rows(rows)
    }

    fn recent_records(&self, group: GroupId, limit: usize) -> Result<Vec<SendRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM send_records
             WHERE group_id = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(rusqlite::params![group.0, limit], row_to_record)?;
        Ok(collect_rows(rows, "send record"))
    }

    fn set_channel_last_message(
        &self,
        channel: ChannelId,
        message_id: Option<&str>,
    ) -> Result<()> {
        let n = self.conn()?.execute(
            "UPDATE channels SET last_message_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![message_id, ts(&Utc::now()), channel.0],
        )?;
        if n == 0 {
            return Err(not_found("channel", channel.0));
        }
        Ok(())
    }

    fn purge_stale_pending(&self) -> Result<usize> {
        let n = self.conn()?.execute(
            "DELETE FROM send_records WHERE status = 'pending' AND kind = 'repost'",
            [],
        )?;
        if n > 0 {
            warn!(count = n, "stale pending repost records purged");
        }
        Ok(n)
    }
}

// --- row mapping -------------------------------------------------------------

/// Fixed-width UTC timestamps so that text order equals time order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts_str(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc))
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_ts_str(&s).map_err(|e| conversion_error(idx, e))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_ts_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e: String| conversion_error(idx, e))
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_error(idx, e))
}

fn row_to_group(row: &Row<'_>) -> rusqlite::Result<Group> {
    let mode: String = row.get(4)?;
    Ok(Group {
        id: GroupId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        template_id: TemplateId(row.get(3)?),
        mode: ScheduleMode::from_stored(&mode),
        frequency_minutes: row.get(5)?,
        timepoints: json_col(row, 6)?,
        is_active: row.get(7)?,
        auto_pin: row.get(8)?,
    })
}

fn row_to_channel(row: &Row<'_>) -> rusqlite::Result<Channel> {
    let last: Option<String> = row.get(4)?;
    Ok(Channel {
        id: ChannelId(row.get(0)?),
        group_id: GroupId(row.get(1)?),
        chat_id: row.get(2)?,
        title: row.get(3)?,
        last_message_id: last.filter(|s| !s.is_empty()),
        is_active: row.get(5)?,
    })
}

fn row_to_template(row: &Row<'_>) -> rusqlite::Result<Template> {
    Ok(Template {
        id: TemplateId(row.get(0)?),
        title: row.get(1)?,
        content: row.get(2)?,
        kind: parsed_col(row, 3)?,
        media: row.get(4)?,
        buttons: json_col(row, 5)?,
        entities: json_col(row, 6)?,
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<SendRecord> {
    Ok(SendRecord {
        id: RecordId(row.get(0)?),
        group_id: GroupId(row.get(1)?),
        chat_id: row.get(2)?,
        message_id: row.get(3)?,
        kind: parsed_col(row, 4)?,
        status: parsed_col(row, 5)?,
        error: row.get(6)?,
        retry_count: row.get(7)?,
        scheduled_at: ts_col(row, 8)?,
        sent_at: opt_ts_col(row, 9)?,
        created_at: ts_col(row, 10)?,
        updated_at: ts_col(row, 11)?,
    })
}

/// Collect mapped rows, failing on the first one that does not decode.
///
/// Used where a missing row would be read as "no work in flight".
fn strict_rows<T, I>(rows: I) -> Result<Vec<T>>
where
    I: Iterator<Item = rusqlite::Result<T>>,
{
    rows.collect::<rusqlite::Result<Vec<T>>>().map_err(StoreError::from)
}

/// Collect mapped rows for listings, skipping (and logging) any that fail to decode.
fn collect_rows<T, I>(rows: I, what: &str) -> Vec<T>
where
    I: Iterator<Item = rusqlite::Result<T>>,
{
    rows.filter_map(|r| match r {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "skipping undecodable {what} row");
            None
        }
    })
    .collect()
}

fn not_found(entity: &'static str, id: i64) -> StoreError {
    StoreError::NotFound { entity, id }
}
