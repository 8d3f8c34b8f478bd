use rusqlite::Connection;

use crate::error::Result;

/// Initialise the repost schema in `conn`.
///
/// Idempotent: every statement is `IF NOT EXISTS`, so it runs on each start.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS templates (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            title         TEXT    NOT NULL,
            content       TEXT    NOT NULL DEFAULT '',
            message_kind  TEXT    NOT NULL DEFAULT 'text',
            media         TEXT,                          -- file id or URL
            buttons       TEXT    NOT NULL DEFAULT '[]', -- JSON rows of {text,url}
            entities      TEXT    NOT NULL DEFAULT '[]', -- JSON formatting spans
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS channel_groups (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            name               TEXT    NOT NULL UNIQUE,
            description        TEXT    NOT NULL DEFAULT '',
            template_id        INTEGER NOT NULL REFERENCES templates (id),
            schedule_mode      TEXT    NOT NULL DEFAULT 'frequency',
            frequency_minutes  INTEGER NOT NULL DEFAULT 60,
            timepoints         TEXT    NOT NULL DEFAULT '[]', -- JSON [{hour,minute}]
            is_active          INTEGER NOT NULL DEFAULT 1,
            auto_pin           INTEGER NOT NULL DEFAULT 0,
            created_at         TEXT    NOT NULL,
            updated_at         TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS channels (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id         INTEGER NOT NULL REFERENCES channel_groups (id) ON DELETE CASCADE,
            chat_id          TEXT    NOT NULL,
            title            TEXT    NOT NULL DEFAULT '',
            last_message_id  TEXT,
            is_active        INTEGER NOT NULL DEFAULT 1,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL,
            UNIQUE (group_id, chat_id)
        ) STRICT;

        -- No FK on group_id: the audit trail outlives deleted groups.
        CREATE TABLE IF NOT EXISTS send_records (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id      INTEGER NOT NULL,
            chat_id       TEXT    NOT NULL,
            message_id    TEXT,
            kind          TEXT    NOT NULL,
            status        TEXT    NOT NULL DEFAULT 'pending',
            error         TEXT,
            retry_count   INTEGER NOT NULL DEFAULT 0,
            scheduled_at  TEXT    NOT NULL,
            sent_at       TEXT,
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL
        ) STRICT;

        -- Dispatch poll: WHERE status IN (...) AND scheduled_at <= ? ORDER BY scheduled_at
        CREATE INDEX IF NOT EXISTS idx_send_records_due
            ON send_records (status, scheduled_at);

        -- In-flight checks per (group, channel)
        CREATE INDEX IF NOT EXISTS idx_send_records_group
            ON send_records (group_id, chat_id, status);

        -- Recent history per group, newest first
        CREATE INDEX IF NOT EXISTS idx_send_records_history
            ON send_records (group_id, id);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('templates', 'channel_groups', 'channels', 'send_records')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }
}
