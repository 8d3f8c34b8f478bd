//! `reposter-store`: SQLite persistence for groups, channels, templates
//! and send records.
//!
//! # Tables
//!
//! | Table            | Owner                                   |
//! |------------------|-----------------------------------------|
//! | `templates`      | operator edits                          |
//! | `channel_groups` | operator edits                          |
//! | `channels`       | operator edits; `last_message_id` by the reconciler |
//! | `send_records`   | scheduler (work queue + audit trail)    |

pub mod db;
pub mod error;
pub mod sqlite;
pub mod store;

pub use error::{Result, StoreError};
pub use sqlite::{NewGroup, NewTemplate, SqliteStore};
pub use store::Store;
