use reposter_core::GroupId;
use reposter_store::StoreError;
use thiserror::Error;

/// Errors returned to callers of manual operations.
///
/// The periodic loops never return errors; they log and carry on.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Another manual operation on this group is still running.
    #[error("Group {group} is busy with another operation")]
    Busy { group: GroupId },

    #[error("Group {group} is inactive")]
    GroupInactive { group: GroupId },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
