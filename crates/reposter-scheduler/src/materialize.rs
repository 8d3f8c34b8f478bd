use std::sync::Arc;

use reposter_core::{Group, GroupId, NewSendRecord, RecordId, SendKind};
use reposter_store::{Store, StoreError};
use tracing::{debug, error, info};

use crate::clock::Clock;

/// What one materialization pass did for a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    pub group_id: GroupId,
    /// Records created, one per channel that had nothing in flight.
    pub created: Vec<RecordId>,
    /// Chat ids skipped because a pending/retry record already exists.
    pub already_in_flight: Vec<String>,
    /// Chat ids abandoned for this tick after a storage error.
    pub errored: Vec<String>,
}

/// Turns a due group into pending repost records, one per active channel.
///
/// Check-then-insert is not atomic; callers must not run two passes for the
/// same group concurrently. The engine's single due-check loop guarantees it.
pub struct Materializer {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl Materializer {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn materialize(&self, group: &Group) -> Result<MaterializeReport, StoreError> {
        let now = self.clock.now();
        let channels = self.store.channels_for_group(group.id)?;
        let mut report = MaterializeReport {
            group_id: group.id,
            ..Default::default()
        };

        for channel in channels.iter().filter(|c| c.is_active) {
            match self.store.in_flight_records(group.id, &channel.chat_id) {
                Ok(existing) if !existing.is_empty() => {
                    debug!(
                        group_id = %group.id,
                        chat_id = %channel.chat_id,
                        record_id = %existing[0].id,
                        "record already in flight, skipping"
                    );
                    report.already_in_flight.push(channel.chat_id.clone());
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(group_id = %group.id, chat_id = %channel.chat_id, error = %e, "in-flight lookup failed");
                    report.errored.push(channel.chat_id.clone());
                    continue;
                }
            }

            let new = NewSendRecord::pending(group.id, &channel.chat_id, SendKind::Repost, now);
            match self.store.create_record(&new) {
                Ok(id) => report.created.push(id),
                Err(e) => {
                    error!(group_id = %group.id, chat_id = %channel.chat_id, error = %e, "failed to create send record");
                    report.errored.push(channel.chat_id.clone());
                }
            }
        }

        if !report.created.is_empty() {
            info!(
                group_id = %group.id,
                created = report.created.len(),
                skipped = report.already_in_flight.len(),
                "repost tasks materialized"
            );
        }
        Ok(report)
    }
}
