//! Operator-triggered sends and deletes.
//!
//! Manual work goes through the same (group, channel) claims as the
//! dispatch loop, so a "send now" can never overlap an automatic delivery
//! to the same channel. A per-group claim additionally keeps two manual
//! operations on one group apart and is held for a short grace period
//! after the operation returns.

use std::sync::Arc;
use std::time::Duration;

use reposter_core::{GroupId, NewSendRecord, RecordId, SendKind};
use reposter_store::Store;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{Result, SchedulerError};
use crate::locks::{DeliveryLocks, GroupClaim};
use crate::reconcile::{ClearOutcome, Outcome, Reconciler};

/// Per-channel result of a manual operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// The record was reconciled; see the inner outcome.
    Delivered { record_id: RecordId, outcome: Outcome },
    /// A dispatch worker is delivering to this channel right now.
    Busy,
    /// A record of another kind is already in flight for this channel.
    InFlight { record_id: RecordId, kind: SendKind },
    Cleared(ClearOutcome),
    /// Storage failed before anything was sent.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualReport {
    pub group_id: GroupId,
    /// `(chat_id, outcome)` in channel order.
    pub channels: Vec<(String, ChannelOutcome)>,
}

impl ManualReport {
    /// Channels that ended with a delivered message.
    pub fn sent_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|(_, o)| matches!(o, ChannelOutcome::Delivered { outcome, .. } if outcome.is_sent()))
            .count()
    }
}

pub struct ManualOps {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    reconciler: Arc<Reconciler>,
    locks: Arc<DeliveryLocks>,
    pace: Duration,
    grace: Duration,
}

impl ManualOps {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        reconciler: Arc<Reconciler>,
        locks: Arc<DeliveryLocks>,
        pace: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            reconciler,
            locks,
            pace,
            grace,
        }
    }

    /// Send the group's template to every active channel now.
    ///
    /// For `Repost`, an in-flight repost record is picked up instead of
    /// creating a second one.
    pub async fn trigger(&self, group_id: GroupId, kind: SendKind) -> Result<ManualReport> {
        let claim = self.claim_group(group_id)?;
        let result = self.trigger_claimed(group_id, kind).await;
        self.release_after_grace(claim);
        result
    }

    /// Delete the last delivered message on every active channel of the group.
    pub async fn delete_last_messages(&self, group_id: GroupId) -> Result<ManualReport> {
        let claim = self.claim_group(group_id)?;
        let result = self.delete_claimed(group_id).await;
        self.release_after_grace(claim);
        result
    }

    fn claim_group(&self, group_id: GroupId) -> Result<GroupClaim> {
        self.locks
            .try_claim_group(group_id)
            .ok_or(SchedulerError::Busy { group: group_id })
    }

    fn release_after_grace(&self, claim: GroupClaim) {
        if self.grace.is_zero() {
            return;
        }
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            drop(claim);
        });
    }

    async fn trigger_claimed(&self, group_id: GroupId, kind: SendKind) -> Result<ManualReport> {
        let group = self.store.group(group_id)?;
        if !group.is_active {
            return Err(SchedulerError::GroupInactive { group: group_id });
        }
        let channels: Vec<_> = self
            .store
            .channels_for_group(group_id)?
            .into_iter()
            .filter(|c| c.is_active)
            .collect();

        info!(group_id = %group_id, %kind, channels = channels.len(), "manual send started");
        let mut report = ManualReport {
            group_id,
            channels: Vec::with_capacity(channels.len()),
        };

        for (i, channel) in channels.iter().enumerate() {
            if i > 0 && !self.pace.is_zero() {
                tokio::time::sleep(self.pace).await;
            }
            let outcome = self.send_one(group_id, &channel.chat_id, kind).await;
            report.channels.push((channel.chat_id.clone(), outcome));
        }

        info!(
            group_id = %group_id,
            sent = report.sent_count(),
            total = report.channels.len(),
            "manual send finished"
        );
        Ok(report)
    }

    async fn send_one(&self, group_id: GroupId, chat_id: &str, kind: SendKind) -> ChannelOutcome {
        let Some(_claim) = self.locks.try_claim(group_id, chat_id) else {
            warn!(group_id = %group_id, %chat_id, "channel busy, manual send skipped");
            return ChannelOutcome::Busy;
        };

        let existing = match self.store.in_flight_records(group_id, chat_id) {
            Ok(records) => records.into_iter().next(),
            Err(e) => return ChannelOutcome::Error(e.to_string()),
        };

        let record = match existing {
            Some(record) if record.kind == kind => record,
            Some(record) => {
                return ChannelOutcome::InFlight {
                    record_id: record.id,
                    kind: record.kind,
                }
            }
            None => {
                let new = NewSendRecord::pending(group_id, chat_id, kind, self.clock.now());
                match self
                    .store
                    .create_record(&new)
                    .and_then(|id| self.store.record(id))
                {
                    Ok(record) => record,
                    Err(e) => return ChannelOutcome::Error(e.to_string()),
                }
            }
        };

        let record_id = record.id;
        let outcome = self.reconciler.reconcile(record).await;
        ChannelOutcome::Delivered { record_id, outcome }
    }

    async fn delete_claimed(&self, group_id: GroupId) -> Result<ManualReport> {
        // Make sure the group exists before touching channels.
        self.store.group(group_id)?;
        let channels = self.store.channels_for_group(group_id)?;
        let mut report = ManualReport {
            group_id,
            channels: Vec::new(),
        };

        let mut first = true;
        for channel in channels.iter().filter(|c| c.is_active) {
            if !first && !self.pace.is_zero() {
                tokio::time::sleep(self.pace).await;
            }
            first = false;

            // The listing is stale by now; the reconciler re-reads the id under the claim.
            let outcome = match self.locks.try_claim(group_id, &channel.chat_id) {
                Some(_claim) => ChannelOutcome::Cleared(self.reconciler.clear_last_message(channel).await),
                None => ChannelOutcome::Busy,
            };
            report.channels.push((channel.chat_id.clone(), outcome));
        }

        info!(group_id = %group_id, channels = report.channels.len(), "manual delete finished");
        Ok(report)
    }
}
