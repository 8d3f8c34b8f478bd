use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reposter_core::{Channel, Delivery, SendKind, SendRecord, SendStatus};
use reposter_store::Store;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;

/// Fixed-budget, fixed-interval retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// A record fails for good once `retry_count` reaches this.
    pub max_attempts: u32,
    /// Delay before a failed record is due again.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::seconds(300),
        }
    }
}

/// A best-effort step that failed while the send itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupWarning {
    DeletePrevious { message_id: String, error: String },
    Pin { error: String },
    /// The channel's last-message id could not be stored; the next repost
    /// will not be able to delete this message.
    LastMessageNotSaved { error: String },
    /// The record could not be marked sent and stays in flight.
    RecordNotSaved { error: String },
}

/// Result of reconciling one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Delivered; `warnings` lists any best-effort step that failed.
    Sent {
        message_id: String,
        warnings: Vec<CleanupWarning>,
    },
    /// Delivery failed with budget left; due again at `next_attempt_at`.
    Retrying {
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
        error: String,
    },
    /// Terminal failure.
    Failed { reason: String },
    /// The record was no longer in flight when it reached the reconciler.
    Skipped { status: SendStatus },
}

impl Outcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Outcome::Sent { .. })
    }

    /// Sent with no warnings.
    pub fn is_clean(&self) -> bool {
        matches!(self, Outcome::Sent { warnings, .. } if warnings.is_empty())
    }
}

/// Result of clearing a channel's last delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearOutcome {
    NothingToDelete,
    Deleted { message_id: String },
    Failed { error: String },
}

/// Why delivery stopped before a message id was obtained.
enum Abort {
    /// Definitional failure; retrying cannot help.
    Terminal(String),
    /// Consumes retry budget.
    Transient(String),
}

/// Apply one delivery failure to `record` and return the outcome.
///
/// Increments `retry_count`, stores `error`, then either reschedules the
/// record `policy.interval` from `now` or marks it failed.
pub fn apply_failure(
    record: &mut SendRecord,
    error: &str,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
) -> Outcome {
    record.retry_count += 1;
    record.error = Some(error.to_string());
    if record.retry_count < policy.max_attempts {
        record.status = SendStatus::Retry;
        record.scheduled_at = now + policy.interval;
        Outcome::Retrying {
            attempt: record.retry_count,
            next_attempt_at: record.scheduled_at,
            error: error.to_string(),
        }
    } else {
        record.status = SendStatus::Failed;
        Outcome::Failed {
            reason: error.to_string(),
        }
    }
}

/// Executes one send record end to end and persists the result.
pub struct Reconciler {
    store: Arc<dyn Store>,
    delivery: Arc<dyn Delivery>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        delivery: Arc<dyn Delivery>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            delivery,
            clock,
            retry,
        }
    }

    /// Run the record through delivery and its state machine.
    ///
    /// The caller must hold the record's (group, channel) claim and pass the
    /// record as stored after the claim was taken.
    pub async fn reconcile(&self, mut record: SendRecord) -> Outcome {
        if !record.status.is_in_flight() {
            debug!(record_id = %record.id, status = %record.status, "record no longer in flight");
            return Outcome::Skipped {
                status: record.status,
            };
        }

        info!(
            record_id = %record.id,
            group_id = %record.group_id,
            chat_id = %record.chat_id,
            kind = %record.kind,
            attempt = record.retry_count + 1,
            "processing send record"
        );

        match self.deliver(&record).await {
            Ok((message_id, mut warnings)) => {
                record.status = SendStatus::Sent;
                record.message_id = Some(message_id.clone());
                record.sent_at = Some(self.clock.now());
                record.error = None;
                if let Err(e) = self.store.update_record(&record) {
                    error!(record_id = %record.id, error = %e, "failed to mark record sent");
                    warnings.push(CleanupWarning::RecordNotSaved {
                        error: e.to_string(),
                    });
                }
                info!(
                    record_id = %record.id,
                    chat_id = %record.chat_id,
                    %message_id,
                    warnings = warnings.len(),
                    "send record delivered"
                );
                Outcome::Sent {
                    message_id,
                    warnings,
                }
            }
            Err(Abort::Terminal(reason)) => {
                record.status = SendStatus::Failed;
                record.error = Some(reason.clone());
                self.persist(&record);
                warn!(record_id = %record.id, %reason, "send record failed permanently");
                Outcome::Failed { reason }
            }
            Err(Abort::Transient(err)) => {
                let outcome = apply_failure(&mut record, &err, self.clock.now(), &self.retry);
                self.persist(&record);
                match &outcome {
                    Outcome::Retrying {
                        attempt,
                        next_attempt_at,
                        ..
                    } => warn!(
                        record_id = %record.id,
                        attempt,
                        next_attempt_at = %next_attempt_at,
                        error = %err,
                        "send failed, will retry"
                    ),
                    _ => error!(
                        record_id = %record.id,
                        attempts = record.retry_count,
                        error = %err,
                        "send failed, retry budget exhausted"
                    ),
                }
                outcome
            }
        }
    }

    /// Delete the channel's last delivered message and forget its id.
    ///
    /// The id is re-read from storage, so the caller must hold the channel's
    /// claim. It is cleared only after the platform confirmed the delete.
    pub async fn clear_last_message(&self, channel: &Channel) -> ClearOutcome {
        let stored = match self.store.channels_for_group(channel.group_id) {
            Ok(channels) => channels.into_iter().find(|c| c.id == channel.id),
            Err(e) => {
                error!(chat_id = %channel.chat_id, error = %e, "failed to reload channel");
                return ClearOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };
        let Some(message_id) = stored.and_then(|c| c.last_message_id) else {
            return ClearOutcome::NothingToDelete;
        };
        if let Err(e) = self.delivery.delete(&channel.chat_id, &message_id).await {
            warn!(chat_id = %channel.chat_id, %message_id, error = %e, "failed to delete last message");
            return ClearOutcome::Failed {
                error: e.to_string(),
            };
        }
        if let Err(e) = self.store.set_channel_last_message(channel.id, None) {
            error!(chat_id = %channel.chat_id, error = %e, "failed to clear last message id");
            return ClearOutcome::Failed {
                error: e.to_string(),
            };
        }
        info!(chat_id = %channel.chat_id, %message_id, "last message deleted");
        ClearOutcome::Deleted { message_id }
    }

    async fn deliver(&self, record: &SendRecord) -> Result<(String, Vec<CleanupWarning>), Abort> {
        let group = match self.store.group(record.group_id) {
            Ok(g) => g,
            Err(e) if e.is_not_found() => return Err(Abort::Terminal("group not found".into())),
            Err(e) => return Err(Abort::Transient(format!("failed to load group: {e}"))),
        };
        if !group.is_active {
            return Err(Abort::Terminal("group is inactive".into()));
        }

        let template = self
            .store
            .template(group.template_id)
            .map_err(|e| Abort::Transient(format!("failed to load template: {e}")))?;

        let channel = self
            .store
            .channels_for_group(group.id)
            .map_err(|e| Abort::Transient(format!("failed to load channels: {e}")))?
            .into_iter()
            .find(|c| c.is_active && c.chat_id == record.chat_id)
            .ok_or_else(|| Abort::Terminal("channel not found".into()))?;

        let mut warnings = Vec::new();

        if record.kind == SendKind::Repost {
            if let Some(previous) = &channel.last_message_id {
                if let Err(e) = self.delivery.delete(&channel.chat_id, previous).await {
                    warn!(chat_id = %channel.chat_id, message_id = %previous, error = %e, "failed to delete previous message");
                    warnings.push(CleanupWarning::DeletePrevious {
                        message_id: previous.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let message_id = self
            .delivery
            .send(&channel.chat_id, &template)
            .await
            .map_err(|e| Abort::Transient(e.to_string()))?;

        if group.auto_pin {
            if let Err(e) = self.delivery.pin(&channel.chat_id, &message_id).await {
                warn!(chat_id = %channel.chat_id, %message_id, error = %e, "failed to pin message");
                warnings.push(CleanupWarning::Pin {
                    error: e.to_string(),
                });
            }
        }

        if record.kind == SendKind::Repost {
            if let Err(e) = self
                .store
                .set_channel_last_message(channel.id, Some(&message_id))
            {
                error!(chat_id = %channel.chat_id, error = %e, "failed to store last message id");
                warnings.push(CleanupWarning::LastMessageNotSaved {
                    error: e.to_string(),
                });
            }
        }

        Ok((message_id, warnings))
    }

    fn persist(&self, record: &SendRecord) {
        if let Err(e) = self.store.update_record(record) {
            error!(record_id = %record.id, status = %record.status, error = %e, "failed to persist send record");
        }
    }
}
