use std::sync::Arc;
use std::time::Duration;

use reposter_core::RecordId;
use reposter_store::{Store, StoreError};
use tokio::sync::{watch, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::locks::DeliveryLocks;
use crate::reconcile::Reconciler;

/// Inter-dispatch delays within one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Wait after each dispatch.
    pub delay: Duration,
    /// Every `burst_size`-th dispatch waits `burst_pause` instead.
    pub burst_size: usize,
    pub burst_pause: Duration,
}

impl Pacing {
    /// No delays at all.
    pub fn none() -> Self {
        Self {
            delay: Duration::ZERO,
            burst_size: 1,
            burst_pause: Duration::ZERO,
        }
    }

    /// Delay to apply after the dispatch at position `index` (0-based).
    pub fn after(&self, index: usize) -> Duration {
        if index > 0 && self.burst_size > 0 && index % self.burst_size == 0 {
            self.burst_pause
        } else {
            self.delay
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(200),
            burst_size: 5,
            burst_pause: Duration::from_secs(2),
        }
    }
}

/// What one dispatch tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Records handed to a worker, in dispatch order.
    pub dispatched: Vec<RecordId>,
    /// Records left for a later tick because every worker slot was taken.
    pub deferred: usize,
    /// Records whose (group, channel) pair was already being delivered.
    pub busy: Vec<RecordId>,
    /// Records that were finished or rescheduled by someone else between
    /// the due query and taking the claim.
    pub stale: Vec<RecordId>,
}

/// Polls due records and runs them on a bounded pool of worker tasks.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    reconciler: Arc<Reconciler>,
    locks: Arc<DeliveryLocks>,
    workers: Arc<Semaphore>,
    max_workers: usize,
    tracker: TaskTracker,
    pacing: Pacing,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        reconciler: Arc<Reconciler>,
        locks: Arc<DeliveryLocks>,
        max_workers: usize,
        pacing: Pacing,
    ) -> Self {
        Self {
            store,
            clock,
            reconciler,
            locks,
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            tracker: TaskTracker::new(),
            pacing,
        }
    }

    /// One pass over the due backlog, oldest first.
    ///
    /// Slots are acquired without waiting. Once none is free the rest of the
    /// backlog stays in storage for the next tick.
    pub async fn tick(&self, shutdown: &watch::Receiver<bool>) -> Result<DispatchReport, StoreError> {
        let due = self.store.due_records(self.clock.now())?;
        let total = due.len();
        let mut report = DispatchReport::default();

        for (position, record) in due.into_iter().enumerate() {
            if *shutdown.borrow() {
                report.deferred += total - position;
                break;
            }

            let Ok(permit) = Arc::clone(&self.workers).try_acquire_owned() else {
                report.deferred += total - position;
                info!(deferred = report.deferred, "dispatcher at capacity; deferring due records");
                break;
            };

            let Some(claim) = self.locks.try_claim(record.group_id, &record.chat_id) else {
                debug!(record_id = %record.id, chat_id = %record.chat_id, "channel busy, skipping record");
                report.busy.push(record.id);
                continue;
            };

            // Whoever held the claim before us may have finished this record.
            let record = match self.store.record(record.id) {
                Ok(current)
                    if current.status.is_in_flight() && current.scheduled_at <= self.clock.now() =>
                {
                    current
                }
                Ok(current) => {
                    debug!(
                        record_id = %current.id,
                        status = %current.status,
                        scheduled_at = %current.scheduled_at,
                        "record changed since the due query, skipping"
                    );
                    report.stale.push(current.id);
                    continue;
                }
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "failed to reload send record, skipping");
                    report.stale.push(record.id);
                    continue;
                }
            };

            let index = report.dispatched.len();
            report.dispatched.push(record.id);

            let reconciler = Arc::clone(&self.reconciler);
            self.tracker.spawn(async move {
                let _permit = permit;
                let _claim = claim;
                reconciler.reconcile(record).await;
            });

            if position + 1 < total {
                let pause = self.pacing.after(index);
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }
        }

        if !report.dispatched.is_empty() {
            info!(
                dispatched = report.dispatched.len(),
                busy = report.busy.len(),
                stale = report.stale.len(),
                deferred = report.deferred,
                "dispatch tick complete"
            );
        }
        let evicted = self.locks.evict_idle();
        if evicted > 0 {
            debug!(evicted, "idle delivery locks evicted");
        }
        Ok(report)
    }

    /// Workers currently running.
    pub fn in_flight(&self) -> usize {
        self.max_workers - self.workers.available_permits()
    }

    /// Stop accepting work and wait for running workers to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use reposter_core::{SendKind, SendStatus};

    use super::*;
    use crate::clock::ManualClock;
    use crate::manual::ManualOps;
    use crate::reconcile::RetryPolicy;
    use crate::test_support::{fixture, utc, Fixture, RecordingDelivery};

    fn dispatcher(
        fx: &Fixture,
        delivery: Arc<RecordingDelivery>,
        locks: Arc<DeliveryLocks>,
        workers: usize,
    ) -> (Dispatcher, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(utc("2026-03-01T12:00:00Z")));
        let reconciler = Arc::new(Reconciler::new(
            fx.store.clone(),
            delivery,
            clock.clone(),
            RetryPolicy::default(),
        ));
        let d = Dispatcher::new(
            fx.store.clone(),
            clock.clone(),
            reconciler,
            locks,
            workers,
            Pacing::none(),
        );
        (d, clock)
    }

    fn no_shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[test]
    fn pacing_inserts_burst_pause_every_kth_item() {
        let pacing = Pacing::default();
        assert_eq!(pacing.after(0), Duration::from_millis(200));
        assert_eq!(pacing.after(4), Duration::from_millis(200));
        assert_eq!(pacing.after(5), Duration::from_secs(2));
        assert_eq!(pacing.after(10), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn first_tick_takes_the_oldest_records_up_to_capacity() {
        let chats = ["@a", "@b", "@c", "@d", "@e"];
        let fx = fixture(&chats);
        // Insert in shuffled scheduled order: @c oldest, then @a, @e, @b, @d.
        let base = utc("2026-03-01T11:00:00Z");
        let mut ids = std::collections::HashMap::new();
        for (chat, minute) in [("@a", 2), ("@b", 4), ("@c", 1), ("@d", 5), ("@e", 3)] {
            let id = fx.pending(chat, SendKind::Repost, base + ChronoDuration::minutes(minute));
            ids.insert(chat, id);
        }

        let (delivery, gate) = RecordingDelivery::gated();
        let delivery = Arc::new(delivery);
        let (d, _clock) = dispatcher(&fx, delivery.clone(), Arc::new(DeliveryLocks::new()), 2);

        let report = d.tick(&no_shutdown()).await.unwrap();
        assert_eq!(report.dispatched, vec![ids["@c"], ids["@a"]]);
        assert_eq!(report.deferred, 3);
        assert_eq!(d.in_flight(), 2);

        gate.add_permits(chats.len());
        d.drain().await;
        assert_eq!(d.in_flight(), 0);
        assert_eq!(fx.store.record(ids["@c"]).unwrap().status, SendStatus::Sent);
        assert_eq!(fx.store.record(ids["@e"]).unwrap().status, SendStatus::Pending);
    }

    #[tokio::test]
    async fn running_record_is_not_dispatched_twice() {
        let fx = fixture(&["@a"]);
        let id = fx.pending("@a", SendKind::Repost, utc("2026-03-01T11:00:00Z"));
        let (delivery, gate) = RecordingDelivery::gated();
        let delivery = Arc::new(delivery);
        let (d, _clock) = dispatcher(&fx, delivery.clone(), Arc::new(DeliveryLocks::new()), 4);

        let first = d.tick(&no_shutdown()).await.unwrap();
        assert_eq!(first.dispatched, vec![id]);

        // Still pending in storage while the worker waits on the gate.
        let second = d.tick(&no_shutdown()).await.unwrap();
        assert!(second.dispatched.is_empty());
        assert_eq!(second.busy, vec![id]);

        gate.add_permits(1);
        d.drain().await;
        assert_eq!(delivery.sends(), vec!["@a".to_string()]);
    }

    #[tokio::test]
    async fn manual_claim_blocks_automatic_dispatch() {
        let fx = fixture(&["@a", "@b"]);
        let a = fx.pending("@a", SendKind::Repost, utc("2026-03-01T11:00:00Z"));
        let b = fx.pending("@b", SendKind::Repost, utc("2026-03-01T11:01:00Z"));
        let locks = Arc::new(DeliveryLocks::new());
        let delivery = Arc::new(RecordingDelivery::new());
        let (d, _clock) = dispatcher(&fx, delivery, locks.clone(), 4);

        let held = locks.try_claim(fx.group_id, "@a").unwrap();
        let report = d.tick(&no_shutdown()).await.unwrap();
        assert_eq!(report.busy, vec![a]);
        assert_eq!(report.dispatched, vec![b]);
        drop(held);
        d.drain().await;
    }

    #[tokio::test]
    async fn future_retry_records_wait_for_their_time() {
        let fx = fixture(&["@a"]);
        let id = fx.pending("@a", SendKind::Repost, utc("2026-03-01T11:00:00Z"));
        let mut rec = fx.store.record(id).unwrap();
        rec.status = SendStatus::Retry;
        rec.retry_count = 1;
        rec.scheduled_at = utc("2026-03-01T12:05:00Z");
        fx.store.update_record(&rec).unwrap();

        let delivery = Arc::new(RecordingDelivery::new());
        let (d, clock) = dispatcher(&fx, delivery, Arc::new(DeliveryLocks::new()), 1);
        assert!(d.tick(&no_shutdown()).await.unwrap().dispatched.is_empty());

        clock.advance(ChronoDuration::minutes(5));
        assert_eq!(d.tick(&no_shutdown()).await.unwrap().dispatched, vec![id]);
        d.drain().await;
        assert_eq!(fx.store.record(id).unwrap().status, SendStatus::Sent);
    }

    #[tokio::test]
    async fn record_finished_during_pacing_is_not_delivered_again() {
        let fx = fixture(&["@a", "@b"]);
        let a = fx.pending("@a", SendKind::Repost, utc("2026-03-01T11:00:00Z"));
        let b = fx.pending("@b", SendKind::Repost, utc("2026-03-01T11:01:00Z"));
        let locks = Arc::new(DeliveryLocks::new());
        let delivery = Arc::new(RecordingDelivery::new());
        let (mut d, clock) = dispatcher(&fx, delivery.clone(), locks.clone(), 4);
        d.pacing = Pacing {
            delay: Duration::from_millis(300),
            burst_size: 10,
            burst_pause: Duration::from_millis(300),
        };
        let manual = ManualOps::new(
            fx.store.clone(),
            clock.clone(),
            Arc::new(Reconciler::new(
                fx.store.clone(),
                delivery.clone(),
                clock,
                RetryPolicy::default(),
            )),
            locks,
            Duration::ZERO,
            Duration::ZERO,
        );

        let rx = no_shutdown();
        let (report, manual_report) = tokio::join!(d.tick(&rx), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            manual.trigger(fx.group_id, SendKind::Repost).await.unwrap()
        });
        d.drain().await;

        let report = report.unwrap();
        assert_eq!(report.dispatched, vec![a]);
        assert_eq!(report.stale, vec![b]);
        assert_eq!(manual_report.sent_count(), 2);

        let b_sends = delivery.sends().iter().filter(|c| *c == "@b").count();
        assert_eq!(b_sends, 1, "record {b} delivered more than once");
        let rec = fx.store.record(b).unwrap();
        assert_eq!(rec.status, SendStatus::Sent);
        let channel = fx
            .store
            .channels_for_group(fx.group_id)
            .unwrap()
            .into_iter()
            .find(|c| c.chat_id == "@b")
            .unwrap();
        assert_eq!(channel.last_message_id, rec.message_id);
    }

    #[tokio::test]
    async fn record_rescheduled_after_the_due_query_is_left_alone() {
        let fx = fixture(&["@a", "@b"]);
        let a = fx.pending("@a", SendKind::Repost, utc("2026-03-01T11:00:00Z"));
        let b = fx.pending("@b", SendKind::Repost, utc("2026-03-01T11:01:00Z"));
        let delivery = Arc::new(RecordingDelivery::new());
        let (mut d, _clock) = dispatcher(&fx, delivery.clone(), Arc::new(DeliveryLocks::new()), 4);
        d.pacing = Pacing {
            delay: Duration::from_millis(200),
            burst_size: 10,
            burst_pause: Duration::from_millis(200),
        };

        let rx = no_shutdown();
        let (report, ()) = tokio::join!(d.tick(&rx), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut rec = fx.store.record(b).unwrap();
            rec.status = SendStatus::Retry;
            rec.retry_count = 1;
            rec.scheduled_at = utc("2026-03-01T12:05:00Z");
            fx.store.update_record(&rec).unwrap();
        });
        d.drain().await;

        let report = report.unwrap();
        assert_eq!(report.dispatched, vec![a]);
        assert_eq!(report.stale, vec![b]);
        assert_eq!(delivery.sends(), vec!["@a".to_string()]);
        assert_eq!(fx.store.record(b).unwrap().status, SendStatus::Retry);
    }

    #[tokio::test]
    async fn shutdown_stops_dispatching() {
        let fx = fixture(&["@a"]);
        fx.pending("@a", SendKind::Repost, utc("2026-03-01T11:00:00Z"));
        let delivery = Arc::new(RecordingDelivery::new());
        let (d, _clock) = dispatcher(&fx, delivery.clone(), Arc::new(DeliveryLocks::new()), 1);

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let report = d.tick(&rx).await.unwrap();
        assert!(report.dispatched.is_empty());
        assert_eq!(report.deferred, 1);
        assert!(delivery.calls().is_empty());
    }
}
