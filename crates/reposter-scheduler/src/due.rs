use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use reposter_core::config::HistoryErrorPolicy;
use reposter_core::{Group, ScheduleMode, SendKind, SendRecord, SendStatus, TimePoint};
use reposter_store::{Store, StoreError};
use tracing::{debug, warn};

use crate::clock::Clock;

/// A send within this many minutes of a time point counts as that point's send.
pub const TIMEPOINT_TOLERANCE_MINUTES: i64 = 1;

/// Decides which active groups need a repost right now.
pub struct DueCheck {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    history_window: usize,
    on_history_error: HistoryErrorPolicy,
}

impl DueCheck {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
        history_window: usize,
        on_history_error: HistoryErrorPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            offset,
            history_window,
            on_history_error,
        }
    }

    /// Active groups whose predicate holds at the current instant.
    pub fn due_groups(&self) -> Result<Vec<Group>, StoreError> {
        let now = self.clock.now();
        let groups = self.store.active_groups()?;
        Ok(groups
            .into_iter()
            .filter(|g| self.is_group_due(g, now))
            .collect())
    }

    /// Evaluate one group, loading its recent history.
    ///
    /// A failed history lookup is resolved by the configured policy:
    /// fail-open evaluates against an empty history, fail-closed says no.
    pub fn is_group_due(&self, group: &Group, now: DateTime<Utc>) -> bool {
        let local_now = now.with_timezone(&self.offset);
        match self.store.recent_records(group.id, self.history_window) {
            Ok(history) => is_due(group, &history, local_now),
            Err(e) => match self.on_history_error {
                HistoryErrorPolicy::FailOpen => {
                    warn!(group_id = %group.id, error = %e, "history lookup failed, assuming not yet sent");
                    is_due(group, &[], local_now)
                }
                HistoryErrorPolicy::FailClosed => {
                    warn!(group_id = %group.id, error = %e, "history lookup failed, skipping group");
                    false
                }
            },
        }
    }
}

/// Pure due predicate. `now` carries the wall-clock offset that time points
/// and calendar days are evaluated in.
pub fn is_due(group: &Group, history: &[SendRecord], now: DateTime<FixedOffset>) -> bool {
    match group.mode {
        ScheduleMode::Frequency => frequency_due(group, history, now),
        ScheduleMode::Timepoints => timepoints_due(group, history, now),
    }
}

fn is_sent_repost(record: &SendRecord) -> bool {
    record.kind == SendKind::Repost && record.status == SendStatus::Sent
}

fn frequency_due(group: &Group, history: &[SendRecord], now: DateTime<FixedOffset>) -> bool {
    let last_sent = history
        .iter()
        .filter(|r| is_sent_repost(r))
        .filter_map(|r| r.sent_at)
        .max();
    match last_sent {
        None => true,
        Some(at) => {
            let next = at + Duration::minutes(i64::from(group.frequency_minutes));
            now.with_timezone(&Utc) >= next
        }
    }
}

fn timepoints_due(group: &Group, history: &[SendRecord], now: DateTime<FixedOffset>) -> bool {
    if group.timepoints.is_empty() {
        debug!(group_id = %group.id, "timepoints mode with no time points, never due");
        return false;
    }
    group
        .timepoints
        .iter()
        .filter(|p| u32::from(p.hour) == now.hour() && u32::from(p.minute) == now.minute())
        .any(|point| !sent_for_point(history, *point, now))
}

/// Whether a repost was already sent today for `point`.
fn sent_for_point(history: &[SendRecord], point: TimePoint, now: DateTime<FixedOffset>) -> bool {
    let today = now.date_naive();
    history
        .iter()
        .filter(|r| is_sent_repost(r))
        .filter_map(|r| r.sent_at)
        .map(|at| at.with_timezone(now.offset()))
        .any(|at| {
            at.date_naive() == today
                && at.hour() == u32::from(point.hour)
                && (i64::from(at.minute()) - i64::from(point.minute)).abs()
                    <= TIMEPOINT_TOLERANCE_MINUTES
        })
}

#[cfg(test)]
mod tests {
    use reposter_core::{GroupId, RecordId, TemplateId};

    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::{fixture, utc, FlakyStore};

    fn local(s: &str) -> DateTime<FixedOffset> {
        utc(s).with_timezone(&FixedOffset::east_opt(0).unwrap())
    }

    fn group(mode: ScheduleMode, frequency: u32, points: &[(u8, u8)]) -> Group {
        Group {
            id: GroupId(1),
            name: "g".into(),
            description: String::new(),
            template_id: TemplateId(1),
            mode,
            frequency_minutes: frequency,
            timepoints: points
                .iter()
                .map(|&(h, m)| TimePoint::new(h, m).unwrap())
                .collect(),
            is_active: true,
            auto_pin: false,
        }
    }

    fn record(kind: SendKind, status: SendStatus, sent_at: Option<&str>) -> SendRecord {
        let at = utc("2026-03-01T00:00:00Z");
        SendRecord {
            id: RecordId(1),
            group_id: GroupId(1),
            chat_id: "@a".into(),
            message_id: sent_at.map(|_| "1".to_string()),
            kind,
            status,
            error: None,
            retry_count: 0,
            scheduled_at: at,
            sent_at: sent_at.map(utc),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn frequency_without_history_is_due() {
        let g = group(ScheduleMode::Frequency, 60, &[]);
        assert!(is_due(&g, &[], local("2026-03-01T10:00:00Z")));
    }

    #[test]
    fn frequency_is_false_inside_window_and_true_at_boundary() {
        let g = group(ScheduleMode::Frequency, 60, &[]);
        let history = [record(
            SendKind::Repost,
            SendStatus::Sent,
            Some("2026-03-01T10:00:00Z"),
        )];
        assert!(!is_due(&g, &history, local("2026-03-01T10:00:01Z")));
        assert!(!is_due(&g, &history, local("2026-03-01T10:59:00Z")));
        assert!(!is_due(&g, &history, local("2026-03-01T10:59:59Z")));
        assert!(is_due(&g, &history, local("2026-03-01T11:00:00Z")));
        assert!(is_due(&g, &history, local("2026-03-01T12:30:00Z")));
    }

    #[test]
    fn frequency_uses_most_recent_sent_repost_only() {
        let g = group(ScheduleMode::Frequency, 60, &[]);
        let history = [
            record(SendKind::Repost, SendStatus::Failed, None),
            record(SendKind::Push, SendStatus::Sent, Some("2026-03-01T10:50:00Z")),
            record(SendKind::Repost, SendStatus::Sent, Some("2026-03-01T10:30:00Z")),
            record(SendKind::Repost, SendStatus::Sent, Some("2026-03-01T09:00:00Z")),
        ];
        assert!(!is_due(&g, &history, local("2026-03-01T11:15:00Z")));
        assert!(is_due(&g, &history, local("2026-03-01T11:30:00Z")));
    }

    #[test]
    fn timepoint_fires_once_per_day() {
        let g = group(ScheduleMode::Timepoints, 0, &[(8, 0)]);
        assert!(is_due(&g, &[], local("2026-03-01T08:00:10Z")));

        let history = [record(
            SendKind::Repost,
            SendStatus::Sent,
            Some("2026-03-01T08:00:30Z"),
        )];
        for check in [
            "2026-03-01T08:00:45Z",
            "2026-03-01T08:01:00Z",
            "2026-03-01T08:05:00Z",
            "2026-03-01T08:09:59Z",
        ] {
            assert!(!is_due(&g, &history, local(check)), "{check}");
        }
        assert!(is_due(&g, &history, local("2026-03-02T08:00:00Z")));
    }

    #[test]
    fn timepoint_requires_exact_minute() {
        let g = group(ScheduleMode::Timepoints, 0, &[(8, 0), (20, 30)]);
        assert!(!is_due(&g, &[], local("2026-03-01T07:59:59Z")));
        assert!(!is_due(&g, &[], local("2026-03-01T20:31:00Z")));
        assert!(is_due(&g, &[], local("2026-03-01T20:30:59Z")));
    }

    #[test]
    fn timepoint_ignores_other_points_sends() {
        let g = group(ScheduleMode::Timepoints, 0, &[(8, 0), (8, 30)]);
        let history = [record(
            SendKind::Repost,
            SendStatus::Sent,
            Some("2026-03-01T08:00:20Z"),
        )];
        assert!(is_due(&g, &history, local("2026-03-01T08:30:00Z")));
    }

    #[test]
    fn timepoints_are_evaluated_in_configured_offset() {
        let g = group(ScheduleMode::Timepoints, 0, &[(8, 0)]);
        let plus3 = FixedOffset::east_opt(3 * 3600).unwrap();
        // 05:00 UTC is 08:00 at +03:00.
        let now = utc("2026-03-01T05:00:00Z").with_timezone(&plus3);
        assert!(is_due(&g, &[], now));
    }

    #[test]
    fn empty_timepoints_never_fire() {
        let g = group(ScheduleMode::Timepoints, 60, &[]);
        assert!(!is_due(&g, &[], local("2026-03-01T08:00:00Z")));
    }

    fn due_check(store: Arc<dyn Store>, policy: HistoryErrorPolicy) -> DueCheck {
        let clock = Arc::new(ManualClock::new(utc("2026-03-01T10:00:00Z")));
        DueCheck::new(store, clock, FixedOffset::east_opt(0).unwrap(), 50, policy)
    }

    #[test]
    fn history_failure_follows_policy() {
        let fx = fixture(&["@a"]);
        let flaky = Arc::new(FlakyStore::new(fx.store.clone()));
        flaky.fail_history(true);
        let group = fx.group();
        let now = utc("2026-03-01T10:00:00Z");

        let open = due_check(flaky.clone(), HistoryErrorPolicy::FailOpen);
        assert!(open.is_group_due(&group, now));

        let closed = due_check(flaky, HistoryErrorPolicy::FailClosed);
        assert!(!closed.is_group_due(&group, now));
    }

    #[test]
    fn due_groups_skips_inactive() {
        let fx = fixture(&["@a"]);
        let check = due_check(fx.store.clone(), HistoryErrorPolicy::FailOpen);
        assert_eq!(check.due_groups().unwrap().len(), 1);
        fx.store.set_group_active(fx.group_id, false).unwrap();
        assert!(check.due_groups().unwrap().is_empty());
    }
}
