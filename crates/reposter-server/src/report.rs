//! Plain-text output for the operator commands.

use reposter_core::{Channel, Group, ScheduleMode, SendStatistics};
use reposter_scheduler::{ChannelOutcome, ClearOutcome, ManualReport, Outcome};

pub fn print_groups(groups: &[Group]) {
    if groups.is_empty() {
        println!("no groups");
        return;
    }
    for g in groups {
        println!(
            "{:>4}  {:<24} {:<8} {:<28} template {}{}",
            g.id.0,
            g.name,
            if g.is_active { "active" } else { "paused" },
            schedule_summary(g),
            g.template_id,
            if g.auto_pin { ", pinned" } else { "" }
        );
    }
}

pub fn print_channels(channels: &[Channel]) {
    if channels.is_empty() {
        println!("no channels");
        return;
    }
    for c in channels {
        println!(
            "{:>4}  {:<24} {:<8} {}",
            c.id.0,
            c.chat_id,
            if c.is_active { "active" } else { "off" },
            c.last_message_id
                .as_deref()
                .map(|m| format!("last message {m}"))
                .unwrap_or_default()
        );
    }
}

pub fn print_stats(group: &Group, stats: &SendStatistics) {
    let last = stats
        .last_sent_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{} ({}): sent {}, failed {}, in flight {}, last sent {}",
        group.name, group.id, stats.total_sent, stats.total_failed, stats.total_pending, last
    );
}

pub fn print_manual(report: &ManualReport) {
    for (chat_id, outcome) in &report.channels {
        println!("{chat_id}: {}", describe(outcome));
    }
    println!(
        "group {}: {}/{} delivered",
        report.group_id,
        report.sent_count(),
        report.channels.len()
    );
}

fn schedule_summary(g: &Group) -> String {
    match g.mode {
        ScheduleMode::Frequency => format!("every {} min", g.frequency_minutes),
        ScheduleMode::Timepoints => {
            let points: Vec<String> = g.timepoints.iter().map(|p| p.to_string()).collect();
            format!("at {}", points.join(", "))
        }
    }
}

fn describe(outcome: &ChannelOutcome) -> String {
    match outcome {
        ChannelOutcome::Delivered { outcome, .. } => match outcome {
            Outcome::Sent { message_id, warnings } if warnings.is_empty() => {
                format!("sent (message {message_id})")
            }
            Outcome::Sent { message_id, warnings } => {
                format!("sent (message {message_id}) with {} warning(s)", warnings.len())
            }
            Outcome::Retrying {
                attempt,
                next_attempt_at,
                error,
            } => format!("failed ({error}), retry {attempt} at {next_attempt_at}"),
            Outcome::Failed { reason } => format!("failed: {reason}"),
            Outcome::Skipped { status } => format!("skipped, record already {status}"),
        },
        ChannelOutcome::Busy => "busy, delivery already running".to_string(),
        ChannelOutcome::InFlight { record_id, kind } => {
            format!("skipped, {kind} record {record_id} still in flight")
        }
        ChannelOutcome::Cleared(ClearOutcome::NothingToDelete) => "nothing to delete".to_string(),
        ChannelOutcome::Cleared(ClearOutcome::Deleted { message_id }) => {
            format!("deleted message {message_id}")
        }
        ChannelOutcome::Cleared(ClearOutcome::Failed { error }) => format!("delete failed: {error}"),
        ChannelOutcome::Error(e) => format!("error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use reposter_core::{GroupId, RecordId, SendKind, TemplateId, TimePoint};

    use super::*;

    fn group(mode: ScheduleMode) -> Group {
        Group {
            id: GroupId(1),
            name: "news".into(),
            description: String::new(),
            template_id: TemplateId(1),
            mode,
            frequency_minutes: 90,
            timepoints: vec![TimePoint::new(9, 0).unwrap(), TimePoint::new(18, 30).unwrap()],
            is_active: true,
            auto_pin: false,
        }
    }

    #[test]
    fn schedule_summary_per_mode() {
        assert_eq!(schedule_summary(&group(ScheduleMode::Frequency)), "every 90 min");
        assert_eq!(
            schedule_summary(&group(ScheduleMode::Timepoints)),
            "at 09:00, 18:30"
        );
    }

    #[test]
    fn in_flight_outcome_names_the_record() {
        let text = describe(&ChannelOutcome::InFlight {
            record_id: RecordId(7),
            kind: SendKind::Repost,
        });
        assert_eq!(text, "skipped, repost record 7 still in flight");
    }
}
