//! Operator commands that edit templates, groups and channels.

use anyhow::{bail, Context};
use clap::Subcommand;
use reposter_core::{parse_time_points, ChannelId, GroupId, MessageKind, ScheduleMode, TemplateId, TimePoint};
use reposter_store::{NewGroup, NewTemplate, SqliteStore, Store};

use crate::report;

#[derive(Subcommand)]
pub enum TemplateCommand {
    /// Create a template
    Add {
        #[arg(short, long)]
        title: String,
        /// Message text, or the caption for media templates
        #[arg(long)]
        content: String,
        /// text, photo, video, document or audio
        #[arg(short, long, default_value = "text")]
        kind: MessageKind,
        /// Media URL or Telegram file id
        #[arg(short, long)]
        media: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum GroupCommand {
    /// Create a group; it starts active
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        template: i64,
        /// Repost every N minutes
        #[arg(long, conflicts_with = "times")]
        every: Option<u32>,
        /// Repost at fixed times, e.g. "09:00,18:30"
        #[arg(long)]
        times: Option<String>,
        /// Pin every reposted message
        #[arg(long)]
        pin: bool,
    },
    /// Change a group's schedule
    Schedule {
        #[arg(short, long)]
        group: i64,
        #[arg(long, conflicts_with = "times")]
        every: Option<u32>,
        #[arg(long)]
        times: Option<String>,
    },
    /// Resume scheduled reposting
    Enable {
        #[arg(short, long)]
        group: i64,
    },
    /// Pause scheduled reposting
    Disable {
        #[arg(short, long)]
        group: i64,
    },
    /// Turn auto-pin on or off
    Pin {
        #[arg(short, long)]
        group: i64,
        #[arg(long)]
        off: bool,
    },
}

#[derive(Subcommand)]
pub enum ChannelCommand {
    /// Attach a channel to a group
    Add {
        #[arg(short, long)]
        group: i64,
        /// Numeric chat id or @username
        #[arg(long)]
        chat: String,
        #[arg(short, long)]
        title: Option<String>,
    },
    /// List a group's channels
    List {
        #[arg(short, long)]
        group: i64,
    },
    Enable {
        #[arg(long)]
        id: i64,
    },
    Disable {
        #[arg(long)]
        id: i64,
    },
}

/// A schedule change requested on the command line.
#[derive(Debug, PartialEq, Eq)]
pub enum ScheduleArg {
    Every(u32),
    At(Vec<TimePoint>),
}

impl ScheduleArg {
    pub fn from_flags(every: Option<u32>, times: Option<&str>) -> anyhow::Result<Self> {
        match (every, times) {
            (Some(0), _) => bail!("--every must be at least 1 minute"),
            (Some(minutes), None) => Ok(ScheduleArg::Every(minutes)),
            (None, Some(raw)) => Ok(ScheduleArg::At(parse_times(raw)?)),
            (Some(_), Some(_)) => bail!("use either --every or --times, not both"),
            (None, None) => bail!("one of --every or --times is required"),
        }
    }
}

/// Comma- or newline-separated `HH:MM` list.
pub fn parse_times(raw: &str) -> anyhow::Result<Vec<TimePoint>> {
    let lines = raw.replace(',', "\n");
    parse_time_points(&lines).with_context(|| format!("invalid --times {raw:?}"))
}

pub fn template(store: &SqliteStore, cmd: TemplateCommand) -> anyhow::Result<()> {
    match cmd {
        TemplateCommand::Add {
            title,
            content,
            kind,
            media,
        } => {
            if kind.has_media() && media.is_none() {
                bail!("{kind} templates need --media");
            }
            let created = store.create_template(&NewTemplate {
                title,
                content,
                kind,
                media,
                ..Default::default()
            })?;
            println!("template {} created", created.id);
        }
    }
    Ok(())
}

pub fn group(store: &SqliteStore, cmd: GroupCommand) -> anyhow::Result<()> {
    match cmd {
        GroupCommand::Add {
            name,
            template,
            every,
            times,
            pin,
        } => {
            let template_id = TemplateId(template);
            store.template(template_id)?;
            let mut new = NewGroup::every(name, template_id, 60);
            match ScheduleArg::from_flags(every, times.as_deref())? {
                ScheduleArg::Every(minutes) => new.frequency_minutes = minutes,
                ScheduleArg::At(points) => {
                    new.mode = ScheduleMode::Timepoints;
                    new.timepoints = points;
                }
            }
            new.auto_pin = pin;
            let created = store.create_group(&new)?;
            println!("group {} created", created.id);
        }
        GroupCommand::Schedule {
            group,
            every,
            times,
        } => {
            let updated = match ScheduleArg::from_flags(every, times.as_deref())? {
                ScheduleArg::Every(minutes) => {
                    store.update_schedule(GroupId(group), ScheduleMode::Frequency, Some(minutes), None)?
                }
                ScheduleArg::At(points) => {
                    store.update_schedule(GroupId(group), ScheduleMode::Timepoints, None, Some(&points))?
                }
            };
            report::print_groups(&[updated]);
        }
        GroupCommand::Enable { group } => store.set_group_active(GroupId(group), true)?,
        GroupCommand::Disable { group } => store.set_group_active(GroupId(group), false)?,
        GroupCommand::Pin { group, off } => store.set_auto_pin(GroupId(group), !off)?,
    }
    Ok(())
}

pub fn channel(store: &SqliteStore, cmd: ChannelCommand) -> anyhow::Result<()> {
    match cmd {
        ChannelCommand::Add { group, chat, title } => {
            let group = store.group(GroupId(group))?;
            let title = title.unwrap_or_else(|| chat.clone());
            let created = store.add_channel(group.id, chat.trim(), &title)?;
            println!("channel {} added to group {}", created.id, group.id);
        }
        ChannelCommand::List { group } => {
            report::print_channels(&store.channels_for_group(GroupId(group))?);
        }
        ChannelCommand::Enable { id } => store.set_channel_active(ChannelId(id), true)?,
        ChannelCommand::Disable { id } => store.set_channel_active(ChannelId(id), false)?,
    }
    Ok(())
}
