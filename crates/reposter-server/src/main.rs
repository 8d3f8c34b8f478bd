use std::sync::Arc;

use clap::{Parser, Subcommand};
use reposter_core::{GroupId, ReposterConfig, SendKind};
use reposter_scheduler::{EngineSettings, SchedulerEngine};
use reposter_store::SqliteStore;
use reposter_telegram::TelegramDelivery;
use tracing::info;

mod admin;
mod report;

#[derive(Parser)]
#[command(name = "reposter", version, about = "Scheduled reposting to Telegram channel groups")]
struct Cli {
    /// Config file (defaults to $REPOSTER_CONFIG, then ~/.reposter/reposter.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Send a group's template to all of its channels now
    Send {
        #[arg(short, long)]
        group: i64,
        /// Send additively instead of replacing the previous message
        #[arg(long)]
        push: bool,
    },
    /// Delete the last delivered message in every channel of a group
    Delete {
        #[arg(short, long)]
        group: i64,
    },
    /// Print delivery statistics
    Stats {
        #[arg(short, long)]
        group: Option<i64>,
    },
    /// List channel groups
    Groups,
    /// Manage message templates
    Template {
        #[command(subcommand)]
        action: admin::TemplateCommand,
    },
    /// Manage channel groups and their schedules
    Group {
        #[command(subcommand)]
        action: admin::GroupCommand,
    },
    /// Manage the channels of a group
    Channel {
        #[command(subcommand)]
        action: admin::ChannelCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.or_else(|| std::env::var("REPOSTER_CONFIG").ok());
    let loaded = ReposterConfig::load(config_path.as_deref());
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "reposter={level},reposter_core={level},reposter_store={level},\
                     reposter_scheduler={level},reposter_telegram={level}"
                )
                .into()
            }),
        )
        .init();
    let config = loaded?;

    let store = Arc::new(open_store(&config.database.path)?);

    match cli.command {
        Command::Groups => report::print_groups(&store.list_groups()?),
        Command::Template { action } => admin::template(&store, action)?,
        Command::Group { action } => admin::group(&store, action)?,
        Command::Channel { action } => admin::channel(&store, action)?,
        Command::Stats { group } => {
            let groups = match group {
                Some(id) => vec![reposter_store::Store::group(store.as_ref(), GroupId(id))?],
                None => store.list_groups()?,
            };
            for g in &groups {
                report::print_stats(g, &store.send_statistics(g.id)?);
            }
        }
        Command::Run => {
            let delivery = telegram(&config)?;
            let bot = delivery.check().await?;
            info!(%bot, "Telegram bot authorized");
            let engine = build_engine(&config, store, delivery);
            let (tx, rx) = tokio::sync::watch::channel(false);
            let handle = tokio::spawn(engine.run(rx));

            tokio::signal::ctrl_c().await?;
            info!("shutdown requested");
            let _ = tx.send(true);
            handle.await?;
        }
        Command::Send { group, push } => {
            let engine = build_engine(&config, store, telegram(&config)?);
            let kind = if push { SendKind::Push } else { SendKind::Repost };
            let result = engine.manual().trigger(GroupId(group), kind).await?;
            report::print_manual(&result);
        }
        Command::Delete { group } => {
            let engine = build_engine(&config, store, telegram(&config)?);
            let result = engine.manual().delete_last_messages(GroupId(group)).await?;
            report::print_manual(&result);
        }
    }
    Ok(())
}

fn open_store(path: &str) -> anyhow::Result<SqliteStore> {
    ensure_parent_dir(path);
    info!(%path, "opening SQLite database");
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(SqliteStore::new(conn)?)
}

fn telegram(config: &ReposterConfig) -> anyhow::Result<Arc<TelegramDelivery>> {
    config.require_bot_token()?;
    Ok(Arc::new(TelegramDelivery::new(&config.telegram)?))
}

fn build_engine(
    config: &ReposterConfig,
    store: Arc<SqliteStore>,
    delivery: Arc<TelegramDelivery>,
) -> SchedulerEngine {
    SchedulerEngine::new(store, delivery, EngineSettings::from_config(&config.scheduler))
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
