//! Telegram auto-responder CLI - main entry point
//!
//! Shows the account profile, lists chats, and runs the auto-reply
//! listener. Selected tasks run together on a single thread.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, TimeDelta};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use telegram_autoplus::{metrics, Config, Error, SessionController, TelegramSession};

#[derive(Parser, Debug)]
#[command(name = "autoplus")]
#[command(about = "Telegram bot for handling chat events", long_about = None)]
#[command(version)]
struct Cli {
    /// Show your Telegram profile
    #[arg(long)]
    me: bool,

    /// List your chats to find the ones you want to track
    #[arg(long)]
    my_chats: bool,

    /// Only list chats from CHAT_IDS (with --my-chats)
    #[arg(long)]
    only_tracked: bool,

    /// Run chat tracking
    #[arg(long)]
    run: bool,

    /// Regex to filter messages (or a preset: training, game)
    #[arg(long)]
    pattern: Option<String>,

    /// Seconds before disconnecting; 0 runs until interrupted
    #[arg(long, default_value_t = 15, allow_negative_numbers = true)]
    timer: i64,

    /// Path to the .env file
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Path to an optional YAML config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

impl Cli {
    fn has_tasks(&self) -> bool {
        self.me || self.my_chats || self.run
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("telegram_autoplus=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::load(cli.env_file.as_deref(), cli.config.as_deref())?;
    let tracking = config
        .tracking
        .clone()
        .with_pattern_override(cli.pattern.as_deref());
    tracking.print_summary();

    // Invalid patterns fail here, before any connection attempt.
    let matcher = tracking.matcher()?;

    if !cli.has_tasks() {
        println!("No tasks to run. Use --help for options.");
        return Ok(());
    }

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let session = tokio::select! {
        session = TelegramSession::connect(&config) => session?,
        _ = signal::ctrl_c() => {
            warn!("Interrupted while connecting");
            return Err(Error::Interrupted.into());
        }
    };
    let controller = SessionController::new(Arc::new(session), matcher);

    let now = Local::now();
    println!("start: {}", now);
    match TimeDelta::try_seconds(cli.timer).filter(|_| cli.run && cli.timer > 0) {
        Some(delta) => println!("end: {}", now + delta),
        None => println!("end: when interrupted"),
    }

    let only_tracked = cli.only_tracked.then_some(&tracking.conversation_ids);

    let profile = async {
        if cli.me {
            if let Err(err) = controller.show_profile().await {
                error!("Failed to show profile: {}", err);
            }
        }
    };
    let chats = async {
        if cli.my_chats {
            if let Err(err) = controller.list_conversations(only_tracked).await {
                error!("Failed to list chats: {}", err);
            }
        }
    };
    let listener = async {
        if cli.run {
            let (result, ()) = tokio::join!(
                controller.run(tracking.filter()),
                controller.schedule_disconnect(cli.timer)
            );
            if let Err(err) = result {
                error!("Listener stopped: {}", err);
            }
        }
    };
    let work = async {
        tokio::join!(profile, chats, listener);
    };

    let interrupt = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    let outcome = controller.supervise(work, interrupt).await;
    info!(?outcome, "Bot finished");

    Ok(())
}
