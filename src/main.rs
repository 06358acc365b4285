//! Community Raffle Bot
//!
//! Telegram bot that sells raffle tickets, escrows side bets, and runs the
//! weighted drawing.

use clap::{Parser, Subcommand};
use raffle_bot::{
    config::Config,
    gateway::{CommandHandler, Envelope, TelegramGateway},
    notify::Notifier,
    raffle::Raffle,
    storage::SnapshotStore,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "raffle-bot")]
#[command(about = "Community raffle and side-bet coordination bot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot
    Run,
    /// Print the latest persisted game state
    State,
    /// Print amounts owed per participant from the latest snapshot
    Settle,
    /// Send a test message to the log channel
    TestNotify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run => run_bot(config).await,
        Commands::State => show_state(config).await,
        Commands::Settle => show_settlement(config).await,
        Commands::TestNotify => test_notify(config).await,
    }
}

async fn run_bot(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting raffle bot");

    let pricing = config.pricing_engine()?;
    let store = SnapshotStore::new(config.persistence.dir.clone());

    let mut raffle = Raffle::new(pricing);
    if config.persistence.enabled {
        // Pick up where the last run left off.
        if let Some(snapshot) = store.load_latest().await? {
            raffle.restore(snapshot);
        }
        raffle = raffle.with_store(store);
    } else {
        tracing::warn!("Persistence disabled; state is lost on shutdown");
    }
    let raffle = Arc::new(raffle);

    let notifier = match &config.telegram.log_chat_id {
        Some(chat_id) => Notifier::new(config.telegram.bot_token.clone(), chat_id.clone()),
        None => {
            tracing::warn!("No log channel configured, log forwarding disabled");
            Notifier::disabled(config.telegram.bot_token.clone())
        }
    };
    notifier.log("Bot connected").await;

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Envelope>(100);

    let gateway = Arc::new(TelegramGateway::new(
        config.telegram.bot_token.clone(),
        cmd_tx,
    ));
    tokio::spawn({
        let gateway = Arc::clone(&gateway);
        async move {
            gateway.start_polling().await;
        }
    });
    tracing::info!("Telegram command listener started");

    let handler = CommandHandler::new(
        config.telegram.bot_token.clone(),
        Arc::clone(&raffle),
        notifier,
        config.admin_ids(),
    );

    // One command processed to completion before the next begins.
    while let Some(envelope) = cmd_rx.recv().await {
        handler.handle(envelope).await;
    }
    Ok(())
}

async fn show_state(config: Config) -> anyhow::Result<()> {
    let store = SnapshotStore::new(config.persistence.dir);
    match store.load_latest().await? {
        Some(snapshot) => {
            println!("{} registered participants", snapshot.ledger.len());
            for (user, entry) in &snapshot.ledger {
                println!(
                    "  {user}: {} tickets, ${} owed, {} open bets",
                    entry.tickets_available,
                    entry.amount_owed,
                    entry.open_bets.len()
                );
            }
            println!("{} open bets", snapshot.open_bets.len());
            for (id, bet) in &snapshot.open_bets {
                let name = bet.name.as_deref().unwrap_or("-");
                println!(
                    "  {id} ({name}): pool {} over {} participants",
                    bet.total_pool,
                    bet.participants.len()
                );
            }
            println!("{} bet ids issued", snapshot.used_bet_ids.len());
        }
        None => println!("No snapshots found"),
    }
    Ok(())
}

async fn show_settlement(config: Config) -> anyhow::Result<()> {
    let store = SnapshotStore::new(config.persistence.dir);
    match store.load_latest().await? {
        Some(snapshot) => {
            let mut total = 0u64;
            for (user, entry) in &snapshot.ledger {
                println!("{user}: ${}", entry.amount_owed);
                total += entry.amount_owed;
            }
            println!("total: ${total}");
        }
        None => println!("No snapshots found"),
    }
    Ok(())
}

async fn test_notify(config: Config) -> anyhow::Result<()> {
    let notifier = match &config.telegram.log_chat_id {
        Some(chat_id) => Notifier::new(config.telegram.bot_token.clone(), chat_id.clone()),
        None => anyhow::bail!("no log_chat_id configured"),
    };
    notifier.log("Test notification from raffle-bot").await;
    println!("Sent");
    Ok(())
}
