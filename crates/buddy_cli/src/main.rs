use anyhow::Context;
use buddy_core::time::today;
use buddy_core::{BuddyConfig, LinkageResolver};
use buddy_gateway::{AppState, GatewayServer};
use buddy_memory::{ActivityBus, RewardLedger, SqliteStore};
use buddy_reasoning::{
    create_client, CompanionResponder, DailySummarizer, EmotionClassifier, IngestionPipeline,
};
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "buddycare.toml", env = "BUDDY_CONFIG")]
    config: PathBuf,

    /// Override the database path from the config
    #[arg(long)]
    db: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Also write daily-rolling log files into this directory
    #[arg(long, env = "BUDDY_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP and realtime gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Talk to the companion from the terminal as one subject
    Chat {
        #[arg(long, default_value = "terminal")]
        subject: String,
    },
    /// Fill missing daily summaries for a caregiver's linked subject
    Summarize { caregiver: String },
    /// Claim one reward coupon for a caregiver if a threshold is unclaimed
    Claim { caregiver: String },
}

fn init_tracing(json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (writer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "buddycare.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    guard
}

async fn open_store(config: &BuddyConfig) -> anyhow::Result<SqliteStore> {
    info!("Connecting to database at {}...", config.storage.db_path);
    let bus = Arc::new(ActivityBus::with_capacity(config.realtime.channel_capacity));
    Ok(SqliteStore::new(&config.storage.db_path, bus)
        .await?
        .with_utc_offset(config.summary.utc_offset_minutes))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_json, args.log_dir.as_deref());

    let mut config = BuddyConfig::load_or_default(&args.config);
    if let Some(db) = args.db {
        config.storage.db_path = db;
    }

    let store = open_store(&config).await?;
    info!(
        "Using {} provider with model {}",
        config.llm.provider, config.llm.model
    );
    let client = create_client(&config.llm)?;

    match args.command {
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            let port = port.unwrap_or(config.gateway.port);
            let state = AppState::new(config, store, client);
            GatewayServer::new(state, &host, port).serve().await?;
        }
        Command::Chat { subject } => {
            let store = Arc::new(store);
            let classifier = EmotionClassifier::new(
                client.clone(),
                Duration::from_millis(config.pipeline.classifier_timeout_ms),
            );
            let responder = CompanionResponder::new(client, &config.llm, &config.pipeline);
            let pipeline = IngestionPipeline::new(store, classifier, responder);
            chat_loop(&pipeline, &subject, &config.pipeline.companion_name).await?;
        }
        Command::Summarize { caregiver } => {
            let link = store
                .linked_subject(&caregiver)
                .await?
                .with_context(|| format!("caregiver {} has no linked subject", caregiver))?;
            let date = today(store.utc_offset_minutes());
            let summarizer = DailySummarizer::new(
                client,
                Arc::new(store),
                config.summary.clone(),
                config.pipeline.companion_name.clone(),
            )
            .with_max_tokens(config.llm.max_tokens);
            let reports = summarizer
                .refresh_missing(&link.subject_user_id, &link.subject_name, date)
                .await;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Claim { caregiver } => {
            let ledger = RewardLedger::new(store, config.rewards.clone());
            let outcome = ledger.claim(&caregiver).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            let status = ledger.status(&caregiver).await?;
            println!(
                "{} hearts received, {} of {} coupons issued, {} hearts to the next one",
                status.lifetime_hearts, status.issued, status.entitlement, status.hearts_to_next
            );
        }
    }

    Ok(())
}

async fn chat_loop(
    pipeline: &IngestionPipeline,
    subject: &str,
    companion_name: &str,
) -> anyhow::Result<()> {
    let mut editor = rustyline::DefaultEditor::new()?;
    println!("{} is listening. Type 'quit' to exit.", companion_name);

    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let trimmed = line.trim();
        if trimmed == "quit" || trimmed == "exit" {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(trimmed);

        match pipeline.ingest(subject, trimmed).await {
            Ok(reply) => {
                println!("\n{}: {}  [{}]\n", companion_name, reply.companion_reply_text, reply.emotion_label);
            }
            Err(e) => {
                tracing::error!("message not ingested: {}", e);
                println!("\n[System Error]: {}\n", e);
            }
        }
    }

    Ok(())
}
