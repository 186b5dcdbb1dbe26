//! `TimeCapsule` - schedule encrypted messages for future email delivery.
//!
//! Request-layer front end over `timecapsule-core`: creation and management
//! commands plus the recurring scheduler trigger (`watch`).

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod config;
mod outbox;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use timecapsule_core::{
    BatchReport, CapsuleEngine, CryptoKeys, ManageView, MessageDraft, MessageRepository,
    MutationOutcome,
};

use crate::cli::{Cli, Commands, DraftArgs};
use crate::config::AppConfig;
use crate::outbox::OutboxDelivery;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timecapsule=info,timecapsule_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            let path = AppConfig::init(cli.config.as_deref(), force)?;
            println!("Configuration written to {}", path.display());
            println!("Fresh field and index keys were generated; back them up safely.");
            Ok(())
        }
        command => run(cli.config.as_deref(), command).await,
    }
}

async fn run(config_path: Option<&Path>, command: Commands) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let keys = CryptoKeys::from_base64(&config.keys.field_key, &config.keys.index_key)?;

    if let Some(parent) = Path::new(&config.database_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("could not create {}", parent.display()))?;
    }
    let repo = Arc::new(MessageRepository::new(&config.database_path).await?);
    let delivery = OutboxDelivery::new(PathBuf::from(&config.outbox_dir));
    let engine = CapsuleEngine::new(repo, &keys, config.engine, delivery);

    match command {
        Commands::Init { .. } => unreachable!("handled before configuration is loaded"),

        Commands::Create { draft } => {
            let created = engine.create(&build_draft(&draft)?).await?;
            println!("Scheduled. Keep these somewhere safe:");
            println!("  handle:        {}", created.handle);
            println!("  preview token: {}", created.preview_token);
            println!("  cancel token:  {}", created.cancel_token);
        }

        Commands::Show { handle } => match engine.manage_info(&handle).await? {
            Some(view) => print_view(&view),
            None => println!("No message with handle {handle}."),
        },

        Commands::Update { handle, draft } => {
            let outcome = engine.update(&handle, &build_draft(&draft)?).await?;
            print_outcome("Updated", outcome);
        }

        Commands::Cancel { handle } => {
            let outcome = engine.cancel(&handle).await?;
            print_outcome("Cancelled", outcome);
        }

        Commands::Reschedule { handle, send_at } => {
            let outcome = engine.reschedule(&handle, parse_send_at(&send_at)?).await?;
            print_outcome("Rescheduled", outcome);
        }

        Commands::Preview { token } => match engine.preview_by_token(&token).await? {
            Some(preview) => {
                println!("Subject: {}", preview.subject);
                println!("Send at: {}", preview.send_at.to_rfc3339());
                println!("---\n{}", preview.body);
            }
            None => println!("No pending message matches that token."),
        },

        Commands::CancelToken { token } => {
            let outcome = engine.cancel_by_token(&token).await?;
            print_outcome("Cancelled", outcome);
        }

        Commands::Tick => {
            let report = engine.process_due_batch().await?;
            print_report(&report);
        }

        Commands::Watch { interval_secs } => {
            let interval_secs = interval_secs.unwrap_or(config.watch_interval_secs).max(1);
            watch(&engine, interval_secs).await;
        }
    }

    Ok(())
}

/// Scheduler loop: one `process_due_batch` per tick until Ctrl-C.
async fn watch(engine: &CapsuleEngine<OutboxDelivery>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs, "scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // One bad tick (e.g. a transient database error) must not
                // stop the scheduler.
                if let Err(err) = engine.process_due_batch().await {
                    tracing::error!(error = %err, "scheduler tick failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }
}

fn build_draft(args: &DraftArgs) -> anyhow::Result<MessageDraft> {
    let body = match (&args.body, &args.body_file) {
        (Some(body), _) => body.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("could not read body from {}", path.display()))?,
        (None, None) => bail!("provide --body or --body-file"),
    };

    let image_path = match &args.image {
        Some(path) => {
            let absolute = path
                .canonicalize()
                .with_context(|| format!("image not found: {}", path.display()))?;
            Some(absolute.to_string_lossy().into_owned())
        }
        None => None,
    };

    Ok(MessageDraft {
        sender_email: args.from.clone(),
        recipient_email: args.to.clone(),
        subject: args.subject.clone(),
        body,
        send_at: parse_send_at(&args.send_at)?,
        image_path,
    })
}

fn parse_send_at(value: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("`{value}` is not an RFC 3339 timestamp"))
}

fn print_view(view: &ManageView) {
    println!("Handle:    {}", view.handle);
    println!("State:     {}", view.state);
    println!("From:      {}", view.sender_email);
    println!("To:        {}", view.recipient_email);
    println!("Subject:   {}", view.subject);
    println!("Created:   {}", view.created_at.to_rfc3339());
    println!("Send at:   {}", view.send_at.to_rfc3339());
    if let Some(sent_at) = view.sent_at {
        println!("Sent at:   {}", sent_at.to_rfc3339());
    }
    if let Some(image) = &view.image_path {
        println!("Image:     {image}");
    }
    println!("---\n{}", view.body);
}

fn print_outcome(action: &str, outcome: MutationOutcome) {
    match outcome {
        MutationOutcome::Applied => println!("{action}."),
        MutationOutcome::NotFound => println!("No matching message."),
        MutationOutcome::NotEditable => {
            println!("Message is already sent or cancelled; nothing changed.");
        }
    }
}

fn print_report(report: &BatchReport) {
    println!(
        "Batch: {} due, {} sent, {} failed, {} retired, {} skipped",
        report.selected, report.sent, report.failed, report.retired, report.skipped
    );
}
