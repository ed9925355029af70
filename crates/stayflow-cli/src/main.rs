use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use stayflow_bus::EventBus;
use stayflow_core::config::ensure_skeleton_config;
use stayflow_core::{load_config, BookingLedger, Catalog, SessionLocks, SessionStore};
use stayflow_gateway::{Gateway, RateLimiter};
use stayflow_server::state::AppState;
use stayflow_services::{
    AnswerService, HttpAnswerService, HttpPaymentProcessor, PaymentProcessor, StubAnswerService,
    StubPaymentProcessor,
};

const OFFLINE_ANSWER: &str =
    "Happy to help! Our front desk team will share the details shortly.";

#[derive(Parser)]
#[command(
    name = "stayflow",
    version,
    about = "stayflow guest concierge and booking service"
)]
struct Cli {
    #[arg(
        long,
        default_value = "~/.stayflow",
        help = "Config root directory (contains main.yaml and catalog.yaml)"
    )]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP server (webhook, chat API, event stream)")]
    Serve {
        #[arg(long, default_value = "3000", help = "HTTP listen port")]
        port: u16,
        #[arg(long, help = "Use in-process service stubs instead of live endpoints")]
        offline: bool,
    },
    #[command(about = "Validate config files")]
    Validate,
    #[command(subcommand, about = "Inspect the room and add-on catalog")]
    Catalog(CatalogCommands),
    #[command(subcommand, about = "Session management")]
    Session(SessionCommands),
}

#[derive(Subcommand)]
enum CatalogCommands {
    #[command(about = "List rooms and nightly rates")]
    Rooms,
    #[command(about = "List add-ons and prices")]
    Addons,
}

#[derive(Subcommand)]
enum SessionCommands {
    #[command(about = "Reset a guest session on a running server")]
    Reset {
        #[arg(help = "Guest id (phone number or chat session id)")]
        guest_id: String,
        #[arg(long, default_value = "3000", help = "Port of the running server")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Expand ~ to home directory
    if cli.config_root.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.config_root = PathBuf::from(home).join(
                cli.config_root
                    .strip_prefix("~")
                    .unwrap_or(&cli.config_root),
            );
        }
    }

    let log_dir = cli.config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "stayflow.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Serve { port, offline } => {
            serve(&cli.config_root, port, offline).await?;
        }
        Commands::Validate => {
            let config = load_config(&cli.config_root)?;
            println!(
                "Config valid. Property '{}', {} rooms, {} priced add-ons, sessions expire after {} minutes.",
                config.main.app.property,
                config.catalog.rooms.len(),
                config.catalog.addons.extras.len(),
                config.main.session.ttl_minutes,
            );
        }
        Commands::Catalog(cmd) => {
            let config = load_config(&cli.config_root)?;
            match cmd {
                CatalogCommands::Rooms => {
                    println!("{:<4} {:<20} {:>10}", "#", "ROOM", "RATE");
                    println!("{}", "-".repeat(36));
                    for (i, room) in config.catalog.rooms.iter().enumerate() {
                        println!("{:<4} {:<20} {:>10}", i + 1, room.name, room.rate);
                    }
                    println!(
                        "\nRates per night in {}. Stays of {} to {} nights.",
                        config.catalog.currency.to_uppercase(),
                        config.catalog.nights.min,
                        config.catalog.nights.max,
                    );
                }
                CatalogCommands::Addons => {
                    println!("{:<22} {:>10}", "ADD-ON", "PRICE");
                    println!("{}", "-".repeat(33));
                    for (key, price) in &config.catalog.addons.extras {
                        println!("{:<22} {:>10}", key.replace('_', " "), price);
                    }
                    if !config.catalog.addons.complimentary.is_empty() {
                        let free: Vec<String> = config
                            .catalog
                            .addons
                            .complimentary
                            .iter()
                            .map(|key| key.replace('_', " "))
                            .collect();
                        println!("\nComplimentary for guests: {}.", free.join(", "));
                    }
                }
            }
        }
        Commands::Session(SessionCommands::Reset { guest_id, port }) => {
            let url = format!("http://127.0.0.1:{port}/api/sessions/{guest_id}/reset");
            let response = reqwest::Client::new()
                .post(&url)
                .send()
                .await
                .with_context(|| format!("no server reachable on port {port}"))?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                println!("Session '{guest_id}' not found.");
            } else if response.status().is_success() {
                println!("Session '{guest_id}' reset.");
            } else {
                anyhow::bail!("unexpected response: {}", response.status());
            }
        }
    }

    Ok(())
}

async fn serve(root: &Path, port: u16, offline: bool) -> Result<()> {
    ensure_skeleton_config(root)?;
    let config = load_config(root).context("failed to load configuration")?;

    let catalog = Arc::new(Catalog::from_config(&config.catalog));
    let store = Arc::new(SessionStore::new(config.main.session.ttl_minutes));
    let locks = Arc::new(SessionLocks::with_global_limit(
        config.main.runtime.max_concurrent,
    ));
    let bus = Arc::new(EventBus::new(64));

    let answers: Arc<dyn AnswerService> = if offline {
        Arc::new(StubAnswerService::new(OFFLINE_ANSWER))
    } else {
        let cfg = &config.main.services.answers;
        Arc::new(HttpAnswerService::new(
            &cfg.base_url,
            cfg.api_key.clone(),
            Duration::from_secs(cfg.timeout_seconds),
            cfg.max_attempts,
        ))
    };
    let payments: Arc<dyn PaymentProcessor> = if offline {
        Arc::new(StubPaymentProcessor::new())
    } else {
        let cfg = &config.main.services.payments;
        Arc::new(HttpPaymentProcessor::new(
            &cfg.base_url,
            cfg.api_key.clone(),
            Duration::from_secs(cfg.timeout_seconds),
        ))
    };
    if offline {
        tracing::info!("offline mode: answer and payment services are in-process stubs");
    }

    let ledger = Arc::new(BookingLedger::new(catalog.clone(), payments));
    let gateway = Gateway::new(
        catalog,
        config.main.app.property.clone(),
        store.clone(),
        locks.clone(),
        ledger,
        answers,
        bus.publisher(),
        RateLimiter::new(config.main.rate_limit.clone()),
    );

    let sweep_minutes = config.main.session.sweep_interval_minutes.max(1);
    let sweep_store = store.clone();
    let sweep_locks = locks.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_minutes * 60));
        interval.tick().await; // Skip first immediate tick

        loop {
            interval.tick().await;
            let evicted = sweep_store.evict_idle(&sweep_locks).await;
            sweep_locks.cleanup_unused().await;
            if evicted > 0 {
                tracing::info!(evicted, "evicted idle sessions");
            }
        }
    });

    let state = AppState {
        gateway: Arc::new(gateway),
        bus,
    };
    stayflow_server::serve(state, &format!("0.0.0.0:{port}")).await
}
