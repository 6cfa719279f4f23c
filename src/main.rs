//! Spot Exchange Trading Engine
//!
//! Runs independent strategy evaluators over live market state, admits the
//! best signal per instrument through a risk gate and supervises the
//! resulting positions until they exit.

mod db;
mod engine;
mod error;
mod indicators;
mod market;
mod metrics;
mod models;
mod notify;
mod strategies;
mod trading;
mod venue;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::db::Database;
use crate::engine::{Engine, EngineConfig};
use crate::notify::{LogNotifier, Notifier, Notifiers, WebhookNotifier};
use crate::trading::TradeMode;
use crate::venue::{RestVenue, Venue};

/// Spot exchange trading engine CLI.
#[derive(Parser)]
#[command(name = "spotbot")]
#[command(about = "Strategy-driven spot trading with risk-gated execution", long_about = None)]
struct Cli {
    /// Database URL (defaults to SPOTBOT_DATABASE_URL or ./spotbot.db)
    #[arg(short, long)]
    database: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine (Ctrl+C to stop)
    Run {
        /// Decision cycle interval in seconds
        #[arg(short, long)]
        interval: Option<u64>,

        /// Place real orders (requires SPOTBOT_API_KEY / SPOTBOT_API_SECRET)
        #[arg(long)]
        live: bool,

        /// Starting capital when the store has no balance history
        #[arg(short, long)]
        capital: Option<Decimal>,
    },

    /// Show open positions, today's performance and strategy weights
    Status,

    /// Recompute strategy weights from the last 30 days of trades
    Weights,

    /// Run one reconciliation pass against venue holdings
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if std::env::var("RUST_LOG").is_ok() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let mut config = EngineConfig::from_env()?;
    if let Some(url) = cli.database {
        config.database_url = url;
    }

    match cli.command {
        Commands::Run {
            interval,
            live,
            capital,
        } => {
            if let Some(secs) = interval {
                config.schedule.cycle_secs = secs;
            }
            if live {
                config.execution.mode = TradeMode::Live;
            }
            if let Some(capital) = capital {
                config.risk.initial_capital = capital;
            }
            config.validate()?;

            let engine = build_engine(config).await?;
            engine.initialize().await?;

            println!("\nEngine running. Press Ctrl+C to stop.\n");
            engine.run().await?;

            let stats = engine.stats().await;
            println!("\n{}", stats);
            let open = engine.ledger().lock().await.open_count();
            println!("Open positions at shutdown: {}", open);
        }

        Commands::Status => {
            let db = Database::new(&config.database_url).await?;
            print_status(&db).await?;
        }

        Commands::Weights => {
            config.execution.mode = TradeMode::Paper;
            let engine = build_engine(config).await?;
            engine.initialize().await?;
            let weights = engine.recompute_weights().await?;

            println!("\n{:<24} {:>8}", "STRATEGY", "WEIGHT");
            println!("{}", "-".repeat(33));
            for (name, weight) in weights {
                println!("{:<24} {:>8.3}", name, weight);
            }
        }

        Commands::Reconcile => {
            config.execution.mode = TradeMode::Live;
            config.validate()?;

            let engine = build_engine(config).await?;
            engine.initialize().await?;
            let cleaned = engine.reconcile().await?;

            if cleaned.is_empty() {
                println!("All open positions are held at the venue.");
            } else {
                println!("Closed {} phantom position(s):", cleaned.len());
                for trade in cleaned {
                    println!(
                        "  {} #{} qty {} at {} (P&L {:.0})",
                        trade.instrument, trade.position_id, trade.quantity, trade.exit_price, trade.pnl
                    );
                }
            }
        }
    }

    Ok(())
}

async fn build_engine(config: EngineConfig) -> Result<Engine> {
    let db = Arc::new(
        Database::new(&config.database_url)
            .await
            .context("Failed to open database")?,
    );

    let venue: Arc<dyn Venue> = Arc::new(RestVenue::new(
        config.credentials.clone(),
        Duration::from_secs(config.schedule.call_timeout_secs),
    )?);

    let mut notifiers = Notifiers::new().with(LogNotifier);
    if let Some(url) = &config.webhook_url {
        notifiers = notifiers.with(WebhookNotifier::new(url.as_str()).context("Invalid webhook client")?);
        info!(url = %url, "Webhook notifications enabled");
    }
    let notifier: Arc<dyn Notifier> = Arc::new(notifiers);

    Ok(Engine::new(config, venue, db, notifier))
}

async fn print_status(db: &Database) -> Result<()> {
    let positions = db.get_open_positions().await?;
    println!("\n=== Open Positions ({}) ===", positions.len());
    if !positions.is_empty() {
        println!(
            "{:<8} {:<20} {:>14} {:>14} {:>14} {:>14} {:>12}",
            "SYMBOL", "STRATEGY", "QTY", "ENTRY", "STOP", "TARGET", "UNREAL"
        );
        println!("{}", "-".repeat(102));
        for p in &positions {
            println!(
                "{:<8} {:<20} {:>14} {:>14} {:>14} {:>14} {:>12.0}",
                p.instrument, p.strategy, p.quantity, p.entry_price, p.stop_loss, p.take_profit, p.unrealized_pnl
            );
        }
    }

    let today = Utc::now().date_naive();
    println!("\n=== Today ({}) ===", today);
    match db.get_daily_performance(today).await? {
        Some(perf) => {
            println!("Starting Balance: {:.0}", perf.starting_balance);
            println!("Realized P&L:     {:.0} ({:.2}%)", perf.realized_pnl, perf.pnl_pct);
            println!(
                "Trades:           {} ({}W/{}L)",
                perf.total_trades, perf.winning_trades, perf.losing_trades
            );
            println!("Trading:          {}", if perf.paused { "PAUSED" } else { "active" });
        }
        None => println!("No trades recorded today."),
    }

    if let Some(balance) = db.get_latest_balance().await? {
        println!("\n=== Account ({}) ===", balance.timestamp.format("%Y-%m-%d %H:%M:%S"));
        println!("Total Capital:    {:.0}", balance.total_capital);
        println!("Available:        {:.0}", balance.available_capital);
        println!("Positions Value:  {:.0}", balance.positions_value);
        println!("Unrealized P&L:   {:.0}", balance.unrealized_pnl);
    }

    let strategies = db.get_strategies().await?;
    if !strategies.is_empty() {
        println!("\n{:<24} {:<20} {:>8} {:>8}", "STRATEGY", "KIND", "ACTIVE", "WEIGHT");
        println!("{}", "-".repeat(63));
        for s in strategies {
            println!(
                "{:<24} {:<20} {:>8} {:>8.3}",
                s.name,
                s.kind.as_str(),
                if s.active { "yes" } else { "no" },
                s.weight
            );
        }
    }

    let events = db.get_recent_events(5).await?;
    if !events.is_empty() {
        println!("\n=== Recent Events ===");
        for e in events {
            println!("{} [{}] {}: {}", e.created_at.format("%H:%M:%S"), e.level, e.module, e.message);
        }
    }

    Ok(())
}
