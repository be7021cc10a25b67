//! Poolwatch - continuous DEX pool discovery and token price tracking
//!
//! Run with: cargo run
//!
//! Discovers newly created tokens from registry events, enumerates their
//! pools against the reference asset, derives USD prices and liquidity
//! from on-chain state, and keeps the persisted market table fresh under
//! a per-minute external-API budget.

use color_eyre::eyre::Result;
use console::style;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod market;
mod multicall;
mod oracle;
mod price_api;
mod registry;
mod scheduler;
mod store;
mod tokens;

use config::Config;
use scheduler::Scheduler;
use store::Database;

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 🛰  POOLWATCH - Token Price & Liquidity Tracker").cyan().bold()
    );
    println!(
        "{}",
        style("    Pool Discovery | Tick Pricing | Budgeted Refresh").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("poolwatch=info".parse()?),
        )
        .init();

    print_banner();

    // Load configuration
    let config = Config::from_env()?;

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        error!("Please check your .env file");
        return Err(e.into());
    }

    config.print_summary();
    println!();

    // Open the persisted market table
    let db = Arc::new(Database::open(&config.db_path)?);
    info!(
        "database ready: {} token(s), {} market record(s)",
        db.token_count().await?,
        db.record_count().await?
    );

    if config.registry_addresses.is_empty() {
        info!("no REGISTRY_ADDRESSES configured - tracking only already-known tokens");
    }

    // Start the recurring jobs
    let scheduler = Scheduler::new(config, db)?;

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            println!();
            info!("interrupt received, shutting down");
        }
    }

    Ok(())
}
