//! UPDOWN — recurring up/down prediction market service.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store, and runs the round driver, the deposit observer and
//! the reconciliation monitor until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use updown::config::AppConfig;
use updown::engine::betting::BettingEngine;
use updown::engine::rounds::RoundManager;
use updown::engine::runner::RoundDriver;
use updown::external::{Alerter, BinancePriceSource, NoopAlerter, TelegramAlerter, TonApiScanner};
use updown::funds::{DepositManager, DepositObserver};
use updown::recon::ReconciliationMonitor;
use updown::store::Store;

const BANNER: &str = r#"
 _   _ ____  ____   _____        ___   _
| | | |  _ \|  _ \ / _ \ \      / / \ | |
| | | | |_) | | | | | | \ \ /\ / /|  \| |
| |_| |  __/| |_| | |_| |\ V  V / | |\  |
 \___/|_|   |____/ \___/  \_/\_/  |_| \_|

  Pari-mutuel price prediction rounds
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        symbols = ?cfg.game.asset_symbols,
        round_duration_secs = cfg.game.round_duration_secs,
        rake_percentage = %cfg.game.rake_percentage,
        "UPDOWN starting up"
    );

    let store = Store::connect(&cfg.database.url).await?;

    let alerter: Arc<dyn Alerter> = match TelegramAlerter::from_config(&cfg.alerts) {
        Some(t) => Arc::new(t),
        None => {
            info!("No alert channel configured");
            Arc::new(NoopAlerter)
        }
    };

    let rounds = RoundManager::new(store.clone());
    let engine = BettingEngine::new(store.clone(), cfg.game.clone());
    let prices = Arc::new(BinancePriceSource::new()?);

    let deposits = DepositManager::new(store.clone(), cfg.deposits.clone(), &cfg.game);
    let scanner = Arc::new(TonApiScanner::new(
        &cfg.deposits.house_wallet_address,
        std::env::var("TONAPI_KEY").ok(),
        &cfg.game.settlement_asset,
        &cfg.game.settlement_network,
    )?);
    let observer = DepositObserver::new(
        scanner,
        deposits,
        alerter.clone(),
        Duration::from_secs(cfg.deposits.scan_interval_secs),
    );

    let driver = RoundDriver::new(
        rounds,
        engine,
        prices,
        alerter.clone(),
        cfg.game.clone(),
    );
    let monitor = ReconciliationMonitor::new(
        store.clone(),
        alerter.clone(),
        Duration::from_secs(cfg.reconciliation.interval_secs),
    );

    let driver_task = tokio::spawn(driver.run());
    let observer_task = tokio::spawn(observer.run());
    let recon_task = tokio::spawn(monitor.run());

    info!("Entering main loop. Press Ctrl+C to stop.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        res = driver_task => {
            res?;
        }
        res = observer_task => {
            res?;
        }
        res = recon_task => {
            res?;
        }
    }

    info!("UPDOWN stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("updown=info"));

    let json_logging = std::env::var("UPDOWN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
