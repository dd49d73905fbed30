//! LENDER: autonomous loan-auction investor
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the portfolio from disk (or starts fresh), and follows every
//! investment through its lifecycle until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use lender::config;
use lender::dashboard;
use lender::engine::{ErrorHook, Investor};
use lender::error::InvestorError;
use lender::ledger::paper::{PaperLedger, PaperMarket};
use lender::storage::PortfolioStore;
use lender::strategy::{BidValidator, ThresholdPolicy};

const BANNER: &str = r#"
 _     _____ _   _ ____  _____ ____
| |   | ____| \ | |  _ \| ____|  _ \
| |   |  _| |  \| | | | |  _| | |_) |
| |___| |___| |\  | |_| | |___|  _ <
|_____|_____|_| \_|____/|_____|_| \_\

  Autonomous loan-auction investor
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    let state_path = cfg.state_path();
    info!(
        name = %cfg.investor.name,
        state_file = %state_path.display(),
        paper = cfg.paper.enabled,
        "LENDER starting up"
    );

    // -- Initialise components -------------------------------------------

    // Only the in-memory ledger ships with this binary.
    let ledger = Arc::new(PaperLedger::new());
    let store = PortfolioStore::new(state_path);

    // Restored loans must resolve against the fresh paper ledger. A missing
    // or corrupt snapshot is reported by `Investor::start` below.
    if let Ok(snapshot) = store.read_snapshot() {
        let adopted = ledger.adopt(&snapshot, &cfg.paper.loan_terms());
        info!(adopted, "Paper ledger seeded from saved portfolio");
    }

    let policy = ThresholdPolicy::new(cfg.policy_config()?);
    let investor = Arc::new(Investor::new(
        ledger.clone(),
        Arc::new(policy),
        Arc::new(BidValidator),
        store,
    ));

    let on_error: ErrorHook = Arc::new(|e: InvestorError| {
        error!(error = %e, "Investment handler failed");
    });
    investor.start(on_error).await?;

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(investor.clone(), cfg.dashboard.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    let mut market = PaperMarket::new(ledger, cfg.paper.loan_terms(), cfg.paper.reject_every);
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.paper.step_interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering main loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = interval.tick(), if cfg.paper.enabled => {
                let loan_id = market.step();
                info!(%loan_id, "Paper market advanced");
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    investor.stop();
    let snapshot = investor.snapshot().await;
    info!(investments = snapshot.len(), "LENDER shut down cleanly.");

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lender=info"));

    if std::env::var("LENDER_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
