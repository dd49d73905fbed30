//! Persistence layer.
//!
//! Saves and loads the portfolio snapshot to/from a single JSON file: an
//! object keyed by loan id whose values are the investments with their
//! live loan handles stripped. Saves replace the file atomically
//! (write temp + fsync + rename), so a crash mid-save leaves the previous
//! snapshot intact.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{InvestorError, Result};
use crate::ledger::Ledger;
use crate::portfolio::{Portfolio, Snapshot};

/// Snapshot file name inside the per-user config directory.
const DEFAULT_STATE_FILE: &str = "portfolio.json";

/// Per-user config directory, relative to `$HOME`.
const CONFIG_DIR: &str = ".config/lender";

/// `$HOME/.config/lender/portfolio.json`, or `./portfolio.json` when no home
/// directory is set.
pub fn default_state_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(CONFIG_DIR).join(DEFAULT_STATE_FILE),
        None => PathBuf::from(DEFAULT_STATE_FILE),
    }
}

#[derive(Debug, Clone)]
pub struct PortfolioStore {
    path: PathBuf,
}

impl PortfolioStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_STATE_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Read the raw snapshot without touching the ledger.
    pub fn read_snapshot(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            return Err(InvestorError::StoreMissing(self.path.clone()));
        }

        let json = fs::read_to_string(&self.path)?;
        serde_json::from_str(&json).map_err(|source| InvestorError::StoreCorrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the snapshot on disk.
    pub fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot).map_err(InvestorError::Serialize)?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let tmp = self.temp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), investments = snapshot.len(), "Portfolio saved");
        Ok(())
    }

    /// Load the portfolio, resolving every stored loan id to a live handle.
    ///
    /// The ledger's reported state is authoritative and overrides whatever
    /// state was recorded before the snapshot was written.
    pub async fn load(&self, ledger: &dyn Ledger) -> Result<Portfolio> {
        let snapshot = self.read_snapshot()?;
        let mut portfolio = Portfolio::new();

        for (id, mut investment) in snapshot {
            let loan = ledger.loan(&id).await?;
            let state = loan.state().await?;
            if state != investment.state {
                warn!(
                    loan_id = %id,
                    recorded = %investment.state,
                    ledger = %state,
                    "Recorded state is stale, using ledger state"
                );
                investment.state = state;
            }
            portfolio.insert(loan, investment);
        }

        info!(
            path = %self.path.display(),
            investments = portfolio.len(),
            "Portfolio loaded from disk"
        );
        Ok(portfolio)
    }

    /// Persist the whole portfolio.
    pub fn save(&self, portfolio: &Portfolio) -> Result<()> {
        self.write_snapshot(&portfolio.snapshot())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
