//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The bidder address may be given inline or referenced by env-var name
//! and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::storage;
use crate::strategy::PolicyConfig;
use crate::types::LoanTerms;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub investor: InvestorConfig,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InvestorConfig {
    pub name: String,
    /// Bidder address used on every bid.
    #[serde(default)]
    pub bidder: Option<String>,
    /// Env var holding the bidder address, consulted when `bidder` is unset.
    #[serde(default)]
    pub bidder_env: Option<String>,
    /// Snapshot location. Defaults to `$HOME/.config/lender/portfolio.json`.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicySection {
    pub min_interest_rate: Decimal,
    pub bid_fraction: Decimal,
    pub max_bid: Decimal,
    pub max_term_days: u32,
    pub min_principal: Decimal,
}

impl Default for PolicySection {
    fn default() -> Self {
        let d = PolicyConfig::default();
        Self {
            min_interest_rate: d.min_interest_rate,
            bid_fraction: d.bid_fraction,
            max_bid: d.max_bid,
            max_term_days: d.max_term_days,
            min_principal: d.min_principal,
        }
    }
}

/// Paper loan flow driven against the in-memory ledger.
#[derive(Debug, Deserialize, Clone)]
pub struct PaperConfig {
    pub enabled: bool,
    /// Seconds between market steps (one new loan, every open loan advances).
    pub step_interval_secs: u64,
    /// Every n-th loan is rejected in review. 0 disables rejections.
    pub reject_every: u32,
    pub principal: Decimal,
    pub max_interest_rate: Decimal,
    pub term_days: u32,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step_interval_secs: 30,
            reject_every: 3,
            principal: dec!(1000),
            max_interest_rate: dec!(0.12),
            term_days: 90,
        }
    }
}

impl PaperConfig {
    /// Terms of every loan the paper market opens.
    pub fn loan_terms(&self) -> LoanTerms {
        LoanTerms {
            principal: self.principal,
            max_interest_rate: self.max_interest_rate,
            term_days: self.term_days,
            borrower: "0xpaper".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The bidder address: inline value first, then the referenced env var.
    pub fn bidder(&self) -> Result<String> {
        if let Some(bidder) = &self.investor.bidder {
            return Ok(bidder.clone());
        }
        match &self.investor.bidder_env {
            Some(env) => Self::resolve_env(env),
            None => bail!("Neither investor.bidder nor investor.bidder_env is set"),
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.investor
            .state_file
            .clone()
            .unwrap_or_else(storage::default_state_path)
    }

    pub fn policy_config(&self) -> Result<PolicyConfig> {
        Ok(PolicyConfig {
            bidder: self.bidder()?,
            min_interest_rate: self.policy.min_interest_rate,
            bid_fraction: self.policy.bid_fraction,
            max_bid: self.policy.max_bid,
            max_term_days: self.policy.max_term_days,
            min_principal: self.policy.min_principal,
        })
    }
}
