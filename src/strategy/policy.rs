//! Threshold bid policy.
//!
//! Bids a fixed fraction of the requested principal, capped at `max_bid`,
//! on loans whose rate ceiling and term fit the configured limits.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use super::DecisionEngine;
use crate::error::Result;
use crate::types::{BidRequest, LoanId, LoanTerms};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Bidder address placed on every bid.
    pub bidder: String,
    /// Minimum interest rate we ask for.
    pub min_interest_rate: Decimal,
    /// Fraction of the principal to bid (0.0–1.0).
    pub bid_fraction: Decimal,
    /// Hard cap on a single bid.
    pub max_bid: Decimal,
    /// Longest term we are willing to lend for.
    pub max_term_days: u32,
    /// Loans smaller than this are ignored.
    pub min_principal: Decimal,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            bidder: String::new(),
            min_interest_rate: dec!(0.05),
            bid_fraction: dec!(0.10),
            max_bid: dec!(500),
            max_term_days: 365,
            min_principal: dec!(100),
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

pub struct ThresholdPolicy {
    config: PolicyConfig,
}

impl ThresholdPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Reason for declining, or `None` if the loan qualifies.
    fn decline_reason(&self, terms: &LoanTerms) -> Option<&'static str> {
        if terms.principal < self.config.min_principal {
            Some("principal below minimum")
        } else if terms.max_interest_rate < self.config.min_interest_rate {
            Some("rate ceiling below our minimum")
        } else if terms.term_days > self.config.max_term_days {
            Some("term too long")
        } else {
            None
        }
    }

    fn size(&self, terms: &LoanTerms) -> Decimal {
        (terms.principal * self.config.bid_fraction)
            .min(self.config.max_bid)
            .round_dp(2)
    }
}

#[async_trait]
impl DecisionEngine for ThresholdPolicy {
    async fn decide(&self, loan_id: &LoanId, terms: &LoanTerms) -> Result<Option<BidRequest>> {
        if let Some(reason) = self.decline_reason(terms) {
            debug!(%loan_id, reason, "Declining loan");
            return Ok(None);
        }

        let amount = self.size(terms);
        debug!(%loan_id, %amount, "Bidding on loan");
        Ok(Some(BidRequest::new(
            amount,
            &self.config.bidder,
            self.config.min_interest_rate,
        )))
    }
}
