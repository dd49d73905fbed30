//! Shared types for the LENDER agent.
//!
//! The portfolio data model plus the small value types that flow between
//! the ledger, the decision policy and the lifecycle engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque loan identifier assigned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanId(pub String);

impl LoanId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LoanId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Loan
// ---------------------------------------------------------------------------

/// Phase of a loan as reported by the ledger, and of the investment tracking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanState {
    Auction,
    Review,
    Accepted,
    Rejected,
}

impl LoanState {
    /// ACCEPTED and REJECTED are stable endpoints.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanState::Accepted | LoanState::Rejected)
    }
}

impl fmt::Display for LoanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoanState::Auction => write!(f, "AUCTION"),
            LoanState::Review => write!(f, "REVIEW"),
            LoanState::Accepted => write!(f, "ACCEPTED"),
            LoanState::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Public terms of a loan, as seen by the decision policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    /// Amount the borrower asks for.
    pub principal: Decimal,
    /// Highest interest rate the borrower accepts (0.0–1.0).
    pub max_interest_rate: Decimal,
    /// Term length in days.
    pub term_days: u32,
    pub borrower: String,
}

/// Notification that a new loan has been opened for auction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanCreated {
    pub loan_id: LoanId,
}

/// Per-loan ledger events the lifecycle engine watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LifecycleEvent {
    AuctionCompleted,
    TermBegin,
    BidsRejected,
    ReviewPeriodCompleted,
}

impl LifecycleEvent {
    /// Watchers armed while an investment awaits the outcome of review.
    pub const REVIEW: [LifecycleEvent; 3] = [
        LifecycleEvent::TermBegin,
        LifecycleEvent::BidsRejected,
        LifecycleEvent::ReviewPeriodCompleted,
    ];
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::AuctionCompleted => write!(f, "auctionCompleted"),
            LifecycleEvent::TermBegin => write!(f, "termBegin"),
            LifecycleEvent::BidsRejected => write!(f, "bidsRejected"),
            LifecycleEvent::ReviewPeriodCompleted => write!(f, "reviewPeriodCompleted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bids
// ---------------------------------------------------------------------------

/// Bid proposal produced by a decision policy, before structural validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BidRequest {
    pub amount: Option<Decimal>,
    pub bidder: Option<String>,
    pub min_interest_rate: Option<Decimal>,
}

impl BidRequest {
    pub fn new(amount: Decimal, bidder: &str, min_interest_rate: Decimal) -> Self {
        Self {
            amount: Some(amount),
            bidder: Some(bidder.to_string()),
            min_interest_rate: Some(min_interest_rate),
        }
    }
}

/// A validated bid. Immutable once attached to an investment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub amount: Decimal,
    pub bidder: String,
    pub min_interest_rate: Decimal,
}

impl fmt::Display for Bid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {} (min rate {:.2}%)",
            self.amount,
            self.bidder,
            self.min_interest_rate * Decimal::ONE_HUNDRED
        )
    }
}

// ---------------------------------------------------------------------------
// Investment
// ---------------------------------------------------------------------------

/// Durable record of one bid and its lifecycle state for one loan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Investment {
    pub bid: Bid,
    pub state: LoanState,
    /// Last-observed token balance of the bidder, recorded on term begin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
    #[serde(default)]
    pub refund_withdrawn: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_at: Option<DateTime<Utc>>,
}

impl Investment {
    /// A freshly placed bid, still in auction.
    pub fn new(bid: Bid) -> Self {
        let now = Utc::now();
        Self {
            bid,
            state: LoanState::Auction,
            balance: None,
            refund_withdrawn: false,
            created_at: now,
            updated_at: now,
            collected_at: None,
        }
    }

    /// Move to `state`. Returns false when already there.
    pub fn transition(&mut self, state: LoanState) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        self.touch();
        true
    }

    /// Record an acknowledged withdrawal.
    pub fn mark_refunded(&mut self) {
        self.refund_withdrawn = true;
        self.touch();
    }

    pub fn record_balance(&mut self, balance: Decimal) {
        self.balance = Some(balance);
        self.touch();
    }

    /// Whether the observed balance falls short of the bid, i.e. part of
    /// the committed funds were not used and must be withdrawn.
    pub fn is_underfunded(&self, balance: Decimal) -> bool {
        balance < self.bid.amount
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
