//! Error taxonomy for the investor core.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{LoanId, LoanState};

#[derive(Debug, Error)]
pub enum InvestorError {
    /// No snapshot yet. Callers treat this as an empty portfolio.
    #[error("no portfolio snapshot at {0}")]
    StoreMissing(PathBuf),

    #[error("portfolio snapshot {path} is corrupt: {source}")]
    StoreCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("bid for loan {loan_id} failed validation: {source}")]
    BidValidationFailed {
        loan_id: LoanId,
        #[source]
        source: ValidationError,
    },

    #[error("ledger call {op} failed for loan {loan_id}: {reason}")]
    LedgerCallFailed {
        op: &'static str,
        loan_id: LoanId,
        reason: String,
    },

    #[error("loan {0} is not in the portfolio")]
    UnknownInvestment(LoanId),

    #[error("loan {loan_id} cannot be collected in state {state}")]
    NotCollectable { loan_id: LoanId, state: LoanState },

    #[error("decision engine failed for loan {loan_id}: {reason}")]
    Decision { loan_id: LoanId, reason: String },

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialise portfolio: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl InvestorError {
    pub fn ledger(op: &'static str, loan_id: &LoanId, reason: impl ToString) -> Self {
        InvestorError::LedgerCallFailed {
            op,
            loan_id: loan_id.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Structural problems with a bid proposal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(String),
    #[error("malformed bidder address `{0}`")]
    MalformedBidder(String),
    #[error("interest rate must be within [0, 1], got {0}")]
    RateOutOfRange(String),
}

pub type Result<T, E = InvestorError> = std::result::Result<T, E>;
