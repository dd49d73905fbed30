//! Bid strategy: decision policy and structural bid validation.
//!
//! Both are capabilities injected into the investor at construction time.

pub mod policy;
pub mod validator;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BidRequest, LoanId, LoanTerms};

/// Decides whether to bid on a loan.
///
/// Returns `Ok(None)` to decline. The proposal is validated by a
/// `validator::Validator` before anything reaches the ledger.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn decide(&self, loan_id: &LoanId, terms: &LoanTerms) -> Result<Option<BidRequest>>;
}

pub use policy::{PolicyConfig, ThresholdPolicy};
pub use validator::{BidValidator, Validator};
