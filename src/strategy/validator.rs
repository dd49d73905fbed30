//! Structural bid validation.

use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::types::{Bid, BidRequest};

/// Turns a bid proposal into a well-formed `Bid`, or explains why it isn't one.
#[cfg_attr(test, mockall::automock)]
pub trait Validator: Send + Sync {
    fn validate(&self, request: &BidRequest) -> Result<Bid, ValidationError>;
}

/// Default validator: positive amount, `0x`-prefixed hex bidder, rate in [0, 1].
#[derive(Debug, Clone, Copy, Default)]
pub struct BidValidator;

impl BidValidator {
    fn is_address(s: &str) -> bool {
        match s.strip_prefix("0x") {
            Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
            None => false,
        }
    }
}

impl Validator for BidValidator {
    fn validate(&self, request: &BidRequest) -> Result<Bid, ValidationError> {
        let amount = request.amount.ok_or(ValidationError::Missing("amount"))?;
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(amount.to_string()));
        }

        let bidder = request
            .bidder
            .as_deref()
            .ok_or(ValidationError::Missing("bidder"))?;
        if !Self::is_address(bidder) {
            return Err(ValidationError::MalformedBidder(bidder.to_string()));
        }

        let rate = request
            .min_interest_rate
            .ok_or(ValidationError::Missing("min_interest_rate"))?;
        if rate < Decimal::ZERO || rate > Decimal::ONE {
            return Err(ValidationError::RateOutOfRange(rate.to_string()));
        }

        Ok(Bid {
            amount,
            bidder: bidder.to_string(),
            min_interest_rate: rate,
        })
    }
}
