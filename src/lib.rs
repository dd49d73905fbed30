//! LENDER: autonomous loan-auction investor
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod error;
pub mod types;
pub mod portfolio;
pub mod ledger;
pub mod strategy;
pub mod storage;
pub mod engine;
pub mod dashboard;
