//! Ledger integration.
//!
//! Defines the `Ledger` and `Loan` traits the investor core consumes, and the
//! `Subscription` handle used for every push-based ledger notification.
//! - `paper`: in-memory ledger for paper trading and tests

pub mod paper;

use async_trait::async_trait;
use futures::Stream;
use rust_decimal::Decimal;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{Bid, LifecycleEvent, LoanCreated, LoanId, LoanState, LoanTerms};

/// Abstraction over the loan auction platform.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Subscribe to the global stream of newly created loans.
    fn subscribe_created(&self) -> Subscription<LoanCreated>;

    /// Resolve a loan id to a live handle.
    async fn loan(&self, id: &LoanId) -> Result<Arc<dyn Loan>>;

    /// Ledger name for logging.
    fn name(&self) -> &str;
}

/// Live handle to a single loan on the ledger. Never persisted.
#[async_trait]
pub trait Loan: Send + Sync {
    fn id(&self) -> &LoanId;

    async fn terms(&self) -> Result<LoanTerms>;

    /// Current authoritative phase of the loan.
    async fn state(&self) -> Result<LoanState>;

    /// Subscribe to one kind of per-loan event.
    fn subscribe(&self, event: LifecycleEvent) -> Subscription<()>;

    async fn bid(&self, bid: &Bid) -> Result<()>;

    /// Token balance held by `bidder` on this loan.
    async fn balance_of(&self, bidder: &str) -> Result<Decimal>;

    /// Return committed funds to `bidder`.
    async fn withdraw_investment(&self, bidder: &str) -> Result<()>;

    /// Collect the value owed to `bidder` after the loan matured.
    async fn redeem_value(&self, bidder: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Receiving end of a ledger notification stream.
///
/// Dropping or cancelling the subscription closes the channel; the ledger
/// side notices on its next publish and forgets the subscriber.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

/// Sending end held by a ledger implementation.
#[derive(Debug, Clone)]
pub struct Publisher<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Subscription<T> {
    /// Create a connected publisher/subscription pair.
    pub fn channel() -> (Publisher<T>, Subscription<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Publisher { tx }, Subscription { rx })
    }

    /// Wait for the next notification. `None` once the ledger side is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Stop receiving. Buffered notifications are discarded.
    pub fn cancel(mut self) {
        self.rx.close();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Publisher<T> {
    /// Deliver a notification. Returns false if the subscriber went away.
    pub fn publish(&self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
