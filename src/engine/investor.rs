//! Investor: the orchestrator.
//!
//! Restores the portfolio, listens for new loans on the ledger, turns
//! decisions into bids and hands every investment to the lifecycle engine.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::{ErrorHook, Lifecycle, PortfolioBook, WatcherRegistry};
use crate::error::{InvestorError, Result};
use crate::ledger::Ledger;
use crate::portfolio::{Portfolio, Position, Snapshot};
use crate::storage::PortfolioStore;
use crate::strategy::{DecisionEngine, Validator};
use crate::types::{Investment, LoanId, LoanState};

/// Live wiring created by `start` and torn down by `stop`.
struct Running {
    lifecycle: Arc<Lifecycle>,
    creation: AbortHandle,
}

pub struct Investor {
    ledger: Arc<dyn Ledger>,
    engine: Arc<dyn DecisionEngine>,
    validator: Arc<dyn Validator>,
    book: PortfolioBook,
    watchers: WatcherRegistry,
    running: Mutex<Option<Running>>,
}

/// Everything a loan-creation handler needs, cloned into each task.
#[derive(Clone)]
struct BidContext {
    ledger: Arc<dyn Ledger>,
    engine: Arc<dyn DecisionEngine>,
    validator: Arc<dyn Validator>,
    book: PortfolioBook,
    lifecycle: Arc<Lifecycle>,
}

impl Investor {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        engine: Arc<dyn DecisionEngine>,
        validator: Arc<dyn Validator>,
        store: PortfolioStore,
    ) -> Self {
        Self {
            ledger,
            engine,
            validator,
            book: PortfolioBook::new(Portfolio::new(), store),
            watchers: WatcherRegistry::new(),
            running: Mutex::new(None),
        }
    }

    pub fn book(&self) -> &PortfolioBook {
        &self.book
    }

    pub fn watchers(&self) -> &WatcherRegistry {
        &self.watchers
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Restore the portfolio, subscribe to new loans and re-arm every
    /// restored investment.
    ///
    /// A missing snapshot means a fresh start; any other load failure is
    /// returned. Failures inside event handlers go to `on_error`.
    pub async fn start(&self, on_error: ErrorHook) -> Result<()> {
        if self.is_running() {
            warn!("Investor already running");
            return Ok(());
        }

        let portfolio = match self.book.store().load(self.ledger.as_ref()).await {
            Ok(p) => p,
            Err(InvestorError::StoreMissing(path)) => {
                info!(path = %path.display(), "No saved portfolio found, starting fresh");
                Portfolio::new()
            }
            Err(e) => return Err(e),
        };
        let restored = portfolio.len();
        self.book.replace(portfolio).await;
        self.watchers.reopen();

        let lifecycle = Lifecycle::new(self.book.clone(), self.watchers.clone(), on_error.clone());
        let ctx = BidContext {
            ledger: self.ledger.clone(),
            engine: self.engine.clone(),
            validator: self.validator.clone(),
            book: self.book.clone(),
            lifecycle: lifecycle.clone(),
        };

        let mut created = self.ledger.subscribe_created();
        let hook = on_error.clone();
        let creation = tokio::spawn(async move {
            while let Some(event) = created.recv().await {
                let ctx = ctx.clone();
                let hook = hook.clone();
                tokio::spawn(async move {
                    let loan_id = event.loan_id;
                    if let Err(e) = ctx.on_loan_created(&loan_id).await {
                        warn!(%loan_id, error = %e, "Loan creation handling failed");
                        hook(e);
                    }
                });
            }
            debug!("Loan creation stream ended");
        })
        .abort_handle();

        *self.running.lock().unwrap_or_else(|e| e.into_inner()) = Some(Running {
            lifecycle: lifecycle.clone(),
            creation,
        });

        for id in self.book.ids().await {
            if let Err(e) = lifecycle.refresh(&id).await {
                error!(loan_id = %id, error = %e, "Failed to resume investment");
                on_error(e);
            }
        }

        info!(
            ledger = self.ledger.name(),
            restored,
            watchers = self.watchers.len(),
            "Investor started"
        );
        Ok(())
    }

    /// Cancel the creation subscription and every per-loan watcher.
    pub fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(running) = running else {
            return;
        };
        running.lifecycle.shutdown();
        running.creation.abort();
        let cancelled = self.watchers.cancel_all();
        info!(watchers = cancelled, "Investor stopped");
    }

    /// Redeem the value owed on a matured, accepted investment.
    pub async fn collect(&self, id: &LoanId) -> Result<Investment> {
        let _guard = self.book.lock_loan(id).await;
        let position = self
            .book
            .position(id)
            .await
            .ok_or_else(|| InvestorError::UnknownInvestment(id.clone()))?;

        let state = position.investment.state;
        if state != LoanState::Accepted {
            return Err(InvestorError::NotCollectable {
                loan_id: id.clone(),
                state,
            });
        }

        position
            .loan
            .redeem_value(&position.investment.bid.bidder)
            .await?;
        let updated = self
            .book
            .update(id, |inv| inv.collected_at = Some(Utc::now()))
            .await?;
        info!(loan_id = %id, bidder = %updated.bid.bidder, "Investment value redeemed");
        Ok(updated)
    }

    pub async fn position(&self, id: &LoanId) -> Option<Position> {
        self.book.position(id).await
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.book.snapshot().await
    }
}

impl Drop for Investor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl BidContext {
    /// Decide on a new loan and, if we bid, start tracking it.
    ///
    /// Once the ledger acknowledged the bid the investment is tracked and
    /// watched even if persisting it fails; the save error is returned after.
    async fn on_loan_created(&self, id: &LoanId) -> Result<()> {
        let saved = {
            let _guard = self.book.lock_loan(id).await;
            if self.book.contains(id).await {
                debug!(loan_id = %id, "Loan already tracked, ignoring creation event");
                return Ok(());
            }
            if self.lifecycle.is_stopped() {
                return Ok(());
            }

            let loan = self.ledger.loan(id).await?;
            let terms = loan.terms().await?;
            let Some(request) = self.engine.decide(id, &terms).await? else {
                debug!(loan_id = %id, "Decision engine declined");
                return Ok(());
            };

            let bid = self
                .validator
                .validate(&request)
                .map_err(|source| InvestorError::BidValidationFailed {
                    loan_id: id.clone(),
                    source,
                })?;

            loan.bid(&bid).await?;
            info!(loan_id = %id, bid = %bid, "Bid submitted");
            self.book.insert(loan, Investment::new(bid)).await
        };

        if let Err(e) = &saved {
            warn!(loan_id = %id, error = %e, "Bid placed but portfolio save failed");
        }
        self.lifecycle.refresh(id).await?;
        saved
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
