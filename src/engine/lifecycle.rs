//! Investment lifecycle state machine.
//!
//! Entering a state arms the one-shot ledger watchers that state needs;
//! a firing watcher runs the matching transition under the loan's lock.
//!
//! | State    | Entry                                   | Event                          | Next     |
//! |----------|-----------------------------------------|--------------------------------|----------|
//! | AUCTION  | arm auctionCompleted + REVIEW watchers  | auctionCompleted               | REVIEW   |
//! | REVIEW   | arm termBegin, bidsRejected, reviewEnd  | termBegin                      | ACCEPTED |
//! | REVIEW   |                                         | bidsRejected / reviewEnd       | REJECTED |
//! | ACCEPTED | refund shortfall if not yet refunded    | -                              | -        |
//! | REJECTED | refund if not yet refunded              | -                              | -        |
//!
//! REVIEW watchers are armed on AUCTION entry without waiting for
//! `auctionCompleted`: review events may arrive while the auction is still
//! reported open, and they are acted on.
//!
//! Every withdrawal is conditioned on `refund_withdrawn` being false, and
//! the flag is persisted right after the ledger acknowledges it, so
//! re-entering a state after a restart is safe to replay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{ErrorHook, PortfolioBook, WatcherRegistry};
use crate::error::{InvestorError, Result};
use crate::ledger::Loan;
use crate::portfolio::Position;
use crate::types::{LifecycleEvent, LoanId, LoanState};

/// What a watched event means for an investment in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    EnterReview,
    BeginTerm,
    Reject,
    /// Event is stale or redelivered for this state.
    Ignore,
}

/// Transition table.
pub fn step(state: LoanState, event: LifecycleEvent) -> Step {
    use LifecycleEvent::*;
    use LoanState::*;

    match (state, event) {
        (Auction, AuctionCompleted) => Step::EnterReview,
        (Review, AuctionCompleted) => Step::Ignore,
        (Auction | Review, TermBegin) => Step::BeginTerm,
        (Auction | Review, BidsRejected | ReviewPeriodCompleted) => Step::Reject,
        (Accepted | Rejected, AuctionCompleted | TermBegin | BidsRejected | ReviewPeriodCompleted) => {
            Step::Ignore
        }
    }
}

pub struct Lifecycle {
    book: PortfolioBook,
    watchers: WatcherRegistry,
    on_error: ErrorHook,
    stopped: AtomicBool,
}

impl Lifecycle {
    pub fn new(book: PortfolioBook, watchers: WatcherRegistry, on_error: ErrorHook) -> Arc<Self> {
        Arc::new(Self {
            book,
            watchers,
            on_error,
            stopped: AtomicBool::new(false),
        })
    }

    /// Refuse to arm further watchers. Already-armed ones are cancelled by
    /// the owner through the registry.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// (Re-)enter the investment's current state: arm its watchers, or for
    /// terminal states settle any refund still outstanding.
    pub async fn refresh(self: &Arc<Self>, id: &LoanId) -> Result<()> {
        let position = self
            .book
            .position(id)
            .await
            .ok_or_else(|| InvestorError::UnknownInvestment(id.clone()))?;

        debug!(loan_id = %id, state = %position.investment.state, "Entering state");
        match position.investment.state {
            LoanState::Auction => {
                self.arm(&position.loan, LifecycleEvent::AuctionCompleted);
                self.arm_review(&position.loan);
            }
            LoanState::Review => self.arm_review(&position.loan),
            LoanState::Accepted => self.settle_accepted(id).await?,
            LoanState::Rejected => self.settle_rejected(id).await?,
        }
        Ok(())
    }

    fn arm_review(self: &Arc<Self>, loan: &Arc<dyn Loan>) {
        for event in LifecycleEvent::REVIEW {
            self.arm(loan, event);
        }
    }

    /// Spawn a one-shot watcher for `event` on `loan`.
    fn arm(self: &Arc<Self>, loan: &Arc<dyn Loan>, event: LifecycleEvent) {
        if self.is_stopped() {
            return;
        }

        let id = loan.id().clone();
        let armed = self.watchers.arm(&id, event, |token| {
            let mut subscription = loan.subscribe(event);
            let this = Arc::clone(self);
            let id = id.clone();
            tokio::spawn(async move {
                let fired = subscription.recv().await.is_some();
                subscription.cancel();
                this.watchers.release(&id, event, token);
                if !fired {
                    warn!(loan_id = %id, %event, "Ledger closed subscription");
                    return;
                }

                info!(loan_id = %id, %event, "Ledger event received");
                if let Err(e) = this.on_event(&id, event).await {
                    error!(loan_id = %id, %event, error = %e, "Transition failed");
                    (this.on_error)(e);
                }
            })
        });

        if armed {
            debug!(loan_id = %id, %event, "Watcher armed");
        }
    }

    /// Run the transition for `event`.
    pub async fn on_event(self: &Arc<Self>, id: &LoanId, event: LifecycleEvent) -> Result<()> {
        let _guard = self.book.lock_loan(id).await;
        let position = self
            .book
            .position(id)
            .await
            .ok_or_else(|| InvestorError::UnknownInvestment(id.clone()))?;

        match step(position.investment.state, event) {
            Step::EnterReview => {
                self.book
                    .update(id, |inv| {
                        inv.transition(LoanState::Review);
                    })
                    .await?;
                info!(loan_id = %id, "Auction completed, under review");
                self.arm_review(&position.loan);
            }
            Step::BeginTerm => {
                self.begin_term(&position).await?;
                self.watchers.cancel_loan(id);
            }
            Step::Reject => {
                self.reject(&position).await?;
                self.watchers.cancel_loan(id);
            }
            Step::Ignore => {
                debug!(
                    loan_id = %id,
                    %event,
                    state = %position.investment.state,
                    "Event not applicable in current state, ignoring"
                );
            }
        }
        Ok(())
    }

    /// Term began: withdraw any unused part of the bid and mark ACCEPTED.
    async fn begin_term(&self, position: &Position) -> Result<()> {
        let id = position.loan.id();
        let inv = &position.investment;
        let balance = position.loan.balance_of(&inv.bid.bidder).await?;

        let refund = !inv.refund_withdrawn && inv.is_underfunded(balance);
        if refund {
            position.loan.withdraw_investment(&inv.bid.bidder).await?;
        }

        self.book
            .update(id, |inv| {
                inv.record_balance(balance);
                if refund {
                    inv.mark_refunded();
                }
                inv.transition(LoanState::Accepted);
            })
            .await?;
        info!(
            loan_id = %id,
            %balance,
            bid = %inv.bid.amount,
            refunded = refund,
            "Term began, investment accepted"
        );
        Ok(())
    }

    /// Bids were not honored: withdraw everything and mark REJECTED.
    async fn reject(&self, position: &Position) -> Result<()> {
        let id = position.loan.id();
        let inv = &position.investment;

        let refund = !inv.refund_withdrawn;
        if refund {
            position.loan.withdraw_investment(&inv.bid.bidder).await?;
        }

        self.book
            .update(id, |inv| {
                if refund {
                    inv.mark_refunded();
                }
                inv.transition(LoanState::Rejected);
            })
            .await?;
        info!(loan_id = %id, refunded = refund, "Investment rejected");
        Ok(())
    }

    async fn settle_accepted(&self, id: &LoanId) -> Result<()> {
        let _guard = self.book.lock_loan(id).await;
        let Some(position) = self.book.position(id).await else {
            return Err(InvestorError::UnknownInvestment(id.clone()));
        };
        let inv = &position.investment;
        if inv.state != LoanState::Accepted || inv.refund_withdrawn {
            return Ok(());
        }

        let balance = position.loan.balance_of(&inv.bid.bidder).await?;
        let refund = inv.is_underfunded(balance);
        if refund {
            position.loan.withdraw_investment(&inv.bid.bidder).await?;
        }
        self.book
            .update(id, |inv| {
                inv.record_balance(balance);
                if refund {
                    inv.mark_refunded();
                }
            })
            .await?;
        if refund {
            info!(loan_id = %id, %balance, "Withdrew outstanding shortfall on accepted loan");
        }
        Ok(())
    }

    async fn settle_rejected(&self, id: &LoanId) -> Result<()> {
        let _guard = self.book.lock_loan(id).await;
        let Some(position) = self.book.position(id).await else {
            return Err(InvestorError::UnknownInvestment(id.clone()));
        };
        let inv = &position.investment;
        if inv.state != LoanState::Rejected || inv.refund_withdrawn {
            return Ok(());
        }

        position.loan.withdraw_investment(&inv.bid.bidder).await?;
        self.book.update(id, |inv| inv.mark_refunded()).await?;
        info!(loan_id = %id, "Withdrew outstanding refund on rejected loan");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
