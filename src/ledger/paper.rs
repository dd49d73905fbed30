//! Paper ledger.
//!
//! In-memory loan auction platform. Loans, balances and event delivery are
//! fully controllable from the caller, and every mutating call is recorded
//! so tests can assert on exactly what the investor submitted.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::{Ledger, Loan, Publisher, Subscription};
use crate::error::{InvestorError, Result};
use crate::portfolio::Snapshot;
use crate::types::{Bid, LifecycleEvent, LoanCreated, LoanId, LoanState, LoanTerms};

const LEDGER_NAME: &str = "paper";

/// Poisoning only happens if a holder panicked; the data is still usable.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Recorded calls
// ---------------------------------------------------------------------------

/// A mutating or querying call made against a paper loan.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCall {
    Bid(Bid),
    BalanceOf(String),
    Withdraw(String),
    Redeem(String),
}

impl LedgerCall {
    fn op(&self) -> &'static str {
        match self {
            LedgerCall::Bid(_) => "bid",
            LedgerCall::BalanceOf(_) => "balance_of",
            LedgerCall::Withdraw(_) => "withdraw_investment",
            LedgerCall::Redeem(_) => "redeem_value",
        }
    }
}

// ---------------------------------------------------------------------------
// Paper loan
// ---------------------------------------------------------------------------

pub struct PaperLoan {
    id: LoanId,
    terms: LoanTerms,
    state: Mutex<LoanState>,
    balances: Mutex<HashMap<String, Decimal>>,
    subscribers: Mutex<HashMap<LifecycleEvent, Vec<Publisher<()>>>>,
    calls: Mutex<Vec<LedgerCall>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl PaperLoan {
    fn new(id: LoanId, terms: LoanTerms, state: LoanState) -> Self {
        Self {
            id,
            terms,
            state: Mutex::new(state),
            balances: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Fire `event` to every live subscriber and advance the loan phase the
    /// way the real platform would. Returns how many subscribers received it.
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        {
            let mut state = lock(&self.state);
            *state = match event {
                LifecycleEvent::AuctionCompleted => LoanState::Review,
                LifecycleEvent::TermBegin => LoanState::Accepted,
                LifecycleEvent::BidsRejected | LifecycleEvent::ReviewPeriodCompleted => {
                    LoanState::Rejected
                }
            };
        }

        let mut subscribers = lock(&self.subscribers);
        let list = subscribers.entry(event).or_default();
        list.retain(|p| !p.is_closed());
        let delivered = list.iter().filter(|p| p.publish(())).count();
        debug!(loan_id = %self.id, %event, delivered, "Paper event emitted");
        delivered
    }

    /// Number of live subscribers for `event`.
    pub fn watcher_count(&self, event: LifecycleEvent) -> usize {
        lock(&self.subscribers)
            .get(&event)
            .map(|list| list.iter().filter(|p| !p.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn set_state(&self, state: LoanState) {
        *lock(&self.state) = state;
    }

    pub fn set_balance(&self, bidder: &str, balance: Decimal) {
        lock(&self.balances).insert(bidder.to_string(), balance);
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        lock(&self.calls).clone()
    }

    pub fn bids(&self) -> Vec<Bid> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                LedgerCall::Bid(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    pub fn withdrawals(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, LedgerCall::Withdraw(_)))
            .count()
    }

    pub fn redemptions(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, LedgerCall::Redeem(_)))
            .count()
    }

    /// Make every subsequent call of kind `op` fail (e.g. "withdraw_investment").
    pub fn fail(&self, op: &'static str) {
        lock(&self.failing).insert(op);
    }

    pub fn recover(&self, op: &'static str) {
        lock(&self.failing).remove(op);
    }

    fn record(&self, call: LedgerCall) -> Result<()> {
        let op = call.op();
        if lock(&self.failing).contains(op) {
            return Err(InvestorError::ledger(op, &self.id, "paper ledger forced failure"));
        }
        lock(&self.calls).push(call);
        Ok(())
    }
}

#[async_trait]
impl Loan for PaperLoan {
    fn id(&self) -> &LoanId {
        &self.id
    }

    async fn terms(&self) -> Result<LoanTerms> {
        Ok(self.terms.clone())
    }

    async fn state(&self) -> Result<LoanState> {
        Ok(*lock(&self.state))
    }

    fn subscribe(&self, event: LifecycleEvent) -> Subscription<()> {
        let (publisher, subscription) = Subscription::channel();
        lock(&self.subscribers).entry(event).or_default().push(publisher);
        subscription
    }

    async fn bid(&self, bid: &Bid) -> Result<()> {
        self.record(LedgerCall::Bid(bid.clone()))?;
        *lock(&self.balances).entry(bid.bidder.clone()).or_default() += bid.amount;
        Ok(())
    }

    async fn balance_of(&self, bidder: &str) -> Result<Decimal> {
        self.record(LedgerCall::BalanceOf(bidder.to_string()))?;
        Ok(lock(&self.balances).get(bidder).copied().unwrap_or_default())
    }

    async fn withdraw_investment(&self, bidder: &str) -> Result<()> {
        self.record(LedgerCall::Withdraw(bidder.to_string()))?;
        lock(&self.balances).insert(bidder.to_string(), Decimal::ZERO);
        Ok(())
    }

    async fn redeem_value(&self, bidder: &str) -> Result<()> {
        self.record(LedgerCall::Redeem(bidder.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Paper ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct PaperLedger {
    loans: Mutex<HashMap<LoanId, Arc<PaperLoan>>>,
    created: Mutex<Vec<Publisher<LoanCreated>>>,
}

impl PaperLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new loan for auction and announce it to creation subscribers.
    pub fn open_loan(&self, terms: LoanTerms) -> LoanId {
        let id = LoanId::new(format!("loan-{}", uuid::Uuid::new_v4()));
        self.insert_loan(id.clone(), terms, LoanState::Auction);
        self.announce(&id);
        id
    }

    /// Register a loan without announcing it (e.g. one that predates a restart).
    pub fn insert_loan(&self, id: LoanId, terms: LoanTerms, state: LoanState) -> Arc<PaperLoan> {
        let loan = Arc::new(PaperLoan::new(id.clone(), terms, state));
        lock(&self.loans).insert(id, loan.clone());
        loan
    }

    /// Publish a creation notification for `id`. Returns subscriber count reached.
    pub fn announce(&self, id: &LoanId) -> usize {
        let mut created = lock(&self.created);
        created.retain(|p| !p.is_closed());
        let delivered = created
            .iter()
            .filter(|p| {
                p.publish(LoanCreated {
                    loan_id: id.clone(),
                })
            })
            .count();
        info!(loan_id = %id, delivered, "Paper loan announced");
        delivered
    }

    /// Recreate the loans a previous run left in `snapshot`, so a restored
    /// portfolio resolves against a fresh paper ledger.
    pub fn adopt(&self, snapshot: &Snapshot, terms: &LoanTerms) -> usize {
        for (id, inv) in snapshot {
            let loan = self.insert_loan(id.clone(), terms.clone(), inv.state);
            let balance = if inv.refund_withdrawn {
                Decimal::ZERO
            } else {
                inv.balance.unwrap_or(inv.bid.amount)
            };
            loan.set_balance(&inv.bid.bidder, balance);
        }
        snapshot.len()
    }

    pub fn paper_loan(&self, id: &LoanId) -> Option<Arc<PaperLoan>> {
        lock(&self.loans).get(id).cloned()
    }

    pub fn loan_ids(&self) -> Vec<LoanId> {
        let mut ids: Vec<LoanId> = lock(&self.loans).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Live creation-stream subscribers.
    pub fn creation_watchers(&self) -> usize {
        lock(&self.created).iter().filter(|p| !p.is_closed()).count()
    }
}

#[async_trait]
impl Ledger for PaperLedger {
    fn subscribe_created(&self) -> Subscription<LoanCreated> {
        let (publisher, subscription) = Subscription::channel();
        lock(&self.created).push(publisher);
        subscription
    }

    async fn loan(&self, id: &LoanId) -> Result<Arc<dyn Loan>> {
        match self.paper_loan(id) {
            Some(loan) => Ok(loan as Arc<dyn Loan>),
            None => Err(InvestorError::ledger("get", id, "no such loan")),
        }
    }

    fn name(&self) -> &str {
        LEDGER_NAME
    }
}

// ---------------------------------------------------------------------------
// Paper market driver
// ---------------------------------------------------------------------------

/// Drives a paper ledger through a deterministic loan flow: every step opens
/// one loan and moves each open loan forward by one phase. Every
/// `reject_every`-th loan is rejected in review instead of starting its term.
pub struct PaperMarket {
    ledger: Arc<PaperLedger>,
    template: LoanTerms,
    reject_every: u32,
    opened: u32,
    rejected: HashSet<LoanId>,
}

impl PaperMarket {
    pub fn new(ledger: Arc<PaperLedger>, template: LoanTerms, reject_every: u32) -> Self {
        Self {
            ledger,
            template,
            reject_every,
            opened: 0,
            rejected: HashSet::new(),
        }
    }

    /// Advance existing loans, then open a fresh one. Returns the new loan id.
    pub fn step(&mut self) -> LoanId {
        for id in self.ledger.loan_ids() {
            let Some(loan) = self.ledger.paper_loan(&id) else {
                continue;
            };
            let state = *lock(&loan.state);
            match state {
                LoanState::Auction => {
                    loan.emit(LifecycleEvent::AuctionCompleted);
                }
                LoanState::Review if self.rejected.contains(&id) => {
                    loan.emit(LifecycleEvent::BidsRejected);
                }
                LoanState::Review => {
                    loan.emit(LifecycleEvent::TermBegin);
                }
                LoanState::Accepted | LoanState::Rejected => {}
            }
        }

        self.opened += 1;
        let id = self.ledger.open_loan(self.template.clone());
        if self.reject_every > 0 && self.opened % self.reject_every == 0 {
            self.rejected.insert(id.clone());
        }
        id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
