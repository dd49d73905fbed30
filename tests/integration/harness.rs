//! Test harness for end-to-end investor runs.
//!
//! Wires an `Investor` to a `PaperLedger`, a scripted decision engine and a
//! snapshot file in a temp directory. Handlers run on spawned tasks, so
//! assertions go through `eventually`, polling the persisted snapshot.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lender::engine::{ErrorHook, Investor};
use lender::error::{InvestorError, Result};
use lender::ledger::paper::{PaperLedger, PaperLoan};
use lender::portfolio::Snapshot;
use lender::storage::PortfolioStore;
use lender::strategy::{BidValidator, DecisionEngine};
use lender::types::{Bid, BidRequest, Investment, LifecycleEvent, LoanId, LoanState, LoanTerms};

/// Decision engine that answers every loan with the same proposal.
pub struct ScriptedEngine {
    pub answer: Option<BidRequest>,
}

#[async_trait]
impl DecisionEngine for ScriptedEngine {
    async fn decide(&self, _loan_id: &LoanId, _terms: &LoanTerms) -> Result<Option<BidRequest>> {
        Ok(self.answer.clone())
    }
}

pub fn standard_bid() -> BidRequest {
    BidRequest::new(dec!(100), "0xA", dec!(0.05))
}

pub fn terms() -> LoanTerms {
    LoanTerms {
        principal: dec!(1000),
        max_interest_rate: dec!(0.12),
        term_days: 90,
        borrower: "0xB0".to_string(),
    }
}

pub fn investment(state: LoanState, refund_withdrawn: bool) -> Investment {
    let mut inv = Investment::new(Bid {
        amount: dec!(100),
        bidder: "0xA".to_string(),
        min_interest_rate: dec!(0.05),
    });
    inv.state = state;
    inv.refund_withdrawn = refund_withdrawn;
    inv
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub ledger: Arc<PaperLedger>,
    pub investor: Investor,
    pub errors: Arc<Mutex<Vec<String>>>,
    answer: Option<BidRequest>,
}

impl Harness {
    pub fn new(answer: Option<BidRequest>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::with(dir, Arc::new(PaperLedger::new()), answer)
    }

    fn with(dir: tempfile::TempDir, ledger: Arc<PaperLedger>, answer: Option<BidRequest>) -> Self {
        let investor = Investor::new(
            ledger.clone(),
            Arc::new(ScriptedEngine {
                answer: answer.clone(),
            }),
            Arc::new(BidValidator),
            PortfolioStore::new(dir.path().join("portfolio.json")),
        );
        Self {
            dir,
            ledger,
            investor,
            errors: Arc::new(Mutex::new(Vec::new())),
            answer,
        }
    }

    pub fn store(&self) -> PortfolioStore {
        PortfolioStore::new(self.dir.path().join("portfolio.json"))
    }

    pub fn hook(&self) -> ErrorHook {
        let sink = self.errors.clone();
        Arc::new(move |e: InvestorError| sink.lock().unwrap().push(e.to_string()))
    }

    pub async fn start(&self) {
        tokio_test::assert_ok!(self.investor.start(self.hook()).await);
    }

    /// Simulate a process restart: stop, then bring up a new investor on the
    /// same ledger and snapshot file.
    pub async fn restart(self) -> Self {
        self.investor.stop();
        let Harness {
            dir, ledger, answer, ..
        } = self;
        let next = Harness::with(dir, ledger, answer);
        next.start().await;
        next
    }

    /// Persisted snapshot, empty when none has been written.
    pub fn persisted(&self) -> Snapshot {
        self.store().read_snapshot().unwrap_or_default()
    }

    pub fn persisted_state(&self, id: &LoanId) -> Option<LoanState> {
        self.persisted().get(id).map(|inv| inv.state)
    }

    pub fn loan(&self, id: &LoanId) -> Arc<PaperLoan> {
        self.ledger.paper_loan(id).unwrap()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    /// Open a loan and wait until the investor has bid on it and armed its
    /// AUCTION watchers.
    pub async fn open_and_bid(&self) -> LoanId {
        let id = self.ledger.open_loan(terms());
        eventually("investment tracked", || self.persisted().contains_key(&id)).await;
        let loan = self.loan(&id);
        eventually("auction watchers armed", || {
            loan.watcher_count(LifecycleEvent::AuctionCompleted) == 1
                && LifecycleEvent::REVIEW.iter().all(|e| loan.watcher_count(*e) == 1)
        })
        .await;
        id
    }

    pub fn set_balance(&self, id: &LoanId, balance: Decimal) {
        self.loan(id).set_balance("0xA", balance);
    }
}

/// Poll `check` until it holds, panicking after two seconds.
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Give spawned handlers a chance to run when asserting that nothing happens.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
