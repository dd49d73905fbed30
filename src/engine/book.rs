//! Portfolio book.
//!
//! The single in-memory portfolio shared by every handler. All mutation
//! goes through `insert`/`update`, which persist the whole portfolio while
//! the map lock is held so snapshots hit the disk in mutation order.
//! Per-loan locks serialize handlers working on the same investment.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{InvestorError, Result};
use crate::ledger::Loan;
use crate::portfolio::{Portfolio, Position, Snapshot};
use crate::storage::PortfolioStore;
use crate::types::{Investment, LoanId};

#[derive(Clone)]
pub struct PortfolioBook {
    inner: Arc<Inner>,
}

struct Inner {
    portfolio: Mutex<Portfolio>,
    store: PortfolioStore,
    loan_locks: StdMutex<HashMap<LoanId, Arc<Mutex<()>>>>,
}

impl PortfolioBook {
    pub fn new(portfolio: Portfolio, store: PortfolioStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                portfolio: Mutex::new(portfolio),
                store,
                loan_locks: StdMutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &PortfolioStore {
        &self.inner.store
    }

    /// Exclusive access to one loan's investment for the duration of a handler.
    pub async fn lock_loan(&self, id: &LoanId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .inner
                .loan_locks
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Swap in a freshly loaded portfolio.
    pub async fn replace(&self, portfolio: Portfolio) {
        *self.inner.portfolio.lock().await = portfolio;
    }

    pub async fn contains(&self, id: &LoanId) -> bool {
        self.inner.portfolio.lock().await.contains(id)
    }

    pub async fn position(&self, id: &LoanId) -> Option<Position> {
        self.inner.portfolio.lock().await.get(id).cloned()
    }

    pub async fn ids(&self) -> Vec<LoanId> {
        self.inner.portfolio.lock().await.ids()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.inner.portfolio.lock().await.snapshot()
    }

    /// Track a new investment and persist.
    pub async fn insert(&self, loan: Arc<dyn Loan>, investment: Investment) -> Result<()> {
        let mut portfolio = self.inner.portfolio.lock().await;
        portfolio.insert(loan, investment);
        self.inner.store.save(&portfolio)
    }

    /// Mutate one investment and persist. Returns the updated record.
    ///
    /// A failed save keeps the in-memory mutation: the flags it carries
    /// (`refund_withdrawn` in particular) describe side effects that already
    /// happened on the ledger.
    pub async fn update<F>(&self, id: &LoanId, f: F) -> Result<Investment>
    where
        F: FnOnce(&mut Investment),
    {
        let mut portfolio = self.inner.portfolio.lock().await;
        let position = portfolio
            .get_mut(id)
            .ok_or_else(|| InvestorError::UnknownInvestment(id.clone()))?;
        f(&mut position.investment);
        let updated = position.investment.clone();
        self.inner.store.save(&portfolio)?;
        debug!(loan_id = %id, state = %updated.state, "Investment updated");
        Ok(updated)
    }
}
