//! The investor's portfolio: every tracked investment keyed by loan id,
//! each paired with the live ledger handle of its loan.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::ledger::Loan;
use crate::types::{Investment, LoanId};

/// Durable view of the portfolio: investments only, ordered by loan id.
pub type Snapshot = BTreeMap<LoanId, Investment>;

/// One tracked investment and its live loan handle.
#[derive(Clone)]
pub struct Position {
    pub investment: Investment,
    pub loan: Arc<dyn Loan>,
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Position")
            .field("loan", self.loan.id())
            .field("investment", &self.investment)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Portfolio {
    positions: HashMap<LoanId, Position>,
}

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `investment` on `loan`, replacing any previous entry for that id.
    pub fn insert(&mut self, loan: Arc<dyn Loan>, investment: Investment) {
        let id = loan.id().clone();
        self.positions.insert(id, Position { investment, loan });
    }

    pub fn get(&self, id: &LoanId) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn get_mut(&mut self, id: &LoanId) -> Option<&mut Position> {
        self.positions.get_mut(id)
    }

    pub fn contains(&self, id: &LoanId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Loan ids in sorted order.
    pub fn ids(&self) -> Vec<LoanId> {
        let mut ids: Vec<LoanId> = self.positions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Strip the loan handles.
    pub fn snapshot(&self) -> Snapshot {
        self.positions
            .iter()
            .map(|(id, p)| (id.clone(), p.investment.clone()))
            .collect()
    }
}
