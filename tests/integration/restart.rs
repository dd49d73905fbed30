//! Crash/restart recovery: restored investments re-arm their watchers and
//! replay pending refunds exactly once.

use rust_decimal_macros::dec;

use lender::error::InvestorError;
use lender::portfolio::Snapshot;
use lender::types::{LifecycleEvent, LoanId, LoanState};

use crate::harness::{eventually, investment, settle, standard_bid, terms, Harness};

/// Write a snapshot as a previous run would have left it, with matching
/// loans on the ledger.
fn seed(h: &Harness, entries: &[(&str, LoanState, bool)]) {
    let mut snapshot = Snapshot::new();
    for (id, state, refunded) in entries {
        h.ledger.insert_loan(LoanId::from(*id), terms(), *state);
        snapshot.insert(LoanId::from(*id), investment(*state, *refunded));
    }
    h.store().write_snapshot(&snapshot).unwrap();
}

#[tokio::test]
async fn test_restart_in_review_refunds_once_on_redelivery() {
    let h = Harness::new(Some(standard_bid()));
    seed(&h, &[("l1", LoanState::Review, false)]);
    h.start().await;

    let id = LoanId::from("l1");
    let loan = h.loan(&id);
    eventually("review watchers re-armed", || {
        LifecycleEvent::REVIEW.iter().all(|e| loan.watcher_count(*e) == 1)
    })
    .await;

    // Redelivery: the same event fired twice back to back.
    loan.emit(LifecycleEvent::BidsRejected);
    loan.emit(LifecycleEvent::BidsRejected);
    eventually("rejected", || h.persisted_state(&id) == Some(LoanState::Rejected)).await;
    settle().await;

    assert_eq!(loan.withdrawals(), 1);
    assert!(h.persisted()[&id].refund_withdrawn);
    assert!(h.errors().is_empty());
}

#[tokio::test]
async fn test_restart_settles_terminal_refunds() {
    let h = Harness::new(Some(standard_bid()));
    seed(
        &h,
        &[
            ("rejected", LoanState::Rejected, false),
            ("done", LoanState::Rejected, true),
            ("short", LoanState::Accepted, false),
        ],
    );
    h.loan(&"short".into()).set_balance("0xA", dec!(30));
    h.start().await;

    assert_eq!(h.loan(&"rejected".into()).withdrawals(), 1);
    assert_eq!(h.loan(&"done".into()).withdrawals(), 0);
    assert_eq!(h.loan(&"short".into()).withdrawals(), 1);

    let persisted = h.persisted();
    assert!(persisted[&LoanId::from("rejected")].refund_withdrawn);
    assert!(persisted[&LoanId::from("short")].refund_withdrawn);
    assert_eq!(persisted[&LoanId::from("short")].balance, Some(dec!(30)));

    // A second restart has nothing left to do.
    let h = h.restart().await;
    assert_eq!(h.loan(&"rejected".into()).withdrawals(), 1);
    assert_eq!(h.loan(&"short".into()).withdrawals(), 1);
}

#[tokio::test]
async fn test_ledger_state_is_authoritative_on_restore() {
    let h = Harness::new(Some(standard_bid()));
    seed(&h, &[("l1", LoanState::Auction, false)]);
    let id = LoanId::from("l1");
    // The auction completed while we were down.
    h.loan(&id).set_state(LoanState::Review);
    h.start().await;

    let position = h.investor.position(&id).await.unwrap();
    assert_eq!(position.investment.state, LoanState::Review);
    assert_eq!(position.investment.bid.amount, dec!(100));

    let loan = h.loan(&id);
    assert_eq!(loan.watcher_count(LifecycleEvent::AuctionCompleted), 0);
    assert_eq!(loan.watcher_count(LifecycleEvent::TermBegin), 1);
}

#[tokio::test]
async fn test_tracking_resumes_after_restart() {
    let h = Harness::new(Some(standard_bid()));
    h.start().await;
    let id = h.open_and_bid().await;

    let h = h.restart().await;
    let loan = h.loan(&id);
    assert_eq!(h.investor.snapshot().await.len(), 1);
    eventually("watchers re-armed", || loan.watcher_count(LifecycleEvent::TermBegin) == 1).await;

    h.set_balance(&id, dec!(75));
    loan.emit(LifecycleEvent::TermBegin);
    eventually("accepted", || h.persisted_state(&id) == Some(LoanState::Accepted)).await;
    assert!(h.persisted()[&id].refund_withdrawn);
    assert_eq!(loan.withdrawals(), 1);
    assert_eq!(loan.bids().len(), 1);
}

#[tokio::test]
async fn test_corrupt_snapshot_is_fatal() {
    let h = Harness::new(Some(standard_bid()));
    std::fs::write(h.store().path(), "{\"l1\": {\"state\": ").unwrap();

    let err = tokio_test::assert_err!(h.investor.start(h.hook()).await);
    assert!(matches!(err, InvestorError::StoreCorrupt { .. }));
    assert!(!h.investor.is_running());
    assert_eq!(h.ledger.creation_watchers(), 0);
}

#[tokio::test]
async fn test_failed_resume_reports_and_continues() {
    let h = Harness::new(Some(standard_bid()));
    seed(
        &h,
        &[
            ("broken", LoanState::Rejected, false),
            ("fine", LoanState::Review, false),
        ],
    );
    h.loan(&"broken".into()).fail("withdraw_investment");
    h.start().await;

    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("broken"));
    assert_eq!(
        h.loan(&"fine".into()).watcher_count(LifecycleEvent::TermBegin),
        1
    );
    assert!(!h.persisted()[&LoanId::from("broken")].refund_withdrawn);
}
