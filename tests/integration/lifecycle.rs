//! Bid → track → settle flows against the paper ledger.

use rust_decimal_macros::dec;

use lender::types::{BidRequest, Bid, LifecycleEvent, LoanState};

use crate::harness::{eventually, settle, standard_bid, terms, Harness};

#[tokio::test]
async fn test_bid_then_track_round_trip() {
    let h = Harness::new(Some(standard_bid()));
    h.start().await;

    let id = h.open_and_bid().await;

    let loan = h.loan(&id);
    assert_eq!(
        loan.bids(),
        vec![Bid {
            amount: dec!(100),
            bidder: "0xA".to_string(),
            min_interest_rate: dec!(0.05),
        }]
    );

    let persisted = h.persisted();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[&id].state, LoanState::Auction);
    assert!(!persisted[&id].refund_withdrawn);

    let raw = std::fs::read_to_string(h.store().path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let entry = json[id.as_str()].as_object().unwrap();
    assert!(entry.contains_key("bid"));
    assert!(entry.contains_key("state"));
    assert!(!entry.contains_key("loan"));

    // AUCTION arms auctionCompleted and the REVIEW watchers together.
    eventually("watchers armed", || {
        loan.watcher_count(LifecycleEvent::AuctionCompleted) == 1
            && LifecycleEvent::REVIEW
                .iter()
                .all(|e| loan.watcher_count(*e) == 1)
    })
    .await;
    assert!(h.errors().is_empty());
}

#[tokio::test]
async fn test_validation_failure_short_circuits() {
    let h = Harness::new(Some(BidRequest {
        amount: None,
        ..standard_bid()
    }));
    h.start().await;

    let id = h.ledger.open_loan(terms());
    eventually("validation error reported", || !h.errors().is_empty()).await;

    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("failed validation"));
    assert!(errors[0].contains("amount"));
    assert!(h.loan(&id).bids().is_empty());
    assert!(h.investor.snapshot().await.is_empty());
    assert!(!h.store().path().exists());

    // The creation watcher keeps serving other loans.
    assert_eq!(h.ledger.creation_watchers(), 1);
}

#[tokio::test]
async fn test_declined_loan_leaves_portfolio_untouched() {
    let h = Harness::new(None);
    h.start().await;

    let id = h.ledger.open_loan(terms());
    settle().await;

    assert!(h.loan(&id).calls().is_empty());
    assert!(h.investor.snapshot().await.is_empty());
    assert!(h.errors().is_empty());
}

#[tokio::test]
async fn test_auction_completed_arms_review() {
    let h = Harness::new(Some(standard_bid()));
    h.start().await;
    let id = h.open_and_bid().await;
    let loan = h.loan(&id);

    loan.emit(LifecycleEvent::AuctionCompleted);
    eventually("review", || h.persisted_state(&id) == Some(LoanState::Review)).await;

    eventually("review watchers only", || {
        loan.watcher_count(LifecycleEvent::AuctionCompleted) == 0
            && LifecycleEvent::REVIEW
                .iter()
                .all(|e| loan.watcher_count(*e) == 1)
    })
    .await;
}

#[tokio::test]
async fn test_term_begin_fully_funded_accepts_without_refund() {
    let h = Harness::new(Some(standard_bid()));
    h.start().await;
    let id = h.open_and_bid().await;
    let loan = h.loan(&id);

    loan.emit(LifecycleEvent::AuctionCompleted);
    eventually("review", || h.persisted_state(&id) == Some(LoanState::Review)).await;

    h.set_balance(&id, dec!(100));
    loan.emit(LifecycleEvent::TermBegin);
    eventually("accepted", || h.persisted_state(&id) == Some(LoanState::Accepted)).await;

    let inv = &h.persisted()[&id];
    assert!(!inv.refund_withdrawn);
    assert_eq!(inv.balance, Some(dec!(100)));
    assert_eq!(loan.withdrawals(), 0);

    // Terminal: every remaining watcher for the loan is torn down.
    eventually("watchers released", || {
        LifecycleEvent::REVIEW.iter().all(|e| loan.watcher_count(*e) == 0)
    })
    .await;
}

#[tokio::test]
async fn test_term_begin_underfunded_withdraws() {
    let h = Harness::new(Some(standard_bid()));
    h.start().await;
    let id = h.open_and_bid().await;
    let loan = h.loan(&id);

    h.set_balance(&id, dec!(40));
    loan.emit(LifecycleEvent::AuctionCompleted);
    eventually("review", || h.persisted_state(&id) == Some(LoanState::Review)).await;
    loan.emit(LifecycleEvent::TermBegin);
    eventually("accepted", || h.persisted_state(&id) == Some(LoanState::Accepted)).await;

    let inv = &h.persisted()[&id];
    assert!(inv.refund_withdrawn);
    assert_eq!(inv.balance, Some(dec!(40)));
    assert_eq!(loan.withdrawals(), 1);
}

#[tokio::test]
async fn test_review_events_act_before_auction_completes() {
    let h = Harness::new(Some(standard_bid()));
    h.start().await;
    let id = h.open_and_bid().await;
    let loan = h.loan(&id);

    eventually("watchers armed", || loan.watcher_count(LifecycleEvent::BidsRejected) == 1).await;
    loan.emit(LifecycleEvent::BidsRejected);
    eventually("rejected", || h.persisted_state(&id) == Some(LoanState::Rejected)).await;

    assert_eq!(loan.withdrawals(), 1);
    eventually("auction watcher cancelled", || {
        loan.watcher_count(LifecycleEvent::AuctionCompleted) == 0
    })
    .await;
}

#[tokio::test]
async fn test_rejected_path_refunds_once() {
    let h = Harness::new(Some(standard_bid()));
    h.start().await;
    let id = h.open_and_bid().await;
    let loan = h.loan(&id);

    loan.emit(LifecycleEvent::AuctionCompleted);
    eventually("review", || h.persisted_state(&id) == Some(LoanState::Review)).await;
    loan.emit(LifecycleEvent::BidsRejected);
    eventually("rejected", || h.persisted_state(&id) == Some(LoanState::Rejected)).await;

    let inv = &h.persisted()[&id];
    assert!(inv.refund_withdrawn);
    assert_eq!(loan.withdrawals(), 1);

    // Late events after the terminal transition change nothing.
    loan.emit(LifecycleEvent::ReviewPeriodCompleted);
    loan.emit(LifecycleEvent::TermBegin);
    settle().await;
    assert_eq!(loan.withdrawals(), 1);
    assert_eq!(h.persisted_state(&id), Some(LoanState::Rejected));
}

#[tokio::test]
async fn test_review_period_expiry_rejects() {
    let h = Harness::new(Some(standard_bid()));
    h.start().await;
    let id = h.open_and_bid().await;
    let loan = h.loan(&id);

    eventually("watchers armed", || {
        loan.watcher_count(LifecycleEvent::ReviewPeriodCompleted) == 1
    })
    .await;
    loan.emit(LifecycleEvent::ReviewPeriodCompleted);
    eventually("rejected", || h.persisted_state(&id) == Some(LoanState::Rejected)).await;
    assert!(h.persisted()[&id].refund_withdrawn);
    assert_eq!(loan.withdrawals(), 1);
}

#[tokio::test]
async fn test_failed_withdrawal_is_isolated() {
    let h = Harness::new(Some(standard_bid()));
    h.start().await;
    let bad = h.open_and_bid().await;
    let good = h.open_and_bid().await;

    h.loan(&bad).fail("withdraw_investment");
    eventually("watchers armed", || {
        h.loan(&bad).watcher_count(LifecycleEvent::BidsRejected) == 1
            && h.loan(&good).watcher_count(LifecycleEvent::BidsRejected) == 1
    })
    .await;

    h.loan(&bad).emit(LifecycleEvent::BidsRejected);
    h.loan(&good).emit(LifecycleEvent::BidsRejected);

    eventually("good loan rejected", || {
        h.persisted_state(&good) == Some(LoanState::Rejected)
    })
    .await;
    eventually("error reported", || !h.errors().is_empty()).await;

    assert!(h.errors()[0].contains("withdraw_investment"));
    let persisted = h.persisted();
    assert_eq!(persisted[&bad].state, LoanState::Auction);
    assert!(!persisted[&bad].refund_withdrawn);
    assert!(persisted[&good].refund_withdrawn);
}

#[tokio::test]
async fn test_collect_after_acceptance() {
    let h = Harness::new(Some(standard_bid()));
    h.start().await;
    let id = h.open_and_bid().await;
    let loan = h.loan(&id);

    eventually("watchers armed", || loan.watcher_count(LifecycleEvent::TermBegin) == 1).await;
    loan.emit(LifecycleEvent::TermBegin);
    eventually("accepted", || h.persisted_state(&id) == Some(LoanState::Accepted)).await;

    let inv = h.investor.collect(&id).await.unwrap();
    assert!(inv.collected_at.is_some());
    assert_eq!(loan.redemptions(), 1);
    assert!(h.persisted()[&id].collected_at.is_some());
}

#[tokio::test]
async fn test_stop_releases_every_subscription() {
    let h = Harness::new(Some(standard_bid()));
    h.start().await;
    let id = h.open_and_bid().await;
    let loan = h.loan(&id);
    eventually("watchers armed", || loan.watcher_count(LifecycleEvent::TermBegin) == 1).await;

    h.investor.stop();
    h.investor.stop();

    eventually("subscriptions closed", || {
        h.ledger.creation_watchers() == 0
            && loan.watcher_count(LifecycleEvent::AuctionCompleted) == 0
            && LifecycleEvent::REVIEW.iter().all(|e| loan.watcher_count(*e) == 0)
    })
    .await;
    assert!(h.investor.watchers().is_empty());

    // Nothing reacts any more.
    assert_eq!(h.ledger.announce(&id), 0);
    assert_eq!(loan.emit(LifecycleEvent::BidsRejected), 0);
    settle().await;
    assert_eq!(h.persisted_state(&id), Some(LoanState::Auction));
}

#[tokio::test]
async fn test_bid_stays_tracked_when_snapshot_cannot_be_saved() {
    let h = Harness::new(Some(standard_bid()));
    // A directory where the temp file should go makes every save fail.
    std::fs::create_dir(h.dir.path().join("portfolio.json.tmp")).unwrap();
    h.start().await;

    let id = h.ledger.open_loan(terms());
    let loan = h.loan(&id);
    eventually("save error reported", || !h.errors().is_empty()).await;
    eventually("watchers armed despite failed save", || {
        loan.watcher_count(LifecycleEvent::AuctionCompleted) == 1
            && LifecycleEvent::REVIEW.iter().all(|e| loan.watcher_count(*e) == 1)
    })
    .await;
    assert_eq!(loan.bids().len(), 1);
    assert!(h.errors()[0].contains("snapshot I/O failed"));
    assert!(h.investor.position(&id).await.is_some());

    // The refund still happens when the bids are rejected.
    loan.emit(LifecycleEvent::BidsRejected);
    eventually("refund withdrawn", || loan.withdrawals() == 1).await;
    eventually("rejection save error reported", || h.errors().len() == 2).await;

    let position = h.investor.position(&id).await.unwrap();
    assert_eq!(position.investment.state, LoanState::Rejected);
    assert!(position.investment.refund_withdrawn);
}
