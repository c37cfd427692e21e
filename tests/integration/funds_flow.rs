//! Funds pipeline end to end: the observer feeding the crediting flows,
//! address allocation, withdrawals, and the reconciliation monitor over
//! the result.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use updown::config::NetworkConfig;
use updown::external::IncomingTransfer;
use updown::funds::{AddressAllocator, DepositManager, DepositObserver, WithdrawalManager};
use updown::ledger;
use updown::recon::ReconciliationMonitor;
use updown::store::Store;
use updown::types::{LedgerEventType, WithdrawalStatus};

use crate::mock_feeds::{
    deposits_config, game_config, withdrawals_config, RecordingAlerter, StaticScanner,
    HOUSE_WALLET,
};

async fn available(store: &Store, user: Uuid, asset: &str, network: &str) -> Decimal {
    let mut conn = store.pool().acquire().await.unwrap();
    ledger::balance_of(&mut conn, user, asset, network)
        .await
        .unwrap()
        .map(|b| b.available)
        .unwrap_or(Decimal::ZERO)
}

#[tokio::test]
async fn observer_credits_memo_and_address_flows_exactly_once() {
    std::env::set_var("FUNDS_FLOW_ROOT_KEY", "integration-root");
    let store = Store::open_in_memory().await.unwrap();
    let game = game_config();
    let deposits = DepositManager::new(store.clone(), deposits_config(), &game);
    let allocator = AddressAllocator::new(
        store.clone(),
        vec![NetworkConfig {
            asset: "USDT".into(),
            network: "TRC20".into(),
            root_key_env: "FUNDS_FLOW_ROOT_KEY".into(),
        }],
    );

    let memo_user = Uuid::new_v4();
    let addr_user = Uuid::new_v4();
    let request = deposits
        .create_deposit_request(memo_user, None)
        .await
        .unwrap();
    let deposit_address = allocator
        .get_or_create(addr_user, "USDT", "TRC20")
        .await
        .unwrap();

    let scanner = StaticScanner::new();
    scanner.set_transfers(vec![
        // Memo deposit to the house wallet.
        IncomingTransfer {
            tx_hash: Some("scan-tx-1".into()),
            from_address: None,
            to_address: HOUSE_WALLET.into(),
            amount: dec!(12.5),
            memo: Some(request.memo.clone()),
            asset: "TON".into(),
            network: "TON".into(),
        },
        // Address deposit to the allocated TRC20 address.
        IncomingTransfer {
            tx_hash: Some("scan-tx-2".into()),
            from_address: None,
            to_address: deposit_address.address.clone(),
            amount: dec!(40),
            memo: None,
            asset: "USDT".into(),
            network: "TRC20".into(),
        },
        // Traffic that is not ours.
        IncomingTransfer {
            tx_hash: Some("scan-tx-3".into()),
            from_address: None,
            to_address: "41strangeraddress".into(),
            amount: dec!(7),
            memo: None,
            asset: "USDT".into(),
            network: "TRC20".into(),
        },
    ]);

    let observer = DepositObserver::new(
        Arc::new(scanner),
        deposits,
        Arc::new(RecordingAlerter::new()),
        Duration::from_secs(15),
    );

    let (credited, ignored) = observer.scan_once().await.unwrap();
    assert_eq!(credited, 2);
    assert_eq!(ignored, 1);
    assert_eq!(available(&store, memo_user, "TON", "TON").await, dec!(12.5));
    assert_eq!(available(&store, addr_user, "USDT", "TRC20").await, dec!(40));

    // The scanner keeps reporting the same transfers; nothing doubles.
    let (credited, _) = observer.scan_once().await.unwrap();
    assert_eq!(credited, 0);
    assert_eq!(available(&store, memo_user, "TON", "TON").await, dec!(12.5));
    assert_eq!(available(&store, addr_user, "USDT", "TRC20").await, dec!(40));
}

#[tokio::test]
async fn withdrawal_roundtrip_with_review_and_cancel() {
    let store = Store::open_in_memory().await.unwrap();
    let game = game_config();
    let deposits = DepositManager::new(store.clone(), deposits_config(), &game);
    let withdrawals = WithdrawalManager::new(store.clone(), withdrawals_config(), &game);

    let user = Uuid::new_v4();
    let request = deposits.create_deposit_request(user, None).await.unwrap();
    deposits
        .credit_memo_deposit(&IncomingTransfer {
            tx_hash: Some("wd-tx-1".into()),
            from_address: None,
            to_address: HOUSE_WALLET.into(),
            amount: dec!(120),
            memo: Some(request.memo),
            asset: "TON".into(),
            network: "TON".into(),
        })
        .await
        .unwrap();

    let dest = "UQDestinationAddress0000000000000000000000000000";

    // Large request: held for review, funds parked in locked up front.
    let large = withdrawals.request(user, dec!(80), dest).await.unwrap();
    assert_eq!(large.status, WithdrawalStatus::NeedsReview);
    assert_eq!(available(&store, user, "TON", "TON").await, dec!(40));

    // Operator cancels it; the funds come back as a REFUND ledger event
    // with the reason stored on the row.
    withdrawals
        .cancel(large.id, "limit review declined")
        .await
        .unwrap();
    assert_eq!(available(&store, user, "TON", "TON").await, dec!(120));
    let cancelled = withdrawals.get(large.id).await.unwrap().unwrap();
    assert_eq!(cancelled.note.as_deref(), Some("limit review declined"));
    let mut conn = store.pool().acquire().await.unwrap();
    let refunds = ledger::entries_of_type(&mut conn, LedgerEventType::Refund)
        .await
        .unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(
        refunds[0].idempotency_key.as_deref(),
        Some(format!("WITHDRAWAL_CANCEL:{}", large.id).as_str())
    );
    drop(conn);

    // Small request sails through and gets dispatched.
    let small = withdrawals.request(user, dec!(20), dest).await.unwrap();
    assert_eq!(small.status, WithdrawalStatus::Pending);
    assert!(withdrawals.mark_sent(small.id, "chain-tx-9").await.unwrap());
    assert!(withdrawals.mark_confirmed(small.id).await.unwrap());
    assert_eq!(available(&store, user, "TON", "TON").await, dec!(100));

    let history = withdrawals.history(user, 10).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn reconciliation_is_clean_after_mixed_activity() {
    let store = Store::open_in_memory().await.unwrap();
    let game = game_config();
    let deposits = DepositManager::new(store.clone(), deposits_config(), &game);
    let withdrawals = WithdrawalManager::new(store.clone(), withdrawals_config(), &game);

    let user = Uuid::new_v4();
    let request = deposits.create_deposit_request(user, None).await.unwrap();
    deposits
        .credit_memo_deposit(&IncomingTransfer {
            tx_hash: Some("rc-tx-1".into()),
            from_address: None,
            to_address: HOUSE_WALLET.into(),
            amount: dec!(60),
            memo: Some(request.memo),
            asset: "TON".into(),
            network: "TON".into(),
        })
        .await
        .unwrap();
    let w = withdrawals.request(user, dec!(10), "UQDestinationAddress0000000000000000000000000000")
        .await
        .unwrap();
    withdrawals.cancel(w.id, "fat-fingered amount").await.unwrap();

    let alerter = RecordingAlerter::new();
    let monitor = ReconciliationMonitor::new(
        store.clone(),
        Arc::new(alerter.clone()),
        Duration::from_secs(3600),
    );
    let report = monitor.reconcile().await.unwrap();
    assert!(report.is_clean(), "drifts: {:?}", report.drifts);
    assert_eq!(report.total_available, dec!(60));
    assert!(alerter.messages().is_empty());
}
