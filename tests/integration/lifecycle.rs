//! Full round lifecycle: deposit by memo, bet, lock, settle, and check
//! that every coin is accounted for at the end.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use updown::engine::betting::BettingEngine;
use updown::engine::rounds::RoundManager;
use updown::external::IncomingTransfer;
use updown::funds::DepositManager;
use updown::ledger;
use updown::store::Store;
use updown::types::{
    BetStatus, CreditOutcome, Direction, RoundStatus, SettlementOutcome,
};

use crate::mock_feeds::{deposits_config, game_config, HOUSE_WALLET};

struct World {
    store: Store,
    rounds: RoundManager,
    engine: BettingEngine,
    deposits: DepositManager,
}

async fn world() -> World {
    let store = Store::open_in_memory().await.unwrap();
    World {
        rounds: RoundManager::new(store.clone()),
        engine: BettingEngine::new(store.clone(), game_config()),
        deposits: DepositManager::new(store.clone(), deposits_config(), &game_config()),
        store,
    }
}

impl World {
    /// Put funds on a user's balance the way production does: a memo
    /// deposit observed on chain.
    async fn deposit(&self, user: Uuid, amount: Decimal, tx_hash: &str) {
        let request = self
            .deposits
            .create_deposit_request(user, None)
            .await
            .unwrap();
        let outcome = self
            .deposits
            .credit_memo_deposit(&IncomingTransfer {
                tx_hash: Some(tx_hash.into()),
                from_address: None,
                to_address: HOUSE_WALLET.into(),
                amount,
                memo: Some(request.memo),
                asset: "TON".into(),
                network: "TON".into(),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, CreditOutcome::Credited { .. }));
    }

    async fn available(&self, user: Uuid) -> Decimal {
        let mut conn = self.store.pool().acquire().await.unwrap();
        ledger::balance_of(&mut conn, user, "TON", "TON")
            .await
            .unwrap()
            .map(|b| b.available)
            .unwrap_or(Decimal::ZERO)
    }

    async fn total_held(&self, users: &[Uuid]) -> Decimal {
        let mut conn = self.store.pool().acquire().await.unwrap();
        let mut total = Decimal::ZERO;
        for user in users {
            if let Some(b) = ledger::balance_of(&mut conn, *user, "TON", "TON")
                .await
                .unwrap()
            {
                total += b.total();
            }
        }
        total
    }
}

#[tokio::test]
async fn deposit_bet_settle_pays_winners_and_keeps_books_balanced() {
    let w = world().await;
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    w.deposit(alice, dec!(100), "tx-alice").await;
    w.deposit(bob, dec!(100), "tx-bob").await;
    w.deposit(carol, dec!(100), "tx-carol").await;

    let round = w
        .rounds
        .create_round("BTCUSDT", Duration::seconds(300))
        .await
        .unwrap();
    w.engine
        .place_bet(alice, round.id, Direction::Up, dec!(4))
        .await
        .unwrap();
    w.engine
        .place_bet(bob, round.id, Direction::Up, dec!(6))
        .await
        .unwrap();
    w.engine
        .place_bet(carol, round.id, Direction::Down, dec!(5))
        .await
        .unwrap();

    assert!(w.rounds.lock_round(round.id, dec!(64000)).await.unwrap());
    let outcome = w.engine.settle_round(round.id, dec!(64100)).await.unwrap();

    // Pool 15, fee 4% = 0.60, net 14.40, winner pool 10, ratio 1.44.
    assert_eq!(
        outcome,
        SettlementOutcome::Settled {
            round_status: RoundStatus::ResolvedUp,
            winners: 2,
            losers: 1,
            house_fee: dec!(0.60),
            payout_ratio: dec!(1.44),
        }
    );
    assert_eq!(w.available(alice).await, dec!(101.76));
    assert_eq!(w.available(bob).await, dec!(102.64));
    assert_eq!(w.available(carol).await, dec!(95));

    // Deposits in == balances out + house fee.
    let held = w.total_held(&[alice, bob, carol]).await;
    assert_eq!(held + dec!(0.60), dec!(300));

    // Bet rows reflect the outcome.
    let bet = w.engine.user_bet(alice, round.id).await.unwrap().unwrap();
    assert_eq!(bet.status, BetStatus::Won);
    assert_eq!(bet.payout, Some(dec!(5.76)));
    let bet = w.engine.user_bet(carol, round.id).await.unwrap().unwrap();
    assert_eq!(bet.status, BetStatus::Lost);
}

#[tokio::test]
async fn settlement_survives_replay_and_racing_claims() {
    let w = world().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    w.deposit(alice, dec!(50), "tx-a2").await;
    w.deposit(bob, dec!(50), "tx-b2").await;

    let round = w
        .rounds
        .create_round("BTCUSDT", Duration::seconds(300))
        .await
        .unwrap();
    w.engine
        .place_bet(alice, round.id, Direction::Up, dec!(10))
        .await
        .unwrap();
    w.engine
        .place_bet(bob, round.id, Direction::Down, dec!(10))
        .await
        .unwrap();
    w.rounds.lock_round(round.id, dec!(100)).await.unwrap();

    // One worker claims; the second backs off.
    assert!(w.rounds.claim_settlement(round.id).await.unwrap());
    assert!(!w.rounds.claim_settlement(round.id).await.unwrap());

    w.engine.settle_round(round.id, dec!(90)).await.unwrap();
    let after_first = (w.available(alice).await, w.available(bob).await);

    for _ in 0..3 {
        let replay = w.engine.settle_round(round.id, dec!(500)).await.unwrap();
        assert!(matches!(
            replay,
            SettlementOutcome::AlreadySettled {
                round_status: RoundStatus::ResolvedDown
            }
        ));
    }
    assert_eq!(
        (w.available(alice).await, w.available(bob).await),
        after_first
    );
}

#[tokio::test]
async fn void_round_returns_all_stakes() {
    let w = world().await;
    let users: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for (i, u) in users.iter().enumerate() {
        w.deposit(*u, dec!(30), &format!("tx-void-{i}")).await;
    }

    let round = w
        .rounds
        .create_round("BTCUSDT", Duration::seconds(300))
        .await
        .unwrap();
    w.engine
        .place_bet(users[0], round.id, Direction::Up, dec!(5))
        .await
        .unwrap();
    w.engine
        .place_bet(users[1], round.id, Direction::Up, dec!(7))
        .await
        .unwrap();
    w.engine
        .place_bet(users[2], round.id, Direction::Down, dec!(9))
        .await
        .unwrap();
    w.rounds.lock_round(round.id, dec!(100)).await.unwrap();

    // Settle price equals lock price: tie, everyone refunded.
    let outcome = w.engine.settle_round(round.id, dec!(100)).await.unwrap();
    assert_eq!(
        outcome,
        SettlementOutcome::Refunded {
            round_status: RoundStatus::Void,
            refunded: 3
        }
    );
    for u in &users {
        assert_eq!(w.available(*u).await, dec!(30));
    }
    assert_eq!(w.total_held(&users).await, dec!(90));
}

#[tokio::test]
async fn consecutive_rounds_number_sequentially() {
    let w = world().await;
    let user = Uuid::new_v4();
    w.deposit(user, dec!(100), "tx-seq").await;

    for expected in 1..=3i64 {
        let round = w
            .rounds
            .create_round("BTCUSDT", Duration::seconds(300))
            .await
            .unwrap();
        assert_eq!(round.round_number, expected);
        w.engine
            .place_bet(user, round.id, Direction::Up, dec!(2))
            .await
            .unwrap();
        w.rounds.lock_round(round.id, dec!(100)).await.unwrap();
        // One-sided pool: voided, stake returned.
        w.engine.settle_round(round.id, dec!(101)).await.unwrap();
    }
    assert_eq!(w.available(user).await, dec!(100));
}
