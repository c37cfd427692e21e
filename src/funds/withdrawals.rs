//! Withdrawal manager.
//!
//! The stake of a withdrawal moves from the user's available bucket into
//! locked the moment the request is accepted, so it can never be
//! double-spent on a bet while the payout is in flight; it leaves locked
//! only when the payment is dispatched or the request is cancelled.
//! Small requests go straight to the dispatch queue; large ones wait for
//! an operator. Broadcasting the transaction is the dispatcher's job,
//! the manager only arbitrates state and money.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{GameConfig, WithdrawalsConfig};
use crate::ledger::{self, NewEntry};
use crate::store::{
    dec_from_db, dec_to_db, ts_from_db, ts_from_db_opt, ts_to_db, uuid_from_db, Store,
};
use crate::types::{
    CoreResult, LedgerEventType, Rejection, Withdrawal, WithdrawalStatus,
};

const MIN_ADDRESS_LEN: usize = 20;

fn withdrawal_from_row(row: &SqliteRow) -> CoreResult<Withdrawal> {
    Ok(Withdrawal {
        id: uuid_from_db(row.get("id"))?,
        user_id: uuid_from_db(row.get("user_id"))?,
        amount: dec_from_db(row.get("amount"))?,
        asset: row.get("asset"),
        network: row.get("network"),
        to_address: row.get("to_address"),
        status: row.get::<&str, _>("status").parse()?,
        tx_hash: row.get("tx_hash"),
        note: row.get("note"),
        created_at: ts_from_db(row.get("created_at"))?,
        processed_at: ts_from_db_opt(row.get::<Option<&str>, _>("processed_at"))?,
    })
}

#[derive(Clone)]
pub struct WithdrawalManager {
    store: Store,
    cfg: WithdrawalsConfig,
    asset: String,
    network: String,
}

impl WithdrawalManager {
    pub fn new(store: Store, cfg: WithdrawalsConfig, game: &GameConfig) -> Self {
        Self {
            store,
            cfg,
            asset: game.settlement_asset.clone(),
            network: game.settlement_network.clone(),
        }
    }

    /// Accept a withdrawal request, moving the amount from available to
    /// locked immediately. Below the auto limit the request comes back
    /// PENDING and is ready for dispatch; at or above it, NEEDS_REVIEW.
    pub async fn request(
        &self,
        user_id: Uuid,
        amount: Decimal,
        to_address: &str,
    ) -> CoreResult<Withdrawal> {
        if amount < self.cfg.min_amount {
            return Err(Rejection::AmountBelowMinimum {
                min: self.cfg.min_amount,
            }
            .into());
        }
        let to_address = to_address.trim();
        if to_address.len() < MIN_ADDRESS_LEN {
            return Err(Rejection::InvalidAddress.into());
        }

        let mut wtx = self.store.begin_write().await?;
        let mut balance =
            ledger::ensure_balance(&mut wtx.tx, user_id, &self.asset, &self.network).await?;
        if balance.available < amount {
            return Err(Rejection::InsufficientFunds {
                needed: amount,
                available: balance.available,
            }
            .into());
        }
        let before = balance.clone();
        balance.available -= amount;
        balance.locked += amount;
        ledger::write_balance(&mut wtx.tx, &balance).await?;

        let status = if amount >= self.cfg.auto_limit {
            WithdrawalStatus::NeedsReview
        } else {
            WithdrawalStatus::Pending
        };
        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            user_id,
            amount,
            asset: self.asset.clone(),
            network: self.network.clone(),
            to_address: to_address.to_string(),
            status,
            tx_hash: None,
            note: None,
            created_at: Utc::now(),
            processed_at: None,
        };
        sqlx::query(
            "INSERT INTO withdrawals (id, user_id, amount, asset, network, to_address,
                                      status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(withdrawal.id.to_string())
        .bind(withdrawal.user_id.to_string())
        .bind(dec_to_db(withdrawal.amount))
        .bind(&withdrawal.asset)
        .bind(&withdrawal.network)
        .bind(&withdrawal.to_address)
        .bind(withdrawal.status.to_string())
        .bind(ts_to_db(withdrawal.created_at))
        .execute(&mut *wtx.tx)
        .await?;

        let mut entry =
            NewEntry::new(LedgerEventType::Withdrawal, amount, &self.asset, &self.network)
                .snapshots(before.available, balance.available, before.locked, balance.locked);
        entry.user_id = Some(user_id);
        entry.description = Some(format!("Withdrawal to {to_address}"));
        entry.idempotency_key = Some(format!("WITHDRAWAL_REQUEST:{}", withdrawal.id));
        ledger::post(&mut wtx.tx, &entry).await?;

        wtx.commit().await?;
        info!(%user_id, %amount, status = %withdrawal.status, "Withdrawal requested");
        Ok(withdrawal)
    }

    /// Operator approval of a NEEDS_REVIEW request.
    pub async fn approve(&self, withdrawal_id: Uuid) -> CoreResult<Withdrawal> {
        let mut wtx = self.store.begin_write().await?;
        let withdrawal = self
            .load(&mut wtx.tx, withdrawal_id)
            .await?
            .ok_or(Rejection::WithdrawalNotFound)?;
        if withdrawal.status != WithdrawalStatus::NeedsReview {
            return Err(Rejection::WithdrawalNotReviewable.into());
        }
        sqlx::query(
            "UPDATE withdrawals SET status = 'APPROVED'
             WHERE id = ? AND status = 'NEEDS_REVIEW'",
        )
        .bind(withdrawal_id.to_string())
        .execute(&mut *wtx.tx)
        .await?;
        wtx.commit().await?;
        info!(%withdrawal_id, "Withdrawal approved");
        Ok(Withdrawal {
            status: WithdrawalStatus::Approved,
            ..withdrawal
        })
    }

    /// Cancel a not-yet-sent withdrawal and return the funds, recording
    /// the operator's reason on the row. The WITHDRAWAL_CANCEL ledger
    /// key keeps a double cancel from crediting twice even across
    /// processes.
    pub async fn cancel(&self, withdrawal_id: Uuid, reason: &str) -> CoreResult<Withdrawal> {
        let mut wtx = self.store.begin_write().await?;
        let withdrawal = self
            .load(&mut wtx.tx, withdrawal_id)
            .await?
            .ok_or(Rejection::WithdrawalNotFound)?;
        if !withdrawal.status.is_cancellable() {
            return Err(Rejection::WithdrawalNotCancellable.into());
        }
        let key = format!("WITHDRAWAL_CANCEL:{withdrawal_id}");
        if ledger::key_exists(&mut wtx.tx, &key).await? {
            return Err(Rejection::WithdrawalNotCancellable.into());
        }

        let res = sqlx::query(
            "UPDATE withdrawals SET status = 'CANCELLED', note = ?, processed_at = ?
             WHERE id = ? AND status IN ('PENDING', 'NEEDS_REVIEW', 'APPROVED')",
        )
        .bind(reason)
        .bind(ts_to_db(Utc::now()))
        .bind(withdrawal_id.to_string())
        .execute(&mut *wtx.tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(Rejection::WithdrawalNotCancellable.into());
        }

        let mut balance = ledger::ensure_balance(
            &mut wtx.tx,
            withdrawal.user_id,
            &withdrawal.asset,
            &withdrawal.network,
        )
        .await?;
        let before = balance.clone();
        balance.locked -= withdrawal.amount;
        balance.available += withdrawal.amount;
        ledger::write_balance(&mut wtx.tx, &balance).await?;

        // The refund of an outflow is a REFUND, not another WITHDRAWAL;
        // reporting reads these event types straight off the table.
        let mut entry = NewEntry::new(
            LedgerEventType::Refund,
            withdrawal.amount,
            &withdrawal.asset,
            &withdrawal.network,
        )
        .snapshots(before.available, balance.available, before.locked, balance.locked);
        entry.user_id = Some(withdrawal.user_id);
        entry.description = Some(format!("Withdrawal cancelled: {reason}"));
        entry.idempotency_key = Some(key);
        ledger::post(&mut wtx.tx, &entry).await?;

        wtx.commit().await?;
        warn!(%withdrawal_id, user_id = %withdrawal.user_id, reason, "Withdrawal cancelled");
        Ok(Withdrawal {
            status: WithdrawalStatus::Cancelled,
            note: Some(reason.to_string()),
            ..withdrawal
        })
    }

    /// Dispatcher callback: the transaction was broadcast. The locked
    /// funds leave the user's balance here. CAS from PENDING or
    /// APPROVED; false when the withdrawal was not dispatchable.
    pub async fn mark_sent(&self, withdrawal_id: Uuid, tx_hash: &str) -> CoreResult<bool> {
        let mut wtx = self.store.begin_write().await?;
        let withdrawal = match self.load(&mut wtx.tx, withdrawal_id).await? {
            Some(w) => w,
            None => return Ok(false),
        };
        let res = sqlx::query(
            "UPDATE withdrawals SET status = 'SENT', tx_hash = ?, processed_at = ?
             WHERE id = ? AND status IN ('PENDING', 'APPROVED')",
        )
        .bind(tx_hash)
        .bind(ts_to_db(Utc::now()))
        .bind(withdrawal_id.to_string())
        .execute(&mut *wtx.tx)
        .await?;
        if res.rows_affected() == 0 {
            return Ok(false);
        }

        let mut balance = ledger::ensure_balance(
            &mut wtx.tx,
            withdrawal.user_id,
            &withdrawal.asset,
            &withdrawal.network,
        )
        .await?;
        let before = balance.clone();
        balance.locked -= withdrawal.amount;
        ledger::write_balance(&mut wtx.tx, &balance).await?;

        let mut entry = NewEntry::new(
            LedgerEventType::Withdrawal,
            withdrawal.amount,
            &withdrawal.asset,
            &withdrawal.network,
        )
        .snapshots(before.available, balance.available, before.locked, balance.locked);
        entry.user_id = Some(withdrawal.user_id);
        entry.description = Some(format!("Withdrawal sent, tx {tx_hash}"));
        entry.idempotency_key = Some(format!("WITHDRAWAL_SENT:{withdrawal_id}"));
        ledger::post(&mut wtx.tx, &entry).await?;

        wtx.commit().await?;
        info!(%withdrawal_id, tx_hash, "Withdrawal sent");
        Ok(true)
    }

    /// Dispatcher callback: the transaction confirmed on chain.
    pub async fn mark_confirmed(&self, withdrawal_id: Uuid) -> CoreResult<bool> {
        let mut wtx = self.store.begin_write().await?;
        let res = sqlx::query(
            "UPDATE withdrawals SET status = 'CONFIRMED' WHERE id = ? AND status = 'SENT'",
        )
        .bind(withdrawal_id.to_string())
        .execute(&mut *wtx.tx)
        .await?;
        wtx.commit().await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn get(&self, withdrawal_id: Uuid) -> CoreResult<Option<Withdrawal>> {
        let mut conn = self.store.pool().acquire().await?;
        self.load(&mut conn, withdrawal_id).await
    }

    async fn load(
        &self,
        conn: &mut sqlx::SqliteConnection,
        withdrawal_id: Uuid,
    ) -> CoreResult<Option<Withdrawal>> {
        let row = sqlx::query("SELECT * FROM withdrawals WHERE id = ?")
            .bind(withdrawal_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(withdrawal_from_row).transpose()
    }

    /// Requests awaiting operator review, oldest first.
    pub async fn pending_review(&self) -> CoreResult<Vec<Withdrawal>> {
        let mut conn = self.store.pool().acquire().await?;
        let rows = sqlx::query(
            "SELECT * FROM withdrawals WHERE status = 'NEEDS_REVIEW' ORDER BY created_at",
        )
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(withdrawal_from_row).collect()
    }

    /// Requests ready for the dispatcher (auto-cleared or operator
    /// approved), oldest first.
    pub async fn ready_to_send(&self) -> CoreResult<Vec<Withdrawal>> {
        let mut conn = self.store.pool().acquire().await?;
        let rows = sqlx::query(
            "SELECT * FROM withdrawals WHERE status IN ('PENDING', 'APPROVED')
             ORDER BY created_at",
        )
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(withdrawal_from_row).collect()
    }

    /// A user's withdrawal history, newest first.
    pub async fn history(&self, user_id: Uuid, limit: i64) -> CoreResult<Vec<Withdrawal>> {
        let mut conn = self.store.pool().acquire().await?;
        let rows = sqlx::query(
            "SELECT * FROM withdrawals WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id.to_string())
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(withdrawal_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::betting::tests::{fund, test_game_config};
    use crate::types::CoreError;
    use rust_decimal_macros::dec;

    const DEST: &str = "UQDestinationAddress0000000000000000000000000000";

    fn test_withdrawals_config() -> WithdrawalsConfig {
        WithdrawalsConfig {
            min_amount: dec!(1),
            auto_limit: dec!(50),
        }
    }

    async fn setup() -> (Store, WithdrawalManager) {
        let store = Store::open_in_memory().await.unwrap();
        let mgr = WithdrawalManager::new(
            store.clone(),
            test_withdrawals_config(),
            &test_game_config(),
        );
        (store, mgr)
    }

    async fn buckets(store: &Store, user: Uuid) -> (Decimal, Decimal) {
        let mut conn = store.pool().acquire().await.unwrap();
        ledger::balance_of(&mut conn, user, "TON", "TON")
            .await
            .unwrap()
            .map(|b| (b.available, b.locked))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO))
    }

    async fn available(store: &Store, user: Uuid) -> Decimal {
        buckets(store, user).await.0
    }

    #[tokio::test]
    async fn test_small_request_goes_straight_to_dispatch() {
        let (store, mgr) = setup().await;
        let user = Uuid::new_v4();
        fund(&store, user, dec!(100)).await;

        let w = mgr.request(user, dec!(20), DEST).await.unwrap();
        assert_eq!(w.status, WithdrawalStatus::Pending);
        assert_eq!(buckets(&store, user).await, (dec!(80), dec!(20)));
        assert_eq!(mgr.ready_to_send().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_large_request_needs_review_then_approve() {
        let (store, mgr) = setup().await;
        let user = Uuid::new_v4();
        fund(&store, user, dec!(100)).await;

        // Exactly the auto limit still needs review.
        let w = mgr.request(user, dec!(50), DEST).await.unwrap();
        assert_eq!(w.status, WithdrawalStatus::NeedsReview);
        assert_eq!(mgr.pending_review().await.unwrap().len(), 1);

        let approved = mgr.approve(w.id).await.unwrap();
        assert_eq!(approved.status, WithdrawalStatus::Approved);
        assert!(mgr.pending_review().await.unwrap().is_empty());
        assert_eq!(mgr.ready_to_send().await.unwrap().len(), 1);

        // Approving again is rejected.
        let err = mgr.approve(w.id).await;
        assert!(matches!(
            err,
            Err(CoreError::Rejected(Rejection::WithdrawalNotReviewable))
        ));
    }

    #[tokio::test]
    async fn test_request_validation() {
        let (store, mgr) = setup().await;
        let user = Uuid::new_v4();
        fund(&store, user, dec!(100)).await;

        let err = mgr.request(user, dec!(0.5), DEST).await;
        assert!(matches!(
            err,
            Err(CoreError::Rejected(Rejection::AmountBelowMinimum { .. }))
        ));

        let err = mgr.request(user, dec!(5), "short").await;
        assert!(matches!(
            err,
            Err(CoreError::Rejected(Rejection::InvalidAddress))
        ));

        let err = mgr.request(user, dec!(500), DEST).await;
        assert!(matches!(
            err,
            Err(CoreError::Rejected(Rejection::InsufficientFunds { .. }))
        ));
        // Nothing moved.
        assert_eq!(available(&store, user).await, dec!(100));
    }

    #[tokio::test]
    async fn test_cancel_returns_funds_once() {
        let (store, mgr) = setup().await;
        let user = Uuid::new_v4();
        fund(&store, user, dec!(100)).await;

        let w = mgr.request(user, dec!(30), DEST).await.unwrap();
        assert_eq!(buckets(&store, user).await, (dec!(70), dec!(30)));

        let cancelled = mgr.cancel(w.id, "user asked").await.unwrap();
        assert_eq!(cancelled.status, WithdrawalStatus::Cancelled);
        assert_eq!(cancelled.note.as_deref(), Some("user asked"));
        assert_eq!(buckets(&store, user).await, (dec!(100), dec!(0)));

        // The reason lands on the stored row and the refund is a REFUND
        // ledger event, not a second outflow.
        let stored = mgr.get(w.id).await.unwrap().unwrap();
        assert_eq!(stored.note.as_deref(), Some("user asked"));
        let mut conn = store.pool().acquire().await.unwrap();
        let refunds = ledger::entries_of_type(&mut conn, LedgerEventType::Refund)
            .await
            .unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(
            refunds[0].idempotency_key.as_deref(),
            Some(format!("WITHDRAWAL_CANCEL:{}", w.id).as_str())
        );
        drop(conn);

        let err = mgr.cancel(w.id, "again").await;
        assert!(matches!(
            err,
            Err(CoreError::Rejected(Rejection::WithdrawalNotCancellable))
        ));
        assert_eq!(available(&store, user).await, dec!(100));
    }

    #[tokio::test]
    async fn test_sent_withdrawal_not_cancellable() {
        let (store, mgr) = setup().await;
        let user = Uuid::new_v4();
        fund(&store, user, dec!(100)).await;

        let w = mgr.request(user, dec!(10), DEST).await.unwrap();
        assert!(mgr.mark_sent(w.id, "txabc").await.unwrap());
        // The payout left the locked bucket with the dispatch.
        assert_eq!(buckets(&store, user).await, (dec!(90), dec!(0)));
        // Dispatch is one-shot.
        assert!(!mgr.mark_sent(w.id, "txabc2").await.unwrap());
        assert_eq!(buckets(&store, user).await, (dec!(90), dec!(0)));

        let err = mgr.cancel(w.id, "too late").await;
        assert!(matches!(
            err,
            Err(CoreError::Rejected(Rejection::WithdrawalNotCancellable))
        ));

        assert!(mgr.mark_confirmed(w.id).await.unwrap());
        let done = mgr.get(w.id).await.unwrap().unwrap();
        assert_eq!(done.status, WithdrawalStatus::Confirmed);
        assert_eq!(done.tx_hash.as_deref(), Some("txabc"));
    }

    #[tokio::test]
    async fn test_history_order() {
        let (store, mgr) = setup().await;
        let user = Uuid::new_v4();
        fund(&store, user, dec!(100)).await;
        mgr.request(user, dec!(5), DEST).await.unwrap();
        mgr.request(user, dec!(6), DEST).await.unwrap();
        let history = mgr.history(user, 10).await.unwrap();
        assert_eq!(history.len(), 2);
    }
}
