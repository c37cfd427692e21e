//! Memo-flow deposits.
//!
//! A user asks for a deposit memo, sends funds to the shared house
//! wallet with that memo attached, and the scanner's observation is
//! matched back to the request. Crediting is a ladder of cheap checks —
//! anything that fails is an [`IgnoreReason`], not an error, because the
//! house wallet sees plenty of traffic that is not ours. The ledger's
//! DEPOSIT:{tx_hash} key makes each chain transaction credit exactly
//! once no matter how often it is observed.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{DepositsConfig, GameConfig};
use crate::external::IncomingTransfer;
use crate::ledger::{self, NewEntry, PostResult};
use crate::store::{
    dec_from_db_opt, dec_to_db, is_unique_violation, ts_from_db, ts_to_db, uuid_from_db, Store,
};
use crate::types::{
    ChainTxKind, ConfirmationStatus, CoreError, CoreResult, CreditOutcome, DepositRequest,
    IgnoreReason, LedgerEventType,
};

/// No 0/O/1/I/L lookalikes — users retype these by hand.
const MEMO_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const MEMO_PREFIX: &str = "DP-";
const MEMO_LEN: usize = 8;

fn generate_memo() -> String {
    let bytes = *Uuid::new_v4().as_bytes();
    let mut memo = String::with_capacity(MEMO_PREFIX.len() + MEMO_LEN);
    memo.push_str(MEMO_PREFIX);
    for b in bytes.iter().take(MEMO_LEN) {
        memo.push(MEMO_ALPHABET[*b as usize % MEMO_ALPHABET.len()] as char);
    }
    memo
}

fn request_from_row(row: &SqliteRow) -> CoreResult<DepositRequest> {
    Ok(DepositRequest {
        id: uuid_from_db(row.get("id"))?,
        user_id: uuid_from_db(row.get("user_id"))?,
        memo: row.get("memo"),
        expected_amount: dec_from_db_opt(row.get::<Option<&str>, _>("expected_amount"))?,
        status: row.get::<&str, _>("status").parse()?,
        expires_at: ts_from_db(row.get("expires_at"))?,
        created_at: ts_from_db(row.get("created_at"))?,
    })
}

/// Record a chain transaction. Returns false when its hash was already
/// recorded (duplicate observation).
pub(crate) async fn record_chain_tx(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    kind: ChainTxKind,
    amount: Decimal,
    asset: &str,
    network: &str,
    tx_hash: &str,
    memo: Option<&str>,
) -> CoreResult<bool> {
    let res = sqlx::query(
        "INSERT INTO chain_transactions (id, user_id, kind, amount, asset, network, status,
                                         tx_hash, memo, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id.to_string())
    .bind(kind.to_string())
    .bind(dec_to_db(amount))
    .bind(asset)
    .bind(network)
    .bind(ConfirmationStatus::Confirmed.to_string())
    .bind(tx_hash)
    .bind(memo)
    .bind(ts_to_db(Utc::now()))
    .execute(&mut *conn)
    .await
    .map_err(CoreError::from);
    match res {
        Ok(_) => Ok(true),
        Err(e) if is_unique_violation(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// DepositManager
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DepositManager {
    pub(crate) store: Store,
    pub(crate) cfg: DepositsConfig,
    /// Memo-flow deposits credit the settlement pair.
    pub(crate) asset: String,
    pub(crate) network: String,
}

impl DepositManager {
    pub fn new(store: Store, cfg: DepositsConfig, game: &GameConfig) -> Self {
        Self {
            store,
            cfg,
            asset: game.settlement_asset.clone(),
            network: game.settlement_network.clone(),
        }
    }

    /// Create a memo-tagged deposit request. An unexpired pending
    /// request is reused rather than multiplied.
    pub async fn create_deposit_request(
        &self,
        user_id: Uuid,
        expected_amount: Option<Decimal>,
    ) -> CoreResult<DepositRequest> {
        if let Some(existing) = self.pending_request(user_id).await? {
            return Ok(existing);
        }

        let mut wtx = self.store.begin_write().await?;
        let now = Utc::now();
        let expires_at = now + Duration::minutes(self.cfg.memo_expiry_minutes);

        // The memo space is large; a collision is a rerolled fluke.
        for _ in 0..5 {
            let request = DepositRequest {
                id: Uuid::new_v4(),
                user_id,
                memo: generate_memo(),
                expected_amount,
                status: ConfirmationStatus::Pending,
                expires_at,
                created_at: now,
            };
            let res = sqlx::query(
                "INSERT INTO deposit_requests (id, user_id, memo, expected_amount, status,
                                               expires_at, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(request.id.to_string())
            .bind(request.user_id.to_string())
            .bind(&request.memo)
            .bind(request.expected_amount.map(dec_to_db))
            .bind(request.status.to_string())
            .bind(ts_to_db(request.expires_at))
            .bind(ts_to_db(request.created_at))
            .execute(&mut *wtx.tx)
            .await
            .map_err(CoreError::from);
            match res {
                Ok(_) => {
                    wtx.commit().await?;
                    info!(%user_id, memo = %request.memo, "Deposit request created");
                    return Ok(request);
                }
                Err(e) if is_unique_violation(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(CoreError::Data("memo generation kept colliding".into()))
    }

    /// The user's live (pending, unexpired) deposit request, if any.
    pub async fn pending_request(&self, user_id: Uuid) -> CoreResult<Option<DepositRequest>> {
        let mut conn = self.store.pool().acquire().await?;
        let row = sqlx::query(
            "SELECT * FROM deposit_requests
             WHERE user_id = ? AND status = 'PENDING' AND expires_at > ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id.to_string())
        .bind(ts_to_db(Utc::now()))
        .fetch_optional(&mut *conn)
        .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    /// Route an observed transfer to the right crediting flow.
    pub async fn process_transfer(
        &self,
        transfer: &IncomingTransfer,
    ) -> CoreResult<CreditOutcome> {
        if transfer.to_address == self.cfg.house_wallet_address {
            self.credit_memo_deposit(transfer).await
        } else {
            self.credit_address_deposit(transfer).await
        }
    }

    /// Match a house-wallet transfer to a deposit request by memo and
    /// credit it.
    pub async fn credit_memo_deposit(
        &self,
        transfer: &IncomingTransfer,
    ) -> CoreResult<CreditOutcome> {
        if transfer.amount <= Decimal::ZERO {
            return Ok(ignored(IgnoreReason::InvalidAmount));
        }
        let memo = match transfer.memo.as_deref().map(str::trim) {
            Some(m) if m.starts_with(MEMO_PREFIX) => m.to_string(),
            _ => return Ok(ignored(IgnoreReason::NotOurMemo)),
        };
        let Some(tx_hash) = transfer.tx_hash.as_deref() else {
            return Ok(ignored(IgnoreReason::MissingTxHash));
        };

        let mut wtx = self.store.begin_write().await?;

        let row = sqlx::query("SELECT * FROM deposit_requests WHERE memo = ?")
            .bind(&memo)
            .fetch_optional(&mut *wtx.tx)
            .await?;
        let Some(request) = row.as_ref().map(request_from_row).transpose()? else {
            return Ok(ignored(IgnoreReason::MemoNotFound));
        };
        if request.status == ConfirmationStatus::Confirmed {
            return Ok(ignored(IgnoreReason::AlreadyProcessed));
        }
        if Utc::now() > request.expires_at {
            return Ok(ignored(IgnoreReason::Expired));
        }
        if let Some(expected) = request.expected_amount {
            if (transfer.amount - expected).abs() > self.cfg.amount_tolerance {
                return Ok(ignored(IgnoreReason::AmountMismatch {
                    expected,
                    received: transfer.amount,
                }));
            }
        }

        let key = format!("DEPOSIT:{tx_hash}");
        if ledger::key_exists(&mut wtx.tx, &key).await? {
            return Ok(ignored(IgnoreReason::TxAlreadySeen));
        }
        if !record_chain_tx(
            &mut wtx.tx,
            request.user_id,
            ChainTxKind::Deposit,
            transfer.amount,
            &self.asset,
            &self.network,
            tx_hash,
            Some(&memo),
        )
        .await?
        {
            return Ok(ignored(IgnoreReason::TxAlreadySeen));
        }

        let mut balance =
            ledger::ensure_balance(&mut wtx.tx, request.user_id, &self.asset, &self.network)
                .await?;
        let before = balance.clone();
        balance.available += transfer.amount;
        ledger::write_balance(&mut wtx.tx, &balance).await?;

        let mut entry =
            NewEntry::new(LedgerEventType::Deposit, transfer.amount, &self.asset, &self.network)
                .snapshots(before.available, balance.available, before.locked, balance.locked);
        entry.user_id = Some(request.user_id);
        entry.description = Some(format!("Deposit via memo {memo}"));
        entry.idempotency_key = Some(key);
        if ledger::post(&mut wtx.tx, &entry).await? == PostResult::Replayed {
            return Ok(ignored(IgnoreReason::RaceDuplicate));
        }

        sqlx::query("UPDATE deposit_requests SET status = 'CONFIRMED' WHERE id = ?")
            .bind(request.id.to_string())
            .execute(&mut *wtx.tx)
            .await?;

        wtx.commit().await?;
        info!(
            user_id = %request.user_id,
            amount = %transfer.amount,
            %memo,
            tx_hash,
            "Memo deposit credited"
        );
        Ok(CreditOutcome::Credited {
            amount: transfer.amount,
            new_balance: balance.available,
        })
    }
}

fn ignored(reason: IgnoreReason) -> CreditOutcome {
    debug!(%reason, "Transfer not credited");
    CreditOutcome::Ignored { reason }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
