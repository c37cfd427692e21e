//! Address-flow deposits.
//!
//! Exchange-style crediting: the destination address alone identifies
//! the user, no memo involved. The ledger key is scoped by network
//! because different chains can, in principle, produce the same
//! transaction hash.

use rust_decimal::Decimal;
use sqlx::Row;
use tracing::info;

use crate::external::IncomingTransfer;
use crate::ledger::{self, NewEntry, PostResult};
use crate::types::{ChainTxKind, CoreResult, CreditOutcome, IgnoreReason, LedgerEventType};

use super::deposits::{record_chain_tx, DepositManager};

impl DepositManager {
    /// Credit a transfer sent to a managed per-user deposit address.
    pub async fn credit_address_deposit(
        &self,
        transfer: &IncomingTransfer,
    ) -> CoreResult<CreditOutcome> {
        if transfer.amount <= Decimal::ZERO {
            return Ok(CreditOutcome::Ignored {
                reason: IgnoreReason::InvalidAmount,
            });
        }
        let Some(tx_hash) = transfer.tx_hash.as_deref() else {
            return Ok(CreditOutcome::Ignored {
                reason: IgnoreReason::MissingTxHash,
            });
        };

        let mut wtx = self.store.begin_write().await?;

        let row = sqlx::query(
            "SELECT user_id FROM deposit_addresses
             WHERE asset = ? AND network = ? AND address = ?",
        )
        .bind(&transfer.asset)
        .bind(&transfer.network)
        .bind(&transfer.to_address)
        .fetch_optional(&mut *wtx.tx)
        .await?;
        let Some(row) = row else {
            return Ok(CreditOutcome::Ignored {
                reason: IgnoreReason::AddressNotManaged,
            });
        };
        let user_id = crate::store::uuid_from_db(row.get("user_id"))?;

        let key = format!("DEPOSIT:{}:{}", transfer.network, tx_hash);
        if ledger::key_exists(&mut wtx.tx, &key).await? {
            return Ok(CreditOutcome::Ignored {
                reason: IgnoreReason::TxAlreadySeen,
            });
        }
        if !record_chain_tx(
            &mut wtx.tx,
            user_id,
            ChainTxKind::Deposit,
            transfer.amount,
            &transfer.asset,
            &transfer.network,
            tx_hash,
            None,
        )
        .await?
        {
            return Ok(CreditOutcome::Ignored {
                reason: IgnoreReason::TxAlreadySeen,
            });
        }

        let mut balance =
            ledger::ensure_balance(&mut wtx.tx, user_id, &transfer.asset, &transfer.network)
                .await?;
        let before = balance.clone();
        balance.available += transfer.amount;
        ledger::write_balance(&mut wtx.tx, &balance).await?;

        let mut entry = NewEntry::new(
            LedgerEventType::Deposit,
            transfer.amount,
            &transfer.asset,
            &transfer.network,
        )
        .snapshots(before.available, balance.available, before.locked, balance.locked);
        entry.user_id = Some(user_id);
        entry.description = Some(format!(
            "Deposit to {} on {}",
            transfer.to_address, transfer.network
        ));
        entry.idempotency_key = Some(key);
        if ledger::post(&mut wtx.tx, &entry).await? == PostResult::Replayed {
            return Ok(CreditOutcome::Ignored {
                reason: IgnoreReason::RaceDuplicate,
            });
        }

        wtx.commit().await?;
        info!(
            %user_id,
            amount = %transfer.amount,
            asset = %transfer.asset,
            network = %transfer.network,
            tx_hash,
            "Address deposit credited"
        );
        Ok(CreditOutcome::Credited {
            amount: transfer.amount,
            new_balance: balance.available,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
