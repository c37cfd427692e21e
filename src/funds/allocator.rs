//! Per-user deposit address allocation.
//!
//! One address per (user, asset, network), allocated lazily at the next
//! free derivation index. First-time allocation for a pair runs under
//! the pair's named lock so two concurrent users can never grab the same
//! index; a cross-process race falls back on the table's uniqueness
//! constraints and adopts the surviving row.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::info;
use uuid::Uuid;

use crate::config::{AppConfig, NetworkConfig};
use crate::store::{is_unique_violation, ts_from_db, ts_to_db, uuid_from_db, Store};
use crate::types::{CoreError, CoreResult, DepositAddress};

use super::derive;

fn address_from_row(row: &SqliteRow) -> CoreResult<DepositAddress> {
    Ok(DepositAddress {
        id: uuid_from_db(row.get("id"))?,
        user_id: uuid_from_db(row.get("user_id"))?,
        asset: row.get("asset"),
        network: row.get("network"),
        address: row.get("address"),
        derivation_index: row.get("derivation_index"),
        created_at: ts_from_db(row.get("created_at"))?,
    })
}

async fn find_address(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    asset: &str,
    network: &str,
) -> CoreResult<Option<DepositAddress>> {
    let row = sqlx::query(
        "SELECT * FROM deposit_addresses WHERE user_id = ? AND asset = ? AND network = ?",
    )
    .bind(user_id.to_string())
    .bind(asset)
    .bind(network)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(address_from_row).transpose()
}

#[derive(Clone)]
pub struct AddressAllocator {
    store: Store,
    networks: Vec<NetworkConfig>,
}

impl AddressAllocator {
    pub fn new(store: Store, networks: Vec<NetworkConfig>) -> Self {
        Self { store, networks }
    }

    /// The user's deposit address for a pair, allocating one on first use.
    pub async fn get_or_create(
        &self,
        user_id: Uuid,
        asset: &str,
        network: &str,
    ) -> CoreResult<DepositAddress> {
        {
            let mut conn = self.store.pool().acquire().await?;
            if let Some(existing) = find_address(&mut conn, user_id, asset, network).await? {
                return Ok(existing);
            }
        }

        let net_cfg = self
            .networks
            .iter()
            .find(|n| n.asset == asset && n.network == network)
            .ok_or_else(|| {
                CoreError::Config(format!("deposits not supported for {asset}/{network}"))
            })?;
        let root_key = AppConfig::resolve_env(&net_cfg.root_key_env)
            .map_err(|e| CoreError::Config(e.to_string()))?;

        let _guard = self.store.named_lock(asset, network).await;

        let mut wtx = self.store.begin_write().await?;
        // Re-check under the lock: we may have lost the allocation race.
        if let Some(existing) = find_address(&mut wtx.tx, user_id, asset, network).await? {
            return Ok(existing);
        }

        let (max_idx,): (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(derivation_index) FROM deposit_addresses
             WHERE asset = ? AND network = ?",
        )
        .bind(asset)
        .bind(network)
        .fetch_one(&mut *wtx.tx)
        .await?;
        let index = max_idx.map_or(0, |i| i + 1);
        let address = derive::derive_address(&root_key, network, index)?;

        let record = DepositAddress {
            id: Uuid::new_v4(),
            user_id,
            asset: asset.to_string(),
            network: network.to_string(),
            address,
            derivation_index: index,
            created_at: Utc::now(),
        };
        let res = sqlx::query(
            "INSERT INTO deposit_addresses (id, user_id, asset, network, address,
                                            derivation_index, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.user_id.to_string())
        .bind(&record.asset)
        .bind(&record.network)
        .bind(&record.address)
        .bind(record.derivation_index)
        .bind(ts_to_db(record.created_at))
        .execute(&mut *wtx.tx)
        .await
        .map_err(CoreError::from);

        match res {
            Ok(_) => {
                wtx.commit().await?;
                info!(%user_id, asset, network, index, "Deposit address allocated");
                Ok(record)
            }
            Err(e) if is_unique_violation(&e) => {
                // Another process allocated for this user meanwhile.
                wtx.rollback().await?;
                let mut conn = self.store.pool().acquire().await?;
                find_address(&mut conn, user_id, asset, network)
                    .await?
                    .ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    /// All addresses allocated to a user.
    pub async fn addresses_of(&self, user_id: Uuid) -> CoreResult<Vec<DepositAddress>> {
        let mut conn = self.store.pool().acquire().await?;
        let rows = sqlx::query(
            "SELECT * FROM deposit_addresses WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(address_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
