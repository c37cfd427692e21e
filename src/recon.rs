//! Reconciliation monitor.
//!
//! Periodically replays the ledger's before/after snapshots and checks
//! that every balance row still equals the sum of its recorded
//! movements. Any drift or negative bucket means invariants were broken
//! somewhere and an operator needs to look. All sums are computed in
//! `Decimal` — amounts are stored as TEXT and must never be summed by
//! the database as floats.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::external::Alerter;
use crate::ledger;
use crate::store::Store;
use crate::types::{CoreResult, LedgerEventType};

/// One balance row that disagrees with its ledger history.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceDrift {
    pub user_id: Uuid,
    pub asset: String,
    pub network: String,
    pub available: Decimal,
    pub expected_available: Decimal,
    pub locked: Decimal,
    pub expected_locked: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct ReconReport {
    pub balances_checked: usize,
    pub total_available: Decimal,
    pub total_locked: Decimal,
    pub house_fees: Decimal,
    pub drifts: Vec<BalanceDrift>,
    pub negatives: Vec<(Uuid, String, String)>,
}

impl ReconReport {
    pub fn is_clean(&self) -> bool {
        self.drifts.is_empty() && self.negatives.is_empty()
    }
}

pub struct ReconciliationMonitor {
    store: Store,
    alerter: Arc<dyn Alerter>,
    interval: Duration,
}

impl ReconciliationMonitor {
    pub fn new(store: Store, alerter: Arc<dyn Alerter>, interval: Duration) -> Self {
        Self {
            store,
            alerter,
            interval,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.reconcile().await {
                Ok(report) if report.is_clean() => {
                    info!(
                        balances = report.balances_checked,
                        total_available = %report.total_available,
                        total_locked = %report.total_locked,
                        house_fees = %report.house_fees,
                        "Reconciliation clean"
                    );
                }
                Ok(report) => {
                    warn!(
                        drifts = report.drifts.len(),
                        negatives = report.negatives.len(),
                        "Reconciliation found discrepancies"
                    );
                    self.alerter
                        .alert(&format!(
                            "Reconciliation discrepancies: {} drifted balance(s), {} negative bucket(s)",
                            report.drifts.len(),
                            report.negatives.len()
                        ))
                        .await;
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                    self.alerter.alert(&format!("Reconciliation failed: {e}")).await;
                }
            }
        }
    }

    /// Check every balance against its ledger history.
    pub async fn reconcile(&self) -> CoreResult<ReconReport> {
        let mut conn = self.store.pool().acquire().await?;
        let balances = ledger::all_balances(&mut conn).await?;

        // Net movement per (user, asset, network) from the snapshots.
        let mut expected: HashMap<(Uuid, String, String), (Decimal, Decimal)> = HashMap::new();
        for event in [
            LedgerEventType::BetLock,
            LedgerEventType::SettleWin,
            LedgerEventType::SettleLoss,
            LedgerEventType::Refund,
            LedgerEventType::Deposit,
            LedgerEventType::Withdrawal,
        ] {
            for entry in ledger::entries_of_type(&mut conn, event).await? {
                let Some(user_id) = entry.user_id else { continue };
                let (Some(ab), Some(aa), Some(lb), Some(la)) = (
                    entry.available_before,
                    entry.available_after,
                    entry.locked_before,
                    entry.locked_after,
                ) else {
                    continue;
                };
                let slot = expected
                    .entry((user_id, entry.asset.clone(), entry.network.clone()))
                    .or_insert((Decimal::ZERO, Decimal::ZERO));
                slot.0 += aa - ab;
                slot.1 += la - lb;
            }
        }

        let mut report = ReconReport {
            balances_checked: balances.len(),
            ..ReconReport::default()
        };
        for balance in &balances {
            report.total_available += balance.available;
            report.total_locked += balance.locked;
            if balance.available < Decimal::ZERO || balance.locked < Decimal::ZERO {
                report.negatives.push((
                    balance.user_id,
                    balance.asset.clone(),
                    balance.network.clone(),
                ));
            }
            let key = (
                balance.user_id,
                balance.asset.clone(),
                balance.network.clone(),
            );
            let (expected_available, expected_locked) =
                expected.get(&key).copied().unwrap_or((Decimal::ZERO, Decimal::ZERO));
            if balance.available != expected_available || balance.locked != expected_locked {
                report.drifts.push(BalanceDrift {
                    user_id: balance.user_id,
                    asset: balance.asset.clone(),
                    network: balance.network.clone(),
                    available: balance.available,
                    expected_available,
                    locked: balance.locked,
                    expected_locked,
                });
            }
        }

        for entry in ledger::entries_of_type(&mut conn, LedgerEventType::HouseFee).await? {
            report.house_fees += entry.amount;
        }
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
