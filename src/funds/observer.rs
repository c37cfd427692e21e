//! Deposit observer.
//!
//! Polls the transfer scanner and feeds every observation through the
//! crediting pipeline. Ignored transfers are normal background noise;
//! scanner failures are logged and alerted but never stop the loop.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::external::{Alerter, TransferScanner};
use crate::types::{CoreResult, CreditOutcome};

use super::deposits::DepositManager;

pub struct DepositObserver {
    scanner: Arc<dyn TransferScanner>,
    deposits: DepositManager,
    alerter: Arc<dyn Alerter>,
    scan_interval: Duration,
}

impl DepositObserver {
    pub fn new(
        scanner: Arc<dyn TransferScanner>,
        deposits: DepositManager,
        alerter: Arc<dyn Alerter>,
        scan_interval: Duration,
    ) -> Self {
        Self {
            scanner,
            deposits,
            alerter,
            scan_interval,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.scan_interval);
        loop {
            ticker.tick().await;
            match self.scan_once().await {
                Ok((credited, ignored)) => {
                    if credited > 0 {
                        info!(credited, ignored, "Deposit scan complete");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Deposit scan failed");
                    self.alerter
                        .alert(&format!("Deposit scan failed: {e}"))
                        .await;
                }
            }
        }
    }

    /// One scan pass. Returns (credited, ignored) counts.
    pub async fn scan_once(&self) -> CoreResult<(usize, usize)> {
        let transfers = self.scanner.recent_transfers().await?;
        let mut credited = 0usize;
        let mut ignored = 0usize;
        for transfer in &transfers {
            match self.deposits.process_transfer(transfer).await? {
                CreditOutcome::Credited { amount, .. } => {
                    debug!(%amount, to = %transfer.to_address, "Credited");
                    credited += 1;
                }
                CreditOutcome::Ignored { .. } => ignored += 1,
            }
        }
        Ok((credited, ignored))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
