//! Deterministic test doubles for the external boundaries.
//!
//! All state is in-memory and fully controllable from test code.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use rust_decimal_macros::dec;
use updown::config::{DepositsConfig, GameConfig, WithdrawalsConfig};
use updown::external::{Alerter, IncomingTransfer, TransferScanner};
use updown::types::CoreResult;

pub const HOUSE_WALLET: &str = "UQHouseWalletIntegration000000000000000000000000";

pub fn game_config() -> GameConfig {
    GameConfig {
        asset_symbols: vec!["BTCUSDT".into()],
        settlement_asset: "TON".into(),
        settlement_network: "TON".into(),
        round_duration_secs: 300,
        settle_delay_secs: 300,
        poll_interval_secs: 5,
        rake_percentage: dec!(4),
        min_bet: dec!(1),
        max_bet: dec!(1000),
    }
}

pub fn deposits_config() -> DepositsConfig {
    DepositsConfig {
        house_wallet_address: HOUSE_WALLET.into(),
        memo_expiry_minutes: 30,
        amount_tolerance: dec!(0.01),
        scan_interval_secs: 15,
        networks: vec![],
    }
}

pub fn withdrawals_config() -> WithdrawalsConfig {
    WithdrawalsConfig {
        min_amount: dec!(1),
        auto_limit: dec!(50),
    }
}

/// Scanner that returns a settable batch of transfers on every scan.
#[derive(Clone, Default)]
pub struct StaticScanner {
    transfers: Arc<Mutex<Vec<IncomingTransfer>>>,
}

impl StaticScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_transfers(&self, transfers: Vec<IncomingTransfer>) {
        *self.transfers.lock().unwrap() = transfers;
    }
}

#[async_trait]
impl TransferScanner for StaticScanner {
    async fn recent_transfers(&self) -> CoreResult<Vec<IncomingTransfer>> {
        Ok(self.transfers.lock().unwrap().clone())
    }
}

/// Alerter that records every message it is given.
#[derive(Clone, Default)]
pub struct RecordingAlerter {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn alert(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
