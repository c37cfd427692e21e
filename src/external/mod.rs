//! Boundaries to the outside world.
//!
//! Everything the core cannot decide on its own — market prices, chain
//! transfers, operator alerts — sits behind a trait here, so the engine
//! and the funds pipeline can be driven by mocks in tests and by the
//! real clients in `main`.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::CoreResult;

pub mod binance;
pub mod telegram;
pub mod tonapi;

pub use binance::BinancePriceSource;
pub use telegram::TelegramAlerter;
pub use tonapi::TonApiScanner;

/// Spot price feed for the symbols rounds run on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Current price of a symbol, or `None` when the feed is briefly
    /// unavailable. Callers treat `None` as "try again next poll".
    async fn current_price(&self, symbol: &str) -> CoreResult<Option<Decimal>>;
}

/// One transfer observed on chain, as raw as the scanner saw it. The
/// deposit pipeline decides whether it is ours.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingTransfer {
    pub tx_hash: Option<String>,
    pub from_address: Option<String>,
    pub to_address: String,
    pub amount: Decimal,
    pub memo: Option<String>,
    pub asset: String,
    pub network: String,
}

/// Source of recent inbound transfers (house wallet and managed
/// per-user addresses alike).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferScanner: Send + Sync {
    async fn recent_transfers(&self) -> CoreResult<Vec<IncomingTransfer>>;
}

/// Operator notification channel. Delivery is best-effort: an alert
/// that cannot be sent is logged and dropped, never bubbled up.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(&self, message: &str);
}

/// Alerter used when no channel is configured.
pub struct NoopAlerter;

#[async_trait]
impl Alerter for NoopAlerter {
    async fn alert(&self, _message: &str) {}
}
