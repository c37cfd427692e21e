//! Binance spot ticker price source.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::types::{CoreError, CoreResult};

use super::PriceSource;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";

pub struct BinancePriceSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct TickerPrice {
    price: String,
}

impl BinancePriceSource {
    pub fn new() -> CoreResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::External(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for BinancePriceSource {
    async fn current_price(&self, symbol: &str) -> CoreResult<Option<Decimal>> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await;
        // Feed hiccups are routine; the caller retries next poll.
        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                warn!(symbol, error = %e, "Price request failed");
                return Ok(None);
            }
        };
        if !resp.status().is_success() {
            warn!(symbol, status = %resp.status(), "Price request rejected");
            return Ok(None);
        }
        let ticker: TickerPrice = resp
            .json()
            .await
            .map_err(|e| CoreError::External(format!("ticker decode: {e}")))?;
        let price = Decimal::from_str(&ticker.price)
            .map_err(|e| CoreError::External(format!("bad ticker price {:?}: {e}", ticker.price)))?;
        Ok(Some(price))
    }
}
