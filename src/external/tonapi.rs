//! TON house-wallet transfer scanner (tonapi.io).
//!
//! Reads recent inbound transactions of the house wallet and surfaces
//! them as [`IncomingTransfer`]s with their text comment as the memo.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::types::{CoreError, CoreResult};

use super::{IncomingTransfer, TransferScanner};

const DEFAULT_BASE_URL: &str = "https://tonapi.io";
const SCAN_LIMIT: u32 = 50;
const NANOTON: Decimal = dec!(1_000_000_000);

pub struct TonApiScanner {
    client: reqwest::Client,
    base_url: String,
    wallet_address: String,
    api_key: Option<String>,
    asset: String,
    network: String,
}

#[derive(Deserialize)]
struct TransactionsPage {
    transactions: Vec<Transaction>,
}

#[derive(Deserialize)]
struct Transaction {
    hash: String,
    #[serde(default)]
    in_msg: Option<Message>,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    value: i64,
    #[serde(default)]
    source: Option<AccountRef>,
    #[serde(default)]
    decoded_body: Option<DecodedBody>,
}

#[derive(Deserialize)]
struct AccountRef {
    address: String,
}

#[derive(Deserialize)]
struct DecodedBody {
    #[serde(default)]
    text: Option<String>,
}

impl TonApiScanner {
    pub fn new(
        wallet_address: &str,
        api_key: Option<String>,
        asset: &str,
        network: &str,
    ) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::External(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            wallet_address: wallet_address.to_string(),
            api_key,
            asset: asset.to_string(),
            network: network.to_string(),
        })
    }
}

#[async_trait]
impl TransferScanner for TonApiScanner {
    async fn recent_transfers(&self) -> CoreResult<Vec<IncomingTransfer>> {
        let url = format!(
            "{}/v2/blockchain/accounts/{}/transactions",
            self.base_url, self.wallet_address
        );
        let mut req = self
            .client
            .get(&url)
            .query(&[("limit", SCAN_LIMIT.to_string())]);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| CoreError::External(format!("tonapi request: {e}")))?;
        if !resp.status().is_success() {
            return Err(CoreError::External(format!(
                "tonapi returned {}",
                resp.status()
            )));
        }
        let page: TransactionsPage = resp
            .json()
            .await
            .map_err(|e| CoreError::External(format!("tonapi decode: {e}")))?;

        let mut transfers = Vec::new();
        for tx in page.transactions {
            let Some(msg) = tx.in_msg else { continue };
            if msg.value <= 0 {
                continue;
            }
            let amount = match Decimal::from(msg.value).checked_div(NANOTON) {
                Some(a) => a,
                None => {
                    warn!(hash = %tx.hash, "Skipping transaction with bad value");
                    continue;
                }
            };
            transfers.push(IncomingTransfer {
                tx_hash: Some(tx.hash),
                from_address: msg.source.map(|s| s.address),
                to_address: self.wallet_address.clone(),
                amount,
                memo: msg.decoded_body.and_then(|b| b.text),
                asset: self.asset.clone(),
                network: self.network.clone(),
            });
        }
        Ok(transfers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transactions_page_decodes() {
        let body = r#"{
            "transactions": [
                {
                    "hash": "abc123",
                    "in_msg": {
                        "value": 2500000000,
                        "source": {"address": "0:sender"},
                        "decoded_body": {"text": "DP-ABCD2345"}
                    }
                },
                {"hash": "outbound-only"}
            ]
        }"#;
        let page: TransactionsPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.transactions.len(), 2);
        let msg = page.transactions[0].in_msg.as_ref().unwrap();
        assert_eq!(msg.value, 2_500_000_000);
        assert_eq!(
            msg.decoded_body.as_ref().unwrap().text.as_deref(),
            Some("DP-ABCD2345")
        );
        assert!(page.transactions[1].in_msg.is_none());
    }

    #[test]
    fn test_nanoton_conversion() {
        let amount = Decimal::from(2_500_000_000i64) / NANOTON;
        assert_eq!(amount, dec!(2.5));
    }
}
