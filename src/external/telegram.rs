//! Telegram operator alerts.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info};

use crate::config::{AlertsConfig, AppConfig};

use super::Alerter;

pub struct TelegramAlerter {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramAlerter {
    /// Build the alerter if both env-referenced secrets are configured
    /// and present. Returns `None` (alerts disabled) otherwise.
    pub fn from_config(cfg: &AlertsConfig) -> Option<Self> {
        let token_env = cfg.telegram_bot_token_env.as_deref()?;
        let chat_env = cfg.telegram_chat_id_env.as_deref()?;
        let bot_token = AppConfig::resolve_env(token_env).ok()?;
        let chat_id = AppConfig::resolve_env(chat_env).ok()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        info!("Telegram alerts enabled");
        Some(Self {
            client,
            bot_token,
            chat_id,
        })
    }
}

#[async_trait]
impl Alerter for TelegramAlerter {
    async fn alert(&self, message: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let res = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": message,
            }))
            .send()
            .await;
        match res {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => error!(status = %resp.status(), "Alert rejected by Telegram"),
            Err(e) => error!(error = %e, "Alert delivery failed"),
        }
    }
}
