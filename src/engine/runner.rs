//! Round driver.
//!
//! A poll loop that walks each configured symbol through the round
//! lifecycle: create a round when none is live, lock it when the betting
//! window closes, and settle it once the settle delay has passed. Before
//! settling, the driver claims the round so that two driver instances
//! sharing the database never both pay out.
//!
//! A missing price never wedges a round: the lock or settlement is
//! simply retried on the next poll.

use chrono::{Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, error};

use crate::config::GameConfig;
use crate::external::{Alerter, PriceSource};
use crate::types::{CoreResult, RoundStatus};

use super::betting::BettingEngine;
use super::rounds::RoundManager;

pub struct RoundDriver {
    rounds: RoundManager,
    engine: BettingEngine,
    prices: Arc<dyn PriceSource>,
    alerter: Arc<dyn Alerter>,
    game: GameConfig,
}

impl RoundDriver {
    pub fn new(
        rounds: RoundManager,
        engine: BettingEngine,
        prices: Arc<dyn PriceSource>,
        alerter: Arc<dyn Alerter>,
        game: GameConfig,
    ) -> Self {
        Self {
            rounds,
            engine,
            prices,
            alerter,
            game,
        }
    }

    /// Drive rounds forever. One failed cycle is logged and alerted,
    /// then the loop keeps going.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(StdDuration::from_secs(
            self.game.poll_interval_secs.max(1),
        ));
        loop {
            ticker.tick().await;
            for symbol in self.game.asset_symbols.clone() {
                if let Err(e) = self.tick_symbol(&symbol).await {
                    error!(symbol, error = %e, "Round cycle failed");
                    self.alerter
                        .alert(&format!("Round cycle failed for {symbol}: {e}"))
                        .await;
                }
            }
        }
    }

    /// One lifecycle step for one symbol.
    async fn tick_symbol(&self, symbol: &str) -> CoreResult<()> {
        let now = Utc::now();
        let Some(round) = self.rounds.current_round(symbol).await? else {
            let round = self
                .rounds
                .create_round(symbol, Duration::seconds(self.game.round_duration_secs as i64))
                .await?;
            debug!(symbol, round_number = round.round_number, "New round opened");
            return Ok(());
        };

        match round.status {
            RoundStatus::BettingOpen if now >= round.betting_end_at => {
                match self.prices.current_price(symbol).await? {
                    Some(price) => {
                        self.rounds.lock_round(round.id, price).await?;
                    }
                    None => debug!(symbol, "No price for lock, retrying next poll"),
                }
            }
            RoundStatus::Locked => {
                let locked_at = round.locked_at.unwrap_or(round.betting_end_at);
                let due = locked_at + Duration::seconds(self.game.settle_delay_secs as i64);
                if now < due {
                    return Ok(());
                }
                if !self.rounds.claim_settlement(round.id).await? {
                    return Ok(());
                }
                match self.prices.current_price(symbol).await {
                    Ok(Some(price)) => {
                        if let Err(e) = self.engine.settle_round(round.id, price).await {
                            self.rounds.release_claim(round.id).await?;
                            return Err(e);
                        }
                    }
                    Ok(None) => {
                        debug!(symbol, "No price for settlement, retrying next poll");
                        self.rounds.release_claim(round.id).await?;
                    }
                    Err(e) => {
                        self.rounds.release_claim(round.id).await?;
                        return Err(e);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
