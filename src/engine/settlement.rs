//! Pari-mutuel settlement.
//!
//! The losing pool pays the winning pool. The house takes its rake off
//! the combined pool first; the remainder is distributed to winners pro
//! rata to their stakes. Tie outcomes and one-sided pools refund every
//! stake and void the round.
//!
//! Settlement is idempotent at two levels: the round's terminal status
//! short-circuits whole replays, and per-bet ledger keys let a crashed
//! attempt resume without paying anyone twice.

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::{self, NewEntry};
use crate::stats::{self, BetOutcome};
use crate::store::{dec_to_db, ts_to_db};
use crate::types::{
    Bet, BetStatus, CoreError, CoreResult, Direction, LedgerEventType, Rejection, Round,
    RoundStatus, SettlementOutcome,
};

use super::betting::{bets_for_round, BettingEngine};
use super::rounds::get_round;

impl BettingEngine {
    /// Settle a locked round against its settle price. Safe to call
    /// again after a crash or from a racing worker.
    pub async fn settle_round(
        &self,
        round_id: Uuid,
        settle_price: Decimal,
    ) -> CoreResult<SettlementOutcome> {
        let mut wtx = self.store.begin_write().await?;

        let round = get_round(&mut wtx.tx, round_id)
            .await?
            .ok_or(Rejection::RoundNotFound)?;
        if round.status.is_terminal() {
            wtx.rollback().await?;
            return Ok(SettlementOutcome::AlreadySettled {
                round_status: round.status,
            });
        }
        if round.status != RoundStatus::Locked {
            return Err(Rejection::RoundNotLocked.into());
        }
        let lock_price = round
            .lock_price
            .ok_or_else(|| CoreError::Data("locked round missing lock price".into()))?;

        let bets = bets_for_round(&mut wtx.tx, round_id).await?;

        // Tie or one-sided pool: nobody can be paid from the other side.
        let tie = settle_price == lock_price;
        let one_sided =
            round.total_up_amount == Decimal::ZERO || round.total_down_amount == Decimal::ZERO;
        if tie || one_sided {
            let refunded =
                refund_pending_bets(&mut wtx.tx, &round, &bets, &self.game, true).await?;
            let finalized = finalize_round(
                &mut wtx.tx,
                round_id,
                RoundStatus::Void,
                settle_price,
                Decimal::ZERO,
            )
            .await?;
            if !finalized {
                wtx.rollback().await?;
                return self.already_settled(round_id).await;
            }
            wtx.commit().await?;
            info!(%round_id, round_number = round.round_number, refunded, tie, "Round voided");
            return Ok(SettlementOutcome::Refunded {
                round_status: RoundStatus::Void,
                refunded,
            });
        }

        let winning = if settle_price > lock_price {
            Direction::Up
        } else {
            Direction::Down
        };
        let (winner_pool, final_status) = match winning {
            Direction::Up => (round.total_up_amount, RoundStatus::ResolvedUp),
            Direction::Down => (round.total_down_amount, RoundStatus::ResolvedDown),
        };
        let total_pool = round.total_pool();
        let house_fee = (total_pool * self.game.rake_fraction()).round_dp(8);
        let net_pool = total_pool - house_fee;
        let payout_ratio = (net_pool / winner_pool).round_dp(8);

        let asset = &self.game.settlement_asset;
        let network = &self.game.settlement_network;
        let mut winners = 0usize;
        let mut losers = 0usize;

        for bet in &bets {
            if bet.status != BetStatus::Pending {
                continue;
            }
            if bet.direction == winning {
                let key = format!("SETTLE_WIN:{round_id}:{}", bet.id);
                if ledger::key_exists(&mut wtx.tx, &key).await? {
                    winners += 1;
                    continue;
                }
                let payout = (bet.amount * payout_ratio).round_dp(8);
                apply_bet_settlement(
                    &mut wtx.tx,
                    &round,
                    bet,
                    BetStatus::Won,
                    payout,
                    LedgerEventType::SettleWin,
                    &key,
                    asset,
                    network,
                )
                .await?;
                stats::record_result(&mut wtx.tx, bet.user_id, BetOutcome::Win, payout - bet.amount)
                    .await?;
                winners += 1;
            } else {
                let key = format!("SETTLE_LOSS:{round_id}:{}", bet.id);
                if ledger::key_exists(&mut wtx.tx, &key).await? {
                    losers += 1;
                    continue;
                }
                apply_bet_settlement(
                    &mut wtx.tx,
                    &round,
                    bet,
                    BetStatus::Lost,
                    Decimal::ZERO,
                    LedgerEventType::SettleLoss,
                    &key,
                    asset,
                    network,
                )
                .await?;
                stats::record_result(&mut wtx.tx, bet.user_id, BetOutcome::Loss, -bet.amount)
                    .await?;
                losers += 1;
            }
        }

        if house_fee > Decimal::ZERO {
            let key = format!("HOUSE_FEE:{round_id}");
            if !ledger::key_exists(&mut wtx.tx, &key).await? {
                let mut entry =
                    NewEntry::new(LedgerEventType::HouseFee, house_fee, asset, network);
                entry.round_id = Some(round_id);
                entry.description = Some(format!(
                    "House fee for {} round #{}",
                    round.asset_symbol, round.round_number
                ));
                entry.idempotency_key = Some(key);
                ledger::post(&mut wtx.tx, &entry).await?;
            }
        }

        let finalized =
            finalize_round(&mut wtx.tx, round_id, final_status, settle_price, house_fee).await?;
        if !finalized {
            wtx.rollback().await?;
            return self.already_settled(round_id).await;
        }
        wtx.commit().await?;

        info!(
            %round_id,
            round_number = round.round_number,
            outcome = %final_status,
            winners,
            losers,
            %house_fee,
            %payout_ratio,
            "Round settled"
        );
        Ok(SettlementOutcome::Settled {
            round_status: final_status,
            winners,
            losers,
            house_fee,
            payout_ratio,
        })
    }

    /// Administrative cancel: refund every pending stake and close the
    /// round as CANCELLED. Allowed while the round is open or locked.
    pub async fn cancel_round(&self, round_id: Uuid) -> CoreResult<SettlementOutcome> {
        let mut wtx = self.store.begin_write().await?;
        let round = get_round(&mut wtx.tx, round_id)
            .await?
            .ok_or(Rejection::RoundNotFound)?;
        if round.status.is_terminal() {
            wtx.rollback().await?;
            return Ok(SettlementOutcome::AlreadySettled {
                round_status: round.status,
            });
        }

        let bets = bets_for_round(&mut wtx.tx, round_id).await?;
        // A cancelled round never happened for the leaderboard.
        let refunded = refund_pending_bets(&mut wtx.tx, &round, &bets, &self.game, false).await?;

        let res = sqlx::query(
            "UPDATE rounds SET status = 'CANCELLED', settled_at = ?
             WHERE id = ? AND status IN ('BETTING_OPEN', 'LOCKED')",
        )
        .bind(ts_to_db(chrono::Utc::now()))
        .bind(round_id.to_string())
        .execute(&mut *wtx.tx)
        .await?;
        if res.rows_affected() == 0 {
            wtx.rollback().await?;
            return self.already_settled(round_id).await;
        }
        wtx.commit().await?;
        warn!(%round_id, round_number = round.round_number, refunded, "Round cancelled");
        Ok(SettlementOutcome::Refunded {
            round_status: RoundStatus::Cancelled,
            refunded,
        })
    }

    async fn already_settled(&self, round_id: Uuid) -> CoreResult<SettlementOutcome> {
        let mut conn = self.store.pool().acquire().await?;
        let round = get_round(&mut conn, round_id)
            .await?
            .ok_or(Rejection::RoundNotFound)?;
        Ok(SettlementOutcome::AlreadySettled {
            round_status: round.status,
        })
    }
}

/// Move one bet's stake out of the locked bucket and record the result.
#[allow(clippy::too_many_arguments)]
async fn apply_bet_settlement(
    conn: &mut sqlx::SqliteConnection,
    round: &Round,
    bet: &Bet,
    new_status: BetStatus,
    payout: Decimal,
    event: LedgerEventType,
    key: &str,
    asset: &str,
    network: &str,
) -> CoreResult<()> {
    let mut balance = ledger::ensure_balance(conn, bet.user_id, asset, network).await?;
    let before = balance.clone();
    balance.locked -= bet.amount;
    balance.available += payout;
    ledger::write_balance(conn, &balance).await?;

    sqlx::query("UPDATE bets SET status = ?, payout = ? WHERE id = ?")
        .bind(new_status.to_string())
        .bind(dec_to_db(payout))
        .bind(bet.id.to_string())
        .execute(&mut *conn)
        .await?;

    let amount = if payout > Decimal::ZERO { payout } else { bet.amount };
    let mut entry = NewEntry::new(event, amount, asset, network).snapshots(
        before.available,
        balance.available,
        before.locked,
        balance.locked,
    );
    entry.user_id = Some(bet.user_id);
    entry.round_id = Some(round.id);
    entry.bet_id = Some(bet.id);
    entry.description = Some(format!(
        "{} on {} round #{}",
        new_status, round.asset_symbol, round.round_number
    ));
    entry.idempotency_key = Some(key.to_string());
    ledger::post(conn, &entry).await?;
    Ok(())
}

/// Refund every still-pending bet of a round. Each refund is guarded by
/// its REFUND ledger key, so a resumed attempt skips bets already paid
/// back. Returns how many bets were refunded (including skips).
async fn refund_pending_bets(
    conn: &mut sqlx::SqliteConnection,
    round: &Round,
    bets: &[Bet],
    game: &crate::config::GameConfig,
    record_ties: bool,
) -> CoreResult<usize> {
    let asset = &game.settlement_asset;
    let network = &game.settlement_network;
    let mut refunded = 0usize;
    for bet in bets {
        if bet.status != BetStatus::Pending {
            continue;
        }
        let key = format!("REFUND:{}:{}", round.id, bet.id);
        if ledger::key_exists(&mut *conn, &key).await? {
            refunded += 1;
            continue;
        }
        apply_bet_settlement(
            &mut *conn,
            round,
            bet,
            BetStatus::Refunded,
            bet.amount,
            LedgerEventType::Refund,
            &key,
            asset,
            network,
        )
        .await?;
        if record_ties {
            stats::record_result(&mut *conn, bet.user_id, BetOutcome::Tie, Decimal::ZERO).await?;
        }
        refunded += 1;
    }
    Ok(refunded)
}

/// CAS the round into its terminal status. Rowcount zero means another
/// worker already finalized it.
async fn finalize_round(
    conn: &mut sqlx::SqliteConnection,
    round_id: Uuid,
    status: RoundStatus,
    settle_price: Decimal,
    house_fee: Decimal,
) -> CoreResult<bool> {
    let res = sqlx::query(
        "UPDATE rounds SET status = ?, settle_price = ?, house_fee = ?, settled_at = ?
         WHERE id = ? AND status IN ('BETTING_OPEN', 'LOCKED')",
    )
    .bind(status.to_string())
    .bind(dec_to_db(settle_price))
    .bind(dec_to_db(house_fee))
    .bind(ts_to_db(chrono::Utc::now()))
    .bind(round_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
