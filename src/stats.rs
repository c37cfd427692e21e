//! Leaderboard statistics.
//!
//! Stats rows are written only as a side effect of settlement, inside the
//! settlement transaction, so they can never disagree with the ledger.
//! The score formula weighs wins heavily, rewards streaks, and nudges by
//! realized profit.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::store::{dec_from_db, dec_to_db, ts_to_db, uuid_from_db};
use crate::types::{CoreResult, UserStats};

/// How a settled bet counts toward the stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetOutcome {
    Win,
    Loss,
    Tie,
}

/// score = wins * 3 + win_streak * 0.5 + net_pnl * 0.1 - losses
pub fn compute_score(stats: &UserStats) -> Decimal {
    Decimal::from(stats.wins) * dec!(3)
        + Decimal::from(stats.win_streak) * dec!(0.5)
        + stats.net_pnl * dec!(0.1)
        - Decimal::from(stats.losses)
}

fn stats_from_row(row: &SqliteRow) -> CoreResult<UserStats> {
    Ok(UserStats {
        user_id: uuid_from_db(row.get("user_id"))?,
        wins: row.get("wins"),
        losses: row.get("losses"),
        ties: row.get("ties"),
        total_bets: row.get("total_bets"),
        net_pnl: dec_from_db(row.get("net_pnl"))?,
        win_streak: row.get("win_streak"),
        best_streak: row.get("best_streak"),
        score: dec_from_db(row.get("score"))?,
    })
}

/// Fetch the stats row, creating a zeroed one lazily.
pub async fn ensure_user_stats(
    conn: &mut SqliteConnection,
    user_id: Uuid,
) -> CoreResult<UserStats> {
    if let Some(existing) = stats_of(conn, user_id).await? {
        return Ok(existing);
    }
    sqlx::query("INSERT INTO user_stats (user_id, updated_at) VALUES (?, ?)")
        .bind(user_id.to_string())
        .bind(ts_to_db(Utc::now()))
        .execute(&mut *conn)
        .await?;
    Ok(UserStats {
        user_id,
        wins: 0,
        losses: 0,
        ties: 0,
        total_bets: 0,
        net_pnl: Decimal::ZERO,
        win_streak: 0,
        best_streak: 0,
        score: Decimal::ZERO,
    })
}

/// Fold one settled bet into the user's stats. `pnl` is the realized
/// profit or loss: payout minus stake for a win, minus the stake for a
/// loss, zero for a tie or refund.
pub async fn record_result(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    outcome: BetOutcome,
    pnl: Decimal,
) -> CoreResult<UserStats> {
    let mut stats = ensure_user_stats(conn, user_id).await?;
    stats.total_bets += 1;
    stats.net_pnl += pnl;
    match outcome {
        BetOutcome::Win => {
            stats.wins += 1;
            stats.win_streak += 1;
            stats.best_streak = stats.best_streak.max(stats.win_streak);
        }
        BetOutcome::Loss => {
            stats.losses += 1;
            stats.win_streak = 0;
        }
        BetOutcome::Tie => {
            stats.ties += 1;
        }
    }
    stats.score = compute_score(&stats);

    sqlx::query(
        "UPDATE user_stats
         SET wins = ?, losses = ?, ties = ?, total_bets = ?, net_pnl = ?,
             win_streak = ?, best_streak = ?, score = ?, updated_at = ?
         WHERE user_id = ?",
    )
    .bind(stats.wins)
    .bind(stats.losses)
    .bind(stats.ties)
    .bind(stats.total_bets)
    .bind(dec_to_db(stats.net_pnl))
    .bind(stats.win_streak)
    .bind(stats.best_streak)
    .bind(dec_to_db(stats.score))
    .bind(ts_to_db(Utc::now()))
    .bind(user_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(stats)
}

pub async fn stats_of(
    conn: &mut SqliteConnection,
    user_id: Uuid,
) -> CoreResult<Option<UserStats>> {
    let row = sqlx::query("SELECT * FROM user_stats WHERE user_id = ?")
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(stats_from_row).transpose()
}

/// Top users by score.
pub async fn leaderboard(conn: &mut SqliteConnection, limit: i64) -> CoreResult<Vec<UserStats>> {
    let rows = sqlx::query(
        "SELECT * FROM user_stats ORDER BY CAST(score AS REAL) DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(stats_from_row).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
