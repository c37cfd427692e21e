//! Shared domain types.
//!
//! The data model used across all modules: status enums (with their
//! allowed-transition tables), the persisted row types, operation
//! outcomes, and the error taxonomy. Statuses are stored as their
//! UPPERCASE string form — renaming a variant is a schema change.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Round lifecycle. No round ever re-enters BETTING_OPEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundStatus {
    BettingOpen,
    Locked,
    ResolvedUp,
    ResolvedDown,
    Void,
    Cancelled,
}

impl RoundStatus {
    /// Terminal statuses: settlement and cancellation never leave them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RoundStatus::ResolvedUp
                | RoundStatus::ResolvedDown
                | RoundStatus::Void
                | RoundStatus::Cancelled
        )
    }

    /// The allowed-transition table. Anything not listed is rejected.
    pub fn can_transition_to(&self, next: RoundStatus) -> bool {
        use RoundStatus::*;
        matches!(
            (self, next),
            (BettingOpen, Locked)
                | (Locked, ResolvedUp)
                | (Locked, ResolvedDown)
                | (Locked, Void)
                | (BettingOpen, Cancelled)
                | (Locked, Cancelled)
        )
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoundStatus::BettingOpen => "BETTING_OPEN",
            RoundStatus::Locked => "LOCKED",
            RoundStatus::ResolvedUp => "RESOLVED_UP",
            RoundStatus::ResolvedDown => "RESOLVED_DOWN",
            RoundStatus::Void => "VOID",
            RoundStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RoundStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BETTING_OPEN" => Ok(RoundStatus::BettingOpen),
            "LOCKED" => Ok(RoundStatus::Locked),
            "RESOLVED_UP" => Ok(RoundStatus::ResolvedUp),
            "RESOLVED_DOWN" => Ok(RoundStatus::ResolvedDown),
            "VOID" => Ok(RoundStatus::Void),
            "CANCELLED" => Ok(RoundStatus::Cancelled),
            other => Err(CoreError::Data(format!("unknown round status: {other}"))),
        }
    }
}

/// Bet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

impl FromStr for Direction {
    type Err = CoreError;

    /// Accepts "up"/"UP"/"down"/"DOWN" — the bot layer passes raw text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UP" => Ok(Direction::Up),
            "DOWN" => Ok(Direction::Down),
            _ => Err(CoreError::Rejected(Rejection::InvalidDirection)),
        }
    }
}

/// Bet lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Refunded,
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BetStatus::Pending => "PENDING",
            BetStatus::Won => "WON",
            BetStatus::Lost => "LOST",
            BetStatus::Refunded => "REFUNDED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for BetStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BetStatus::Pending),
            "WON" => Ok(BetStatus::Won),
            "LOST" => Ok(BetStatus::Lost),
            "REFUNDED" => Ok(BetStatus::Refunded),
            other => Err(CoreError::Data(format!("unknown bet status: {other}"))),
        }
    }
}

/// Deposit request / chain transaction confirmation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationStatus::Pending => write!(f, "PENDING"),
            ConfirmationStatus::Confirmed => write!(f, "CONFIRMED"),
        }
    }
}

impl FromStr for ConfirmationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ConfirmationStatus::Pending),
            "CONFIRMED" => Ok(ConfirmationStatus::Confirmed),
            other => Err(CoreError::Data(format!(
                "unknown confirmation status: {other}"
            ))),
        }
    }
}

/// Withdrawal lifecycle. SENT, CONFIRMED and CANCELLED are terminal;
/// chain dispatch (PENDING/APPROVED → SENT → CONFIRMED) happens outside
/// the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    Pending,
    NeedsReview,
    Approved,
    Sent,
    Confirmed,
    Cancelled,
}

impl WithdrawalStatus {
    /// A withdrawal can be cancelled while the funds are still ours.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Pending
                | WithdrawalStatus::NeedsReview
                | WithdrawalStatus::Approved
        )
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::NeedsReview => "NEEDS_REVIEW",
            WithdrawalStatus::Approved => "APPROVED",
            WithdrawalStatus::Sent => "SENT",
            WithdrawalStatus::Confirmed => "CONFIRMED",
            WithdrawalStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WithdrawalStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(WithdrawalStatus::Pending),
            "NEEDS_REVIEW" => Ok(WithdrawalStatus::NeedsReview),
            "APPROVED" => Ok(WithdrawalStatus::Approved),
            "SENT" => Ok(WithdrawalStatus::Sent),
            "CONFIRMED" => Ok(WithdrawalStatus::Confirmed),
            "CANCELLED" => Ok(WithdrawalStatus::Cancelled),
            other => Err(CoreError::Data(format!(
                "unknown withdrawal status: {other}"
            ))),
        }
    }
}

/// Every internal money movement recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEventType {
    BetLock,
    SettleWin,
    SettleLoss,
    Refund,
    HouseFee,
    Deposit,
    Withdrawal,
}

impl fmt::Display for LedgerEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LedgerEventType::BetLock => "BET_LOCK",
            LedgerEventType::SettleWin => "SETTLE_WIN",
            LedgerEventType::SettleLoss => "SETTLE_LOSS",
            LedgerEventType::Refund => "REFUND",
            LedgerEventType::HouseFee => "HOUSE_FEE",
            LedgerEventType::Deposit => "DEPOSIT",
            LedgerEventType::Withdrawal => "WITHDRAWAL",
        };
        write!(f, "{s}")
    }
}

impl FromStr for LedgerEventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BET_LOCK" => Ok(LedgerEventType::BetLock),
            "SETTLE_WIN" => Ok(LedgerEventType::SettleWin),
            "SETTLE_LOSS" => Ok(LedgerEventType::SettleLoss),
            "REFUND" => Ok(LedgerEventType::Refund),
            "HOUSE_FEE" => Ok(LedgerEventType::HouseFee),
            "DEPOSIT" => Ok(LedgerEventType::Deposit),
            "WITHDRAWAL" => Ok(LedgerEventType::Withdrawal),
            other => Err(CoreError::Data(format!("unknown ledger event: {other}"))),
        }
    }
}

/// Chain transaction kind (on-chain observations only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainTxKind {
    Deposit,
    Withdrawal,
}

impl fmt::Display for ChainTxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainTxKind::Deposit => write!(f, "DEPOSIT"),
            ChainTxKind::Withdrawal => write!(f, "WITHDRAWAL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted rows
// ---------------------------------------------------------------------------

/// Per-user, per-(asset, network) fund buckets. A materialized cache of
/// ledger effects — the ledger is the audit source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub asset: String,
    pub network: String,
    pub available: Decimal,
    pub locked: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Total funds held for this user on this (asset, network).
    pub fn total(&self) -> Decimal {
        self.available + self.locked
    }
}

/// Append-only ledger row. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub round_id: Option<Uuid>,
    pub bet_id: Option<Uuid>,
    pub event_type: LedgerEventType,
    pub amount: Decimal,
    pub asset: String,
    pub network: String,
    pub available_before: Option<Decimal>,
    pub available_after: Option<Decimal>,
    pub locked_before: Option<Decimal>,
    pub locked_after: Option<Decimal>,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One market round on one asset symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: Uuid,
    pub round_number: i64,
    pub asset_symbol: String,
    pub status: RoundStatus,
    pub lock_price: Option<Decimal>,
    pub settle_price: Option<Decimal>,
    pub total_up_amount: Decimal,
    pub total_down_amount: Decimal,
    pub house_fee: Decimal,
    pub betting_start_at: DateTime<Utc>,
    pub betting_end_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Round {
    pub fn total_pool(&self) -> Decimal {
        self.total_up_amount + self.total_down_amount
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] round #{} {} (up: {} | down: {})",
            self.asset_symbol,
            self.round_number,
            self.status,
            self.total_up_amount,
            self.total_down_amount,
        )
    }
}

/// Exactly one bet per (user, round).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub round_id: Uuid,
    pub direction: Direction,
    pub amount: Decimal,
    pub payout: Option<Decimal>,
    pub status: BetStatus,
    pub created_at: DateTime<Utc>,
}

/// Memo-flow deposit intent created for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub memo: String,
    pub expected_amount: Option<Decimal>,
    pub status: ConfirmationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Exchange-style per-user deposit address for an (asset, network).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositAddress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub asset: String,
    pub network: String,
    pub address: String,
    pub derivation_index: i64,
    pub created_at: DateTime<Utc>,
}

/// Outbound payment request. The core reserves the funds and arbitrates
/// auto vs. manual release; broadcast is a collaborator's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub asset: String,
    pub network: String,
    pub to_address: String,
    pub status: WithdrawalStatus,
    pub tx_hash: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Per-user leaderboard stats, updated only as a settlement side effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: Uuid,
    pub wins: i64,
    pub losses: i64,
    pub ties: i64,
    pub total_bets: i64,
    pub net_pnl: Decimal,
    pub win_streak: i64,
    pub best_streak: i64,
    pub score: Decimal,
}

// ---------------------------------------------------------------------------
// Operation outcomes
// ---------------------------------------------------------------------------

/// Result of `settle_round`. Replays report `AlreadySettled` instead of
/// erroring or re-moving money.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettlementOutcome {
    AlreadySettled {
        round_status: RoundStatus,
    },
    Settled {
        round_status: RoundStatus,
        winners: usize,
        losers: usize,
        house_fee: Decimal,
        payout_ratio: Decimal,
    },
    Refunded {
        round_status: RoundStatus,
        refunded: usize,
    },
}

/// Result of the deposit crediting flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CreditOutcome {
    Credited { amount: Decimal, new_balance: Decimal },
    Ignored { reason: IgnoreReason },
}

/// Why a transfer observation was not credited. None of these are errors:
/// the scanner sees plenty of traffic that is not ours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IgnoreReason {
    InvalidAmount,
    NotOurMemo,
    MemoNotFound,
    AlreadyProcessed,
    Expired,
    AmountMismatch { expected: Decimal, received: Decimal },
    TxAlreadySeen,
    MissingTxHash,
    AddressNotManaged,
    RaceDuplicate,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::InvalidAmount => write!(f, "invalid_amount"),
            IgnoreReason::NotOurMemo => write!(f, "not_our_memo"),
            IgnoreReason::MemoNotFound => write!(f, "memo_not_found"),
            IgnoreReason::AlreadyProcessed => write!(f, "already_processed"),
            IgnoreReason::Expired => write!(f, "expired"),
            IgnoreReason::AmountMismatch { expected, received } => {
                write!(f, "amount_mismatch (expected {expected}, received {received})")
            }
            IgnoreReason::TxAlreadySeen => write!(f, "tx_already_seen"),
            IgnoreReason::MissingTxHash => write!(f, "missing_tx_hash"),
            IgnoreReason::AddressNotManaged => write!(f, "address_not_managed"),
            IgnoreReason::RaceDuplicate => write!(f, "race_duplicate"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Coarse classification of a rejection, for callers that only need to
/// know whether the input was malformed or a business rule said no.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    Validation,
    BusinessRule,
}

/// A rejected operation. No mutation has occurred when one of these is
/// returned, and none of them should be retried automatically.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("invalid bet direction")]
    InvalidDirection,

    #[error("amount below minimum of {min}")]
    AmountBelowMinimum { min: Decimal },

    #[error("amount above maximum of {max}")]
    AmountAboveMaximum { max: Decimal },

    #[error("destination address is malformed")]
    InvalidAddress,

    #[error("round not found")]
    RoundNotFound,

    #[error("betting is closed for this round")]
    RoundNotOpen,

    #[error("betting window has ended")]
    BettingWindowOver,

    #[error("round is not locked")]
    RoundNotLocked,

    #[error("an open round already exists for {asset_symbol}")]
    OpenRoundExists { asset_symbol: String },

    #[error("you already have a bet on this round")]
    DuplicateBet,

    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("withdrawal not found")]
    WithdrawalNotFound,

    #[error("withdrawal is not awaiting review")]
    WithdrawalNotReviewable,

    #[error("withdrawal can no longer be cancelled")]
    WithdrawalNotCancellable,
}

impl Rejection {
    pub fn kind(&self) -> RejectionKind {
        use Rejection::*;
        match self {
            InvalidDirection
            | AmountBelowMinimum { .. }
            | AmountAboveMaximum { .. }
            | InvalidAddress => RejectionKind::Validation,
            _ => RejectionKind::BusinessRule,
        }
    }
}

/// Domain error type. Rejections are data, not faults; storage and
/// configuration problems are the faults.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("corrupt stored data: {0}")]
    Data(String),

    #[error("external service failure: {0}")]
    External(String),
}

impl CoreError {
    /// The rejection carried by this error, if it is one.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            CoreError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_status_roundtrip() {
        for s in [
            RoundStatus::BettingOpen,
            RoundStatus::Locked,
            RoundStatus::ResolvedUp,
            RoundStatus::ResolvedDown,
            RoundStatus::Void,
            RoundStatus::Cancelled,
        ] {
            assert_eq!(s.to_string().parse::<RoundStatus>().unwrap(), s);
        }
    }

    #[test]
    fn test_round_status_terminal() {
        assert!(!RoundStatus::BettingOpen.is_terminal());
        assert!(!RoundStatus::Locked.is_terminal());
        assert!(RoundStatus::ResolvedUp.is_terminal());
        assert!(RoundStatus::ResolvedDown.is_terminal());
        assert!(RoundStatus::Void.is_terminal());
        assert!(RoundStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_round_transition_table() {
        use RoundStatus::*;
        assert!(BettingOpen.can_transition_to(Locked));
        assert!(Locked.can_transition_to(ResolvedUp));
        assert!(Locked.can_transition_to(ResolvedDown));
        assert!(Locked.can_transition_to(Void));
        assert!(BettingOpen.can_transition_to(Cancelled));
        assert!(Locked.can_transition_to(Cancelled));
        // No path back into betting
        assert!(!Locked.can_transition_to(BettingOpen));
        assert!(!ResolvedUp.can_transition_to(BettingOpen));
        assert!(!Void.can_transition_to(Locked));
        assert!(!BettingOpen.can_transition_to(ResolvedUp));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("up".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!("DOWN".parse::<Direction>().unwrap(), Direction::Down);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::Up.opposite(), Direction::Down);
    }

    #[test]
    fn test_withdrawal_cancellable() {
        assert!(WithdrawalStatus::Pending.is_cancellable());
        assert!(WithdrawalStatus::NeedsReview.is_cancellable());
        assert!(WithdrawalStatus::Approved.is_cancellable());
        assert!(!WithdrawalStatus::Sent.is_cancellable());
        assert!(!WithdrawalStatus::Confirmed.is_cancellable());
        assert!(!WithdrawalStatus::Cancelled.is_cancellable());
    }

    #[test]
    fn test_ledger_event_roundtrip() {
        for e in [
            LedgerEventType::BetLock,
            LedgerEventType::SettleWin,
            LedgerEventType::SettleLoss,
            LedgerEventType::Refund,
            LedgerEventType::HouseFee,
            LedgerEventType::Deposit,
            LedgerEventType::Withdrawal,
        ] {
            assert_eq!(e.to_string().parse::<LedgerEventType>().unwrap(), e);
        }
    }

    #[test]
    fn test_rejection_kinds() {
        assert_eq!(
            Rejection::InvalidDirection.kind(),
            RejectionKind::Validation
        );
        assert_eq!(
            Rejection::AmountBelowMinimum { min: dec!(1) }.kind(),
            RejectionKind::Validation
        );
        assert_eq!(Rejection::DuplicateBet.kind(), RejectionKind::BusinessRule);
        assert_eq!(
            Rejection::InsufficientFunds {
                needed: dec!(5),
                available: dec!(1)
            }
            .kind(),
            RejectionKind::BusinessRule
        );
    }

    #[test]
    fn test_core_error_rejection_accessor() {
        let e = CoreError::Rejected(Rejection::DuplicateBet);
        assert_eq!(e.rejection(), Some(&Rejection::DuplicateBet));
        let e = CoreError::Config("bad".into());
        assert!(e.rejection().is_none());
    }

    #[test]
    fn test_ignore_reason_display() {
        assert_eq!(IgnoreReason::TxAlreadySeen.to_string(), "tx_already_seen");
        let r = IgnoreReason::AmountMismatch {
            expected: dec!(10),
            received: dec!(9),
        };
        assert!(r.to_string().contains("expected 10"));
    }

    #[test]
    fn test_balance_total() {
        let b = Balance {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            asset: "TON".into(),
            network: "TON".into(),
            available: dec!(7.5),
            locked: dec!(2.5),
            updated_at: Utc::now(),
        };
        assert_eq!(b.total(), dec!(10));
    }

    #[test]
    fn test_round_display() {
        let r = Round {
            id: Uuid::new_v4(),
            round_number: 12,
            asset_symbol: "BTCUSDT".into(),
            status: RoundStatus::BettingOpen,
            lock_price: None,
            settle_price: None,
            total_up_amount: dec!(10),
            total_down_amount: dec!(5),
            house_fee: Decimal::ZERO,
            betting_start_at: Utc::now(),
            betting_end_at: Utc::now(),
            locked_at: None,
            settled_at: None,
            created_at: Utc::now(),
        };
        let s = r.to_string();
        assert!(s.contains("#12"));
        assert!(s.contains("BETTING_OPEN"));
        assert_eq!(r.total_pool(), dec!(15));
    }
}
