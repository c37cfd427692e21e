//! Embedded schema. The table/column layout is a durable contract read
//! directly by reporting and admin tooling — renaming or retyping a
//! column is a breaking change.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS balances (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    asset       TEXT NOT NULL,
    network     TEXT NOT NULL,
    available   TEXT NOT NULL,
    locked      TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (user_id, asset, network),
    CHECK (CAST(available AS REAL) >= 0),
    CHECK (CAST(locked AS REAL) >= 0)
);

CREATE TABLE IF NOT EXISTS ledger (
    id               TEXT PRIMARY KEY,
    user_id          TEXT,
    round_id         TEXT,
    bet_id           TEXT,
    event_type       TEXT NOT NULL,
    amount           TEXT NOT NULL,
    asset            TEXT NOT NULL,
    network          TEXT NOT NULL,
    available_before TEXT,
    available_after  TEXT,
    locked_before    TEXT,
    locked_after     TEXT,
    description      TEXT,
    idempotency_key  TEXT UNIQUE,
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS ix_ledger_user ON ledger (user_id);
CREATE INDEX IF NOT EXISTS ix_ledger_event ON ledger (event_type);

CREATE TABLE IF NOT EXISTS rounds (
    id                TEXT PRIMARY KEY,
    round_number      INTEGER NOT NULL,
    asset_symbol      TEXT NOT NULL,
    status            TEXT NOT NULL,
    lock_price        TEXT,
    settle_price      TEXT,
    total_up_amount   TEXT NOT NULL,
    total_down_amount TEXT NOT NULL,
    house_fee         TEXT NOT NULL,
    betting_start_at  TEXT NOT NULL,
    betting_end_at    TEXT NOT NULL,
    locked_at         TEXT,
    settled_at        TEXT,
    created_at        TEXT NOT NULL,
    UNIQUE (asset_symbol, round_number)
);

CREATE INDEX IF NOT EXISTS ix_rounds_symbol_status ON rounds (asset_symbol, status);

CREATE TABLE IF NOT EXISTS bets (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    round_id   TEXT NOT NULL REFERENCES rounds (id),
    direction  TEXT NOT NULL,
    amount     TEXT NOT NULL,
    payout     TEXT,
    status     TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (user_id, round_id),
    CHECK (CAST(amount AS REAL) > 0)
);

CREATE TABLE IF NOT EXISTS deposit_requests (
    id              TEXT PRIMARY KEY,
    user_id         TEXT NOT NULL,
    memo            TEXT NOT NULL UNIQUE,
    expected_amount TEXT,
    status          TEXT NOT NULL,
    expires_at      TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deposit_addresses (
    id               TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL,
    asset            TEXT NOT NULL,
    network          TEXT NOT NULL,
    address          TEXT NOT NULL,
    derivation_index INTEGER NOT NULL,
    created_at       TEXT NOT NULL,
    UNIQUE (user_id, asset, network),
    UNIQUE (asset, network, derivation_index),
    UNIQUE (asset, network, address)
);

CREATE TABLE IF NOT EXISTS chain_transactions (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    kind       TEXT NOT NULL,
    amount     TEXT NOT NULL,
    asset      TEXT NOT NULL,
    network    TEXT NOT NULL,
    status     TEXT NOT NULL,
    tx_hash    TEXT UNIQUE,
    memo       TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS withdrawals (
    id           TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    amount       TEXT NOT NULL,
    asset        TEXT NOT NULL,
    network      TEXT NOT NULL,
    to_address   TEXT NOT NULL,
    status       TEXT NOT NULL,
    tx_hash      TEXT UNIQUE,
    note         TEXT,
    created_at   TEXT NOT NULL,
    processed_at TEXT,
    CHECK (CAST(amount AS REAL) > 0)
);

CREATE TABLE IF NOT EXISTS user_stats (
    user_id     TEXT PRIMARY KEY,
    wins        INTEGER NOT NULL DEFAULT 0,
    losses      INTEGER NOT NULL DEFAULT 0,
    ties        INTEGER NOT NULL DEFAULT 0,
    total_bets  INTEGER NOT NULL DEFAULT 0,
    net_pnl     TEXT NOT NULL DEFAULT '0',
    win_streak  INTEGER NOT NULL DEFAULT 0,
    best_streak INTEGER NOT NULL DEFAULT 0,
    score       TEXT NOT NULL DEFAULT '0',
    updated_at  TEXT NOT NULL
)
"#;
