//! UPDOWN — recurring pari-mutuel price prediction market engine.
//!
//! Users lock funds on a binary UP/DOWN outcome for a timed round; the
//! engine settles each round against an external price and redistributes
//! the pool minus a house fee. Library crate exposing all modules for use
//! by integration tests and the binary entry point.

pub mod config;
pub mod types;
pub mod store;
pub mod ledger;
pub mod engine;
pub mod funds;
pub mod stats;
pub mod recon;
pub mod external;
