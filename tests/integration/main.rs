//! End-to-end integration tests: real store, real engine, scripted
//! price feed and chain scanner.

mod mock_feeds;

mod funds_flow;
mod lifecycle;
