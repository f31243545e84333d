//! Integration tests for distribution runs.
//!
//! All timing tests run on a paused clock, so the 62 s / 30 s / 40 s delays
//! elapse instantly and deterministically.
//!
//! - `harness.rs`    - Shared fixtures: in-memory transport, static license
//!                     gate, temp ledger, recording reply expectation
//! - `scheduler.rs`  - Rounds, shared cursor, ledger skips, failures, bounds
//! - `aggregator.rs` - Reply windows, batching, flush failures, shutdown
//! - `controller.rs` - License gate, wiring, cancellation and teardown
