//! Shared test utilities for herald integration tests.
//!
//! This crate provides:
//! - [`RecordingLedger`]: existence ledger that records every operation
//! - [`RecordingPublisher`]: publisher that records notifications and can fail on demand
//! - [`ScriptedScheduler`]: scheduler whose reported size is driven by the test
//! - [`AckProbe`]: counts acknowledgment callbacks
//! - Entity fixtures
//!
//! # Example
//!
//! ```rust,ignore
//! use herald_test_utils::{AckProbe, RecordingLedger, scene};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ledger = RecordingLedger::new();
//!     let probe = AckProbe::new();
//!     // ... deploy scene("bafy1", ["0,0"]) with probe.handle() ...
//!     assert_eq!(probe.count(), 1);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod ledger;
pub mod publish;
pub mod scheduler;

pub use fixtures::*;
pub use ledger::*;
pub use publish::*;
pub use scheduler::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("herald_bridge=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
