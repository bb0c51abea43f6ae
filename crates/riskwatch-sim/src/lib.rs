//! # Riskwatch Session Simulator
//!
//! Replays a seeded, randomized dashboard session against an in-memory
//! backend behind a flaky network, checking the cache's scope and partition
//! invariants after every operation.
//!
//! ```no_run
//! use riskwatch_sim::{run_simulator, SimulatorConfig};
//!
//! # async fn demo() {
//! let report = run_simulator(SimulatorConfig::default()).await;
//! println!("{}", report.generate_text());
//! assert!(report.passed());
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod network;
pub mod simulator;

pub use network::FlakyNetwork;
pub use simulator::{run_simulator, SimulatorConfig, SimulatorReport, SimulatorStats, Violation};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
