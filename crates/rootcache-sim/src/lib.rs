//! Rootcache Simulator
//!
//! Drives the recoverable root cache with a seeded synthetic workload and
//! reports what the cache did and whether any returned root broke an
//! invariant.

#![allow(missing_docs)]
#![warn(unreachable_pub)]

pub mod simulator;

pub use simulator::{
    generate_source, run_simulator, SimulatorConfig, SimulatorReport, SimulatorStats, Violation,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
