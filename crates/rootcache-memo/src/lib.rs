//! Rootcache Memo
//!
//! A small single-flight primitive: concurrent requests for the same value
//! share one in-flight computation, and nothing is cached once it lands.
//!
//! # Example
//!
//! ```rust,ignore
//! use rootcache_memo::SingleFlight;
//! use tokio_util::sync::CancellationToken;
//!
//! let flight: SingleFlight<u64, String> = SingleFlight::new();
//! let value = flight
//!     .run(&CancellationToken::new(), |_token| async { Ok(expensive().await) })
//!     .await?;
//! ```

#![warn(unreachable_pub)]

mod flight;

pub use flight::{FlightError, SingleFlight};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
