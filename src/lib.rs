//! fdprec - a deterministic entity-component repository and flight
//! recorder for simulation kernels.
//!
//! The repository ([`ecr`]) stores components in chunked, columnar tables
//! addressed by generational entity handles. The flight recorder
//! ([`recorder`]) captures keyframes and deltas of that state to a binary
//! `.fdp` file and replays them deterministically.
#![warn(missing_docs)]

pub mod config;
pub mod constants;
pub mod ecr;
pub mod error;
pub mod metrics;
pub mod recorder;

pub use error::{Error, Result};

/// Crate version, from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name, from `Cargo.toml`.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize process-wide logging. Call once at process start before
/// touching the repository or recorder.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
