//! recavc - lossless H.264/AVC re-compression in Rust
//!
//! recavc shrinks files containing H.264 video without losing a single
//! bit: the CABAC entropy-coded slice payloads are re-encoded with a
//! 64-bit arithmetic coder driven by a statistical model that
//! conditions on spatio-temporal neighborhood context, while everything
//! else (container boxes, parameter sets, headers, escaped payloads)
//! passes through verbatim. Decompression reproduces the input
//! byte-for-byte.
//!
//! # Architecture
//!
//! - `coder`: the generic arithmetic coder and the CABAC engines built
//!   on top of it
//! - `model`: the statistical model, its estimator table, scan
//!   topology, and residual frame buffers
//! - `hooks`: the callback contract a hosted H.264 parser drives
//! - `driver`: the compression and decompression passes
//! - `archive`: the tagged-record container for compressed output
//! - `error`: common error types

pub mod archive;
pub mod coder;
pub mod driver;
pub mod error;
pub mod hooks;
pub mod model;

pub use error::{Error, Result};

/// recavc version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for the recavc library
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Enable verbose logging
    pub verbose: bool,
    /// Enable debug output
    pub debug: bool,
}

/// Initialize the recavc library with the given configuration
pub fn init(config: Config) -> Result<()> {
    if config.verbose || config.debug {
        let level = if config.debug { "debug" } else { "info" };
        tracing_subscriber::fmt().with_env_filter(level).init();
    }
    Ok(())
}
