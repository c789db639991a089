//! Feedsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared functionality used by every feedsync workspace member.
//!
//! - **Logging**: tracing subscriber setup driven by code or environment
//!
//! # Example
//!
//! ```no_run
//! use feedsync_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod logging;

pub use logging::{LogConfig, LoggingError};
