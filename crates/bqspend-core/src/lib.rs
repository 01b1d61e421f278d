//! # bqspend-core
//!
//! Shared plumbing for the bqspend crates.
//!
//! This crate provides:
//! - [`CoreError`] - Errors raised while setting up the process (logging, directories)
//! - [`logging`] - Tracing setup with a JSON file layer and a console layer
//! - [`recovery`] - Bounded retry with exponential backoff for record-source fetches
//!
//! ## Example
//!
//! ```no_run
//! fn main() -> bqspend_core::Result<()> {
//!     let _guard = bqspend_core::init_logging(None, false)?;
//!     tracing::info!("bqspend started");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod recovery;

pub use error::{CoreError, Result};
pub use logging::{LogGuard, init_logging, init_test_logging};
pub use recovery::{RetryConfig, RetryResult, Retryable, retry_with_backoff};
