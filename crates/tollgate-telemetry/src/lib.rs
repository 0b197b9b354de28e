//! Tollgate Telemetry - logging setup and request correlation.
//!
//! This crate provides:
//! - Subscriber installation for pretty, compact, full and JSON output
//!   to stderr or a daily-rotated log directory
//! - [`RequestContext`] for correlating every log line of one gateway request
//!
//! # Example
//!
//! ```rust,no_run
//! use tollgate_telemetry::{LogConfig, LogFormat, RequestContext, setup_logging};
//!
//! # fn main() -> Result<(), tollgate_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_directive("tollgate_gateway=debug");
//! setup_logging(&config)?;
//!
//! let ctx = RequestContext::new("transport")
//!     .with_caller("session-1")
//!     .with_operation("invoke");
//! let _guard = ctx.span().entered();
//! tracing::info!("dispatching");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::{RequestContext, RequestGuard};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    LOG_FILE_PREFIX, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging,
};
