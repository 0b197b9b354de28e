#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Configuration for the Tollgate capability gateway.
//!
//! A single [`Config`] value describes every tunable of the gateway: rate
//! limits, cache sizing, execution limits and allow-lists, anonymous caller
//! policy and logging. Every section implements [`Default`] with production
//! values, so an empty TOML document is a valid configuration.
//!
//! # Usage
//!
//! ```rust
//! use tollgate_config::Config;
//!
//! let config = Config::from_toml_str(
//!     r#"
//!     [rate_limit]
//!     max_requests = 10
//!     window_ms = 1000
//!
//!     [execution]
//!     allowed_commands = ["git", "ls"]
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.rate_limit.max_requests, 10);
//! ```
//!
//! # Design
//!
//! This crate has no dependencies on other internal tollgate crates.
//! Conversion into domain types happens in `tollgate-gateway`'s builder.
//! Layered merging of several files is left to the embedding application.

/// Configuration error types.
pub mod error;
/// Configuration file loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl Config {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document is malformed or fails
    /// validation.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        loader::parse("<inline>", source)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, is malformed,
    /// or fails validation.
    pub fn load(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load(path)
    }

    /// Serialize to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if serialization fails.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }
}
