//! Tollgate Test - shared test utilities for the Tollgate gateway.
//!
//! This crate provides fixture capabilities (one per handler kind and
//! failure mode), a counting mock handler and a ready-made gateway, for use
//! as a dev-dependency.
//!
//! # Usage
//!
//! ```rust,ignore
//! use serde_json::json;
//! use tollgate_test::{args, test_gateway};
//!
//! #[tokio::test]
//! async fn test_add() {
//!     let gateway = test_gateway();
//!     let outcome = gateway.invoke("add", args(json!({"a": 2, "b": 3})), None).await;
//!     assert_eq!(outcome.payload, Some(json!(5)));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
