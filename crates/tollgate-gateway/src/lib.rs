//! Tollgate Gateway - capability invocation gateway.
//!
//! This crate provides:
//! - A sealed registry of named tools, resources and prompt templates
//! - Argument validation against declared schemas and an execution policy
//! - Per-caller sliding-window rate limiting
//! - A bounded TTL result cache with in-flight request coalescing
//! - Bounded execution of native handlers and external processes
//! - Per-capability request metrics
//!
//! # Architecture
//!
//! Every request passes through the [`Dispatcher`] in a fixed order:
//! validate, admit, consult the cache, execute, cache the result, record
//! telemetry, respond. Expected failures are returned as an
//! [`ExecutionOutcome`] with a stable error code; nothing a caller sends can
//! make the gateway panic or return an `Err`.
//!
//! The [`Gateway`] owns all components and is built once by a
//! [`GatewayBuilder`]. Transports decode a [`GatewayRequest`], pass it to
//! [`Gateway::handle`] and encode the [`ResponseEnvelope`].
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tollgate_gateway::prelude::*;
//!
//! # async fn example() -> GatewayResult<()> {
//! let add = CapabilityDescriptor::tool(
//!     "add",
//!     CapabilityHandler::native(|args| async move {
//!         let a = args.get("a").and_then(|v| v.as_i64()).unwrap_or(0);
//!         let b = args.get("b").and_then(|v| v.as_i64()).unwrap_or(0);
//!         Ok(json!(a + b))
//!     }),
//! )
//! .with_schema(
//!     InputSchema::new()
//!         .field(FieldSpec::required("a", FieldType::Integer))
//!         .field(FieldSpec::required("b", FieldType::Integer)),
//! )
//! .read_only();
//!
//! let gateway = GatewayBuilder::new().register(add)?.build();
//!
//! let mut args = Arguments::new();
//! args.insert("a".into(), json!(2));
//! args.insert("b".into(), json!(3));
//! let outcome = gateway.invoke("add", args, Some("alice")).await;
//! assert_eq!(outcome.payload, Some(json!(5)));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

mod dispatcher;
mod error;
mod executor;
mod gateway;
mod process;
mod sweeper;
mod types;

pub mod cache;
pub mod fingerprint;
pub mod policy;
pub mod prompt;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod schema;
pub mod tracker;
pub mod validator;

pub use cache::{CacheStats, ResultCache, ResultSource};
pub use dispatcher::{AnonymousCallerPolicy, Dispatcher, Stage};
pub use error::{GatewayError, GatewayResult, HandlerError};
pub use executor::SandboxedExecutor;
pub use fingerprint::Fingerprint;
pub use gateway::{Gateway, GatewayBuilder};
pub use policy::{ExecutionLimits, ExecutionPolicy};
pub use prompt::PromptTemplate;
pub use protocol::{
    GatewayRequest, HealthReport, RenderedPrompt, ResourceContent, ResponseEnvelope,
};
pub use rate_limit::{RateLimit, RateLimitResult, RateLimiter};
pub use registry::{
    CapabilityDescriptor, CapabilityHandler, CapabilityRegistry, CapabilitySummary,
    NativeHandler, ProcessSpec,
};
pub use schema::{FieldSpec, FieldType, InputSchema};
pub use sweeper::AbortOnDrop;
pub use tracker::{CapabilityMetrics, Tracker, TrackingHandle};
pub use types::{
    Arguments, CapabilityKind, ErrorDetail, ExecutionOutcome, OutcomeStatus, Request,
};
pub use validator::{InputValidator, ValidationResult, Violation, ViolationKind};
