//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tollgate_gateway::prelude::*;` to import all essential types.

// Errors
pub use crate::{GatewayError, GatewayResult, HandlerError};

// Gateway
pub use crate::{AnonymousCallerPolicy, Gateway, GatewayBuilder};

// Capabilities
pub use crate::{
    CapabilityDescriptor, CapabilityHandler, CapabilityKind, CapabilitySummary, NativeHandler,
    ProcessSpec, PromptTemplate,
};

// Schemas
pub use crate::{FieldSpec, FieldType, InputSchema};

// Requests and outcomes
pub use crate::{Arguments, ExecutionOutcome, OutcomeStatus, Request};

// Wire envelope
pub use crate::{GatewayRequest, ResponseEnvelope};

// Limits
pub use crate::{ExecutionPolicy, RateLimit};
