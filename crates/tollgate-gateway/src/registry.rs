//! Capability descriptors and the registry that holds them.
//!
//! The registry is populated during startup and then sealed. After sealing it
//! is shared behind an `Arc` and only ever read, so lookups take no locks.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult, HandlerError};
use crate::prompt::PromptTemplate;
use crate::schema::{FieldSpec, FieldType, InputSchema};
use crate::types::{Arguments, CapabilityKind};

/// Argument under which a resource handler receives its URI.
pub const RESOURCE_URI_ARGUMENT: &str = "uri";

/// An in-process capability implementation.
#[async_trait]
pub trait NativeHandler: Send + Sync {
    /// Produce a result from validated arguments.
    async fn call(&self, arguments: Arguments) -> Result<Value, HandlerError>;
}

/// Adapts an async closure to [`NativeHandler`].
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> NativeHandler for FnHandler<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn call(&self, arguments: Arguments) -> Result<Value, HandlerError> {
        (self.0)(arguments).await
    }
}

/// Where a process-backed capability gets its program from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSource {
    /// A program fixed at registration.
    Fixed(String),
    /// The program (and extra arguments, whitespace separated) is taken from
    /// a string argument. The first token must be a bare command name.
    Argument(String),
}

/// A capability implemented by running an external program.
///
/// The validated arguments are written to the child's stdin as JSON. Stdout
/// is parsed as JSON when possible, otherwise returned as a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Program selection.
    pub program: CommandSource,
    /// Arguments passed before any taken from the command argument.
    pub args: Vec<String>,
}

/// A program and argument list ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    /// Program as given (bare name or registrant-supplied path).
    pub program: String,
    /// Full argument list.
    pub args: Vec<String>,
}

impl ResolvedCommand {
    /// Basename of the program, matched against the command allow-list.
    #[must_use]
    pub fn command_name(&self) -> &str {
        std::path::Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }
}

/// Why a command could not be resolved from the arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandIssue {
    /// The command argument is absent or not a string.
    Missing(String),
    /// The command argument is empty.
    Empty(String),
    /// The command argument names a path instead of a bare command.
    NotBareName(String),
}

impl ProcessSpec {
    /// Always run `program`.
    #[must_use]
    pub fn fixed(program: impl Into<String>) -> Self {
        Self {
            program: CommandSource::Fixed(program.into()),
            args: Vec::new(),
        }
    }

    /// Take the program from the string argument `field`.
    #[must_use]
    pub fn from_argument(field: impl Into<String>) -> Self {
        Self {
            program: CommandSource::Argument(field.into()),
            args: Vec::new(),
        }
    }

    /// Set the leading arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Name of the argument that carries the command, if any.
    #[must_use]
    pub fn command_field(&self) -> Option<&str> {
        match &self.program {
            CommandSource::Fixed(_) => None,
            CommandSource::Argument(field) => Some(field),
        }
    }

    /// Determine the program and arguments for one invocation.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandIssue`] if the command argument is absent, empty,
    /// or contains a path separator.
    pub fn resolve(&self, arguments: &Arguments) -> Result<ResolvedCommand, CommandIssue> {
        match &self.program {
            CommandSource::Fixed(program) => Ok(ResolvedCommand {
                program: program.clone(),
                args: self.args.clone(),
            }),
            CommandSource::Argument(field) => {
                let raw = arguments
                    .get(field)
                    .and_then(Value::as_str)
                    .ok_or_else(|| CommandIssue::Missing(field.clone()))?;
                let mut tokens = raw.split_whitespace();
                let program = tokens
                    .next()
                    .ok_or_else(|| CommandIssue::Empty(field.clone()))?;
                if program.contains('/') || program.contains('\\') {
                    return Err(CommandIssue::NotBareName(field.clone()));
                }
                let mut args = self.args.clone();
                args.extend(tokens.map(ToOwned::to_owned));
                Ok(ResolvedCommand {
                    program: program.to_owned(),
                    args,
                })
            },
        }
    }
}

/// How a capability produces its result.
#[derive(Clone)]
pub enum CapabilityHandler {
    /// In-process async handler.
    Native(Arc<dyn NativeHandler>),
    /// External program run under the execution sandbox.
    Process(ProcessSpec),
    /// Prompt template rendered from the arguments.
    Template(PromptTemplate),
}

impl CapabilityHandler {
    /// Wrap an async closure.
    pub fn native<F, Fut>(f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self::Native(Arc::new(FnHandler(f)))
    }

    /// Short name for logs.
    #[must_use]
    pub fn variant(&self) -> &'static str {
        match self {
            Self::Native(_) => "native",
            Self::Process(_) => "process",
            Self::Template(_) => "template",
        }
    }
}

impl fmt::Debug for CapabilityHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native(..)"),
            Self::Process(spec) => f.debug_tuple("Process").field(spec).finish(),
            Self::Template(t) => f.debug_tuple("Template").field(t).finish(),
        }
    }
}

/// Immutable description of one capability.
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    /// Unique name.
    pub name: String,
    /// What the capability exposes.
    pub kind: CapabilityKind,
    /// Human-readable description.
    pub description: String,
    /// Accepted arguments.
    pub input_schema: InputSchema,
    /// Safe to cache and coalesce.
    pub read_only: bool,
    /// Resource URI (resources only).
    pub uri: Option<String>,
    /// Resource content type (resources only).
    pub mime_type: Option<String>,
    /// Per-capability execution budget overriding the policy default.
    pub max_execution_time: Option<Duration>,
    /// Per-capability cache TTL overriding the cache default.
    pub cache_ttl: Option<Duration>,
    /// Implementation.
    pub handler: CapabilityHandler,
}

impl CapabilityDescriptor {
    /// A tool. Tools are not read-only unless marked with
    /// [`read_only`](Self::read_only).
    #[must_use]
    pub fn tool(name: impl Into<String>, handler: CapabilityHandler) -> Self {
        Self {
            name: name.into(),
            kind: CapabilityKind::Tool,
            description: String::new(),
            input_schema: InputSchema::new(),
            read_only: false,
            uri: None,
            mime_type: None,
            max_execution_time: None,
            cache_ttl: None,
            handler,
        }
    }

    /// A resource addressed by `uri`. Resources are read-only and receive
    /// the URI as the `uri` argument.
    #[must_use]
    pub fn resource(
        name: impl Into<String>,
        uri: impl Into<String>,
        mime_type: impl Into<String>,
        handler: CapabilityHandler,
    ) -> Self {
        Self {
            kind: CapabilityKind::Resource,
            read_only: true,
            uri: Some(uri.into()),
            mime_type: Some(mime_type.into()),
            input_schema: InputSchema::new()
                .field(FieldSpec::optional(RESOURCE_URI_ARGUMENT, FieldType::String)),
            ..Self::tool(name, handler)
        }
    }

    /// A prompt rendered from `template`. Prompt schemas are always strict.
    #[must_use]
    pub fn prompt(name: impl Into<String>, template: PromptTemplate) -> Self {
        Self {
            kind: CapabilityKind::Prompt,
            read_only: true,
            input_schema: InputSchema::new().strict(),
            ..Self::tool(name, CapabilityHandler::Template(template))
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the input schema. Resources keep their `uri` field and prompts
    /// stay strict.
    #[must_use]
    pub fn with_schema(mut self, schema: InputSchema) -> Self {
        let mut schema = schema;
        match self.kind {
            CapabilityKind::Resource if schema.get(RESOURCE_URI_ARGUMENT).is_none() => {
                schema.insert(FieldSpec::optional(RESOURCE_URI_ARGUMENT, FieldType::String));
            },
            CapabilityKind::Prompt => schema = schema.strict(),
            _ => {},
        }
        self.input_schema = schema;
        self
    }

    /// Mark as free of side effects, enabling caching and coalescing.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Override the execution budget.
    #[must_use]
    pub fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time = Some(limit);
        self
    }

    /// Override the cache TTL.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Caller-facing summary.
    #[must_use]
    pub fn summary(&self) -> CapabilitySummary {
        CapabilitySummary {
            name: self.name.clone(),
            kind: self.kind,
            description: self.description.clone(),
            input_schema: self.input_schema.to_json_schema(),
            read_only: self.read_only,
            uri: self.uri.clone(),
            mime_type: self.mime_type.clone(),
        }
    }

    fn check(&self) -> GatewayResult<()> {
        let invalid = |reason: &str| GatewayError::InvalidDescriptor {
            name: self.name.clone(),
            reason: reason.to_owned(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        match self.kind {
            CapabilityKind::Resource => {
                if self.uri.as_deref().is_none_or(|u| u.trim().is_empty()) {
                    return Err(invalid("resources need a URI"));
                }
                if !self.read_only {
                    return Err(invalid("resources are read-only"));
                }
            },
            CapabilityKind::Prompt => {
                if !matches!(self.handler, CapabilityHandler::Template(_)) {
                    return Err(invalid("prompts need a template handler"));
                }
            },
            CapabilityKind::Tool => {},
        }
        if let CapabilityHandler::Process(spec) = &self.handler
            && let Some(field) = spec.command_field()
            && !self
                .input_schema
                .get(field)
                .is_some_and(|f| f.required && f.field_type == FieldType::String)
        {
            return Err(invalid("the command argument must be a required string field"));
        }
        if self.max_execution_time.is_some_and(|d| d.is_zero()) {
            return Err(invalid("execution budget must be non-zero"));
        }
        Ok(())
    }
}

/// What `list_capabilities` returns for one capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySummary {
    /// Unique name.
    pub name: String,
    /// Capability kind.
    pub kind: CapabilityKind,
    /// Description.
    pub description: String,
    /// Input schema as JSON Schema.
    pub input_schema: Value,
    /// Whether results may be cached.
    pub read_only: bool,
    /// Resource URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Resource content type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Name-keyed store of capability descriptors.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    entries: Vec<Arc<CapabilityDescriptor>>,
    by_name: HashMap<String, usize>,
    by_uri: HashMap<String, usize>,
    sealed: bool,
}

impl CapabilityRegistry {
    /// An empty, unsealed registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor.
    ///
    /// # Errors
    ///
    /// Fails if the registry is sealed, the name or resource URI is taken,
    /// or the descriptor is inconsistent.
    pub fn register(&mut self, descriptor: CapabilityDescriptor) -> GatewayResult<()> {
        if self.sealed {
            return Err(GatewayError::RegistrySealed);
        }
        descriptor.check()?;
        if self.by_name.contains_key(&descriptor.name) {
            return Err(GatewayError::DuplicateCapability {
                name: descriptor.name,
            });
        }
        if let Some(uri) = &descriptor.uri
            && self.by_uri.contains_key(uri)
        {
            return Err(GatewayError::DuplicateResourceUri { uri: uri.clone() });
        }

        let index = self.entries.len();
        debug!(
            capability = %descriptor.name,
            kind = %descriptor.kind,
            handler = descriptor.handler.variant(),
            read_only = descriptor.read_only,
            "Registered capability"
        );
        self.by_name.insert(descriptor.name.clone(), index);
        if let Some(uri) = &descriptor.uri {
            self.by_uri.insert(uri.clone(), index);
        }
        self.entries.push(Arc::new(descriptor));
        Ok(())
    }

    /// Refuse further registrations.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Whether [`seal`](Self::seal) has been called.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Find a capability by name.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] for unknown names.
    pub fn lookup(&self, name: &str) -> GatewayResult<&Arc<CapabilityDescriptor>> {
        self.by_name
            .get(name)
            .and_then(|&i| self.entries.get(i))
            .ok_or_else(|| GatewayError::NotFound {
                name: name.to_owned(),
            })
    }

    /// Find a resource by URI.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] for unknown URIs.
    pub fn lookup_resource(&self, uri: &str) -> GatewayResult<&Arc<CapabilityDescriptor>> {
        self.by_uri
            .get(uri)
            .and_then(|&i| self.entries.get(i))
            .ok_or_else(|| GatewayError::NotFound {
                name: uri.to_owned(),
            })
    }

    /// Descriptors in registration order, optionally filtered by kind.
    #[must_use]
    pub fn list(&self, kind: Option<CapabilityKind>) -> Vec<Arc<CapabilityDescriptor>> {
        self.entries
            .iter()
            .filter(|d| kind.is_none_or(|k| d.kind == k))
            .cloned()
            .collect()
    }

    /// Number of registered capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
