//! The server context.
//!
//! A [`Gateway`] owns every component of the pipeline and the background
//! sweepers that keep the rate-limit and cache maps bounded. It is built
//! once by [`GatewayBuilder`], after which the registry is sealed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tollgate_config::Config;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::dispatcher::{AnonymousCallerPolicy, Dispatcher};
use crate::error::GatewayResult;
use crate::executor::SandboxedExecutor;
use crate::policy::ExecutionPolicy;
use crate::protocol::{
    GatewayRequest, HealthReport, RenderedPrompt, ResourceContent, ResponseEnvelope,
};
use crate::rate_limit::{RateLimit, RateLimiter};
use crate::registry::{
    CapabilityDescriptor, CapabilityRegistry, CapabilitySummary, RESOURCE_URI_ARGUMENT,
};
use crate::sweeper::AbortOnDrop;
use crate::tracker::{DEFAULT_SAMPLE_WINDOW, Tracker, UNKNOWN_CAPABILITY};
use crate::types::{Arguments, CapabilityKind, ExecutionOutcome, Request};
use crate::validator::InputValidator;

const DEFAULT_NAME: &str = "tollgate";
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_CACHE_CAPACITY: usize = 1024;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Assembles a [`Gateway`].
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use tollgate_gateway::prelude::*;
///
/// # async fn demo() -> GatewayResult<()> {
/// let gateway = GatewayBuilder::new()
///     .with_rate_limit(RateLimit::per_minute(120))
///     .register(
///         CapabilityDescriptor::tool(
///             "ping",
///             CapabilityHandler::native(|_| async { Ok(json!("pong")) }),
///         )
///         .read_only(),
///     )?
///     .build();
///
/// let outcome = gateway.invoke("ping", Arguments::new(), Some("alice")).await;
/// assert_eq!(outcome.payload, Some(json!("pong")));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct GatewayBuilder {
    name: String,
    registry: CapabilityRegistry,
    rate_limit: RateLimit,
    cache: ResultCache,
    policy: ExecutionPolicy,
    anonymous: AnonymousCallerPolicy,
    sweep_interval: Option<Duration>,
    sample_window: usize,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    /// Builder with default limits and no capabilities.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            registry: CapabilityRegistry::new(),
            rate_limit: RateLimit::default(),
            cache: ResultCache::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL),
            policy: ExecutionPolicy::new(),
            anonymous: AnonymousCallerPolicy::default(),
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
            sample_window: DEFAULT_SAMPLE_WINDOW,
        }
    }

    /// Builder configured from a validated [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`](crate::GatewayError::Config) if the
    /// configuration fails validation.
    pub fn from_config(config: &Config) -> GatewayResult<Self> {
        tollgate_config::validate::validate(config)?;
        let sweep_interval = (config.gateway.sweep_interval_secs > 0)
            .then(|| Duration::from_secs(config.gateway.sweep_interval_secs));
        Ok(Self {
            name: config.gateway.name.clone(),
            rate_limit: RateLimit::from_section(&config.rate_limit),
            cache: ResultCache::from_section(&config.cache),
            policy: ExecutionPolicy::from_section(&config.execution),
            anonymous: AnonymousCallerPolicy::from_section(&config.callers),
            sweep_interval,
            ..Self::new()
        })
    }

    /// Name reported by [`Gateway::health`].
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Per-caller admission limit.
    #[must_use]
    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = limit;
        self
    }

    /// Result cache size and default TTL.
    #[must_use]
    pub fn with_cache(mut self, capacity: usize, default_ttl: Duration) -> Self {
        self.cache = ResultCache::new(capacity, default_ttl);
        self
    }

    /// Execution limits and allow-lists.
    #[must_use]
    pub fn with_execution_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Treatment of requests without a caller identity.
    #[must_use]
    pub fn with_anonymous_callers(mut self, policy: AnonymousCallerPolicy) -> Self {
        self.anonymous = policy;
        self
    }

    /// Period of the background sweepers; `None` disables them.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval.filter(|i| !i.is_zero());
        self
    }

    /// Recent durations kept per capability for the median.
    #[must_use]
    pub fn with_sample_window(mut self, window: usize) -> Self {
        self.sample_window = window;
        self
    }

    /// Register a capability.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is invalid or its name or URI is
    /// already taken.
    pub fn register(mut self, descriptor: CapabilityDescriptor) -> GatewayResult<Self> {
        self.registry.register(descriptor)?;
        Ok(self)
    }

    /// Seal the registry and assemble the gateway.
    ///
    /// Sweepers are started only when called inside a Tokio runtime.
    #[must_use]
    pub fn build(self) -> Gateway {
        let mut registry = self.registry;
        registry.seal();
        let registry = Arc::new(registry);
        let limiter = Arc::new(RateLimiter::new(self.rate_limit));
        let cache = Arc::new(self.cache);
        let tracker = Arc::new(Tracker::new(self.sample_window));

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            InputValidator::new(self.policy.clone()),
            Arc::clone(&limiter),
            Arc::clone(&cache),
            SandboxedExecutor::new(self.policy),
            Arc::clone(&tracker),
            self.anonymous,
        ));

        let mut sweepers = Vec::new();
        match (self.sweep_interval, tokio::runtime::Handle::try_current()) {
            (Some(every), Ok(_)) => {
                sweepers.push(limiter.spawn_sweeper(every));
                sweepers.push(cache.spawn_sweeper(every));
            },
            (Some(_), Err(_)) => {
                warn!("No Tokio runtime at build time; background sweepers not started");
            },
            (None, _) => {},
        }

        info!(
            name = %self.name,
            capabilities = registry.len(),
            sweepers = sweepers.len(),
            "Gateway ready"
        );

        Gateway {
            name: self.name,
            registry,
            dispatcher,
            limiter,
            cache,
            tracker,
            sweepers: Mutex::new(sweepers),
        }
    }
}

/// Owns the pipeline and serves requests.
#[derive(Debug)]
pub struct Gateway {
    name: String,
    registry: Arc<CapabilityRegistry>,
    dispatcher: Arc<Dispatcher>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResultCache>,
    tracker: Arc<Tracker>,
    sweepers: Mutex<Vec<AbortOnDrop>>,
}

impl Gateway {
    /// Start building a gateway.
    #[must_use]
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Gateway name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sealed registry.
    #[must_use]
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// The result cache.
    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// The rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The request tracker.
    #[must_use]
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    fn sweepers(&self) -> MutexGuard<'_, Vec<AbortOnDrop>> {
        self.sweepers.lock().unwrap_or_else(|e| {
            warn!("Sweeper list lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// Describe registered capabilities, optionally of one kind.
    #[must_use]
    pub fn list_capabilities(&self, kind: Option<CapabilityKind>) -> Vec<CapabilitySummary> {
        self.registry
            .list(kind)
            .iter()
            .map(|descriptor| descriptor.summary())
            .collect()
    }

    /// Invoke a capability by name.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Arguments,
        caller: Option<&str>,
    ) -> ExecutionOutcome {
        let id = Uuid::new_v4().to_string();
        self.dispatch(build_request(id, name, arguments, caller))
            .await
    }

    /// Run a request on its own task.
    ///
    /// The task boundary isolates the caller from anything that escapes the
    /// pipeline; a failed task becomes `internalError`.
    pub async fn dispatch(&self, request: Request) -> ExecutionOutcome {
        let dispatcher = Arc::clone(&self.dispatcher);
        let request_id = request.id.clone();
        match tokio::spawn(async move { dispatcher.dispatch(request).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Request task failed");
                ExecutionOutcome::internal()
            },
        }
    }

    /// Read a resource by URI.
    ///
    /// # Errors
    ///
    /// Returns the failure outcome: `notFound` for an unknown URI, or
    /// whatever the pipeline produced.
    pub async fn read_resource(
        &self,
        uri: &str,
        caller: Option<&str>,
    ) -> Result<ResourceContent, ExecutionOutcome> {
        self.read_resource_as(Uuid::new_v4().to_string(), uri, caller)
            .await
            .map(|(content, _)| content)
    }

    async fn read_resource_as(
        &self,
        id: String,
        uri: &str,
        caller: Option<&str>,
    ) -> Result<(ResourceContent, ExecutionOutcome), ExecutionOutcome> {
        let Ok(descriptor) = self.registry.lookup_resource(uri) else {
            debug!(uri, "Unknown resource URI");
            return Err(self.untracked_not_found(id, "resource"));
        };
        let descriptor = Arc::clone(descriptor);

        let mut arguments = Arguments::new();
        arguments.insert(
            RESOURCE_URI_ARGUMENT.to_owned(),
            Value::String(uri.to_owned()),
        );
        let mut outcome = self
            .dispatch(build_request(id, &descriptor.name, arguments, caller))
            .await;
        match outcome.payload.take() {
            Some(content) if outcome.is_success() => Ok((
                ResourceContent {
                    uri: uri.to_owned(),
                    mime_type: descriptor.mime_type.clone(),
                    content,
                },
                outcome,
            )),
            _ => Err(outcome),
        }
    }

    /// Render a prompt template.
    ///
    /// # Errors
    ///
    /// Returns the failure outcome: `notFound` if `name` is not a prompt,
    /// `validationError` for missing required or unknown arguments.
    pub async fn render_prompt(
        &self,
        name: &str,
        arguments: Arguments,
        caller: Option<&str>,
    ) -> Result<RenderedPrompt, ExecutionOutcome> {
        self.render_prompt_as(Uuid::new_v4().to_string(), name, arguments, caller)
            .await
            .map(|(rendered, _)| rendered)
    }

    async fn render_prompt_as(
        &self,
        id: String,
        name: &str,
        arguments: Arguments,
        caller: Option<&str>,
    ) -> Result<(RenderedPrompt, ExecutionOutcome), ExecutionOutcome> {
        let is_prompt = self
            .registry
            .lookup(name)
            .is_ok_and(|d| d.kind == CapabilityKind::Prompt);
        if !is_prompt {
            debug!(name, "Unknown prompt");
            return Err(self.untracked_not_found(id, "prompt"));
        }

        let mut outcome = self
            .dispatch(build_request(id, name, arguments, caller))
            .await;
        match outcome.payload.take() {
            Some(payload) if outcome.is_success() => {
                let rendered_text = match payload {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                Ok((
                    RenderedPrompt {
                        name: name.to_owned(),
                        rendered_text,
                    },
                    outcome,
                ))
            },
            _ => Err(outcome),
        }
    }

    /// Record a not-found that never reached the dispatcher.
    fn untracked_not_found(&self, id: String, what: &str) -> ExecutionOutcome {
        let handle = self.tracker.begin(id, UNKNOWN_CAPABILITY);
        let outcome = ExecutionOutcome::not_found(what);
        let elapsed = self.tracker.end(handle, &outcome);
        outcome.with_duration(elapsed)
    }

    /// Current state of the gateway.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        HealthReport {
            name: self.name.clone(),
            capabilities: self.registry.len(),
            cache: self.cache.stats(),
            tracked_callers: self.limiter.tracked_callers(),
            in_flight: self.cache.in_flight_count(),
            total_requests: self.tracker.total_requests(),
            metrics: self.tracker.snapshot(),
            checked_at: Utc::now(),
        }
    }

    /// Serve one wire-level request.
    pub async fn handle(&self, request: GatewayRequest) -> ResponseEnvelope {
        let id = request
            .id()
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);
        debug!(method = request.method(), request_id = %id, "Handling request");

        match request {
            GatewayRequest::ListCapabilities { kind, .. } => {
                envelope(id, &self.list_capabilities(kind), None)
            },
            GatewayRequest::Health { .. } => envelope(id, &self.health(), None),
            GatewayRequest::Invoke {
                capability,
                arguments,
                caller_identity,
                ..
            } => {
                let outcome = self
                    .dispatch(build_request(
                        id.clone(),
                        &capability,
                        arguments,
                        caller_identity.as_deref(),
                    ))
                    .await;
                ResponseEnvelope::from_outcome(id, outcome)
            },
            GatewayRequest::ReadResource {
                uri,
                caller_identity,
                ..
            } => match self
                .read_resource_as(id.clone(), &uri, caller_identity.as_deref())
                .await
            {
                Ok((content, outcome)) => envelope(id, &content, Some(outcome)),
                Err(outcome) => ResponseEnvelope::from_outcome(id, outcome),
            },
            GatewayRequest::RenderPrompt {
                name,
                arguments,
                caller_identity,
                ..
            } => match self
                .render_prompt_as(id.clone(), &name, arguments, caller_identity.as_deref())
                .await
            {
                Ok((rendered, outcome)) => envelope(id, &rendered, Some(outcome)),
                Err(outcome) => ResponseEnvelope::from_outcome(id, outcome),
            },
        }
    }

    /// Stop the background sweepers. Requests are still served.
    pub fn shutdown(&self) {
        let stopped = std::mem::take(&mut *self.sweepers()).len();
        info!(name = %self.name, sweepers = stopped, "Gateway shut down");
    }

    /// Number of running background sweepers.
    #[must_use]
    pub fn active_sweepers(&self) -> usize {
        self.sweepers()
            .iter()
            .filter(|sweeper| !sweeper.is_finished())
            .count()
    }
}

fn build_request(
    id: String,
    capability: &str,
    arguments: Arguments,
    caller: Option<&str>,
) -> Request {
    let request = Request::new(capability, arguments).with_id(id);
    match caller {
        Some(caller) => request.with_caller(caller),
        None => request,
    }
}

/// Successful envelope carrying `payload`, keeping the timing of `outcome`.
fn envelope<T: Serialize>(
    id: String,
    payload: &T,
    outcome: Option<ExecutionOutcome>,
) -> ResponseEnvelope {
    let value = match serde_json::to_value(payload) {
        Ok(value) => value,
        Err(e) => {
            error!(request_id = %id, error = %e, "Failed to encode response payload");
            return ResponseEnvelope::from_outcome(id, ExecutionOutcome::internal());
        },
    };
    match outcome {
        Some(mut outcome) => {
            outcome.payload = Some(value);
            ResponseEnvelope::from_outcome(id, outcome)
        },
        None => ResponseEnvelope::ok(id, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::prompt::PromptTemplate;
    use crate::registry::CapabilityHandler;
    use crate::schema::{FieldSpec, FieldType, InputSchema};
    use crate::types::OutcomeStatus;
    use serde_json::json;

    fn ping() -> CapabilityDescriptor {
        CapabilityDescriptor::tool(
            "ping",
            CapabilityHandler::native(|_| async { Ok(json!("pong")) }),
        )
        .read_only()
    }

    fn greeting() -> CapabilityDescriptor {
        CapabilityDescriptor::prompt("greet", PromptTemplate::new("Hello, {{name}}!")).with_schema(
            InputSchema::new().field(
                FieldSpec::optional("name", FieldType::String).with_default(json!("world")),
            ),
        )
    }

    fn settings() -> CapabilityDescriptor {
        CapabilityDescriptor::resource(
            "settings",
            "config://settings",
            "application/json",
            CapabilityHandler::native(|_| async { Ok(json!({"debug": false})) }),
        )
    }

    fn gateway() -> Gateway {
        GatewayBuilder::new()
            .register(ping())
            .unwrap()
            .register(greeting())
            .unwrap()
            .register(settings())
            .unwrap()
            .build()
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let result = GatewayBuilder::new().register(ping()).unwrap().register(ping());
        assert!(matches!(
            result,
            Err(GatewayError::DuplicateCapability { .. })
        ));
    }

    #[test]
    fn test_build_outside_runtime_has_no_sweepers() {
        let gateway = gateway();
        assert!(gateway.registry().is_sealed());
        assert_eq!(gateway.active_sweepers(), 0);
    }

    #[tokio::test]
    async fn test_sweepers_stop_on_shutdown() {
        let gateway = gateway();
        assert_eq!(gateway.active_sweepers(), 2);
        gateway.shutdown();
        assert_eq!(gateway.active_sweepers(), 0);
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = Config::from_toml_str(
            r#"
            [gateway]
            name = "edge"
            sweep_interval_secs = 0

            [rate_limit]
            max_requests = 1
            window_ms = 60000

            [callers]
            anonymous = "reject"
            "#,
        )
        .unwrap();
        let gateway = GatewayBuilder::from_config(&config)
            .unwrap()
            .register(ping())
            .unwrap()
            .build();
        assert_eq!(gateway.name(), "edge");
        assert_eq!(gateway.active_sweepers(), 0);

        let anonymous = gateway.invoke("ping", Arguments::new(), None).await;
        assert_eq!(anonymous.status, OutcomeStatus::PermissionDenied);

        assert!(gateway.invoke("ping", Arguments::new(), Some("a")).await.is_success());
        let second = gateway.invoke("ping", Arguments::new(), Some("a")).await;
        assert_eq!(second.status, OutcomeStatus::RateLimited);
    }

    #[tokio::test]
    async fn test_list_capabilities_by_kind() {
        let gateway = gateway();
        assert_eq!(gateway.list_capabilities(None).len(), 3);
        let prompts = gateway.list_capabilities(Some(CapabilityKind::Prompt));
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].name, "greet");
    }

    #[tokio::test]
    async fn test_render_prompt_uses_defaults() {
        let gateway = gateway();
        let rendered = gateway
            .render_prompt("greet", Arguments::new(), None)
            .await
            .unwrap();
        assert_eq!(rendered.rendered_text, "Hello, world!");

        let not_prompt = gateway
            .render_prompt("ping", Arguments::new(), None)
            .await
            .unwrap_err();
        assert_eq!(not_prompt.status, OutcomeStatus::NotFound);
    }

    #[tokio::test]
    async fn test_read_resource() {
        let gateway = gateway();
        let content = gateway
            .read_resource("config://settings", None)
            .await
            .unwrap();
        assert_eq!(content.mime_type.as_deref(), Some("application/json"));
        assert_eq!(content.content, json!({"debug": false}));

        let missing = gateway.read_resource("config://nope", None).await.unwrap_err();
        assert_eq!(missing.status, OutcomeStatus::NotFound);
        assert_eq!(
            gateway
                .tracker()
                .capability(UNKNOWN_CAPABILITY)
                .unwrap()
                .count,
            1
        );
    }

    #[tokio::test]
    async fn test_handle_envelopes() {
        let gateway = gateway();

        let invoke: GatewayRequest = serde_json::from_value(json!({
            "method": "invoke",
            "id": "req-1",
            "capability": "ping"
        }))
        .unwrap();
        let response = gateway.handle(invoke).await;
        assert_eq!(response.id, "req-1");
        assert_eq!(response.payload, Some(json!("pong")));

        let prompt: GatewayRequest = serde_json::from_value(json!({
            "method": "renderPrompt",
            "name": "greet",
            "arguments": {"name": "Ada"}
        }))
        .unwrap();
        let response = gateway.handle(prompt).await;
        assert_eq!(response.payload.unwrap()["renderedText"], "Hello, Ada!");
        assert!(Uuid::parse_str(&response.id).is_ok());

        let health = gateway.handle(GatewayRequest::Health { id: None }).await;
        let report = health.payload.unwrap();
        assert_eq!(report["capabilities"], 3);
        assert_eq!(report["totalRequests"], 2);

        let unknown = gateway
            .handle(GatewayRequest::Invoke {
                id: Some("req-2".to_owned()),
                capability: "missing".to_owned(),
                arguments: Arguments::new(),
                caller_identity: None,
            })
            .await;
        assert_eq!(unknown.error_code.as_deref(), Some("not_found"));
    }
}
