//! The request pipeline.
//!
//! Each request moves through
//! `Received → Validated → Admitted → CacheChecked → Executing → Completed`
//! and stops at the first stage that fails. Expected failures (bad
//! arguments, rate limiting, timeouts) are returned as outcomes, never as
//! errors, and every request is recorded by the tracker whatever its fate.

use std::sync::Arc;

use tollgate_config::{AnonymousPolicy, CallerSection};
use tollgate_telemetry::RequestContext;
use tracing::{Instrument, debug, trace, warn};

use crate::cache::{ResultCache, ResultSource};
use crate::executor::SandboxedExecutor;
use crate::fingerprint::Fingerprint;
use crate::rate_limit::{RateLimitResult, RateLimiter};
use crate::registry::{CapabilityDescriptor, CapabilityRegistry};
use crate::tracker::{Tracker, TrackingHandle, UNKNOWN_CAPABILITY};
use crate::types::{Arguments, ExecutionOutcome, OutcomeStatus, Request};
use crate::validator::InputValidator;

/// How requests without a caller identity are admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnonymousCallerPolicy {
    /// Refuse them with `permissionDenied`.
    Reject,
    /// Admit them under one shared rate-limit identity.
    Shared {
        /// The shared identity.
        identity: String,
    },
}

impl Default for AnonymousCallerPolicy {
    fn default() -> Self {
        Self::Shared {
            identity: "local".to_owned(),
        }
    }
}

impl AnonymousCallerPolicy {
    /// Build from the `[callers]` config section.
    #[must_use]
    pub fn from_section(section: &CallerSection) -> Self {
        match section.anonymous {
            AnonymousPolicy::Reject => Self::Reject,
            AnonymousPolicy::Shared => Self::Shared {
                identity: section.anonymous_identity.clone(),
            },
        }
    }

    /// Rate-limit identity for `caller`, or `None` if the request must be
    /// refused. Blank identities count as absent.
    #[must_use]
    pub fn resolve<'a>(&'a self, caller: Option<&'a str>) -> Option<&'a str> {
        match caller.map(str::trim).filter(|c| !c.is_empty()) {
            Some(caller) => Some(caller),
            None => match self {
                Self::Reject => None,
                Self::Shared { identity } => Some(identity.as_str()),
            },
        }
    }
}

/// Pipeline position of a request, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Accepted from the transport.
    Received,
    /// Capability resolved and arguments validated.
    Validated,
    /// Caller admitted by the rate limiter.
    Admitted,
    /// Cache consulted (read-only capabilities only).
    CacheChecked,
    /// Handler running.
    Executing,
    /// Outcome produced.
    Completed,
}

fn enter(stage: Stage) {
    trace!(?stage, "Pipeline stage");
}

/// Drives requests through validation, admission, caching and execution.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    validator: InputValidator,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResultCache>,
    executor: SandboxedExecutor,
    tracker: Arc<Tracker>,
    anonymous: AnonymousCallerPolicy,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<CapabilityRegistry>,
        validator: InputValidator,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResultCache>,
        executor: SandboxedExecutor,
        tracker: Arc<Tracker>,
        anonymous: AnonymousCallerPolicy,
    ) -> Self {
        Self {
            registry,
            validator,
            limiter,
            cache,
            executor,
            tracker,
            anonymous,
        }
    }

    /// Run one request to completion.
    pub async fn dispatch(&self, request: Request) -> ExecutionOutcome {
        let mut context = RequestContext::with_request_id(&request.id, "dispatcher")
            .with_operation("invoke")
            .with_capability(&request.capability);
        if let Some(caller) = &request.caller {
            context = context.with_caller(caller);
        }
        self.run(request).instrument(context.span()).await
    }

    async fn run(&self, request: Request) -> ExecutionOutcome {
        let Request {
            id,
            capability,
            arguments,
            caller,
        } = request;
        enter(Stage::Received);

        let descriptor = match self.registry.lookup(&capability) {
            Ok(descriptor) => Arc::clone(descriptor),
            Err(_) => {
                debug!("Unknown capability");
                let handle = self.tracker.begin(id, UNKNOWN_CAPABILITY);
                return self.finish(handle, ExecutionOutcome::not_found("capability"));
            },
        };

        let handle = self.tracker.begin(id, descriptor.name.as_str());
        let outcome = self.pipeline(&descriptor, arguments, caller.as_deref()).await;
        self.finish(handle, outcome)
    }

    async fn pipeline(
        &self,
        descriptor: &CapabilityDescriptor,
        arguments: Arguments,
        caller: Option<&str>,
    ) -> ExecutionOutcome {
        let validation = self.validator.validate(descriptor, &arguments);
        if !validation.is_valid() {
            let status = validation.status();
            if status == OutcomeStatus::PermissionDenied {
                warn!(
                    security = true,
                    capability = %descriptor.name,
                    violations = validation.violations().len(),
                    "Request refused by execution policy"
                );
            } else {
                debug!(violations = validation.violations().len(), "Arguments rejected");
            }
            let message = validation.summary();
            return ExecutionOutcome::failure(status, message)
                .with_violations(validation.into_violations());
        }
        enter(Stage::Validated);

        let Some(identity) = self.anonymous.resolve(caller) else {
            warn!(security = true, capability = %descriptor.name, "Anonymous request refused");
            return ExecutionOutcome::failure(
                OutcomeStatus::PermissionDenied,
                "a caller identity is required",
            );
        };
        match self.limiter.check(identity) {
            RateLimitResult::Allowed { remaining } => trace!(remaining, "Admitted"),
            RateLimitResult::Denied { retry_after } => {
                debug!(retry_after_ms = ?retry_after, "Rate limited");
                return ExecutionOutcome::rate_limited(retry_after);
            },
        }
        enter(Stage::Admitted);

        let limits = self.executor.limits_for(descriptor);
        if !descriptor.read_only {
            enter(Stage::Executing);
            return self.executor.execute(descriptor, arguments, limits).await;
        }

        let fingerprint = Fingerprint::of(&descriptor.name, &arguments);
        let ttl = descriptor.cache_ttl.unwrap_or_else(|| self.cache.default_ttl());
        let (outcome, source) = self
            .cache
            .get_or_execute(fingerprint, ttl, || {
                enter(Stage::CacheChecked);
                enter(Stage::Executing);
                self.executor.execute(descriptor, arguments, limits)
            })
            .await;
        match source {
            ResultSource::Cache => debug!(fingerprint = %fingerprint.short(), "Cache hit"),
            ResultSource::Coalesced => {
                debug!(fingerprint = %fingerprint.short(), "Shared in-flight result");
            },
            ResultSource::Executed => {},
        }
        outcome
    }

    fn finish(&self, handle: TrackingHandle, outcome: ExecutionOutcome) -> ExecutionOutcome {
        let elapsed = self.tracker.end(handle, &outcome);
        let outcome = outcome.with_duration(elapsed);
        enter(Stage::Completed);
        debug!(
            status = %outcome.status,
            duration_ms = outcome.duration_ms,
            cached = outcome.cached,
            "Request completed"
        );
        outcome
    }
}
