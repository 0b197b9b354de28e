//! Configuration types for the gateway.
//!
//! Every struct implements [`Default`] so a bare `[section]` header in TOML
//! produces a working configuration.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration for a gateway instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway identity and housekeeping.
    pub gateway: GatewaySection,
    /// Sliding-window admission control.
    pub rate_limit: RateLimitSection,
    /// Result cache sizing and expiry.
    pub cache: CacheSection,
    /// Execution limits and allow-lists.
    pub execution: ExecutionSection,
    /// How requests without a caller identity are treated.
    pub callers: CallerSection,
    /// Logging level, format and directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// GatewaySection
// ---------------------------------------------------------------------------

/// Gateway identity and housekeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Name reported by the health endpoint.
    pub name: String,
    /// Seconds between background sweeps of the rate-limit windows and the
    /// cache. `0` disables the sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            name: "tollgate".to_owned(),
            sweep_interval_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimitSection
// ---------------------------------------------------------------------------

/// Per-caller sliding-window limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Maximum requests admitted per caller inside one window.
    pub max_requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_ms: 60_000,
        }
    }
}

// ---------------------------------------------------------------------------
// CacheSection
// ---------------------------------------------------------------------------

/// Result cache for read-only capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Maximum number of cached results.
    pub capacity: usize,
    /// Time-to-live for cached results, in seconds.
    pub default_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capacity: 1024,
            default_ttl_secs: 300,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionSection
// ---------------------------------------------------------------------------

/// Limits applied to every capability execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    /// Wall-clock budget per execution, in milliseconds.
    pub max_execution_time_ms: u64,
    /// Output ceiling per execution, in bytes.
    pub max_output_bytes: usize,
    /// Commands that process-backed capabilities may run (bare names,
    /// matched against the basename of the resolved program).
    pub allowed_commands: Vec<String>,
    /// Absolute directories that path arguments may point into. Empty means
    /// any location (traversal sequences are always rejected).
    pub allowed_roots: Vec<String>,
    /// Clear the child environment except a small set of safe variables.
    pub sandbox_env: bool,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 30_000,
            max_output_bytes: 1024 * 1024,
            allowed_commands: Vec::new(),
            allowed_roots: Vec::new(),
            sandbox_env: true,
        }
    }
}

// ---------------------------------------------------------------------------
// CallerSection
// ---------------------------------------------------------------------------

/// Treatment of requests that arrive without a caller identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnonymousPolicy {
    /// All anonymous requests share one rate-limit window under
    /// `anonymous_identity`.
    #[default]
    Shared,
    /// Anonymous requests are refused with `permission_denied`.
    Reject,
}

/// Caller identity settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallerSection {
    /// Policy for requests without a caller identity.
    pub anonymous: AnonymousPolicy,
    /// Identity used for anonymous requests under the `shared` policy.
    pub anonymous_identity: String,
}

impl Default for CallerSection {
    fn default() -> Self {
        Self {
            anonymous: AnonymousPolicy::Shared,
            anonymous_identity: "local".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global level filter (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Output format: `pretty`, `compact`, `json` or `full`.
    pub format: String,
    /// Per-crate directives (`["tollgate_gateway=debug"]`).
    pub directives: Vec<String>,
    /// Write daily-rotated log files here instead of stderr.
    pub directory: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
            directory: None,
        }
    }
}
