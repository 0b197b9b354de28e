//! Post-parse configuration validation.
//!
//! Checks that values are inside their accepted ranges and that
//! cross-field invariants hold.

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{AnonymousPolicy, Config};

/// Upper bound on the execution budget (one hour).
const MAX_EXECUTION_TIME_MS: u64 = 3_600_000;

/// Upper bound on the output ceiling (256 MiB).
const MAX_OUTPUT_BYTES: usize = 256 * 1024 * 1024;

/// Validate a parsed configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_rate_limit(config)?;
    validate_cache(config)?;
    validate_execution(config)?;
    validate_callers(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_rate_limit(config: &Config) -> ConfigResult<()> {
    let r = &config.rate_limit;
    if r.max_requests == 0 {
        return Err(invalid(
            "rate_limit.max_requests",
            "must be at least 1; a zero limit would refuse every request",
        ));
    }
    if r.window_ms == 0 {
        return Err(invalid("rate_limit.window_ms", "must be at least 1"));
    }
    Ok(())
}

fn validate_cache(config: &Config) -> ConfigResult<()> {
    if config.cache.capacity == 0 {
        return Err(invalid("cache.capacity", "must be at least 1"));
    }
    if config.cache.default_ttl_secs == 0 {
        return Err(invalid("cache.default_ttl_secs", "must be at least 1"));
    }
    Ok(())
}

fn validate_execution(config: &Config) -> ConfigResult<()> {
    let e = &config.execution;

    if e.max_execution_time_ms == 0 || e.max_execution_time_ms > MAX_EXECUTION_TIME_MS {
        return Err(invalid(
            "execution.max_execution_time_ms",
            format!("must be between 1 and {MAX_EXECUTION_TIME_MS}"),
        ));
    }

    if e.max_output_bytes == 0 || e.max_output_bytes > MAX_OUTPUT_BYTES {
        return Err(invalid(
            "execution.max_output_bytes",
            format!("must be between 1 and {MAX_OUTPUT_BYTES}"),
        ));
    }

    for command in &e.allowed_commands {
        if command.trim().is_empty() || command.contains('/') || command.contains('\\') {
            return Err(invalid(
                "execution.allowed_commands",
                format!("'{command}' must be a bare command name"),
            ));
        }
    }

    for root in &e.allowed_roots {
        if !Path::new(root).is_absolute() {
            return Err(invalid(
                "execution.allowed_roots",
                format!("'{root}' must be an absolute path"),
            ));
        }
    }

    Ok(())
}

fn validate_callers(config: &Config) -> ConfigResult<()> {
    let c = &config.callers;
    if c.anonymous == AnonymousPolicy::Shared && c.anonymous_identity.trim().is_empty() {
        return Err(invalid(
            "callers.anonymous_identity",
            "must be non-empty when anonymous = \"shared\"",
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(
        l.level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    ) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported level '{}'; expected trace, debug, info, warn, error or off",
                l.level
            ),
        ));
    }
    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported format '{}'; expected pretty, compact, json or full",
                l.format
            ),
        ));
    }
    if l.directory.as_deref().is_some_and(|d| d.trim().is_empty()) {
        return Err(invalid("logging.directory", "must not be empty when set"));
    }
    Ok(())
}
