//! Reading and parsing a single configuration file.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Read `path`, parse it as TOML and validate the result.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, does not parse, or
/// fails validation.
pub fn load(path: &Path) -> ConfigResult<Config> {
    let origin = path.display().to_string();
    let source = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: origin.clone(),
        source: e,
    })?;

    let config = parse(&origin, &source)?;
    info!(path = %origin, "loaded gateway config");
    Ok(config)
}

/// Parse `source` as TOML and validate the result. `origin` is only used in
/// error messages.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the document does not parse or fails
/// validation.
pub fn parse(origin: &str, source: &str) -> ConfigResult<Config> {
    let config: Config = toml::from_str(source).map_err(|e| ConfigError::ParseError {
        path: origin.to_owned(),
        source: e,
    })?;

    validate::validate(&config)?;
    debug!(origin, "config validated");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[rate_limit]\nmax_requests = 5\nwindow_ms = 250\n\n[execution]\nallowed_commands = [\"echo\"]"
        )
        .unwrap();

        let config = load(file.path()).unwrap();
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_ms, 250);
        assert_eq!(config.execution.allowed_commands, vec!["echo"]);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_parse_error_names_origin() {
        let err = parse("gateway.toml", "[rate_limit\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("gateway.toml"));
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let err = parse("<inline>", "[cache]\ncapacity = \"many\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_parse_runs_validation() {
        let err = parse("<inline>", "[rate_limit]\nmax_requests = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }
}
