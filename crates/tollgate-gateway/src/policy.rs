//! Execution policy: allow-lists and resource limits.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tollgate_config::ExecutionSection;

/// Default wall-clock budget per execution.
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(30);

/// Default output ceiling per execution (1 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Time and size bounds for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Wall-clock budget.
    pub max_execution_time: Duration,
    /// Output ceiling in bytes.
    pub max_output_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// What capabilities are allowed to touch, and how long they may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    allowed_commands: BTreeSet<String>,
    allowed_roots: Vec<PathBuf>,
    limits: ExecutionLimits,
    sandbox_env: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            allowed_commands: BTreeSet::new(),
            allowed_roots: Vec::new(),
            limits: ExecutionLimits::default(),
            sandbox_env: true,
        }
    }
}

impl ExecutionPolicy {
    /// Default limits, no commands, no root restriction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[execution]` config section.
    #[must_use]
    pub fn from_section(section: &ExecutionSection) -> Self {
        Self {
            allowed_commands: section.allowed_commands.iter().cloned().collect(),
            allowed_roots: section.allowed_roots.iter().map(PathBuf::from).collect(),
            limits: ExecutionLimits {
                max_execution_time: Duration::from_millis(section.max_execution_time_ms),
                max_output_bytes: section.max_output_bytes,
            },
            sandbox_env: section.sandbox_env,
        }
    }

    /// Permit `command` (a bare program name).
    #[must_use]
    pub fn allow_command(mut self, command: impl Into<String>) -> Self {
        self.allowed_commands.insert(command.into());
        self
    }

    /// Restrict absolute path arguments to locations under `root`.
    #[must_use]
    pub fn allow_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.allowed_roots.push(root.into());
        self
    }

    /// Set the wall-clock budget.
    #[must_use]
    pub fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.limits.max_execution_time = limit;
        self
    }

    /// Set the output ceiling.
    #[must_use]
    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.limits.max_output_bytes = limit;
        self
    }

    /// Pass the parent environment through to child processes.
    #[must_use]
    pub fn without_env_sandbox(mut self) -> Self {
        self.sandbox_env = false;
        self
    }

    /// Default limits.
    #[must_use]
    pub fn limits(&self) -> ExecutionLimits {
        self.limits
    }

    /// Whether child environments are cleared.
    #[must_use]
    pub fn sandbox_env(&self) -> bool {
        self.sandbox_env
    }

    /// Whether `name` (a basename) is on the allow-list.
    #[must_use]
    pub fn is_command_allowed(&self, name: &str) -> bool {
        self.allowed_commands.contains(name)
    }

    /// Whether `path` is acceptable under the root restriction. Relative
    /// paths are resolved by the capability itself and always pass; absolute
    /// ones must sit under a configured root when any are configured.
    ///
    /// `path` must already be free of `..` components.
    #[must_use]
    pub fn is_path_allowed(&self, path: &Path) -> bool {
        if self.allowed_roots.is_empty() || !path.is_absolute() {
            return true;
        }
        let normalized: PathBuf = path
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        self.allowed_roots.iter().any(|root| normalized.starts_with(root))
    }
}
