//! Argument validation against input schemas and the execution policy.
//!
//! Validation is a pure function of its inputs. It never blocks, never
//! touches the filesystem and is safe to call from any number of tasks.
//! Every violation is collected so callers see all problems at once.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::ExecutionPolicy;
use crate::registry::{CapabilityDescriptor, CapabilityHandler, CommandIssue};
use crate::schema::{FieldType, InputSchema};
use crate::types::{Arguments, OutcomeStatus};

/// Characters rejected in path arguments.
const UNSAFE_PATH_CHARS: &[char] = &['<', '>', '"', '|', '?', '*'];

/// Category of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A required field is absent or null.
    Missing,
    /// The value has the wrong JSON type.
    TypeMismatch,
    /// The value is not one of the enumerated options.
    NotInEnum,
    /// A path contains control or shell-special characters.
    UnsafePath,
    /// A path contains a `..` segment.
    PathTraversal,
    /// The argument is not declared by a strict schema.
    UnknownField,
    /// A path lies outside every allowed root.
    PathNotAllowed,
    /// A command is not on the allow-list.
    CommandNotAllowed,
}

impl ViolationKind {
    /// Whether this finding is a policy refusal rather than a malformed
    /// argument.
    #[must_use]
    pub fn is_permission(self) -> bool {
        matches!(self, Self::PathNotAllowed | Self::CommandNotAllowed)
    }
}

/// One problem with one argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Offending argument name.
    pub field: String,
    /// Category.
    pub kind: ViolationKind,
    /// Description. Never echoes the argument value.
    pub reason: String,
}

impl Violation {
    fn new(field: &str, kind: ViolationKind, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_owned(),
            kind,
            reason: reason.into(),
        }
    }
}

/// Result of validating one set of arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    violations: Vec<Violation>,
}

impl ValidationResult {
    /// Whether no violations were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// All findings, in schema order.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Consume into the findings.
    #[must_use]
    pub fn into_violations(self) -> Vec<Violation> {
        self.violations
    }

    /// Whether any finding is a policy refusal.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        self.violations.iter().any(|v| v.kind.is_permission())
    }

    /// Outcome status for a failed validation. Policy refusals take
    /// precedence over malformed arguments.
    #[must_use]
    pub fn status(&self) -> OutcomeStatus {
        if self.is_valid() {
            OutcomeStatus::Success
        } else if self.is_permission_denied() {
            OutcomeStatus::PermissionDenied
        } else {
            OutcomeStatus::ValidationError
        }
    }

    /// One-line summary for the caller.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.violations.as_slice() {
            [] => "arguments are valid".to_owned(),
            [only] => format!("{}: {}", only.field, only.reason),
            [first, rest @ ..] => format!(
                "{}: {} (and {} more)",
                first.field,
                first.reason,
                rest.len()
            ),
        }
    }
}

/// Checks arguments against a schema and the execution policy.
#[derive(Debug, Clone, Default)]
pub struct InputValidator {
    policy: ExecutionPolicy,
}

impl InputValidator {
    /// Validator enforcing `policy`.
    #[must_use]
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self { policy }
    }

    /// The enforced policy.
    #[must_use]
    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Validate `arguments` for `descriptor`: schema, paths, and for process
    /// handlers the resolved command.
    #[must_use]
    pub fn validate(
        &self,
        descriptor: &CapabilityDescriptor,
        arguments: &Arguments,
    ) -> ValidationResult {
        let mut violations = self.check_schema(&descriptor.input_schema, arguments);

        if let CapabilityHandler::Process(spec) = &descriptor.handler {
            match spec.resolve(arguments) {
                Ok(command) => {
                    let field = spec.command_field().unwrap_or("command");
                    if !self.policy.is_command_allowed(command.command_name()) {
                        violations.push(Violation::new(
                            field,
                            ViolationKind::CommandNotAllowed,
                            format!("command '{}' is not allowed", command.command_name()),
                        ));
                    }
                    // Caller-supplied tokens follow the registrant's fixed
                    // arguments and are treated as paths.
                    let caller_tokens = command.args.iter().skip(spec.args.len());
                    violations.extend(
                        caller_tokens.filter_map(|token| self.check_command_token(field, token)),
                    );
                },
                // Missing or mistyped command fields are already reported by
                // the schema check.
                Err(CommandIssue::Missing(_)) => {},
                Err(CommandIssue::Empty(field)) => violations.push(Violation::new(
                    &field,
                    ViolationKind::Missing,
                    "command must not be empty",
                )),
                Err(CommandIssue::NotBareName(field)) => violations.push(Violation::new(
                    &field,
                    ViolationKind::CommandNotAllowed,
                    "command must be a bare program name",
                )),
            }
        }

        ValidationResult { violations }
    }

    /// Validate `arguments` against `schema` alone.
    #[must_use]
    pub fn check_schema(&self, schema: &InputSchema, arguments: &Arguments) -> Vec<Violation> {
        let mut violations = Vec::new();

        for field in schema.fields() {
            let value = match arguments.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        violations.push(Violation::new(
                            &field.name,
                            ViolationKind::Missing,
                            "required field is missing",
                        ));
                    }
                    continue;
                },
                Some(value) => value,
            };

            if !field.field_type.admits(value) {
                violations.push(Violation::new(
                    &field.name,
                    ViolationKind::TypeMismatch,
                    format!(
                        "expected {}, got {}",
                        field.field_type.describe(),
                        json_type(value)
                    ),
                ));
                continue;
            }

            match &field.field_type {
                FieldType::Enum { values } if !values.contains(value) => {
                    violations.push(Violation::new(
                        &field.name,
                        ViolationKind::NotInEnum,
                        format!("must be one of {} allowed values", values.len()),
                    ));
                },
                FieldType::Path => {
                    if let Some(path) = value.as_str()
                        && let Some(violation) = self.check_path(&field.name, path)
                    {
                        violations.push(violation);
                    }
                },
                _ => {},
            }
        }

        if schema.is_strict() {
            for name in arguments.keys() {
                if schema.get(name).is_none() {
                    violations.push(Violation::new(
                        name,
                        ViolationKind::UnknownField,
                        "field is not accepted by this capability",
                    ));
                }
            }
        }

        violations
    }

    /// Flags pass unless they carry a value (`--file=x`), which is checked
    /// as a path like any other token.
    fn check_command_token(&self, field: &str, token: &str) -> Option<Violation> {
        let operand = match token.strip_prefix('-') {
            Some(flag) => flag.split_once('=')?.1,
            None => token,
        };
        self.check_path(field, operand)
    }

    fn check_path(&self, field: &str, path: &str) -> Option<Violation> {
        if path.is_empty() {
            return Some(Violation::new(
                field,
                ViolationKind::UnsafePath,
                "path must not be empty",
            ));
        }
        if path
            .chars()
            .any(|c| c.is_control() || UNSAFE_PATH_CHARS.contains(&c))
        {
            return Some(Violation::new(
                field,
                ViolationKind::UnsafePath,
                "path contains control or reserved characters",
            ));
        }
        if has_traversal(path) {
            return Some(Violation::new(
                field,
                ViolationKind::PathTraversal,
                "path must not contain '..' segments",
            ));
        }
        if !self.policy.is_path_allowed(Path::new(path)) {
            return Some(Violation::new(
                field,
                ViolationKind::PathNotAllowed,
                "path is outside the allowed roots",
            ));
        }
        None
    }
}

/// `..` as a segment under either separator, before or after one round of
/// percent-decoding.
fn has_traversal(path: &str) -> bool {
    let is_parent = |text: &str| text.split(['/', '\\']).any(|segment| segment == "..");
    let decoded = urlencoding::decode_binary(path.as_bytes());
    is_parent(path) || is_parent(&String::from_utf8_lossy(&decoded)[..])
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
