//! Declarative input schemas.
//!
//! An [`InputSchema`] lists the named fields a capability accepts. It is
//! checked by the [`InputValidator`](crate::validator::InputValidator) before
//! any handler runs, and exported as JSON Schema for capability listings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{GatewayError, GatewayResult};

/// Expected type of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    /// Any JSON string.
    String,
    /// Any JSON number.
    Number,
    /// A number without a fractional part.
    Integer,
    /// `true` or `false`.
    Boolean,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
    /// One of a fixed set of values.
    Enum {
        /// Allowed values.
        values: Vec<Value>,
    },
    /// A string naming a filesystem location. Subject to path safety and
    /// allowed-root checks.
    Path,
    /// No type constraint.
    Any,
}

impl FieldType {
    /// Short name used in violation messages.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Enum { .. } => "enum",
            Self::Path => "path",
            Self::Any => "any",
        }
    }

    /// Whether `value` has this type. Enum membership and path safety are
    /// checked separately by the validator.
    #[must_use]
    pub fn admits(&self, value: &Value) -> bool {
        match self {
            Self::String | Self::Path => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Enum { .. } | Self::Any => true,
        }
    }
}

/// One named field of an input schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Argument name.
    pub name: String,
    /// Expected type.
    #[serde(flatten)]
    pub field_type: FieldType,
    /// Whether the argument must be present.
    #[serde(default)]
    pub required: bool,
    /// Description shown in listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Value used by prompt rendering when the argument is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldSpec {
    /// A field that must be present.
    #[must_use]
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            description: None,
            default: None,
        }
    }

    /// A field that may be omitted.
    #[must_use]
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the default value.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn to_json_schema(&self) -> Value {
        let mut property = match &self.field_type {
            FieldType::Path => json!({"type": "string", "format": "path"}),
            FieldType::Enum { values } => json!({"enum": values}),
            FieldType::Any => json!({}),
            other => json!({"type": other.describe()}),
        };
        if let Some(object) = property.as_object_mut() {
            if let Some(description) = &self.description {
                object.insert("description".to_owned(), json!(description));
            }
            if let Some(default) = &self.default {
                object.insert("default".to_owned(), default.clone());
            }
        }
        property
    }

    fn from_json_schema(name: &str, property: &Value, required: bool) -> GatewayResult<Self> {
        let property = property.as_object().ok_or_else(|| {
            GatewayError::InvalidSchema(format!("property '{name}' is not an object"))
        })?;

        let field_type = if let Some(values) = property.get("enum") {
            let values = values.as_array().ok_or_else(|| {
                GatewayError::InvalidSchema(format!("enum of '{name}' is not an array"))
            })?;
            FieldType::Enum {
                values: values.clone(),
            }
        } else {
            match property.get("type").and_then(Value::as_str) {
                Some("string") if property.get("format").and_then(Value::as_str) == Some("path") => {
                    FieldType::Path
                },
                Some("string") => FieldType::String,
                Some("number") => FieldType::Number,
                Some("integer") => FieldType::Integer,
                Some("boolean") => FieldType::Boolean,
                Some("array") => FieldType::Array,
                Some("object") => FieldType::Object,
                None => FieldType::Any,
                Some(other) => {
                    return Err(GatewayError::InvalidSchema(format!(
                        "unsupported type '{other}' for '{name}'"
                    )));
                },
            }
        };

        Ok(Self {
            name: name.to_owned(),
            field_type,
            required,
            description: property
                .get("description")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            default: property.get("default").cloned(),
        })
    }
}

/// Ordered set of field specifications.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default)]
    fields: Vec<FieldSpec>,
    /// Reject arguments that match no declared field.
    #[serde(default)]
    strict: bool,
}

impl InputSchema {
    /// An empty, lenient schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing any earlier field with the same name.
    #[must_use]
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.insert(spec);
        self
    }

    /// Reject unknown arguments.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Add a field in place, replacing any earlier field with the same name.
    pub fn insert(&mut self, spec: FieldSpec) {
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == spec.name) {
            *existing = spec;
        } else {
            self.fields.push(spec);
        }
    }

    /// Declared fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Look up a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether unknown arguments are rejected.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Export as a JSON Schema object.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            properties.insert(field.name.clone(), field.to_json_schema());
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": !self.strict,
        })
    }

    /// Build from a JSON Schema object with `properties`, `required` and
    /// optionally `additionalProperties: false`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidSchema`] if the document is not an
    /// object schema or uses an unsupported property type.
    pub fn from_json_schema(schema: &Value) -> GatewayResult<Self> {
        let object = schema
            .as_object()
            .ok_or_else(|| GatewayError::InvalidSchema("schema is not an object".to_owned()))?;

        if let Some(kind) = object.get("type").and_then(Value::as_str)
            && kind != "object"
        {
            return Err(GatewayError::InvalidSchema(format!(
                "top-level type must be 'object', got '{kind}'"
            )));
        }

        let required: Vec<&str> = object
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut result = Self::new();
        if let Some(properties) = object.get("properties") {
            let properties = properties.as_object().ok_or_else(|| {
                GatewayError::InvalidSchema("'properties' is not an object".to_owned())
            })?;
            for (name, property) in properties {
                let is_required = required.contains(&name.as_str());
                result.insert(FieldSpec::from_json_schema(name, property, is_required)?);
            }
        }

        result.strict = object.get("additionalProperties") == Some(&Value::Bool(false));
        Ok(result)
    }
}
