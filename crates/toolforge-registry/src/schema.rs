//! Input-schema model and argument validation.
//!
//! Primitives declare their arguments with a small JSON-Schema subset: an
//! object with typed properties, per-property constraints and a
//! `required` list. Unknown keywords are ignored and extra arguments are
//! allowed.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON type names a property may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl SchemaType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
            }
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
        }
    }
}

/// One declared property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSchemaProperty {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SchemaType>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Element schema for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<JsonSchemaProperty>>,
}

/// The schema of a primitive's `args` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type", default = "object_type")]
    pub kind: SchemaType,
    #[serde(default)]
    pub properties: BTreeMap<String, JsonSchemaProperty>,
    #[serde(default)]
    pub required: Vec<String>,
}

fn object_type() -> SchemaType {
    SchemaType::Object
}

impl Default for InputSchema {
    fn default() -> Self {
        Self {
            kind: SchemaType::Object,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

/// A single failed constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Argument path, e.g. `value` or `tags[2]`.
    pub field: String,
    /// Keyword that failed: `required`, `type`, `enum`, `minimum`, ...
    pub constraint: &'static str,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` {} ({})", self.field, self.message, self.constraint)
    }
}

/// Every violation found in one argument object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<Violation>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl InputSchema {
    /// Parse a stored schema. `null` means "accepts anything".
    ///
    /// Fails on malformed keywords and on `pattern`s that are not valid
    /// regular expressions.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let schema: Self =
            serde_json::from_value(value.clone()).map_err(|e| format!("invalid input schema: {e}"))?;
        if schema.kind != SchemaType::Object {
            return Err(format!(
                "invalid input schema: top-level type must be object, got {}",
                schema.kind.as_str()
            ));
        }
        for (name, property) in &schema.properties {
            check_patterns(name, property)?;
        }
        Ok(schema)
    }

    /// Check `args` against this schema.
    pub fn validate(&self, args: &Value) -> Result<(), ValidationErrors> {
        let empty = Map::new();
        let object = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(ValidationErrors(vec![Violation {
                    field: "args".into(),
                    constraint: "type",
                    message: format!("must be an object, got {}", type_name(other)),
                }]));
            }
        };

        let mut violations = Vec::new();
        for name in &self.required {
            if !object.contains_key(name) {
                violations.push(Violation {
                    field: name.clone(),
                    constraint: "required",
                    message: "is required".into(),
                });
            }
        }
        for (name, property) in &self.properties {
            if let Some(value) = object.get(name) {
                check_property(name, property, value, &mut violations);
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(violations))
        }
    }
}

fn check_patterns(path: &str, property: &JsonSchemaProperty) -> Result<(), String> {
    if let Some(pattern) = &property.pattern {
        Regex::new(pattern).map_err(|e| format!("invalid pattern for `{path}`: {e}"))?;
    }
    if let Some(items) = &property.items {
        check_patterns(&format!("{path}[]"), items)?;
    }
    Ok(())
}

fn check_property(field: &str, property: &JsonSchemaProperty, value: &Value, out: &mut Vec<Violation>) {
    let mut fail = |constraint: &'static str, message: String| {
        out.push(Violation {
            field: field.to_owned(),
            constraint,
            message,
        });
    };

    if let Some(kind) = property.kind {
        if !kind.matches(value) {
            fail(
                "type",
                format!("must be of type {}, got {}", kind.as_str(), type_name(value)),
            );
            return;
        }
    }

    if let Some(allowed) = &property.allowed {
        if !allowed.contains(value) {
            fail("enum", format!("must be one of {}", Value::Array(allowed.clone())));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = property.minimum.filter(|min| n < *min) {
            fail("minimum", format!("must be >= {min}"));
        }
        if let Some(max) = property.maximum.filter(|max| n > *max) {
            fail("maximum", format!("must be <= {max}"));
        }
    }

    if let Some(s) = value.as_str() {
        let len = s.chars().count();
        if let Some(min) = property.min_length.filter(|min| len < *min) {
            fail("minLength", format!("must be at least {min} characters"));
        }
        if let Some(max) = property.max_length.filter(|max| len > *max) {
            fail("maxLength", format!("must be at most {max} characters"));
        }
        if let Some(pattern) = &property.pattern {
            match Regex::new(pattern) {
                Ok(re) if !re.is_match(s) => fail("pattern", format!("must match /{pattern}/")),
                Ok(_) => {}
                Err(_) => fail("pattern", format!("declares an invalid pattern /{pattern}/")),
            }
        }
    }

    if let (Some(items), Some(elements)) = (&property.items, value.as_array()) {
        for (i, element) in elements.iter().enumerate() {
            check_property(&format!("{field}[{i}]"), items, element, out);
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: Value) -> InputSchema {
        InputSchema::from_value(&value).unwrap()
    }

    fn echo_schema() -> InputSchema {
        schema(json!({
            "type": "object",
            "properties": { "value": { "type": "string" } },
            "required": ["value"]
        }))
    }

    #[test]
    fn missing_required_names_the_field() {
        let err = echo_schema().validate(&json!({})).unwrap_err();
        assert_eq!(err.0.len(), 1);
        assert_eq!(err.0[0].field, "value");
        assert_eq!(err.0[0].constraint, "required");
        assert!(err.to_string().contains("value"));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let err = echo_schema().validate(&json!({"value": 3})).unwrap_err();
        assert_eq!(err.0[0].constraint, "type");
        assert!(err.0[0].message.contains("string"));
    }

    #[test]
    fn null_args_mean_empty_object() {
        assert!(InputSchema::default().validate(&Value::Null).is_ok());
        assert!(echo_schema().validate(&Value::Null).is_err());
    }

    #[test]
    fn non_object_args_are_rejected() {
        let err = InputSchema::default().validate(&json!([1])).unwrap_err();
        assert_eq!(err.0[0].field, "args");
    }

    #[test]
    fn numeric_bounds() {
        let s = schema(json!({
            "properties": { "n": { "type": "integer", "minimum": 1, "maximum": 10 } }
        }));
        assert!(s.validate(&json!({"n": 5})).is_ok());
        assert!(s.validate(&json!({"n": 5.0})).is_ok());
        assert_eq!(s.validate(&json!({"n": 0})).unwrap_err().0[0].constraint, "minimum");
        assert_eq!(s.validate(&json!({"n": 11})).unwrap_err().0[0].constraint, "maximum");
        assert_eq!(s.validate(&json!({"n": 1.5})).unwrap_err().0[0].constraint, "type");
    }

    #[test]
    fn string_constraints() {
        let s = schema(json!({
            "properties": {
                "code": { "type": "string", "minLength": 2, "maxLength": 4, "pattern": "^[A-Z]+$" }
            }
        }));
        assert!(s.validate(&json!({"code": "AB"})).is_ok());
        assert_eq!(s.validate(&json!({"code": "A"})).unwrap_err().0[0].constraint, "minLength");
        assert_eq!(
            s.validate(&json!({"code": "ABCDE"})).unwrap_err().0[0].constraint,
            "maxLength"
        );
        assert_eq!(s.validate(&json!({"code": "ab"})).unwrap_err().0[0].constraint, "pattern");
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let s = schema(json!({"properties": {"s": {"type": "string", "maxLength": 2}}}));
        assert!(s.validate(&json!({"s": "éé"})).is_ok());
    }

    #[test]
    fn enum_membership() {
        let s = schema(json!({
            "properties": { "mode": { "type": "string", "enum": ["fast", "slow"] } }
        }));
        assert!(s.validate(&json!({"mode": "fast"})).is_ok());
        let err = s.validate(&json!({"mode": "medium"})).unwrap_err();
        assert_eq!(err.0[0].constraint, "enum");
    }

    #[test]
    fn array_items_are_checked_with_index() {
        let s = schema(json!({
            "properties": { "tags": { "type": "array", "items": { "type": "string" } } }
        }));
        let err = s.validate(&json!({"tags": ["a", 2]})).unwrap_err();
        assert_eq!(err.0[0].field, "tags[1]");
    }

    #[test]
    fn all_violations_are_collected() {
        let s = schema(json!({
            "properties": { "a": { "type": "string" }, "b": { "type": "number" } },
            "required": ["a", "b", "c"]
        }));
        let err = s.validate(&json!({"a": 1, "b": 2})).unwrap_err();
        assert_eq!(err.0.len(), 2);
    }

    #[test]
    fn extra_arguments_are_allowed() {
        assert!(echo_schema().validate(&json!({"value": "x", "other": 1})).is_ok());
    }

    #[test]
    fn invalid_schemas_are_refused() {
        assert!(InputSchema::from_value(&json!({"type": "string"})).is_err());
        assert!(InputSchema::from_value(&json!({"properties": {"x": {"type": "date"}}})).is_err());
        assert!(
            InputSchema::from_value(&json!({"properties": {"x": {"pattern": "("}}})).is_err()
        );
    }

    #[test]
    fn missing_type_defaults_to_object() {
        let s = schema(json!({"properties": {}}));
        assert_eq!(s.kind, SchemaType::Object);
    }
}
