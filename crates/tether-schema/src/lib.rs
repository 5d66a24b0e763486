//! Structural schema validation for protocol values.
//!
//! Every inbound `params`/`payload` and every outbound result is checked
//! against the owning handler's declared schema before it crosses the
//! dispatch boundary. Validation is strict: objects are closed, and a
//! failure is reported as a list of [`Issue`]s with dotted paths, never as
//! a fault inside handler code.

use serde::{Deserialize, Serialize};
use tether_wire::Value;

/// Expected shape of a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schema {
    /// Accepts anything, including null.
    Any,
    Null,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    /// Accepts null in addition to the inner schema.
    Optional(Box<Schema>),
    /// Homogeneous array.
    Array(Box<Schema>),
    /// Closed object: unknown keys are issues, missing required keys are
    /// issues.
    Object(Vec<Field>),
    /// Accepts a value matching any alternative.
    Union(Vec<Schema>),
}

/// One field of an object schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
    pub required: bool,
}

impl Field {
    pub fn required(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: false,
        }
    }
}

impl Schema {
    /// Shorthand for an object schema.
    pub fn object(fields: impl IntoIterator<Item = Field>) -> Self {
        Schema::Object(fields.into_iter().collect())
    }

    /// Shorthand for an object with a single required field.
    pub fn single(name: impl Into<String>, schema: Schema) -> Self {
        Schema::object([Field::required(name, schema)])
    }
}

/// One validation failure, anchored at a dotted path into the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

impl Issue {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_owned(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Check a value against a schema.
///
/// Returns every issue found rather than stopping at the first, so callers
/// can report the full shape mismatch in one error frame.
pub fn validate(schema: &Schema, value: &Value) -> Result<(), Vec<Issue>> {
    let mut issues = Vec::new();
    check(schema, value, "", &mut issues);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// Render issues as a wire-ready detail value.
pub fn issues_to_value(issues: &[Issue]) -> Value {
    Value::Array(
        issues
            .iter()
            .map(|issue| {
                Value::object([
                    ("path", Value::text(issue.path.clone())),
                    ("message", Value::text(issue.message.clone())),
                ])
            })
            .collect(),
    )
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}

fn check(schema: &Schema, value: &Value, path: &str, issues: &mut Vec<Issue>) {
    match schema {
        Schema::Any => {}
        Schema::Null => {
            if !matches!(value, Value::Null) {
                issues.push(Issue::new(path, format!("expected null, got {}", value.type_name())));
            }
        }
        Schema::Bool => expect(value, path, issues, "bool", |v| matches!(v, Value::Bool(_))),
        Schema::Int => expect(value, path, issues, "int", |v| matches!(v, Value::Int(_))),
        Schema::Float => expect(value, path, issues, "float", |v| matches!(v, Value::Float(_))),
        Schema::Text => expect(value, path, issues, "text", |v| matches!(v, Value::Text(_))),
        Schema::Bytes => expect(value, path, issues, "bytes", |v| matches!(v, Value::Bytes(_))),
        Schema::Optional(inner) => {
            if !matches!(value, Value::Null) {
                check(inner, value, path, issues);
            }
        }
        Schema::Array(inner) => match value {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{index}]");
                    check(inner, item, &item_path, issues);
                }
            }
            other => {
                issues.push(Issue::new(
                    path,
                    format!("expected array, got {}", other.type_name()),
                ));
            }
        },
        Schema::Object(fields) => match value {
            Value::Object(map) => {
                for field in fields {
                    match map.get(&field.name) {
                        Some(field_value) => {
                            check(&field.schema, field_value, &join(path, &field.name), issues);
                        }
                        None if field.required => {
                            issues.push(Issue::new(
                                &join(path, &field.name),
                                "missing required field",
                            ));
                        }
                        None => {}
                    }
                }
                for key in map.keys() {
                    if !fields.iter().any(|field| field.name == *key) {
                        issues.push(Issue::new(&join(path, key), "unknown field"));
                    }
                }
            }
            other => {
                issues.push(Issue::new(
                    path,
                    format!("expected object, got {}", other.type_name()),
                ));
            }
        },
        Schema::Union(alternatives) => {
            let matched = alternatives
                .iter()
                .any(|alternative| validate(alternative, value).is_ok());
            if !matched {
                issues.push(Issue::new(
                    path,
                    format!(
                        "no union alternative matched {} value",
                        value.type_name()
                    ),
                ));
            }
        }
    }
}

fn expect(
    value: &Value,
    path: &str,
    issues: &mut Vec<Issue>,
    expected: &str,
    matches: impl Fn(&Value) -> bool,
) {
    if !matches(value) {
        issues.push(Issue::new(
            path,
            format!("expected {expected}, got {}", value.type_name()),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_schema() -> Schema {
        Schema::single("msg", Schema::Text)
    }

    #[test]
    fn accepts_matching_object() {
        let value = Value::object([("msg", Value::text("hi"))]);
        assert!(validate(&msg_schema(), &value).is_ok());
    }

    #[test]
    fn reports_wrong_type_with_path() {
        let value = Value::object([("msg", Value::Int(3))]);
        let issues = validate(&msg_schema(), &value).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "msg");
        assert_eq!(issues[0].message, "expected text, got int");
    }

    #[test]
    fn reports_missing_and_unknown_fields() {
        let value = Value::object([("extra", Value::Bool(true))]);
        let issues = validate(&msg_schema(), &value).unwrap_err();
        let rendered: Vec<String> = issues.iter().map(ToString::to_string).collect();
        assert!(rendered.contains(&"msg: missing required field".to_owned()));
        assert!(rendered.contains(&"extra: unknown field".to_owned()));
    }

    #[test]
    fn optional_field_may_be_absent_but_not_mistyped() {
        let schema = Schema::object([
            Field::required("name", Schema::Text),
            Field::optional("limit", Schema::Int),
        ]);
        assert!(validate(&schema, &Value::object([("name", Value::text("a"))])).is_ok());
        let bad = Value::object([("name", Value::text("a")), ("limit", Value::text("b"))]);
        assert_eq!(validate(&schema, &bad).unwrap_err()[0].path, "limit");
    }

    #[test]
    fn optional_schema_accepts_null() {
        let schema = Schema::Optional(Box::new(Schema::Int));
        assert!(validate(&schema, &Value::Null).is_ok());
        assert!(validate(&schema, &Value::Int(1)).is_ok());
        assert!(validate(&schema, &Value::text("x")).is_err());
    }

    #[test]
    fn array_issues_carry_indices() {
        let schema = Schema::Array(Box::new(Schema::Int));
        let value = Value::Array(vec![Value::Int(1), Value::text("two"), Value::Int(3)]);
        let issues = validate(&schema, &value).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "[1]");
    }

    #[test]
    fn union_matches_any_alternative() {
        let schema = Schema::Union(vec![Schema::Int, Schema::Text]);
        assert!(validate(&schema, &Value::Int(1)).is_ok());
        assert!(validate(&schema, &Value::text("x")).is_ok());
        assert!(validate(&schema, &Value::Bool(true)).is_err());
    }

    #[test]
    fn nested_paths_compose() {
        let schema = Schema::single(
            "items",
            Schema::Array(Box::new(Schema::single("id", Schema::Int))),
        );
        let value = Value::object([(
            "items",
            Value::Array(vec![Value::object([("id", Value::text("oops"))])]),
        )]);
        let issues = validate(&schema, &value).unwrap_err();
        assert_eq!(issues[0].path, "items[0].id");
    }

    #[test]
    fn issues_render_to_wire_value() {
        let issues = vec![Issue::new("msg", "missing required field")];
        let value = issues_to_value(&issues);
        let first = value.as_array().unwrap()[0].clone();
        assert_eq!(first.get("path").and_then(Value::as_text), Some("msg"));
    }
}
