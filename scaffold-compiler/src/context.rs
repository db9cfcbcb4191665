//! Variable context: the values templates and conditions are evaluated against.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::CompileError;

/// Blueprint variables, layered as defaults → script definitions → overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContext {
    values: Map<String, Value>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: &BTreeMap<String, Value>) -> Self {
        Self {
            values: values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Bind `name` for the duration of a loop body; returns the shadowed value.
    pub fn bind(&mut self, name: &str, value: Value) -> Option<Value> {
        self.values.insert(name.to_string(), value)
    }

    /// Undo a [`bind`](Self::bind).
    pub fn restore(&mut self, name: &str, previous: Option<Value>) {
        match previous {
            Some(value) => {
                self.values.insert(name.to_string(), value);
            }
            None => {
                self.values.remove(name);
            }
        }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, CompileError> {
        tera::Context::from_serialize(&self.values).map_err(CompileError::from)
    }
}

/// Interpret a raw variable value the way YAML would (`true`, `3`, `[a, b]`),
/// falling back to a plain string.
pub fn parse_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::String(String::new());
    }
    match serde_yaml::from_str::<Value>(trimmed) {
        Ok(Value::Object(_)) if !trimmed.starts_with('{') => Value::String(trimmed.to_string()),
        Ok(Value::Null) if trimmed != "null" && trimmed != "~" => {
            Value::String(trimmed.to_string())
        }
        Ok(value) => value,
        Err(_) => Value::String(trimmed.to_string()),
    }
}

/// Check `value` against a declared type hint, coercing where lossless.
///
/// Unknown hints are accepted as-is.
pub fn coerce(value: Value, hint: &str) -> Result<Value, String> {
    match hint.trim().to_ascii_lowercase().as_str() {
        "str" | "string" => Ok(match value {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        }),
        "int" | "integer" => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
            _ => Err(format!("expected int, got {value}")),
        },
        "float" | "number" => match &value {
            Value::Number(_) => Ok(value),
            _ => Err(format!("expected number, got {value}")),
        },
        "bool" | "boolean" => match &value {
            Value::Bool(_) => Ok(value),
            _ => Err(format!("expected bool, got {value}")),
        },
        "list" | "array" => match value {
            Value::Array(_) => Ok(value),
            Value::String(s) => Ok(Value::Array(
                s.split(',')
                    .map(|item| Value::String(item.trim().to_string()))
                    .filter(|item| item.as_str() != Some(""))
                    .collect(),
            )),
            other => Err(format!("expected list, got {other}")),
        },
        _ => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_follow_yaml_typing() {
        assert_eq!(parse_scalar("true"), json!(true));
        assert_eq!(parse_scalar("8080"), json!(8080));
        assert_eq!(parse_scalar("[a, b]"), json!(["a", "b"]));
        assert_eq!(parse_scalar("hello world"), json!("hello world"));
        assert_eq!(parse_scalar("key: value"), json!("key: value"));
        assert_eq!(parse_scalar(""), json!(""));
    }

    #[test]
    fn coerce_checks_hints() {
        assert_eq!(coerce(json!(3), "str").unwrap(), json!("3"));
        assert_eq!(coerce(json!("a, b"), "list").unwrap(), json!(["a", "b"]));
        assert!(coerce(json!("x"), "int").is_err());
        assert!(coerce(json!("x"), "bool").is_err());
        assert_eq!(coerce(json!("x"), "path").unwrap(), json!("x"));
    }

    #[test]
    fn bind_and_restore_shadowing() {
        let mut ctx = VariableContext::new();
        ctx.set("name", json!("outer"));
        let prev = ctx.bind("name", json!("inner"));
        assert_eq!(ctx.get("name"), Some(&json!("inner")));
        ctx.restore("name", prev);
        assert_eq!(ctx.get("name"), Some(&json!("outer")));

        let prev = ctx.bind("fresh", json!(1));
        ctx.restore("fresh", prev);
        assert!(!ctx.contains("fresh"));
    }

    #[test]
    fn tera_context_conversion() {
        let mut ctx = VariableContext::new();
        ctx.set("project", json!("demo"));
        let tera_ctx = ctx.to_tera_context().expect("context conversion");
        assert_eq!(tera_ctx.get("project"), Some(&json!("demo")));
    }
}
