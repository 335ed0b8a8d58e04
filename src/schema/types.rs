//! Schema type definitions
//!
//! A schema document is a JSON-Schema subset compiled once into a
//! [`SchemaNode`] tree. Compilation rejects unknown types, non-numeric bounds
//! and invalid patterns so that validation itself cannot fail on the schema.
//!
//! Supported keywords: `type`, `properties`, `required`,
//! `additionalProperties`, `minProperties`, `items`, `minItems`, `maxItems`,
//! `minLength`, `maxLength`, `minimum`, `maximum`, `pattern`, `format`,
//! `enum`, `const`, `anyOf`, `oneOf`, `not`, `if`/`then`/`else`,
//! `dependencies`.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

use super::errors::{SchemaError, SchemaResult};

/// Primitive JSON types as named by JSON Schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "null" => Some(JsonType::Null),
            "boolean" => Some(JsonType::Boolean),
            "integer" => Some(JsonType::Integer),
            "number" => Some(JsonType::Number),
            "string" => Some(JsonType::String),
            "array" => Some(JsonType::Array),
            "object" => Some(JsonType::Object),
            _ => None,
        }
    }

    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }

    /// Integers also satisfy `number`
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            JsonType::Null => value.is_null(),
            JsonType::Boolean => value.is_boolean(),
            JsonType::Integer => is_integer(value),
            JsonType::Number => value.is_number(),
            JsonType::String => value.is_string(),
            JsonType::Array => value.is_array(),
            JsonType::Object => value.is_object(),
        }
    }
}

/// Whether a JSON number has no fractional part
pub fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.is_i64() || n.is_u64() || n.as_f64().map_or(false, |f| f.fract() == 0.0)
        }
        _ => false,
    }
}

/// Type name of a JSON value for error messages
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) if is_integer(value) => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A compiled schema node
#[derive(Debug, Clone)]
pub enum SchemaNode {
    /// `true` accepts anything, `false` rejects everything
    Bool(bool),
    Rules(Box<Rules>),
}

/// Keyword set of a non-boolean schema node
#[derive(Debug, Clone, Default)]
pub struct Rules {
    pub types: Option<Vec<JsonType>>,
    pub properties: BTreeMap<String, SchemaNode>,
    pub required: Vec<String>,
    pub additional_properties: Option<bool>,
    pub min_properties: Option<usize>,
    pub items: Option<SchemaNode>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub pattern: Option<Regex>,
    pub format: Option<String>,
    pub enum_values: Option<Vec<Value>>,
    pub const_value: Option<Value>,
    pub any_of: Vec<SchemaNode>,
    pub one_of: Vec<SchemaNode>,
    pub not: Option<SchemaNode>,
    pub if_schema: Option<SchemaNode>,
    pub then_schema: Option<SchemaNode>,
    pub else_schema: Option<SchemaNode>,
    pub dependencies: BTreeMap<String, Vec<String>>,
}

impl SchemaNode {
    /// Compiles a schema document. Errors name the offending keyword.
    pub fn compile(value: &Value) -> Result<SchemaNode, String> {
        match value {
            Value::Bool(b) => Ok(SchemaNode::Bool(*b)),
            Value::Object(map) => {
                let mut rules = Rules::default();

                if let Some(t) = map.get("type") {
                    rules.types = Some(compile_types(t)?);
                }

                if let Some(props) = map.get("properties") {
                    let props = props
                        .as_object()
                        .ok_or("'properties' must be an object")?;
                    for (name, sub) in props {
                        let node = SchemaNode::compile(sub)
                            .map_err(|e| format!("properties.{}: {}", name, e))?;
                        rules.properties.insert(name.clone(), node);
                    }
                }

                if let Some(req) = map.get("required") {
                    rules.required = string_list(req, "required")?;
                }

                if let Some(ap) = map.get("additionalProperties") {
                    rules.additional_properties = Some(
                        ap.as_bool()
                            .ok_or("'additionalProperties' must be a boolean")?,
                    );
                }

                rules.min_properties = count(map.get("minProperties"), "minProperties")?;
                rules.min_items = count(map.get("minItems"), "minItems")?;
                rules.max_items = count(map.get("maxItems"), "maxItems")?;
                rules.min_length = count(map.get("minLength"), "minLength")?;
                rules.max_length = count(map.get("maxLength"), "maxLength")?;
                rules.minimum = bound(map.get("minimum"), "minimum")?;
                rules.maximum = bound(map.get("maximum"), "maximum")?;

                if let Some(items) = map.get("items") {
                    rules.items =
                        Some(SchemaNode::compile(items).map_err(|e| format!("items: {}", e))?);
                }

                if let Some(p) = map.get("pattern") {
                    let p = p.as_str().ok_or("'pattern' must be a string")?;
                    rules.pattern =
                        Some(Regex::new(p).map_err(|e| format!("invalid pattern: {}", e))?);
                }

                if let Some(f) = map.get("format") {
                    rules.format = Some(f.as_str().ok_or("'format' must be a string")?.to_string());
                }

                if let Some(e) = map.get("enum") {
                    let values = e.as_array().ok_or("'enum' must be an array")?;
                    rules.enum_values = Some(values.clone());
                }

                if let Some(c) = map.get("const") {
                    rules.const_value = Some(c.clone());
                }

                rules.any_of = node_list(map.get("anyOf"), "anyOf")?;
                rules.one_of = node_list(map.get("oneOf"), "oneOf")?;
                rules.not = optional_node(map.get("not"), "not")?;
                rules.if_schema = optional_node(map.get("if"), "if")?;
                rules.then_schema = optional_node(map.get("then"), "then")?;
                rules.else_schema = optional_node(map.get("else"), "else")?;

                if let Some(deps) = map.get("dependencies") {
                    let deps = deps
                        .as_object()
                        .ok_or("'dependencies' must be an object")?;
                    for (name, required) in deps {
                        rules
                            .dependencies
                            .insert(name.clone(), string_list(required, "dependencies")?);
                    }
                }

                Ok(SchemaNode::Rules(Box::new(rules)))
            }
            other => Err(format!(
                "schema must be an object or boolean, got {}",
                json_type_name(other)
            )),
        }
    }
}

fn compile_types(value: &Value) -> Result<Vec<JsonType>, String> {
    let names: Vec<&str> = match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(list) => list
            .iter()
            .map(|v| v.as_str().ok_or("'type' entries must be strings"))
            .collect::<Result<_, _>>()?,
        _ => return Err("'type' must be a string or array".into()),
    };
    names
        .into_iter()
        .map(|n| JsonType::parse(n).ok_or_else(|| format!("unknown type '{}'", n)))
        .collect()
}

fn string_list(value: &Value, keyword: &str) -> Result<Vec<String>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("'{}' must be an array", keyword))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| format!("'{}' entries must be strings", keyword))
        })
        .collect()
}

fn count(value: Option<&Value>, keyword: &str) -> Result<Option<usize>, String> {
    match value {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| format!("'{}' must be a non-negative integer", keyword)),
    }
}

fn bound(value: Option<&Value>, keyword: &str) -> Result<Option<f64>, String> {
    match value {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("'{}' must be a number", keyword)),
    }
}

fn node_list(value: Option<&Value>, keyword: &str) -> Result<Vec<SchemaNode>, String> {
    match value {
        None => Ok(Vec::new()),
        Some(v) => v
            .as_array()
            .ok_or_else(|| format!("'{}' must be an array", keyword))?
            .iter()
            .map(|s| SchemaNode::compile(s).map_err(|e| format!("{}: {}", keyword, e)))
            .collect(),
    }
}

fn optional_node(value: Option<&Value>, keyword: &str) -> Result<Option<SchemaNode>, String> {
    value
        .map(|v| SchemaNode::compile(v).map_err(|e| format!("{}: {}", keyword, e)))
        .transpose()
}

/// A named, compiled schema
#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub description: Option<String>,
    pub root: SchemaNode,
}

impl Schema {
    /// Compiles a schema from its JSON document
    pub fn from_value(name: impl Into<String>, document: &Value) -> SchemaResult<Self> {
        let name = name.into();
        let root = SchemaNode::compile(document)
            .map_err(|e| SchemaError::malformed_schema(&name, e))?;
        let description = document
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            name,
            description,
            root,
        })
    }

    /// Parses and compiles a schema from JSON text
    pub fn parse(name: impl Into<String>, text: &str) -> SchemaResult<Self> {
        let name = name.into();
        let document: Value = serde_json::from_str(text)
            .map_err(|e| SchemaError::malformed_schema(&name, format!("Invalid JSON: {}", e)))?;
        Self::from_value(name, &document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_basic_object() {
        let schema = Schema::from_value(
            "car_create",
            &json!({
                "description": "Create a car",
                "type": "object",
                "properties": {"brand_name": {"type": "string", "minLength": 1}},
                "required": ["brand_name"],
                "additionalProperties": false
            }),
        )
        .unwrap();

        assert_eq!(schema.description.as_deref(), Some("Create a car"));
        match schema.root {
            SchemaNode::Rules(rules) => {
                assert_eq!(rules.types, Some(vec![JsonType::Object]));
                assert_eq!(rules.required, vec!["brand_name".to_string()]);
                assert_eq!(rules.additional_properties, Some(false));
                assert!(rules.properties.contains_key("brand_name"));
            }
            SchemaNode::Bool(_) => panic!("expected rules"),
        }
    }

    #[test]
    fn test_type_list() {
        let node = SchemaNode::compile(&json!({"type": ["string", "null"]})).unwrap();
        match node {
            SchemaNode::Rules(rules) => {
                assert_eq!(rules.types, Some(vec![JsonType::String, JsonType::Null]))
            }
            SchemaNode::Bool(_) => panic!("expected rules"),
        }
    }

    #[test]
    fn test_rejects_unknown_type() {
        let err = SchemaNode::compile(&json!({"type": "decimal"})).unwrap_err();
        assert!(err.contains("decimal"));
    }

    #[test]
    fn test_rejects_invalid_pattern() {
        let err = Schema::from_value("x", &json!({"pattern": "(["})).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_nested_error_names_path() {
        let err = SchemaNode::compile(&json!({
            "properties": {"brand_name": {"minLength": -1}}
        }))
        .unwrap_err();
        assert!(err.starts_with("properties.brand_name"));
    }

    #[test]
    fn test_integer_detection() {
        assert!(is_integer(&json!(3)));
        assert!(is_integer(&json!(3.0)));
        assert!(!is_integer(&json!(3.5)));
        assert!(JsonType::Number.matches(&json!(3)));
        assert!(!JsonType::Integer.matches(&json!("3")));
        assert_eq!(json_type_name(&json!(1.5)), "number");
    }
}
