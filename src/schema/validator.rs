//! Schema validator for request and response payloads
//!
//! Validation semantics:
//! - Every keyword of a node is evaluated; all failures are collected
//! - Combinators (`anyOf`, `oneOf`, `if`/`then`/`else`) and `dependencies`
//!   report structural issues next to the leaf issues of their branches
//! - Formats are checked only on strings and only when registered
//! - Validation never mutates the content

use serde_json::Value;

use super::errors::{
    make_path, IssueKind, SchemaError, SchemaResult, ValidationIssue, ROOT_PATH,
};
use super::formats::FormatRegistry;
use super::loader::SchemaLoader;
use super::types::{json_type_name, Rules, SchemaNode};

/// Schema validator owning the loaded schemas and the format checkers.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    loader: SchemaLoader,
    formats: FormatRegistry,
}

impl SchemaValidator {
    /// Creates a new validator with the built-in formats.
    pub fn new(loader: SchemaLoader) -> Self {
        Self::with_formats(loader, FormatRegistry::with_defaults())
    }

    pub fn with_formats(loader: SchemaLoader, formats: FormatRegistry) -> Self {
        Self { loader, formats }
    }

    pub fn loader(&self) -> &SchemaLoader {
        &self.loader
    }

    /// Decodes a request body and validates it against schema `name`.
    ///
    /// # Errors
    ///
    /// - `EMPTY_BODY` when the body is empty or whitespace
    /// - `INVALID_BODY` when the body is not JSON
    /// - `SCHEMA_VALIDATION_FAILED` with the surfaced issues otherwise
    pub fn check_body_against_schema(&self, name: &str, body: &[u8]) -> SchemaResult<Value> {
        self.loader.get(name)?;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(SchemaError::empty_body(name));
        }

        let content: Value = serde_json::from_slice(body)
            .map_err(|e| SchemaError::malformed_body(name, e.to_string()))?;

        self.check_content_against_schema(name, &content)?;
        Ok(content)
    }

    /// Validates already-decoded content against schema `name`.
    pub fn check_content_against_schema(&self, name: &str, content: &Value) -> SchemaResult<()> {
        let schema = self.loader.get(name)?;
        let issues = self.evaluate(&schema.root, content, ROOT_PATH);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::validation_failed(name, issues))
        }
    }

    /// Collects every issue of `value` against `node` at `path`.
    fn evaluate(&self, node: &SchemaNode, value: &Value, path: &str) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        self.validate_node(node, value, path, &mut issues);
        issues
    }

    fn validate_node(
        &self,
        node: &SchemaNode,
        value: &Value,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let rules = match node {
            SchemaNode::Bool(true) => return,
            SchemaNode::Bool(false) => {
                issues.push(ValidationIssue::validation(path, "No value is allowed here"));
                return;
            }
            SchemaNode::Rules(rules) => rules,
        };

        if let Some(ref types) = rules.types {
            if !types.iter().any(|t| t.matches(value)) {
                let expected: Vec<&str> = types.iter().map(|t| t.type_name()).collect();
                issues.push(ValidationIssue::type_mismatch(
                    path,
                    &expected.join("/"),
                    json_type_name(value),
                ));
                // Remaining keywords would only repeat the type failure
                return;
            }
        }

        if let Some(ref allowed) = rules.enum_values {
            if !allowed.iter().any(|candidate| json_equal(candidate, value)) {
                let listed: Vec<String> = allowed.iter().map(Value::to_string).collect();
                issues.push(ValidationIssue::validation(
                    path,
                    format!("{} must be one of the following: {}", field_label(path), listed.join(", ")),
                ));
            }
        }

        if let Some(ref expected) = rules.const_value {
            if !json_equal(expected, value) {
                issues.push(ValidationIssue::validation(
                    path,
                    format!("{} does not match: {}", field_label(path), expected),
                ));
            }
        }

        match value {
            Value::String(s) => self.validate_string(rules, s, path, issues),
            Value::Number(_) => validate_number(rules, value, path, issues),
            Value::Array(items) => self.validate_array(rules, items, path, issues),
            Value::Object(map) => self.validate_object(rules, map, path, issues),
            _ => {}
        }

        self.validate_combinators(rules, value, path, issues);
    }

    fn validate_string(
        &self,
        rules: &Rules,
        s: &str,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let length = s.chars().count();
        if let Some(min) = rules.min_length {
            if length < min {
                issues.push(ValidationIssue::validation(
                    path,
                    format!("String length must be greater than or equal to {}", min),
                ));
            }
        }
        if let Some(max) = rules.max_length {
            if length > max {
                issues.push(ValidationIssue::validation(
                    path,
                    format!("String length must be less than or equal to {}", max),
                ));
            }
        }
        if let Some(ref pattern) = rules.pattern {
            if !pattern.is_match(s) {
                issues.push(ValidationIssue::validation(
                    path,
                    format!("Does not match pattern '{}'", pattern.as_str()),
                ));
            }
        }
        if let Some(ref format) = rules.format {
            if self.formats.check(format, s) == Some(false) {
                issues.push(ValidationIssue::validation(
                    path,
                    format!("Does not match format '{}'", format),
                ));
            }
        }
    }

    fn validate_array(
        &self,
        rules: &Rules,
        items: &[Value],
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if let Some(min) = rules.min_items {
            if items.len() < min {
                issues.push(ValidationIssue::validation(
                    path,
                    format!("Array must have at least {} items", min),
                ));
            }
        }
        if let Some(max) = rules.max_items {
            if items.len() > max {
                issues.push(ValidationIssue::validation(
                    path,
                    format!("Array must have at most {} items", max),
                ));
            }
        }
        if let Some(ref item_schema) = rules.items {
            for (index, item) in items.iter().enumerate() {
                let item_path = make_path(path, &index.to_string());
                self.validate_node(item_schema, item, &item_path, issues);
            }
        }
    }

    fn validate_object(
        &self,
        rules: &Rules,
        map: &serde_json::Map<String, Value>,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        for required in &rules.required {
            if !map.contains_key(required) {
                issues.push(ValidationIssue::missing_field(path, required));
            }
        }

        if rules.additional_properties == Some(false) {
            for key in map.keys() {
                if !rules.properties.contains_key(key) {
                    issues.push(ValidationIssue::extra_field(path, key));
                }
            }
        }

        if let Some(min) = rules.min_properties {
            if map.len() < min {
                issues.push(ValidationIssue::validation(
                    path,
                    format!("Must have at least {} properties", min),
                ));
            }
        }

        for (name, sub) in &rules.properties {
            if let Some(child) = map.get(name) {
                self.validate_node(sub, child, &make_path(path, name), issues);
            }
        }

        for (name, needed) in &rules.dependencies {
            if !map.contains_key(name) {
                continue;
            }
            for sibling in needed {
                if !map.contains_key(sibling) {
                    issues.push(ValidationIssue::new(
                        IssueKind::MissingDependency,
                        make_path(path, name),
                        format!("Has a dependency on {}", sibling),
                    ));
                }
            }
        }
    }

    fn validate_combinators(
        &self,
        rules: &Rules,
        value: &Value,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if !rules.any_of.is_empty() {
            let outcomes: Vec<Vec<ValidationIssue>> = rules
                .any_of
                .iter()
                .map(|branch| self.evaluate(branch, value, path))
                .collect();
            if !outcomes.iter().any(Vec::is_empty) {
                issues.push(ValidationIssue::new(
                    IssueKind::AnyOf,
                    path,
                    "Must validate at least one schema (anyOf)",
                ));
                issues.extend(closest_branch(outcomes));
            }
        }

        if !rules.one_of.is_empty() {
            let outcomes: Vec<Vec<ValidationIssue>> = rules
                .one_of
                .iter()
                .map(|branch| self.evaluate(branch, value, path))
                .collect();
            let passing = outcomes.iter().filter(|o| o.is_empty()).count();
            if passing != 1 {
                issues.push(ValidationIssue::new(
                    IssueKind::OneOf,
                    path,
                    "Must validate one and only one schema (oneOf)",
                ));
                if passing == 0 {
                    issues.extend(closest_branch(outcomes));
                }
            }
        }

        if let Some(ref not) = rules.not {
            if self.evaluate(not, value, path).is_empty() {
                issues.push(ValidationIssue::validation(path, "Must not validate the schema (not)"));
            }
        }

        if let Some(ref condition) = rules.if_schema {
            let (branch, label) = if self.evaluate(condition, value, path).is_empty() {
                (rules.then_schema.as_ref(), "then")
            } else {
                (rules.else_schema.as_ref(), "else")
            };
            if let Some(branch) = branch {
                let branch_issues = self.evaluate(branch, value, path);
                if !branch_issues.is_empty() {
                    issues.push(ValidationIssue::new(
                        IssueKind::IfThenElse,
                        path,
                        format!("Must validate \"{}\" as \"if\" was {}", label, if label == "then" { "valid" } else { "not valid" }),
                    ));
                    issues.extend(branch_issues);
                }
            }
        }
    }
}

fn validate_number(
    rules: &Rules,
    value: &Value,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(n) = value.as_f64() else {
        issues.push(ValidationIssue::new(IssueKind::Internal, path, "Number is not representable"));
        return;
    };
    if let Some(min) = rules.minimum {
        if n < min {
            issues.push(ValidationIssue::validation(
                path,
                format!("Must be greater than or equal to {}", min),
            ));
        }
    }
    if let Some(max) = rules.maximum {
        if n > max {
            issues.push(ValidationIssue::validation(
                path,
                format!("Must be less than or equal to {}", max),
            ));
        }
    }
}

/// Issues of the failing branch with the fewest issues
fn closest_branch(outcomes: Vec<Vec<ValidationIssue>>) -> Vec<ValidationIssue> {
    outcomes
        .into_iter()
        .min_by_key(Vec::len)
        .unwrap_or_default()
}

/// Equality where `1` and `1.0` are the same number
fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).map_or(false, |y| json_equal(x, y)))
        }
        _ => a == b,
    }
}

fn field_label(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::errors::SchemaErrorCode;
    use crate::schema::loader::{CARS, CARS_SEARCH, CAR_CREATE, CAR_UPDATE};
    use serde_json::json;

    fn validator() -> SchemaValidator {
        SchemaValidator::new(SchemaLoader::embedded().unwrap())
    }

    fn fields(err: &SchemaError) -> Vec<String> {
        err.surfaced_issues().iter().map(|i| i.field.clone()).collect()
    }

    #[test]
    fn test_valid_create_body() {
        let content = validator()
            .check_body_against_schema(CAR_CREATE, br#"{"brand_name":"Audi","model_name":"A4"}"#)
            .unwrap();
        assert_eq!(content["brand_name"], "Audi");
    }

    #[test]
    fn test_empty_body() {
        let err = validator()
            .check_body_against_schema(CAR_CREATE, b"  \n")
            .unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::EmptyBody);
    }

    #[test]
    fn test_malformed_body() {
        let err = validator()
            .check_body_against_schema(CAR_CREATE, b"{\"brand_name\":")
            .unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::MalformedBody);
    }

    #[test]
    fn test_missing_required_field() {
        let err = validator()
            .check_body_against_schema(CAR_CREATE, br#"{"brand_name":"Audi"}"#)
            .unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::ValidationFailed);
        assert_eq!(fields(&err), vec!["model_name".to_string()]);
        assert_eq!(err.surfaced_issues()[0].message, "model_name is required");
    }

    #[test]
    fn test_empty_string_and_extra_field() {
        let err = validator()
            .check_body_against_schema(
                CAR_CREATE,
                br#"{"brand_name":"","model_name":"A4","color":"red"}"#,
            )
            .unwrap_err();
        let f = fields(&err);
        assert!(f.contains(&"brand_name".to_string()));
        assert!(f.contains(&"color".to_string()));
    }

    #[test]
    fn test_update_allows_partial() {
        validator()
            .check_body_against_schema(CAR_UPDATE, br#"{"model_name":"A6"}"#)
            .unwrap();
        validator()
            .check_body_against_schema(CAR_UPDATE, b"{}")
            .unwrap();
    }

    #[test]
    fn test_wrong_type() {
        let err = validator()
            .check_content_against_schema(CAR_UPDATE, &json!({"brand_name": 4}))
            .unwrap_err();
        assert_eq!(
            err.surfaced_issues()[0].message,
            "Invalid type. Expected: string, given: integer"
        );
    }

    #[test]
    fn test_search_filters_unknown_key() {
        let err = validator()
            .check_content_against_schema(
                CARS_SEARCH,
                &json!([{"key": "colour", "value_type": "STRING", "value": "red"}]),
            )
            .unwrap_err();
        assert_eq!(fields(&err), vec!["0.key".to_string()]);
    }

    #[test]
    fn test_search_filters_dependency_is_structural() {
        let err = validator()
            .check_content_against_schema(CARS_SEARCH, &json!([{"key": "brand_name", "value": "x"}]))
            .unwrap_err();
        assert_eq!(err.issues()[0].kind, IssueKind::MissingDependency);
        assert_eq!(err.surfaced_issues().len(), 1);
    }

    #[test]
    fn test_cars_response_datetime_format() {
        let v = validator();
        v.check_content_against_schema(
            CARS,
            &json!([{
                "car_id": "1", "brand_name": "Audi", "model_name": "A4",
                "test": false, "date_created": "2024-01-01T00:00:00.123456Z"
            }]),
        )
        .unwrap();

        let err = v
            .check_content_against_schema(
                CARS,
                &json!([{
                    "car_id": "1", "brand_name": "Audi", "model_name": "A4",
                    "test": false, "date_created": "yesterday"
                }]),
            )
            .unwrap_err();
        assert_eq!(fields(&err), vec!["0.date_created".to_string()]);
    }

    fn inline(document: serde_json::Value) -> SchemaValidator {
        let temp = tempfile::TempDir::new().unwrap();
        for name in crate::schema::loader::SCHEMA_NAMES {
            std::fs::write(temp.path().join(format!("{}.json", name)), document.to_string()).unwrap();
        }
        SchemaValidator::new(SchemaLoader::from_dir(temp.path()).unwrap())
    }

    #[test]
    fn test_any_of_surfaces_leaf_issues() {
        let v = inline(json!({
            "anyOf": [
                {"type": "string", "minLength": 3},
                {"type": "string", "format": "email"}
            ]
        }));
        let err = v.check_content_against_schema(CAR_CREATE, &json!("ab")).unwrap_err();
        assert!(err.issues().iter().any(|i| i.kind == IssueKind::AnyOf));
        assert!(err.surfaced_issues().iter().all(|i| i.kind == IssueKind::Validation));

        v.check_content_against_schema(CAR_CREATE, &json!("abc")).unwrap();
    }

    #[test]
    fn test_one_of_rejects_double_match() {
        let v = inline(json!({
            "oneOf": [{"type": "string"}, {"type": "string", "maxLength": 10}]
        }));
        let err = v.check_content_against_schema(CAR_CREATE, &json!("abc")).unwrap_err();
        assert_eq!(err.surfaced_issues()[0].kind, IssueKind::OneOf);
    }

    #[test]
    fn test_if_then_else_and_not() {
        let v = inline(json!({
            "type": "object",
            "if": {"properties": {"kind": {"const": "mail"}}, "required": ["kind"]},
            "then": {"required": ["address"]},
            "not": {"required": ["forbidden"]}
        }));
        let err = v
            .check_content_against_schema(CAR_CREATE, &json!({"kind": "mail"}))
            .unwrap_err();
        assert_eq!(fields(&err), vec!["address".to_string()]);

        v.check_content_against_schema(CAR_CREATE, &json!({"kind": "phone"}))
            .unwrap();

        let err = v
            .check_content_against_schema(CAR_CREATE, &json!({"forbidden": 1}))
            .unwrap_err();
        assert_eq!(err.surfaced_issues()[0].message, "Must not validate the schema (not)");
    }

    #[test]
    fn test_numbers_enum_and_const() {
        let v = inline(json!({
            "type": "object",
            "properties": {
                "n": {"type": "number", "minimum": 1, "maximum": 5},
                "e": {"enum": [1, "two"]},
                "c": {"const": 2}
            }
        }));
        v.check_content_against_schema(CAR_CREATE, &json!({"n": 5, "e": 1.0, "c": 2.0}))
            .unwrap();
        let err = v
            .check_content_against_schema(CAR_CREATE, &json!({"n": 6, "e": 3, "c": 1}))
            .unwrap_err();
        assert_eq!(err.surfaced_issues().len(), 3);
    }

    #[test]
    fn test_unknown_format_is_ignored() {
        let v = inline(json!({"type": "string", "format": "uuid-v9"}));
        v.check_content_against_schema(CAR_CREATE, &json!("whatever")).unwrap();
    }
}
