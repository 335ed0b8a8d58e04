//! Body redaction for debug logs.

use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

/// Longest body rendered verbatim
const MAX_LOGGED_BODY: usize = 4096;

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "authorization",
    "api_key",
    "apikey",
    "credential",
];

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

/// Replaces sensitive object values, recursively
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if is_sensitive(key) {
                    *child = Value::String(REDACTED.to_string());
                } else {
                    redact_value(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        _ => {}
    }
}

/// Log rendering of a request body; non-JSON bodies show only their size
pub fn redact_body(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    let Ok(mut document) = serde_json::from_slice::<Value>(body) else {
        return format!("<{} bytes>", body.len());
    };
    redact_value(&mut document);

    let mut rendered = document.to_string();
    if rendered.len() > MAX_LOGGED_BODY {
        let mut cut = MAX_LOGGED_BODY;
        while !rendered.is_char_boundary(cut) {
            cut -= 1;
        }
        rendered.truncate(cut);
        rendered.push_str("...");
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_nested_keys() {
        let body = json!({
            "brand_name": "Audi",
            "owner": {"Password": "hunter2", "tokens": ["a"]}
        })
        .to_string();
        let rendered = redact_body(body.as_bytes());
        assert!(rendered.contains("Audi"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("\"a\""));
    }

    #[test]
    fn test_non_json_and_empty() {
        assert_eq!(redact_body(b""), "");
        assert_eq!(redact_body(b"not json"), "<8 bytes>");
    }

    #[test]
    fn test_truncates_long_bodies() {
        let body = json!({"model_name": "x".repeat(10_000)}).to_string();
        let rendered = redact_body(body.as_bytes());
        assert!(rendered.len() <= MAX_LOGGED_BODY + 3);
        assert!(rendered.ends_with("..."));
    }
}
