//! Output formatting and control utilities.
//!
//! CHANGELOG:
//! - 10/19/2026 - Human rendering fallback, char-safe truncation
//! - 01/10/2026 - Initial implementation

use serde::Serialize;
use serde_json::{json, Value};

/// Output control settings from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct OutputControls {
    pub json: bool,
    pub compact: bool,
    pub fields: Option<String>,
    pub max_text_chars: Option<u32>,
}

impl OutputControls {
    /// Any flag that asks for machine-readable output.
    pub fn wants_json(&self) -> bool {
        self.json || self.compact || self.fields.is_some()
    }

    /// Emit data according to output controls.
    pub fn emit<T: Serialize>(&self, data: &T) -> String {
        let value = serde_json::to_value(data).unwrap_or(json!(null));

        let filtered = match self.fields {
            Some(ref fields) => filter_fields(&value, fields),
            None => value,
        };

        let truncated = match self.max_text_chars {
            Some(max_chars) => truncate_text_fields(&filtered, max_chars as usize),
            None => filtered,
        };

        if self.compact {
            serde_json::to_string(&truncated).unwrap_or_else(|_| "{}".to_string())
        } else {
            serde_json::to_string_pretty(&truncated).unwrap_or_else(|_| "{}".to_string())
        }
    }

    /// JSON when asked for, otherwise the `human` rendering.
    pub fn render(&self, value: &Value, human: impl Fn(&Value) -> String) -> String {
        if self.wants_json() {
            self.emit(value)
        } else {
            human(value)
        }
    }

    /// Print data to stdout according to output controls.
    pub fn print(&self, value: &Value, human: impl Fn(&Value) -> String) {
        println!("{}", self.render(value, human));
    }
}

/// Filter JSON value to only include specified fields.
fn filter_fields(value: &Value, fields: &str) -> Value {
    let field_list: Vec<&str> = fields.split(',').map(|s| s.trim()).collect();

    match value {
        Value::Array(arr) => Value::Array(arr.iter().map(|v| filter_fields(v, fields)).collect()),
        Value::Object(map) => {
            let mut filtered = serde_json::Map::new();
            for field in &field_list {
                if let Some(v) = map.get(*field) {
                    filtered.insert(field.to_string(), v.clone());
                }
            }
            Value::Object(filtered)
        }
        _ => value.clone(),
    }
}

/// Truncate string fields in JSON value.
fn truncate_text_fields(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::String(s) if s.chars().count() > max_chars => {
            Value::String(format!("{}...", s.chars().take(max_chars).collect::<String>()))
        }
        Value::Array(arr) => {
            Value::Array(arr.iter().map(|v| truncate_text_fields(v, max_chars)).collect())
        }
        Value::Object(map) => {
            let mut truncated = serde_json::Map::new();
            for (k, v) in map {
                truncated.insert(k.clone(), truncate_text_fields(v, max_chars));
            }
            Value::Object(truncated)
        }
        _ => value.clone(),
    }
}

/// Format error as JSON.
pub fn format_error(code: &str, message: &str) -> String {
    serde_json::to_string(&json!({
        "ok": false,
        "error": { "code": code, "message": message },
    }))
    .unwrap_or_else(|_| format!(r#"{{"ok":false,"error":{{"code":"{}"}}}}"#, code))
}
