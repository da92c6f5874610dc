//! Stable string rendering of record values.
//!
//! Keys built from the same logical data must compare equal no matter how
//! the value travelled (an integer read from a spreadsheet may arrive as
//! `1.0`, a blank cell as `""`), so every value goes through
//! [`stringify_value`] before it becomes part of a key.

use serde_json::Value;

/// Returns true for values that count as absent: `null` and blank strings.
#[must_use]
pub fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Renders a value as a stripped string, collapsing integral floats.
///
/// Returns `None` when the value is missing (see [`is_missing`]).
///
/// - `1.0` → `"1"`, `1.5` → `"1.5"`
/// - `" P1 "` → `"P1"`
/// - arrays and objects render with their elements sorted
#[must_use]
pub fn stringify_value(value: &Value) -> Option<String> {
    if is_missing(value) {
        return None;
    }
    Some(render(value))
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => render_number(n),
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => {
            let mut parts: Vec<String> = items.iter().map(render).collect();
            parts.sort();
            format!("[{}]", parts.join(", "))
        }
        Value::Object(map) => {
            // serde_json maps without `preserve_order` iterate in key order
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k}: {}", render(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
    }
}

fn render_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
            format!("{}", f as i64)
        }
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}
