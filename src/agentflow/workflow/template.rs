//! Template resolution.
//!
//! A template is a string in which `{{EXPR}}` placeholders are path
//! expressions evaluated against the context object.  Expressions are the
//! dotted-path form — identifiers separated by `.`, with optional `[n]`
//! array indexing (`trigger.items[0].name`).
//!
//! Resolution rules:
//!
//! - A string that is exactly one placeholder resolves to the raw value,
//!   preserving its type (including `null`).
//! - Any other string has each placeholder resolved, stringified (`null`
//!   becomes the empty string), and spliced into the surrounding text.
//!   Type fidelity is whole-string-only by design.
//! - Non-string inputs pass through unchanged.
//! - A failing path evaluation yields `null` — never an error.

use serde_json::Value;

/// Evaluate a dotted-path expression against a context value.
///
/// Missing keys, out-of-range indices, and malformed expressions all
/// resolve to `Value::Null`.
pub fn search_path(expression: &str, context: &Value) -> Value {
    let expression = expression.trim();
    if expression.is_empty() {
        return Value::Null;
    }

    let mut current = context.clone();
    for segment in expression.split('.') {
        let segment = segment.trim();
        if segment.is_empty() {
            return Value::Null;
        }

        // Split a trailing index chain off the identifier: "items[0][1]".
        let (name, indices) = match segment.find('[') {
            Some(bracket) => (&segment[..bracket], &segment[bracket..]),
            None => (segment, ""),
        };

        if !name.is_empty() {
            current = match current.get(name) {
                Some(value) => value.clone(),
                None => return Value::Null,
            };
        }

        let mut rest = indices;
        while let Some(open) = rest.find('[') {
            let Some(close) = rest[open..].find(']') else {
                return Value::Null;
            };
            let index: usize = match rest[open + 1..open + close].trim().parse() {
                Ok(index) => index,
                Err(_) => return Value::Null,
            };
            current = match current.get(index) {
                Some(value) => value.clone(),
                None => return Value::Null,
            };
            rest = &rest[open + close + 1..];
        }
    }

    current
}

/// Stringify a resolved value for splice contexts.  `null` is the empty
/// string, strings splice bare, everything else renders as compact JSON.
pub fn stringify_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Placeholders found in a template: `(start, end, inner_expression)`.
fn find_placeholders(template: &str) -> Vec<(usize, usize, &str)> {
    let mut placeholders = Vec::new();
    let mut cursor = 0;
    while let Some(open) = template[cursor..].find("{{") {
        let start = cursor + open;
        let Some(close) = template[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        placeholders.push((start, end, &template[start + 2..end - 2]));
        cursor = end;
    }
    placeholders
}

/// Resolve a string template against a context.
pub fn resolve_str(template: &str, context: &Value) -> Value {
    let placeholders = find_placeholders(template);
    if placeholders.is_empty() {
        return Value::String(template.to_string());
    }

    // A whole-string template returns the raw value, type intact.
    if placeholders.len() == 1 {
        let (start, end, inner) = placeholders[0];
        if start == 0 && end == template.len() {
            return search_path(inner, context);
        }
    }

    let mut result = String::new();
    let mut cursor = 0;
    for (start, end, inner) in placeholders {
        result.push_str(&template[cursor..start]);
        result.push_str(&stringify_value(&search_path(inner, context)));
        cursor = end;
    }
    result.push_str(&template[cursor..]);
    Value::String(result)
}

/// Resolve a template of any JSON type.  Non-strings pass through.
pub fn resolve_template(template: &Value, context: &Value) -> Value {
    match template {
        Value::String(s) => resolve_str(s, context),
        other => other.clone(),
    }
}
