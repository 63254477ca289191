//! Prompt construction for structured calls and the repair pass.

use serde_json::Value;
use std::fmt::Write;

/// Append schema-derived field descriptions and a JSON-only instruction to the
/// caller's prompt. The model sees the field list, not the raw schema.
pub(crate) fn build_structured_prompt(prompt: &str, schema: &Value) -> String {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let mut fields = String::new();
    if let Some(props) = schema.get("properties").and_then(|v| v.as_object()) {
        for (name, info) in props {
            let ty = info
                .get("type")
                .map(type_label)
                .unwrap_or_else(|| "string".to_string());
            let req = if required.contains(&name.as_str()) {
                " (required)"
            } else {
                " (optional)"
            };
            let desc = info.get("description").and_then(|v| v.as_str()).unwrap_or("");
            let _ = writeln!(fields, "- {}: {}{} - {}", name, ty, req, desc);
        }
    }

    format!(
        "{prompt}\n\n\
         IMPORTANT: You must respond with a valid JSON object with these fields:\n\n\
         {fields}\n\
         Requirements:\n\
         - Respond ONLY with the JSON object, no additional text\n\
         - Include all required fields\n\
         - Use appropriate data types (strings, numbers, arrays, etc.)\n\n\
         Your JSON response:"
    )
}

fn type_label(ty: &Value) -> String {
    match ty {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(" or "),
        _ => "string".to_string(),
    }
}

/// Ask the service to fix previously malformed output. Corrected object only,
/// no commentary.
pub(crate) fn build_repair_prompt(malformed: &str, parse_error: &str) -> String {
    format!(
        "The following text was intended to be a valid JSON object, but it failed to parse \
         with this error:\n{parse_error}\n\n\
         Malformed JSON:\n{malformed}\n\n\
         Please fix the syntax errors and return only the corrected JSON object. \
         Do not add any commentary or explanation.\n\n\
         Corrected JSON:"
    )
}
