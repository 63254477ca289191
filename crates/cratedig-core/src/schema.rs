//! Decoding and schema validation of raw model output, plus the text hygiene
//! the transport needs (code-fence stripping, placeholder substitution for
//! characters the wire encoding cannot carry).

use crate::errors::ConfigError;
use serde_json::Value;

/// Outcome of one decode-and-validate pass. `Malformed` (not JSON at all) and
/// `Invalid` (JSON, wrong shape) drive different recovery paths in the call
/// client: only `Malformed` is eligible for the repair pass.
#[derive(Debug)]
pub enum Decoded {
    Valid(Value),
    Malformed { detail: String },
    Invalid { detail: String },
}

/// A named, compiled JSON schema.
pub struct SchemaValidator {
    name: String,
    schema: Value,
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn new(name: impl Into<String>, schema: Value) -> Result<Self, ConfigError> {
        let name = name.into();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| ConfigError(format!("invalid '{}' schema: {}", name, e)))?;
        Ok(Self {
            name,
            schema,
            validator,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn decode_and_validate(&self, raw: &str) -> Decoded {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                return Decoded::Malformed {
                    detail: e.to_string(),
                }
            }
        };
        match self.validator.validate(&value) {
            Ok(()) => Decoded::Valid(value),
            Err(e) => Decoded::Invalid {
                detail: e.to_string(),
            },
        }
    }
}

/// Strip markdown code fences and cut the text down to the outermost JSON
/// object. Models frequently wrap otherwise-valid JSON in prose or fences.
pub fn clean_json_text(raw: &str) -> String {
    let stripped = raw.replace("```json", "").replace("```", "");
    let first = stripped.find('{');
    let last = stripped.rfind('}');
    match (first, last) {
        (Some(a), Some(b)) if b > a => stripped[a..=b].to_string(),
        _ => stripped.trim().to_string(),
    }
}

/// Replace characters the transport cannot carry with a placeholder instead
/// of letting them fail the request. Rust strings are already valid UTF-8, so
/// the remaining hazards are control characters and unicode noncharacters,
/// which some gateways reject outright.
pub fn sanitize_for_transport(text: &str) -> String {
    if text.chars().all(is_transport_safe) {
        return text.to_string();
    }
    let sanitized: String = text
        .chars()
        .map(|c| if is_transport_safe(c) { c } else { '?' })
        .collect();
    tracing::debug!(
        replaced = text.chars().filter(|c| !is_transport_safe(*c)).count(),
        "sanitized prompt text for transport"
    );
    sanitized
}

fn is_transport_safe(c: char) -> bool {
    if matches!(c, '\n' | '\r' | '\t') {
        return true;
    }
    if c.is_control() {
        return false;
    }
    // Noncharacters: U+FDD0..=U+FDEF and the last two code points of each plane.
    let cp = c as u32;
    if (0xFDD0..=0xFDEF).contains(&cp) {
        return false;
    }
    (cp & 0xFFFE) != 0xFFFE
}
