//! Argument validation against a tool's JSON-Schema parameter object.
//!
//! Supports the usual subset (`type`, `properties`, `required`, `enum`,
//! `minimum`/`maximum`, `minLength`/`maxLength`, nested `items`); unknown
//! keywords are ignored by the validator.

use serde_json::Value;

/// Validate `args` against `schema`.
///
/// Returns the full list of violations so the model sees everything wrong
/// at once. A schema that fails to compile is skipped gracefully rather
/// than blocking execution.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), Vec<String>> {
    let Ok(validator) = jsonschema::validator_for(schema) else {
        tracing::warn!("tool parameter schema failed to compile; skipping validation");
        return Ok(());
    };

    let errors: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
