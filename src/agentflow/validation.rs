//! Parameter validation and smart reconciliation.
//!
//! Validation happens in two phases. Phase I runs once per handler at
//! registration: the registry asks the handler for its declared
//! [`ParameterSpec`] list and caches it here. Phase II runs before every
//! dispatch and classifies the provided map against the cached specs.
//!
//! On top of plain validation sits the *smart reconciler*: given a map of
//! parameters an agent discovered autonomously, it decides what can be used
//! as-is, what is missing or mistyped, and emits a minimal JSON-schema form
//! describing only the remainder so a user can be asked for exactly the
//! missing pieces and nothing else.

use crate::agentflow::handler::{ParamMap, ParameterSpec, ParameterType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Result of validating a parameter map against a handler's specs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub missing_required: Vec<String>,
    /// Entries are `"name (expected X, got Y)"`.
    pub invalid_types: Vec<String>,
    pub unexpected: Vec<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }
}

/// Outcome of reconciling agent-discovered parameters against a spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterAnalysis {
    pub handler_name: String,
    /// Accepted keys: present in the input and type-valid.
    pub discovered: ParamMap,
    /// Required keys absent from the input.
    pub missing: Vec<String>,
    /// Keys present but with the wrong type.
    pub invalid: Vec<String>,
    pub needs_user_input: bool,
    /// JSON-schema-shaped form covering only `missing ∪ invalid`.
    pub form_schema: Option<serde_json::Value>,
}

/// Registry-wide cache of handler parameter specs plus the validation and
/// reconciliation logic that consumes it.
///
/// Read-mostly: specs are written during `init_handlers()` and read on
/// every dispatch afterwards, so a `std::sync::RwLock` is sufficient.
pub struct ParameterValidator {
    specs: RwLock<HashMap<String, Vec<ParameterSpec>>>,
}

impl ParameterValidator {
    pub fn new() -> Self {
        Self {
            specs: RwLock::new(HashMap::new()),
        }
    }

    /// Phase I: cache the declared specs for a handler name.
    pub fn register_specs(&self, handler_name: &str, specs: Vec<ParameterSpec>) {
        let mut table = self.specs.write().unwrap();
        table.insert(handler_name.to_string(), specs);
    }

    /// Cached specs for a handler, empty when nothing is registered.
    pub fn specs_for(&self, handler_name: &str) -> Vec<ParameterSpec> {
        let table = self.specs.read().unwrap();
        table.get(handler_name).cloned().unwrap_or_default()
    }

    /// Names of the handler's required parameters.
    pub fn required_for(&self, handler_name: &str) -> Vec<String> {
        self.specs_for(handler_name)
            .into_iter()
            .filter(|s| s.required)
            .map(|s| s.name)
            .collect()
    }

    /// Phase II: classify `provided` against the cached specs.
    ///
    /// With no specs registered the map passes unchecked; handlers that
    /// declare nothing accept anything. In strict mode, provided keys with
    /// no matching spec are reported as `unexpected`.
    pub fn validate(&self, handler_name: &str, provided: &ParamMap, strict: bool) -> ValidationResult {
        let specs = self.specs_for(handler_name);
        if specs.is_empty() {
            if log::log_enabled!(log::Level::Debug) {
                log::debug!("no parameter specs registered for '{}'", handler_name);
            }
            return ValidationResult::ok();
        }

        let mut result = ValidationResult::ok();
        let by_name: HashMap<&str, &ParameterSpec> =
            specs.iter().map(|s| (s.name.as_str(), s)).collect();

        for spec in &specs {
            if spec.required && !provided.contains_key(&spec.name) {
                result.missing_required.push(spec.name.clone());
                result.valid = false;
            }
        }

        for (name, value) in provided {
            match by_name.get(name.as_str()) {
                Some(spec) => {
                    if !type_matches(value, spec.param_type, spec.required) {
                        result.invalid_types.push(format!(
                            "{} (expected {}, got {})",
                            name,
                            spec.param_type.json_schema_name(),
                            json_type_name(value)
                        ));
                        result.valid = false;
                    }
                }
                None if strict => {
                    result.unexpected.push(name.clone());
                    result.valid = false;
                }
                None => {}
            }
        }

        if !result.valid {
            log::warn!(
                "validation failed for '{}': missing={:?} invalid={:?} unexpected={:?}",
                handler_name,
                result.missing_required,
                result.invalid_types,
                result.unexpected
            );
        }
        result
    }

    /// Smart reconciliation: compare agent-discovered parameters to the
    /// handler's spec and work out the minimal user-facing remainder.
    pub fn analyze(&self, handler_name: &str, discovered: &ParamMap) -> ParameterAnalysis {
        let specs = self.specs_for(handler_name);
        if specs.is_empty() {
            return ParameterAnalysis {
                handler_name: handler_name.to_string(),
                discovered: discovered.clone(),
                missing: Vec::new(),
                invalid: Vec::new(),
                needs_user_input: false,
                form_schema: None,
            };
        }

        let mut missing = Vec::new();
        let mut invalid = Vec::new();
        let mut accepted = ParamMap::new();

        for spec in &specs {
            match discovered.get(&spec.name) {
                Some(value) => {
                    if type_matches(value, spec.param_type, spec.required) {
                        accepted.insert(spec.name.clone(), value.clone());
                    } else {
                        invalid.push(spec.name.clone());
                    }
                }
                None if spec.required => missing.push(spec.name.clone()),
                None => {}
            }
        }

        // Pass through extra discovered keys untouched; strictness is the
        // dispatcher's concern, not the reconciler's.
        for (name, value) in discovered {
            if !specs.iter().any(|s| &s.name == name) {
                accepted.insert(name.clone(), value.clone());
            }
        }

        let needs_user_input = !missing.is_empty() || !invalid.is_empty();
        let form_schema = if needs_user_input {
            let mut remainder: Vec<String> = missing.clone();
            remainder.extend(invalid.iter().cloned());
            Some(form_schema_for(handler_name, &specs, &remainder))
        } else {
            None
        };

        ParameterAnalysis {
            handler_name: handler_name.to_string(),
            discovered: accepted,
            missing,
            invalid,
            needs_user_input,
            form_schema,
        }
    }
}

impl Default for ParameterValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// `merged = discovered ⊕ user_supplied`, rightmost wins.
pub fn merge_parameters(discovered: &ParamMap, user_supplied: &ParamMap) -> ParamMap {
    let mut merged = discovered.clone();
    for (k, v) in user_supplied {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Build a JSON-schema object covering only the named subset of specs.
fn form_schema_for(
    handler_name: &str,
    specs: &[ParameterSpec],
    subset: &[String],
) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for spec in specs {
        if !subset.contains(&spec.name) {
            continue;
        }
        let mut prop = serde_json::Map::new();
        prop.insert(
            "type".into(),
            serde_json::Value::String(spec.param_type.json_schema_name().into()),
        );
        let title = spec
            .description
            .clone()
            .unwrap_or_else(|| title_case(&spec.name));
        prop.insert("title".into(), serde_json::Value::String(title));
        if let Some(desc) = &spec.description {
            prop.insert("description".into(), serde_json::Value::String(desc.clone()));
        }
        if let Some(default) = &spec.default {
            prop.insert("default".into(), default.clone());
        }
        properties.insert(spec.name.clone(), serde_json::Value::Object(prop));
        if spec.required {
            required.push(serde_json::Value::String(spec.name.clone()));
        }
    }

    serde_json::json!({
        "title": format!("Missing parameters for {}", handler_name),
        "description": "The following parameters could not be discovered automatically",
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// `snake_case` → `Snake Case` for form labels.
fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Primitive kinds match by identity; `Any` accepts everything; container
/// types check the outer kind only. Null is accepted for optional
/// parameters (absent-or-T semantics).
fn type_matches(value: &serde_json::Value, expected: ParameterType, required: bool) -> bool {
    if value.is_null() {
        return !required || expected == ParameterType::Any;
    }
    match expected {
        ParameterType::Any => true,
        ParameterType::String => value.is_string(),
        ParameterType::Integer => value.is_i64() || value.is_u64(),
        ParameterType::Number => value.is_number(),
        ParameterType::Boolean => value.is_boolean(),
        ParameterType::Array => value.is_array(),
        ParameterType::Object => value.is_object(),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_validator() -> ParameterValidator {
        let validator = ParameterValidator::new();
        validator.register_specs(
            "Telegram.send_message",
            vec![
                ParameterSpec::new("chat_id", ParameterType::String).required(),
                ParameterSpec::new("message", ParameterType::String).required(),
                ParameterSpec::new("parse_mode", ParameterType::String),
            ],
        );
        validator
    }

    #[test]
    fn test_missing_required_detected() {
        let validator = sample_validator();
        let mut params = ParamMap::new();
        params.insert("chat_id".into(), json!("@kyra"));

        let result = validator.validate("Telegram.send_message", &params, false);
        assert!(!result.valid);
        assert_eq!(result.missing_required, vec!["message".to_string()]);
        assert!(result.invalid_types.is_empty());
    }

    #[test]
    fn test_invalid_type_reported_with_expected_and_actual() {
        let validator = sample_validator();
        let mut params = ParamMap::new();
        params.insert("chat_id".into(), json!("@kyra"));
        params.insert("message".into(), json!(42));

        let result = validator.validate("Telegram.send_message", &params, false);
        assert!(!result.valid);
        assert_eq!(
            result.invalid_types,
            vec!["message (expected string, got integer)".to_string()]
        );
    }

    #[test]
    fn test_unexpected_only_in_strict_mode() {
        let validator = sample_validator();
        let mut params = ParamMap::new();
        params.insert("chat_id".into(), json!("@kyra"));
        params.insert("message".into(), json!("hi"));
        params.insert("extra".into(), json!(true));

        let lax = validator.validate("Telegram.send_message", &params, false);
        assert!(lax.valid);
        assert!(lax.unexpected.is_empty());

        let strict = validator.validate("Telegram.send_message", &params, true);
        assert!(!strict.valid);
        assert_eq!(strict.unexpected, vec!["extra".to_string()]);
    }

    #[test]
    fn test_analysis_sets_are_pairwise_disjoint() {
        let validator = sample_validator();
        let mut discovered = ParamMap::new();
        discovered.insert("chat_id".into(), json!("@kyra"));
        discovered.insert("parse_mode".into(), json!(7)); // wrong type

        let analysis = validator.analyze("Telegram.send_message", &discovered);
        assert_eq!(analysis.missing, vec!["message".to_string()]);
        assert_eq!(analysis.invalid, vec!["parse_mode".to_string()]);
        assert!(analysis.discovered.contains_key("chat_id"));
        for name in analysis.missing.iter().chain(analysis.invalid.iter()) {
            assert!(!analysis.discovered.contains_key(name));
        }
        assert!(analysis.needs_user_input);
    }

    #[test]
    fn test_form_schema_covers_only_remainder() {
        let validator = sample_validator();
        let mut discovered = ParamMap::new();
        discovered.insert("chat_id".into(), json!("@kyra"));

        let analysis = validator.analyze("Telegram.send_message", &discovered);
        let schema = analysis.form_schema.expect("schema expected");
        let properties = schema["properties"].as_object().unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties["message"]["type"], "string");
        assert_eq!(schema["required"], json!(["message"]));
    }

    #[test]
    fn test_merge_rightmost_wins() {
        let mut discovered = ParamMap::new();
        discovered.insert("a".into(), json!(1));
        discovered.insert("b".into(), json!(2));
        let mut user = ParamMap::new();
        user.insert("b".into(), json!(20));
        user.insert("c".into(), json!(30));

        let merged = merge_parameters(&discovered, &user);
        assert_eq!(merged["a"], json!(1));
        assert_eq!(merged["b"], json!(20));
        assert_eq!(merged["c"], json!(30));
    }
}
