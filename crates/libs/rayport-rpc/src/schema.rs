use std::fmt;

use jsonschema::{Draft, JSONSchema};
use rayport_wire::Violation;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Public description of one entrypoint, as returned by introspection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MethodSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the params value.
    pub params: JsonValue,
    /// JSON Schema of the result value.
    pub result: JsonValue,
    #[serde(rename = "async")]
    pub is_async: bool,
    pub deprecated: bool,
    pub needs_upload: bool,
}

/// Derives the draft-07 JSON Schema of a Rust type.
///
/// Panics if the generated schema does not serialize, which only happens for
/// a broken `JsonSchema` impl and is treated as a startup bug.
pub fn schema_for<T: JsonSchema>() -> JsonValue {
    let schema = schemars::schema_for!(T);
    match serde_json::to_value(schema) {
        Ok(value) => value,
        Err(err) => panic!("schema for {} does not serialize: {err}", T::schema_name()),
    }
}

/// A params schema compiled once at registration.
pub struct CompiledSchema {
    compiled: JSONSchema,
}

impl CompiledSchema {
    pub fn compile(schema: &JsonValue) -> Result<Self, String> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|err| format!("invalid schema at '{}': {err}", err.schema_path))?;
        Ok(Self { compiled })
    }

    /// Checks `instance` and reports every violation with its JSON pointer.
    pub fn validate(&self, instance: &JsonValue) -> Result<(), Vec<Violation>> {
        match self.compiled.validate(instance) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors
                .map(|err| Violation::new(err.instance_path.to_string(), err.to_string()))
                .collect()),
        }
    }

    pub fn is_valid(&self, instance: &JsonValue) -> bool {
        self.compiled.is_valid(instance)
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{schema_for, CompiledSchema};
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Resize {
        width: u32,
        height: u32,
        label: Option<String>,
    }

    fn compiled<T: JsonSchema>() -> CompiledSchema {
        CompiledSchema::compile(&schema_for::<T>()).expect("schema should compile")
    }

    #[test]
    fn accepts_matching_params() {
        let schema = compiled::<Resize>();
        assert!(schema.validate(&json!({"width": 4, "height": 2})).is_ok());
        assert!(schema.validate(&json!({"width": 4, "height": 2, "label": "a"})).is_ok());
    }

    #[test]
    fn reports_every_violation_with_a_pointer() {
        let schema = compiled::<Resize>();
        let violations =
            schema.validate(&json!({"width": "wide", "height": -1})).expect_err("invalid");
        let paths: Vec<_> = violations.iter().map(|violation| violation.path.as_str()).collect();
        assert!(paths.contains(&"/width"), "{violations:?}");
        assert!(paths.contains(&"/height"), "{violations:?}");
    }

    #[test]
    fn missing_property_is_reported_at_the_root() {
        let schema = compiled::<Resize>();
        let violations = schema.validate(&json!({"width": 1})).expect_err("invalid");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "");
        assert!(violations[0].message.contains("height"), "{violations:?}");
    }

    #[test]
    fn unit_schema_only_takes_null() {
        let schema = compiled::<()>();
        assert!(schema.is_valid(&json!(null)));
        assert!(!schema.is_valid(&json!(123)));
    }

    #[test]
    fn rejects_broken_schemas() {
        assert!(CompiledSchema::compile(&json!({"type": 12})).is_err());
    }
}
