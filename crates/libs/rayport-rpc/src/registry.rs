use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rayport_wire::{Payload, RpcError, Violation};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::connection::ConnectionContext;
use crate::schema::{schema_for, CompiledSchema, MethodSchema};
use crate::task::TaskContext;

/// Typed arguments handed to an entrypoint handler.
pub struct Input<P> {
    pub params: P,
    /// Binary data of the request, or the upload frame drawn for it.
    pub binary: Vec<u8>,
    pub connection: Arc<ConnectionContext>,
}

/// Typed handler result with an optional binary tail.
#[derive(Clone, Debug, PartialEq)]
pub struct Output<R> {
    pub result: R,
    pub binary: Vec<u8>,
}

impl<R> Output<R> {
    pub fn new(result: R) -> Self {
        Self { result, binary: Vec::new() }
    }

    pub fn with_binary(result: R, binary: Vec<u8>) -> Self {
        Self { result, binary }
    }
}

impl<R> From<R> for Output<R> {
    fn from(result: R) -> Self {
        Self::new(result)
    }
}

/// A sync handler with its params already decoded, waiting for its binary.
pub(crate) type PreparedCall =
    Box<dyn FnOnce(Vec<u8>, Arc<ConnectionContext>) -> Result<Payload, RpcError>>;

/// A task handler with its params already decoded, ready to move to a worker.
pub(crate) type PreparedTask = Box<
    dyn FnOnce(Vec<u8>, Arc<ConnectionContext>, &TaskContext) -> Result<Payload, RpcError> + Send,
>;

/// Decodes params on the dispatching context. Running the result is a
/// separate step so nothing is claimed for a request whose params are unusable.
pub(crate) type SyncHandler =
    Box<dyn Fn(JsonValue) -> Result<PreparedCall, RpcError> + Send + Sync>;

pub(crate) type TaskHandler =
    Box<dyn Fn(JsonValue) -> Result<PreparedTask, RpcError> + Send + Sync>;

pub(crate) enum Invoke {
    Sync(SyncHandler),
    Task(TaskHandler),
}

/// A registered entrypoint: its public schema, compiled validator and handler.
pub struct MethodDescriptor {
    schema: MethodSchema,
    validator: CompiledSchema,
    invoke: Invoke,
}

impl MethodDescriptor {
    pub fn schema(&self) -> &MethodSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn is_async(&self) -> bool {
        self.schema.is_async
    }

    pub fn needs_upload(&self) -> bool {
        self.schema.needs_upload
    }

    /// Validates raw params against the method's params schema.
    pub fn validate(&self, params: &JsonValue) -> Result<(), RpcError> {
        self.validator.validate(params).map_err(|violations| RpcError::InvalidParams { violations })
    }

    pub(crate) fn invoke(&self) -> &Invoke {
        &self.invoke
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor").field("schema", &self.schema).finish_non_exhaustive()
    }
}

/// Every method the service exposes, resolvable by name, listed in
/// registration order.
#[derive(Default)]
pub struct EntrypointRegistry {
    methods: HashMap<String, MethodDescriptor>,
    method_order: Vec<String>,
}

impl EntrypointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the registration of `name`; finish it with
    /// [`EntrypointBuilder::sync`] or [`EntrypointBuilder::task`].
    pub fn entrypoint(&mut self, name: impl Into<String>) -> EntrypointBuilder<'_> {
        EntrypointBuilder {
            registry: self,
            name: name.into(),
            description: String::new(),
            deprecated: false,
            needs_upload: false,
        }
    }

    /// Registers a synchronous method.
    pub fn register<P, R, F>(&mut self, name: &str, description: &str, handler: F)
    where
        P: DeserializeOwned + JsonSchema + 'static,
        R: Serialize + JsonSchema + 'static,
        F: Fn(Input<P>) -> Result<Output<R>, RpcError> + Send + Sync + 'static,
    {
        self.entrypoint(name).description(description).sync(handler);
    }

    /// Registers an asynchronous method, run as a cancellable task.
    pub fn register_async<P, R, F>(&mut self, name: &str, description: &str, handler: F)
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        R: Serialize + JsonSchema + 'static,
        F: Fn(Input<P>, &TaskContext) -> Result<Output<R>, RpcError> + Send + Sync + 'static,
    {
        self.entrypoint(name).description(description).task(handler);
    }

    pub fn resolve(&self, name: &str) -> Result<&MethodDescriptor, RpcError> {
        self.methods.get(name).ok_or_else(|| RpcError::MethodNotFound { method: name.to_string() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.method_order.iter().map(String::as_str)
    }

    pub fn schema(&self, name: &str) -> Option<&MethodSchema> {
        self.methods.get(name).map(MethodDescriptor::schema)
    }

    /// Schemas of every method in registration order.
    pub fn schemas(&self) -> impl Iterator<Item = &MethodSchema> {
        self.method_order.iter().filter_map(|name| self.schema(name))
    }

    pub fn len(&self) -> usize {
        self.method_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.method_order.is_empty()
    }

    fn insert(&mut self, schema: MethodSchema, invoke: Invoke) {
        let name = schema.name.clone();
        assert!(!self.methods.contains_key(&name), "entrypoint '{name}' registered twice");
        let validator = match CompiledSchema::compile(&schema.params) {
            Ok(validator) => validator,
            Err(err) => panic!("entrypoint '{name}' has an unusable params schema: {err}"),
        };
        log::debug!("registry: registered '{name}' async={}", schema.is_async);
        self.methods.insert(name.clone(), MethodDescriptor { schema, validator, invoke });
        self.method_order.push(name);
    }
}

impl fmt::Debug for EntrypointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntrypointRegistry").field("methods", &self.method_order).finish()
    }
}

/// Registration in progress for one entrypoint.
#[must_use = "an entrypoint is only registered by `sync` or `task`"]
pub struct EntrypointBuilder<'a> {
    registry: &'a mut EntrypointRegistry,
    name: String,
    description: String,
    deprecated: bool,
    needs_upload: bool,
}

impl EntrypointBuilder<'_> {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Draws the oldest upload frame when a request arrives without binary data.
    pub fn needs_upload(mut self) -> Self {
        self.needs_upload = true;
        self
    }

    pub fn sync<P, R, F>(self, handler: F)
    where
        P: DeserializeOwned + JsonSchema + 'static,
        R: Serialize + JsonSchema + 'static,
        F: Fn(Input<P>) -> Result<Output<R>, RpcError> + Send + Sync + 'static,
    {
        let schema = self.method_schema::<P, R>(false);
        let handler = Arc::new(handler);
        let prepare = move |json: JsonValue| -> Result<PreparedCall, RpcError> {
            let params = decode_params::<P>(json)?;
            let handler = Arc::clone(&handler);
            Ok(Box::new(
                move |binary: Vec<u8>,
                      connection: Arc<ConnectionContext>|
                      -> Result<Payload, RpcError> {
                    encode_output(handler(Input { params, binary, connection })?)
                },
            ))
        };
        self.registry.insert(schema, Invoke::Sync(Box::new(prepare)));
    }

    pub fn task<P, R, F>(self, handler: F)
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        R: Serialize + JsonSchema + 'static,
        F: Fn(Input<P>, &TaskContext) -> Result<Output<R>, RpcError> + Send + Sync + 'static,
    {
        let schema = self.method_schema::<P, R>(true);
        let handler = Arc::new(handler);
        let prepare = move |json: JsonValue| -> Result<PreparedTask, RpcError> {
            let params = decode_params::<P>(json)?;
            let handler = Arc::clone(&handler);
            Ok(Box::new(
                move |binary: Vec<u8>,
                      connection: Arc<ConnectionContext>,
                      context: &TaskContext|
                      -> Result<Payload, RpcError> {
                    encode_output(handler(Input { params, binary, connection }, context)?)
                },
            ))
        };
        self.registry.insert(schema, Invoke::Task(Box::new(prepare)));
    }

    fn method_schema<P: JsonSchema, R: JsonSchema>(&self, is_async: bool) -> MethodSchema {
        MethodSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            params: schema_for::<P>(),
            result: schema_for::<R>(),
            is_async,
            deprecated: self.deprecated,
            needs_upload: self.needs_upload,
        }
    }
}

fn decode_params<P: DeserializeOwned>(json: JsonValue) -> Result<P, RpcError> {
    serde_json::from_value(json).map_err(|err| RpcError::InvalidParams {
        violations: vec![Violation::new("", err.to_string())],
    })
}

fn encode_output<R: Serialize>(output: Output<R>) -> Result<Payload, RpcError> {
    let json = serde_json::to_value(output.result)
        .map_err(|err| RpcError::internal(format!("result does not serialize: {err}")))?;
    Ok(Payload::with_binary(json, output.binary))
}

#[cfg(test)]
mod tests {
    use super::{EntrypointRegistry, Output};
    use rayport_wire::RpcError;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct Scale {
        factor: f64,
    }

    #[derive(Serialize, JsonSchema)]
    struct Scaled {
        value: f64,
    }

    fn registry() -> EntrypointRegistry {
        let mut registry = EntrypointRegistry::new();
        registry.register("scale", "Scales a number", |input: super::Input<Scale>| {
            Ok(Output::new(Scaled { value: input.params.factor * 2.0 }))
        });
        registry.entrypoint("legacyScale").deprecated().needs_upload().sync(
            |input: super::Input<Scale>| Ok(Output::with_binary(input.params.factor, input.binary)),
        );
        registry.register_async("slowScale", "", |input: super::Input<Scale>, _task| {
            Ok(Output::from(input.params.factor))
        });
        registry
    }

    #[test]
    fn lists_methods_in_registration_order() {
        let registry = registry();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, ["scale", "legacyScale", "slowScale"]);
        let flags: Vec<_> = registry
            .schemas()
            .map(|schema| (schema.is_async, schema.deprecated, schema.needs_upload))
            .collect();
        assert_eq!(flags, [(false, false, false), (false, true, true), (true, false, false)]);
    }

    #[test]
    fn publishes_params_and_result_schemas() {
        let registry = registry();
        let schema = registry.schema("scale").expect("registered");
        assert_eq!(schema.description, "Scales a number");
        assert_eq!(schema.params["properties"]["factor"]["type"], json!("number"));
        assert_eq!(schema.result["properties"]["value"]["type"], json!("number"));
        assert_eq!(schema.params["required"], json!(["factor"]));
    }

    #[test]
    fn unknown_method_is_not_found() {
        let err = registry().resolve("test").expect_err("unknown");
        assert_eq!(err, RpcError::MethodNotFound { method: "test".into() });
    }

    #[test]
    fn validation_failures_carry_violations() {
        let registry = registry();
        let descriptor = registry.resolve("scale").expect("registered");
        assert!(descriptor.validate(&json!({"factor": 1.5})).is_ok());
        let err = descriptor.validate(&json!({"factor": "big"})).expect_err("invalid");
        assert_eq!(err.violations().len(), 1);
        assert_eq!(err.violations()[0].path, "/factor");
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_names_abort_registration() {
        let mut registry = registry();
        registry.register("scale", "again", |_: super::Input<()>| Ok(Output::new(())));
    }
}
