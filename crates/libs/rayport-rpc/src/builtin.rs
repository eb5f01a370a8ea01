use std::sync::{Arc, OnceLock};

use rayport_wire::{RequestId, RpcError};
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject, SingleOrVec};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::registry::{EntrypointRegistry, Input, Output};
use crate::schema::MethodSchema;
use crate::task::TaskRegistry;

pub const GET_METHODS: &str = "getMethods";
pub const GET_SCHEMA: &str = "getSchema";
pub const CANCEL: &str = "cancel";
pub const FLUSH_UPLOADS: &str = "flushUploads";

/// Snapshot of every registered schema, filled once registration is over.
pub(crate) type Catalog = Arc<OnceLock<Vec<MethodSchema>>>;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct SchemaParams {
    /// Name of the method to describe.
    method: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct CancelParams {
    /// Id of the asynchronous request to cancel.
    #[schemars(schema_with = "request_id_schema")]
    id: RequestId,
}

#[derive(Debug, Serialize, JsonSchema)]
struct FlushResult {
    discarded: usize,
}

fn request_id_schema(_: &mut SchemaGenerator) -> Schema {
    SchemaObject {
        instance_type: Some(SingleOrVec::Vec(vec![
            InstanceType::Null,
            InstanceType::Integer,
            InstanceType::String,
        ])),
        ..Default::default()
    }
    .into()
}

/// Adds the introspection, cancellation and upload housekeeping methods.
pub(crate) fn register(
    registry: &mut EntrypointRegistry,
    catalog: &Catalog,
    tasks: &Arc<TaskRegistry>,
) {
    let methods = Arc::clone(catalog);
    registry.register(GET_METHODS, "Lists the names of every method", move |_: Input<()>| {
        let names: Vec<String> =
            listed(&methods).iter().map(|schema| schema.name.clone()).collect();
        Ok(Output::new(names))
    });

    let schemas = Arc::clone(catalog);
    registry.register(
        GET_SCHEMA,
        "Describes one method: params and result schemas plus its flags",
        move |input: Input<SchemaParams>| {
            let method = input.params.method;
            listed(&schemas)
                .iter()
                .find(|schema| schema.name == method)
                .cloned()
                .map(Output::new)
                .ok_or(RpcError::MethodNotFound { method })
        },
    );

    let tasks = Arc::clone(tasks);
    registry.register(
        CANCEL,
        "Requests cancellation of a running asynchronous method",
        move |input: Input<CancelParams>| {
            tasks.cancel(input.connection.id(), &input.params.id)?;
            Ok(Output::new(()))
        },
    );

    registry.register(
        FLUSH_UPLOADS,
        "Discards binary frames uploaded on this connection but not yet consumed",
        |input: Input<()>| {
            let discarded = input.connection.flush_uploads();
            Ok(Output::new(FlushResult { discarded }))
        },
    );
}

fn listed(catalog: &Catalog) -> &[MethodSchema] {
    catalog.get().map(Vec::as_slice).unwrap_or_default()
}
