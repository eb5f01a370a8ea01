use std::sync::Arc;

use rayport_rpc::{Dispatcher, EntrypointRegistry, Input, Output, TaskContext};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::engine::{Camera, Engine, EngineVersion, Image, ModelInfo, SnapshotSize};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ModelId {
    pub id: u64,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UploadModelParams {
    /// Display name of the model.
    pub name: String,
}

/// Snapshot size; omitted dimensions, or omitted params, fall back to the
/// configured defaults.
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SnapshotParams {
    #[schemars(range(min = 1))]
    pub width: Option<u32>,
    #[schemars(range(min = 1))]
    pub height: Option<u32>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SnapshotResult {
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// Registers the engine-backed methods.
pub fn register(
    registry: &mut EntrypointRegistry,
    engine: Arc<dyn Engine>,
    defaults: &EngineConfig,
) {
    let version_engine = Arc::clone(&engine);
    registry.register("getVersion", "Engine name and version", move |_: Input<()>| {
        Ok(Output::<EngineVersion>::new(version_engine.version()))
    });

    let camera_engine = Arc::clone(&engine);
    registry.register("getCamera", "Current camera", move |_: Input<()>| {
        Ok(Output::new(camera_engine.camera()))
    });

    let camera_engine = Arc::clone(&engine);
    registry.register("setCamera", "Moves the camera", move |input: Input<Camera>| {
        Ok(Output::new(camera_engine.set_camera(input.params)?))
    });

    let models_engine = Arc::clone(&engine);
    registry.register("getModels", "Loaded models in load order", move |_: Input<()>| {
        Ok(Output::<Vec<ModelInfo>>::new(models_engine.models()))
    });

    let models_engine = Arc::clone(&engine);
    registry.register("removeModel", "Unloads a model", move |input: Input<ModelId>| {
        Ok(Output::new(models_engine.remove_model(input.params.id)?))
    });

    let upload_engine = Arc::clone(&engine);
    registry
        .entrypoint("uploadModel")
        .description("Loads a model from uploaded binary data; buffered chunks are concatenated")
        .needs_upload()
        .task(move |input: Input<UploadModelParams>, task: &TaskContext| {
            let mut data = input.binary;
            while let Some(chunk) = input.connection.pop_upload() {
                data.extend_from_slice(&chunk);
            }
            let info = upload_engine.add_model(&input.params.name, &data, task)?;
            Ok(Output::new(info))
        });

    let snapshot_engine = engine;
    let (default_width, default_height) = (defaults.default_width, defaults.default_height);
    registry.register_async(
        "snapshot",
        "Renders the scene and returns the image as binary data",
        move |input: Input<Option<SnapshotParams>>, task: &TaskContext| {
            let params = input.params.unwrap_or_default();
            let size = SnapshotSize {
                width: params.width.unwrap_or(default_width),
                height: params.height.unwrap_or(default_height),
            };
            let Image { width, height, data } = snapshot_engine.snapshot(size, task)?;
            let result = SnapshotResult { width, height, format: Image::FORMAT.to_string() };
            Ok(Output::with_binary(result, data))
        },
    );
}

/// Builds the dispatcher serving `engine`.
pub fn build_dispatcher(engine: Arc<dyn Engine>, defaults: &EngineConfig) -> Dispatcher {
    let mut registry = EntrypointRegistry::new();
    register(&mut registry, engine, defaults);
    Dispatcher::new(registry)
}
