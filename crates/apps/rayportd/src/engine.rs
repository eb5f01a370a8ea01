use std::collections::BTreeMap;
use std::sync::Mutex;

use rayport_rpc::TaskContext;
use rayport_wire::RpcError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// Handler error codes for engine failures.
pub mod codes {
    pub const MODEL_NOT_FOUND: i64 = 100;
    pub const INVALID_MODEL: i64 = 101;
    pub const INVALID_SNAPSHOT: i64 = 102;
    pub const INVALID_CAMERA: i64 = 103;
}

const INGEST_CHUNK: usize = 64 * 1024;

#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum EngineError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("no model with id {0}")]
    ModelNotFound(u64),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("snapshot of {width}x{height} exceeds the {max} pixel limit")]
    SnapshotTooLarge { width: u32, height: u32, max: u64 },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("invalid camera: {0}")]
    InvalidCamera(String),
}

impl From<EngineError> for RpcError {
    fn from(err: EngineError) -> Self {
        let code = match &err {
            EngineError::Cancelled => return RpcError::TaskCancelled,
            EngineError::ModelNotFound(_) => codes::MODEL_NOT_FOUND,
            EngineError::InvalidModel(_) => codes::INVALID_MODEL,
            EngineError::SnapshotTooLarge { .. } | EngineError::InvalidSnapshot(_) => {
                codes::INVALID_SNAPSHOT
            }
            EngineError::InvalidCamera(_) => codes::INVALID_CAMERA,
        };
        RpcError::handler(code, err.to_string())
    }
}

/// Cancellation and progress as seen by long-running engine operations.
pub trait TaskMonitor {
    fn is_cancelled(&self) -> bool;
    fn report_progress(&self, message: &str, amount: f64);
}

impl TaskMonitor for TaskContext {
    fn is_cancelled(&self) -> bool {
        TaskContext::is_cancelled(self)
    }

    fn report_progress(&self, message: &str, amount: f64) {
        TaskContext::report_progress(self, message, amount);
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct EngineVersion {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Camera {
    pub position: [f64; 3],
    pub target: [f64; 3],
    pub up: [f64; 3],
    /// Vertical field of view, in degrees.
    pub fov_degrees: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self { position: [0.0, 0.0, 5.0], target: [0.0; 3], up: [0.0, 1.0, 0.0], fov_degrees: 45.0 }
    }
}

impl Camera {
    fn validate(&self) -> Result<(), EngineError> {
        let coordinates = self.position.iter().chain(&self.target).chain(&self.up);
        if !coordinates.copied().all(f64::is_finite) {
            return Err(EngineError::InvalidCamera("coordinates must be finite".into()));
        }
        if self.position == self.target {
            return Err(EngineError::InvalidCamera("position and target coincide".into()));
        }
        if self.up == [0.0; 3] {
            return Err(EngineError::InvalidCamera("up vector is zero".into()));
        }
        if !(self.fov_degrees > 0.0 && self.fov_degrees < 180.0) {
            return Err(EngineError::InvalidCamera(format!(
                "field of view {} is outside (0, 180)",
                self.fov_degrees
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: u64,
    pub name: String,
    pub size_bytes: usize,
    /// FNV-1a hash of the model bytes.
    pub checksum: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotSize {
    pub width: u32,
    pub height: u32,
}

/// A rendered frame in binary PPM (`P6`) encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Image {
    pub const FORMAT: &'static str = "ppm";
}

/// The rendering and scene collaborator driven by the entrypoints.
pub trait Engine: Send + Sync {
    fn version(&self) -> EngineVersion;
    fn camera(&self) -> Camera;
    fn set_camera(&self, camera: Camera) -> Result<Camera, EngineError>;
    fn models(&self) -> Vec<ModelInfo>;
    fn add_model(
        &self,
        name: &str,
        data: &[u8],
        monitor: &dyn TaskMonitor,
    ) -> Result<ModelInfo, EngineError>;
    fn remove_model(&self, id: u64) -> Result<ModelInfo, EngineError>;
    fn snapshot(&self, size: SnapshotSize, monitor: &dyn TaskMonitor) -> Result<Image, EngineError>;
}

struct StoredModel {
    info: ModelInfo,
    data: Vec<u8>,
}

struct Scene {
    camera: Camera,
    models: BTreeMap<u64, StoredModel>,
    next_model_id: u64,
}

/// In-process engine: keeps models in memory and renders a gradient whose
/// colors follow the camera and the scene contents.
pub struct MemoryEngine {
    name: String,
    max_pixels: u64,
    scene: Mutex<Scene>,
}

impl MemoryEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            name: config.name.clone(),
            max_pixels: config.max_snapshot_pixels,
            scene: Mutex::new(Scene {
                camera: Camera::default(),
                models: BTreeMap::new(),
                next_model_id: 1,
            }),
        }
    }
}

impl Engine for MemoryEngine {
    fn version(&self) -> EngineVersion {
        EngineVersion { name: self.name.clone(), version: env!("CARGO_PKG_VERSION").to_string() }
    }

    fn camera(&self) -> Camera {
        self.scene.lock().expect("scene mutex poisoned").camera.clone()
    }

    fn set_camera(&self, camera: Camera) -> Result<Camera, EngineError> {
        camera.validate()?;
        let mut scene = self.scene.lock().expect("scene mutex poisoned");
        scene.camera = camera.clone();
        Ok(camera)
    }

    fn models(&self) -> Vec<ModelInfo> {
        let scene = self.scene.lock().expect("scene mutex poisoned");
        scene.models.values().map(|model| model.info.clone()).collect()
    }

    fn add_model(
        &self,
        name: &str,
        data: &[u8],
        monitor: &dyn TaskMonitor,
    ) -> Result<ModelInfo, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidModel("model name is empty".into()));
        }
        if data.is_empty() {
            return Err(EngineError::InvalidModel("model data is empty".into()));
        }

        let chunks = data.len().div_ceil(INGEST_CHUNK);
        let mut hash = FNV_OFFSET;
        for (index, chunk) in data.chunks(INGEST_CHUNK).enumerate() {
            if monitor.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            hash = fnv1a(hash, chunk);
            monitor.report_progress("loading model", (index + 1) as f64 / chunks as f64);
        }

        let mut scene = self.scene.lock().expect("scene mutex poisoned");
        let id = scene.next_model_id;
        scene.next_model_id += 1;
        let info = ModelInfo {
            id,
            name: name.to_string(),
            size_bytes: data.len(),
            checksum: format!("{hash:016x}"),
        };
        scene.models.insert(id, StoredModel { info: info.clone(), data: data.to_vec() });
        log::info!("engine: loaded model {id} '{name}' ({} bytes)", data.len());
        Ok(info)
    }

    fn remove_model(&self, id: u64) -> Result<ModelInfo, EngineError> {
        let mut scene = self.scene.lock().expect("scene mutex poisoned");
        scene.models.remove(&id).map(|model| model.info).ok_or(EngineError::ModelNotFound(id))
    }

    fn snapshot(
        &self,
        size: SnapshotSize,
        monitor: &dyn TaskMonitor,
    ) -> Result<Image, EngineError> {
        let SnapshotSize { width, height } = size;
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidSnapshot(format!("size {width}x{height} is empty")));
        }
        if u64::from(width) * u64::from(height) > self.max_pixels {
            return Err(EngineError::SnapshotTooLarge { width, height, max: self.max_pixels });
        }

        let (camera, shift) = {
            let scene = self.scene.lock().expect("scene mutex poisoned");
            let shift = scene.models.values().fold(0_u8, |acc, model| {
                acc.wrapping_add(model.data.first().copied().unwrap_or_default())
            });
            (scene.camera.clone(), shift)
        };
        let blue = ((camera.fov_degrees / 180.0) * 255.0).round().clamp(0.0, 255.0) as u8;

        let header = format!("P6\n{width} {height}\n255\n");
        let mut data = Vec::with_capacity(header.len() + width as usize * height as usize * 3);
        data.extend_from_slice(header.as_bytes());
        for y in 0..height {
            if monitor.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let green = ramp(y, height).wrapping_add(shift);
            for x in 0..width {
                data.extend_from_slice(&[ramp(x, width), green, blue]);
            }
            monitor.report_progress("rendering", f64::from(y + 1) / f64::from(height));
        }
        Ok(Image { width, height, data })
    }
}

/// Maps `index` in `0..len` onto `0..=255`.
fn ramp(index: u32, len: u32) -> u8 {
    let span = u64::from(len.saturating_sub(1).max(1));
    (u64::from(index) * 255 / span).min(255) as u8
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::{Camera, Engine, EngineError, MemoryEngine, SnapshotSize, TaskMonitor};
    use crate::config::EngineConfig;
    use rayport_wire::RpcError;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct Recorder {
        cancel_after: Option<usize>,
        calls: Cell<usize>,
        progress: RefCell<Vec<f64>>,
    }

    impl TaskMonitor for Recorder {
        fn is_cancelled(&self) -> bool {
            let calls = self.calls.get();
            self.calls.set(calls + 1);
            self.cancel_after.is_some_and(|limit| calls >= limit)
        }

        fn report_progress(&self, _message: &str, amount: f64) {
            self.progress.borrow_mut().push(amount);
        }
    }

    fn engine() -> MemoryEngine {
        MemoryEngine::new(&EngineConfig { max_snapshot_pixels: 10_000, ..EngineConfig::default() })
    }

    #[test]
    fn snapshot_renders_ppm_with_progress_per_row() {
        let monitor = Recorder::default();
        let image =
            engine().snapshot(SnapshotSize { width: 4, height: 2 }, &monitor).expect("render");
        let header = b"P6\n4 2\n255\n";
        assert_eq!(&image.data[..header.len()], header);
        assert_eq!(image.data.len(), header.len() + 4 * 2 * 3);
        assert_eq!(&image.data[header.len()..header.len() + 3], &[0, 0, 64]);
        assert_eq!(*monitor.progress.borrow(), [0.5, 1.0]);
    }

    #[test]
    fn snapshot_stops_when_cancelled() {
        let monitor = Recorder { cancel_after: Some(1), ..Recorder::default() };
        let err =
            engine().snapshot(SnapshotSize { width: 8, height: 8 }, &monitor).expect_err("cancel");
        assert_eq!(err, EngineError::Cancelled);
        assert_eq!(monitor.progress.borrow().len(), 1);
        assert_eq!(RpcError::from(err), RpcError::TaskCancelled);
    }

    #[test]
    fn snapshot_rejects_empty_and_oversized_frames() {
        let monitor = Recorder::default();
        let engine = engine();
        assert!(matches!(
            engine.snapshot(SnapshotSize { width: 0, height: 5 }, &monitor),
            Err(EngineError::InvalidSnapshot(_))
        ));
        let err = engine
            .snapshot(SnapshotSize { width: 200, height: 200 }, &monitor)
            .expect_err("too large");
        assert!(matches!(
            RpcError::from(err),
            RpcError::Handler { code: super::codes::INVALID_SNAPSHOT, .. }
        ));
    }

    #[test]
    fn models_are_added_listed_and_removed() {
        let engine = engine();
        let monitor = Recorder::default();
        let first = engine.add_model("cube", b"solid cube", &monitor).expect("add");
        let second = engine.add_model("cone", b"solid cone", &monitor).expect("add");
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(first.size_bytes, 10);
        assert_ne!(first.checksum, second.checksum);
        assert_eq!(engine.models(), vec![first.clone(), second.clone()]);

        assert_eq!(engine.remove_model(1).expect("remove"), first);
        assert_eq!(engine.remove_model(1), Err(EngineError::ModelNotFound(1)));
        assert_eq!(engine.models(), vec![second]);
        assert!(engine.add_model("empty", b"", &monitor).is_err());
    }

    #[test]
    fn camera_updates_are_validated() {
        let engine = engine();
        let moved = Camera { position: [1.0, 2.0, 3.0], ..Camera::default() };
        assert_eq!(engine.set_camera(moved.clone()).expect("set"), moved);
        assert_eq!(engine.camera(), moved);

        let degenerate = Camera { fov_degrees: 180.0, ..Camera::default() };
        assert!(matches!(engine.set_camera(degenerate), Err(EngineError::InvalidCamera(_))));
        let collapsed = Camera { target: [0.0, 0.0, 5.0], ..Camera::default() };
        assert!(engine.set_camera(collapsed).is_err());
        assert_eq!(engine.camera(), moved);
    }
}
