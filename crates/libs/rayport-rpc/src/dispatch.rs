use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use rayport_wire::{
    decode, recover_id, Frame, Message, Payload, RawFrame, Request, RequestId, RpcError,
};

use crate::builtin::{self, Catalog};
use crate::connection::{ConnectionContext, ConnectionId, FrameSink};
use crate::registry::{EntrypointRegistry, Invoke, MethodDescriptor, PreparedTask};
use crate::task::{TaskContext, TaskHandle, TaskRegistry, TaskState};

/// How a single request was handled.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A synchronous method produced its result.
    Immediate(Payload),
    /// An asynchronous method was scheduled; its result arrives later.
    Deferred(Arc<TaskHandle>),
    Failure(RpcError),
}

/// Routes decoded requests to registered entrypoints and owns the
/// per-process task registry.
#[derive(Debug)]
pub struct Dispatcher {
    registry: EntrypointRegistry,
    tasks: Arc<TaskRegistry>,
    next_connection: AtomicU64,
}

impl Dispatcher {
    /// Seals `registry`, adding the built-in methods after the caller's.
    pub fn new(mut registry: EntrypointRegistry) -> Self {
        let tasks = Arc::new(TaskRegistry::new());
        let catalog: Catalog = Arc::new(OnceLock::new());
        builtin::register(&mut registry, &catalog, &tasks);
        if catalog.set(registry.schemas().cloned().collect()).is_err() {
            log::error!("dispatch: method catalog was initialised twice");
        }
        log::info!("dispatch: {} methods registered", registry.len());
        Self { registry, tasks, next_connection: AtomicU64::new(1) }
    }

    pub fn registry(&self) -> &EntrypointRegistry {
        &self.registry
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    /// Opens a connection whose outbound frames go to `sink`.
    pub fn connect(&self, sink: Arc<dyn FrameSink>) -> Arc<ConnectionContext> {
        let id = ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed));
        log::debug!("[{id}] connection opened");
        Arc::new(ConnectionContext::new(id, sink))
    }

    /// Tears a connection down: cancels its tasks and drops its uploads.
    /// Returns how many tasks were cancelled.
    pub fn disconnect(&self, connection: &ConnectionContext) -> usize {
        let cancelled = self.tasks.cancel_connection(connection.id());
        let discarded = connection.close();
        log::debug!(
            "[{}] connection closed, cancelled {cancelled} tasks, discarded {discarded} uploads",
            connection.id()
        );
        cancelled
    }

    /// Handles one inbound frame end to end. Every failure is answered on
    /// the connection when the request can be correlated, and logged
    /// otherwise. Nothing here closes the connection.
    pub fn on_frame(&self, connection: &Arc<ConnectionContext>, raw: RawFrame) {
        let frame = match decode(raw) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("[{}] dropping undecodable frame: {err}", connection.id());
                return;
            }
        };

        if is_upload(&frame) {
            let (_, binary) = frame.into_parts();
            connection.push_upload(binary);
            return;
        }

        let recovered = recover_id(frame.json());
        let request = match Request::from_frame(frame) {
            Ok(request) => request,
            Err(err) => {
                match recovered {
                    Some(id) => {
                        log::warn!("[{}] rejected request {id}: {err}", connection.id());
                        connection.send(Message::error(id, err));
                    }
                    None => log::warn!("[{}] rejected uncorrelated frame: {err}", connection.id()),
                }
                return;
            }
        };

        let id = request.id.clone();
        let method = request.method.clone();
        match self.dispatch(connection, request) {
            DispatchOutcome::Immediate(payload) => {
                if !id.is_empty() {
                    connection.send(Message::result(id, payload));
                }
            }
            DispatchOutcome::Deferred(handle) => {
                log::debug!("[{}] {method} scheduled as task {}", connection.id(), handle.id());
            }
            DispatchOutcome::Failure(err) => {
                log_failure(connection.id(), &method, &id, &err);
                if !id.is_empty() {
                    connection.send(Message::error(id, err));
                }
            }
        }
    }

    /// Resolves, validates and runs one request on `connection`.
    ///
    /// Params are checked against the schema and decoded before anything is
    /// claimed, so a rejected request never consumes an upload frame or a
    /// task slot.
    pub fn dispatch(
        &self,
        connection: &Arc<ConnectionContext>,
        request: Request,
    ) -> DispatchOutcome {
        let Request { id, method, payload } = request;
        let descriptor = match self.registry.resolve(&method) {
            Ok(descriptor) => descriptor,
            Err(err) => return DispatchOutcome::Failure(err),
        };
        if let Err(err) = descriptor.validate(&payload.json) {
            return DispatchOutcome::Failure(err);
        }
        let (json, binary) = payload.into_parts();

        match descriptor.invoke() {
            Invoke::Sync(prepare) => {
                let call = match guarded(|| prepare(json)) {
                    Ok(call) => call,
                    Err(err) => return DispatchOutcome::Failure(err),
                };
                let binary = match claim_upload(descriptor, connection, binary) {
                    Ok((binary, _)) => binary,
                    Err(err) => return DispatchOutcome::Failure(err),
                };
                let connection = Arc::clone(connection);
                match guarded(move || call(binary, connection)) {
                    Ok(payload) => DispatchOutcome::Immediate(payload),
                    Err(err) => DispatchOutcome::Failure(err),
                }
            }
            Invoke::Task(prepare) => {
                if id.is_empty() {
                    return DispatchOutcome::Failure(RpcError::invalid_request(format!(
                        "asynchronous method '{method}' cannot be called as a notification"
                    )));
                }
                let task = match guarded(|| prepare(json)) {
                    Ok(task) => task,
                    Err(err) => return DispatchOutcome::Failure(err),
                };
                self.spawn_task(connection, id, descriptor, task, binary)
            }
        }
    }

    fn spawn_task(
        &self,
        connection: &Arc<ConnectionContext>,
        id: RequestId,
        descriptor: &MethodDescriptor,
        task: PreparedTask,
        binary: Vec<u8>,
    ) -> DispatchOutcome {
        let (binary, claimed) = match claim_upload(descriptor, connection, binary) {
            Ok(claim) => claim,
            Err(err) => return DispatchOutcome::Failure(err),
        };
        let handle = match self.tasks.start(connection.id(), id, descriptor.name()) {
            Ok(handle) => handle,
            Err(err) => {
                if claimed {
                    connection.restore_upload(binary);
                }
                return DispatchOutcome::Failure(err);
            }
        };

        let tasks = Arc::clone(&self.tasks);
        let connection = Arc::clone(connection);
        let worker_handle = Arc::clone(&handle);
        tokio::task::spawn_blocking(move || {
            run_task(&tasks, connection, worker_handle, task, binary);
        });
        DispatchOutcome::Deferred(handle)
    }
}

/// Body of a task worker. Sends exactly one terminal message for the task.
fn run_task(
    tasks: &TaskRegistry,
    connection: Arc<ConnectionContext>,
    handle: Arc<TaskHandle>,
    task: PreparedTask,
    binary: Vec<u8>,
) {
    let id = handle.id().clone();
    let outcome = if handle.is_cancelled() {
        Err(RpcError::TaskCancelled)
    } else {
        handle.advance(TaskState::Running);
        let context = TaskContext::new(Arc::clone(&handle), Arc::clone(&connection));
        let worker_connection = Arc::clone(&connection);
        guarded(|| task(binary, worker_connection, &context))
    };

    let (state, message) = match outcome {
        Ok(payload) => (TaskState::Completed, Message::result(id, payload)),
        Err(err) if err == RpcError::TaskCancelled || handle.is_cancelled() => {
            if err != RpcError::TaskCancelled {
                log::debug!("[{}] task {id} failed after cancellation: {err}", connection.id());
            }
            (TaskState::Cancelled, Message::error(id, RpcError::TaskCancelled))
        }
        Err(err) => {
            log_failure(connection.id(), handle.method(), handle.id(), &err);
            (TaskState::Failed, Message::error(id, err))
        }
    };
    tasks.finish_with(&handle, state, || {
        connection.send(message);
    });
    log::debug!("[{}] task {} {} {state}", connection.id(), handle.method(), handle.id());
}

/// Substitutes the oldest buffered upload when the method needs binary data
/// and the request brought none. The flag tells whether the buffer was used.
fn claim_upload(
    descriptor: &MethodDescriptor,
    connection: &ConnectionContext,
    binary: Vec<u8>,
) -> Result<(Vec<u8>, bool), RpcError> {
    if !descriptor.needs_upload() || !binary.is_empty() {
        return Ok((binary, false));
    }
    match connection.pop_upload() {
        Some(upload) => Ok((upload, true)),
        None => Err(RpcError::UploadMissing { method: descriptor.name().to_string() }),
    }
}

/// Runs handler code, turning a panic into an internal error.
fn guarded<T>(f: impl FnOnce() -> Result<T, RpcError>) -> Result<T, RpcError> {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|panic| Err(RpcError::internal(panic_message(&*panic))))
}

/// A binary frame whose header carries no method is an upload chunk.
fn is_upload(frame: &Frame) -> bool {
    matches!(frame, Frame::Binary { json, .. } if json.get("method").is_none())
}

fn log_failure(connection: ConnectionId, method: &str, id: &RequestId, err: &RpcError) {
    match err {
        RpcError::Internal { .. } => log::error!("[{connection}] {method} failed: {err}"),
        _ if id.is_empty() => log::warn!("[{connection}] notification {method} failed: {err}"),
        _ => log::debug!("[{connection}] {method} rejected: {err}"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}
