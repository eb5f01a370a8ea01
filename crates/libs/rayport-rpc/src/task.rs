use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rayport_wire::{Message, RequestId, RpcError};
use tokio::sync::watch;

use crate::connection::{ConnectionContext, ConnectionId};

/// Lifecycle of an asynchronous request. Terminal states never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn can_advance_to(self, next: TaskState) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending | Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Shared view of one running asynchronous request.
///
/// The cancel flag is only a request: the handler decides when to observe it.
#[derive(Debug)]
pub struct TaskHandle {
    id: RequestId,
    connection: ConnectionId,
    method: String,
    cancelled: AtomicBool,
    state: watch::Sender<TaskState>,
}

impl TaskHandle {
    pub fn new(connection: ConnectionId, id: RequestId, method: impl Into<String>) -> Self {
        let (state, _) = watch::channel(TaskState::Pending);
        Self { id, connection, method: method.into(), cancelled: AtomicBool::new(false), state }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Moves to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn advance(&self, next: TaskState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_advance_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the task reaches a terminal state.
    pub async fn finished(&self) -> TaskState {
        let mut receiver = self.state.subscribe();
        let outcome = receiver.wait_for(TaskState::is_terminal).await.map(|state| *state);
        outcome.unwrap_or_else(|_| self.state())
    }
}

type TaskKey = (ConnectionId, RequestId);

/// Live asynchronous requests, keyed by connection and request id.
///
/// A handle leaves the registry when its task finishes or when its
/// connection is torn down.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskKey, Arc<TaskHandle>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending task. A request id may only be bound to one
    /// live task per connection.
    pub fn start(
        &self,
        connection: ConnectionId,
        id: RequestId,
        method: &str,
    ) -> Result<Arc<TaskHandle>, RpcError> {
        let mut tasks = self.tasks.lock().expect("task registry mutex poisoned");
        let key = (connection, id);
        if tasks.contains_key(&key) {
            return Err(RpcError::invalid_request(format!(
                "request id {} is already bound to a running task",
                key.1
            )));
        }
        let handle = Arc::new(TaskHandle::new(connection, key.1.clone(), method));
        tasks.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn get(&self, connection: ConnectionId, id: &RequestId) -> Option<Arc<TaskHandle>> {
        let tasks = self.tasks.lock().expect("task registry mutex poisoned");
        tasks.get(&(connection, id.clone())).cloned()
    }

    /// Raises the cancel flag of a live task. The task itself reports the
    /// outcome once its handler returns.
    pub fn cancel(&self, connection: ConnectionId, id: &RequestId) -> Result<(), RpcError> {
        match self.get(connection, id) {
            Some(handle) => {
                handle.request_cancel();
                log::debug!("tasks: cancel requested conn={connection} id={id}");
                Ok(())
            }
            None => Err(RpcError::TaskNotFound { id: id.clone() }),
        }
    }

    /// Records the terminal state of `handle` and drops it from the registry.
    pub fn finish(&self, handle: &Arc<TaskHandle>, state: TaskState) -> bool {
        self.finish_with(handle, state, || {})
    }

    /// Like [`finish`](Self::finish), running `announce` (typically sending the
    /// terminal message) while the id is still bound. A request that reuses
    /// the id is either rejected as a duplicate or starts after `announce`.
    pub fn finish_with(
        &self,
        handle: &Arc<TaskHandle>,
        state: TaskState,
        announce: impl FnOnce(),
    ) -> bool {
        let mut tasks = self.tasks.lock().expect("task registry mutex poisoned");
        let advanced = handle.advance(state);
        announce();
        let key = (handle.connection(), handle.id().clone());
        if tasks.get(&key).is_some_and(|live| Arc::ptr_eq(live, handle)) {
            tasks.remove(&key);
        }
        advanced
    }

    /// Cancels and forgets every task of a closing connection.
    pub fn cancel_connection(&self, connection: ConnectionId) -> usize {
        let mut tasks = self.tasks.lock().expect("task registry mutex poisoned");
        let mut cancelled = 0;
        tasks.retain(|(owner, _), handle| {
            if *owner != connection {
                return true;
            }
            handle.request_cancel();
            cancelled += 1;
            false
        });
        cancelled
    }

    pub fn count_for(&self, connection: ConnectionId) -> usize {
        let tasks = self.tasks.lock().expect("task registry mutex poisoned");
        tasks.keys().filter(|(owner, _)| *owner == connection).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().expect("task registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a task handler sees of its own task: cancellation and progress.
pub struct TaskContext {
    handle: Arc<TaskHandle>,
    connection: Arc<ConnectionContext>,
}

impl TaskContext {
    pub(crate) fn new(handle: Arc<TaskHandle>, connection: Arc<ConnectionContext>) -> Self {
        Self { handle, connection }
    }

    pub fn id(&self) -> &RequestId {
        self.handle.id()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// `Err(TaskCancelled)` once cancellation was requested, for use with `?`.
    pub fn check_cancelled(&self) -> Result<(), RpcError> {
        if self.is_cancelled() {
            Err(RpcError::TaskCancelled)
        } else {
            Ok(())
        }
    }

    /// Sends a progress notification for this task. Dropped silently once
    /// the task was cancelled or has finished.
    pub fn report_progress(&self, message: impl Into<String>, amount: f64) {
        if self.is_cancelled() || self.handle.state().is_terminal() {
            return;
        }
        self.connection.send(Message::progress(self.handle.id().clone(), message, amount));
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", self.handle.id())
            .field("connection", &self.connection.id())
            .finish()
    }
}
