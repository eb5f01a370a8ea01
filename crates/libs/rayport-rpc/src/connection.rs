use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rayport_wire::{encode, Message, RawFrame};
use tokio::sync::mpsc;

use crate::upload::BinaryUploadBuffer;

/// Identifies one client connection for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("connection closed")]
pub struct SinkClosed;

/// Outbound side of a connection. Frames must reach the peer in send order.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: RawFrame) -> Result<(), SinkClosed>;
}

impl FrameSink for mpsc::UnboundedSender<RawFrame> {
    fn send_frame(&self, frame: RawFrame) -> Result<(), SinkClosed> {
        self.send(frame).map_err(|_| SinkClosed)
    }
}

/// Per-connection state shared by the reader, handlers and task workers.
pub struct ConnectionContext {
    id: ConnectionId,
    uploads: Mutex<BinaryUploadBuffer>,
    sink: Arc<dyn FrameSink>,
    closed: AtomicBool,
}

impl ConnectionContext {
    pub fn new(id: ConnectionId, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            id,
            uploads: Mutex::new(BinaryUploadBuffer::new()),
            sink,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Encodes and queues `message`. Returns false if it could not be sent;
    /// the failure is logged and never escalated.
    pub fn send(&self, message: Message) -> bool {
        if self.is_closed() {
            log::debug!("[{}] dropping outbound message for id {}", self.id, message.id());
            return false;
        }
        let raw = match encode(message.into_frame()) {
            Ok(raw) => raw,
            Err(err) => {
                log::error!("[{}] failed to encode outbound message: {err}", self.id);
                return false;
            }
        };
        match self.sink.send_frame(raw) {
            Ok(()) => true,
            Err(err) => {
                log::debug!("[{}] outbound frame dropped: {err}", self.id);
                false
            }
        }
    }

    pub fn push_upload(&self, frame: Vec<u8>) {
        let mut uploads = self.uploads.lock().expect("upload buffer mutex poisoned");
        uploads.push(frame);
        log::trace!(
            "[{}] buffered upload frame, {} pending ({} bytes)",
            self.id,
            uploads.len(),
            uploads.buffered_bytes()
        );
    }

    /// Takes the oldest buffered upload frame, if any.
    pub fn pop_upload(&self) -> Option<Vec<u8>> {
        self.uploads.lock().expect("upload buffer mutex poisoned").pop()
    }

    /// Puts back a frame taken by [`pop_upload`](Self::pop_upload) for a
    /// request that was rejected before any handler saw it. Dropped if the
    /// connection already closed.
    pub fn restore_upload(&self, frame: Vec<u8>) {
        let mut uploads = self.uploads.lock().expect("upload buffer mutex poisoned");
        if !self.is_closed() {
            uploads.restore(frame);
        }
    }

    pub fn flush_uploads(&self) -> usize {
        self.uploads.lock().expect("upload buffer mutex poisoned").flush()
    }

    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().expect("upload buffer mutex poisoned").len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the connection closed and discards buffered uploads.
    pub(crate) fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        self.flush_uploads()
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionContext, ConnectionId};
    use rayport_wire::{decode, Message, Payload, RawFrame, RequestId};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn context() -> (ConnectionContext, mpsc::UnboundedReceiver<RawFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionContext::new(ConnectionId::new(1), Arc::new(tx)), rx)
    }

    #[test]
    fn send_encodes_binary_results_as_binary_frames() {
        let (connection, mut rx) = context();
        let sent = connection.send(Message::result(
            RequestId::Integer(1),
            Payload::with_binary(json!({"ok": true}), vec![1, 2, 3]),
        ));
        assert!(sent);
        let raw = rx.try_recv().expect("frame queued");
        assert!(raw.is_binary());
        let frame = decode(raw).expect("decode");
        assert_eq!(frame.binary(), &[1, 2, 3]);
    }

    #[test]
    fn send_after_close_or_hangup_is_dropped() {
        let (connection, rx) = context();
        drop(rx);
        assert!(!connection.send(Message::progress(RequestId::Integer(1), "x", 0.1)));

        let (connection, mut rx) = context();
        connection.push_upload(vec![1]);
        assert_eq!(connection.close(), 1);
        assert!(!connection.send(Message::progress(RequestId::Integer(1), "x", 0.1)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn uploads_are_consumed_in_order() {
        let (connection, _rx) = context();
        connection.push_upload(b"a".to_vec());
        connection.push_upload(b"b".to_vec());
        assert_eq!(connection.pending_uploads(), 2);
        assert_eq!(connection.pop_upload().as_deref(), Some(&b"a"[..]));
        assert_eq!(connection.flush_uploads(), 1);
        assert_eq!(connection.pop_upload(), None);
    }

    #[test]
    fn restored_upload_keeps_its_place_until_close() {
        let (connection, _rx) = context();
        connection.push_upload(b"a".to_vec());
        connection.push_upload(b"b".to_vec());
        let claimed = connection.pop_upload().expect("frame");
        connection.restore_upload(claimed);
        assert_eq!(connection.pop_upload().as_deref(), Some(&b"a"[..]));

        assert_eq!(connection.close(), 1);
        connection.restore_upload(b"late".to_vec());
        assert_eq!(connection.pending_uploads(), 0);
    }
}
