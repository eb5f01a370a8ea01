use std::collections::VecDeque;

/// Binary frames received on one connection without a method, waiting for a
/// request to claim them. Frames leave in arrival order, exactly once.
///
/// No size cap is applied here; backpressure belongs to the transport.
#[derive(Debug, Default)]
pub struct BinaryUploadBuffer {
    frames: VecDeque<Vec<u8>>,
    buffered_bytes: usize,
}

impl BinaryUploadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Vec<u8>) {
        self.buffered_bytes = self.buffered_bytes.saturating_add(frame.len());
        self.frames.push_back(frame);
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        let frame = self.frames.pop_front()?;
        self.buffered_bytes = self.buffered_bytes.saturating_sub(frame.len());
        Some(frame)
    }

    /// Returns a claimed frame to the head of the queue, ahead of later chunks.
    pub fn restore(&mut self, frame: Vec<u8>) {
        self.buffered_bytes = self.buffered_bytes.saturating_add(frame.len());
        self.frames.push_front(frame);
    }

    /// Discards every buffered frame and returns how many were dropped.
    pub fn flush(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        self.buffered_bytes = 0;
        dropped
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::BinaryUploadBuffer;

    #[test]
    fn pops_in_insertion_order_then_runs_dry() {
        let mut buffer = BinaryUploadBuffer::new();
        buffer.push(b"first".to_vec());
        buffer.push(b"second".to_vec());
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.buffered_bytes(), 11);

        assert_eq!(buffer.pop().as_deref(), Some(&b"first"[..]));
        assert_eq!(buffer.pop().as_deref(), Some(&b"second"[..]));
        assert_eq!(buffer.pop(), None);
        assert_eq!(buffer.buffered_bytes(), 0);
    }

    #[test]
    fn restored_frame_is_popped_first() {
        let mut buffer = BinaryUploadBuffer::new();
        buffer.push(b"a".to_vec());
        buffer.push(b"b".to_vec());
        let claimed = buffer.pop().expect("frame");
        buffer.restore(claimed);
        assert_eq!(buffer.buffered_bytes(), 2);
        assert_eq!(buffer.pop().as_deref(), Some(&b"a"[..]));
        assert_eq!(buffer.pop().as_deref(), Some(&b"b"[..]));
    }

    #[test]
    fn flush_discards_everything() {
        let mut buffer = BinaryUploadBuffer::new();
        for chunk in 0..3u8 {
            buffer.push(vec![chunk; 4]);
        }
        assert_eq!(buffer.flush(), 3);
        assert!(buffer.is_empty());
        assert_eq!(buffer.pop(), None);
        assert_eq!(buffer.flush(), 0);
    }
}
