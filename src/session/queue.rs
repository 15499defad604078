//! # Audio Payload Queue
//!
//! Bounded handoff of reassembled audio payloads from the ingress loop to the
//! transcription worker. The small capacity is the backpressure mechanism:
//! when the engine falls behind, `write` blocks, which stalls the ingress
//! loop, which stops reading frames, which pushes back on the client through
//! the transport.
//!
//! ## Contract:
//! - capacity is fixed at [`AUDIO_QUEUE_CAPACITY`]; a full queue blocks the
//!   writer until the consumer makes room
//! - `close()` marks the writer side complete and is idempotent; items
//!   already queued are still delivered to the reader
//! - the reader yields payloads in FIFO order and ends once the queue is
//!   empty and the writer side is complete
//! - payload buffers move through the queue by ownership; nothing is copied

use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Queue depth. Small enough to exert backpressure on the client well before
/// engine latency dominates memory, large enough to pipeline one in-flight
/// transcription with a few buffered uploads.
pub const AUDIO_QUEUE_CAPACITY: usize = 4;

/// Why a `write` did not enqueue the payload.
#[derive(Debug, PartialEq, Eq)]
pub enum QueueWriteError {
    /// The writer side has been completed; no further payloads are accepted.
    Closed,

    /// The cancellation signal fired while waiting for space.
    Cancelled,
}

impl fmt::Display for QueueWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueWriteError::Closed => write!(f, "audio queue closed"),
            QueueWriteError::Cancelled => write!(f, "audio queue write cancelled"),
        }
    }
}

impl std::error::Error for QueueWriteError {}

/// Writer side of the payload queue. Safe to share between producers, though
/// a session only ever writes from its ingress loop.
pub struct AudioQueue {
    sender: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
}

/// Consumer side of the payload queue. Exactly one per queue.
pub struct AudioQueueReader {
    receiver: mpsc::Receiver<Vec<u8>>,
}

impl AudioQueue {
    /// Create a queue with its single reader.
    pub fn new() -> (Self, AudioQueueReader) {
        let (sender, receiver) = mpsc::channel(AUDIO_QUEUE_CAPACITY);
        (
            Self {
                sender: Mutex::new(Some(sender)),
            },
            AudioQueueReader { receiver },
        )
    }

    /// Enqueue one payload, blocking while the queue is full.
    ///
    /// Ownership of the buffer transfers to the queue on success. On
    /// cancellation or close the buffer is dropped here; the caller is done
    /// with it either way.
    pub async fn write(
        &self,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<(), QueueWriteError> {
        // Clone the sender out of the lock so a blocked write never holds it.
        let sender = match self.sender.lock().unwrap().as_ref() {
            Some(sender) => sender.clone(),
            None => return Err(QueueWriteError::Closed),
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(QueueWriteError::Cancelled),
            sent = sender.send(payload) => sent.map_err(|_| QueueWriteError::Closed),
        }
    }

    /// Complete the writer side. Idempotent. Already-queued payloads remain
    /// readable; the reader ends after draining them.
    pub fn close(&self) {
        self.sender.lock().unwrap().take();
    }

    /// Whether the writer side has been completed.
    pub fn is_closed(&self) -> bool {
        self.sender.lock().unwrap().is_none()
    }
}

impl AudioQueueReader {
    /// Next payload in FIFO order, or `None` once the queue is drained and
    /// the writer side is complete.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn payload(tag: u8) -> Vec<u8> {
        vec![tag; 8]
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut reader) = AudioQueue::new();
        let cancel = CancellationToken::new();

        for tag in 0..4u8 {
            queue.write(payload(tag), &cancel).await.unwrap();
        }
        queue.close();

        for tag in 0..4u8 {
            assert_eq!(reader.next().await.unwrap(), payload(tag));
        }
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_write_blocks_when_full() {
        let (queue, mut reader) = AudioQueue::new();
        let cancel = CancellationToken::new();

        for tag in 0..AUDIO_QUEUE_CAPACITY as u8 {
            queue.write(payload(tag), &cancel).await.unwrap();
        }

        // The fifth write must not complete while the queue stays full.
        let blocked = queue.write(payload(99), &cancel);
        assert!(
            timeout(Duration::from_millis(100), blocked).await.is_err(),
            "write should block at capacity"
        );

        // Draining one item unblocks the writer.
        assert_eq!(reader.next().await.unwrap(), payload(0));
        timeout(Duration::from_secs(1), queue.write(payload(99), &cancel))
            .await
            .expect("write should proceed after drain")
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_preserves_queued_items() {
        let (queue, mut reader) = AudioQueue::new();
        let cancel = CancellationToken::new();

        queue.write(payload(1), &cancel).await.unwrap();
        queue.write(payload(2), &cancel).await.unwrap();

        queue.close();
        queue.close();
        assert!(queue.is_closed());

        assert_eq!(reader.next().await.unwrap(), payload(1));
        assert_eq!(reader.next().await.unwrap(), payload(2));
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (queue, _reader) = AudioQueue::new();
        let cancel = CancellationToken::new();

        queue.close();
        let result = queue.write(payload(1), &cancel).await;
        assert_eq!(result, Err(QueueWriteError::Closed));
    }

    #[tokio::test]
    async fn test_write_fails_when_reader_dropped() {
        let (queue, reader) = AudioQueue::new();
        let cancel = CancellationToken::new();

        drop(reader);
        let result = queue.write(payload(1), &cancel).await;
        assert_eq!(result, Err(QueueWriteError::Closed));
    }

    #[tokio::test]
    async fn test_blocked_write_observes_cancellation() {
        let (queue, _reader) = AudioQueue::new();
        let cancel = CancellationToken::new();

        for tag in 0..AUDIO_QUEUE_CAPACITY as u8 {
            queue.write(payload(tag), &cancel).await.unwrap();
        }

        let pending = tokio::spawn({
            let cancel = cancel.clone();
            async move { queue.write(payload(99), &cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = timeout(Duration::from_secs(1), pending)
            .await
            .expect("cancelled write should return promptly")
            .unwrap();
        assert_eq!(result, Err(QueueWriteError::Cancelled));
    }
}
