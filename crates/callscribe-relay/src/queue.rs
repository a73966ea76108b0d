//! Bounded FIFO between the inbound receiver and the outbound forwarder.
//!
//! One producer, one consumer. `put` waits for a free slot instead of
//! dropping audio. A put that waits longer than the stall threshold is
//! reported once per occurrence and then keeps waiting.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use callscribe_core::protocol::AudioFrame;

/// An entry in the audio queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    Frame(AudioFrame),
    /// No more audio will follow.
    EndOfStream,
}

/// The consumer side of the queue has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("audio queue closed")]
pub struct QueueClosed;

/// Producer half. Consumed by [`AudioQueueTx::finish`], so the end-of-stream
/// marker can be enqueued at most once and nothing can follow it.
pub struct AudioQueueTx {
    tx: mpsc::Sender<QueueItem>,
    stall_warn: Duration,
}

/// Consumer half.
pub struct AudioQueueRx {
    rx: mpsc::Receiver<QueueItem>,
}

/// Create a queue holding at most `capacity` items (minimum 1).
pub fn audio_queue(capacity: usize, stall_warn: Duration) -> (AudioQueueTx, AudioQueueRx) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (AudioQueueTx { tx, stall_warn }, AudioQueueRx { rx })
}

impl AudioQueueTx {
    /// Enqueue a frame, waiting while the queue is full.
    pub async fn put(&self, frame: AudioFrame) -> Result<(), QueueClosed> {
        self.send(QueueItem::Frame(frame)).await
    }

    /// Enqueue the end-of-stream marker and release the producer.
    pub async fn finish(self) -> Result<(), QueueClosed> {
        self.send(QueueItem::EndOfStream).await
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    async fn send(&self, item: QueueItem) -> Result<(), QueueClosed> {
        let permit = match self.tx.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Closed(())) => return Err(QueueClosed),
            Err(TrySendError::Full(())) => {
                match tokio::time::timeout(self.stall_warn, self.tx.reserve()).await {
                    Ok(reserved) => reserved.map_err(|_| QueueClosed)?,
                    Err(_) => {
                        warn!(
                            capacity = self.tx.max_capacity(),
                            waited_ms = self.stall_warn.as_millis() as u64,
                            "Audio queue full, inbound audio is waiting on the transcription side"
                        );
                        crate::metrics::record_queue_stall();
                        self.tx.reserve().await.map_err(|_| QueueClosed)?
                    }
                }
            }
        };
        permit.send(item);
        Ok(())
    }
}

impl AudioQueueRx {
    /// Next item in FIFO order. `None` once the producer is gone and the
    /// queue is empty.
    pub async fn take(&mut self) -> Option<QueueItem> {
        self.rx.recv().await
    }
}
