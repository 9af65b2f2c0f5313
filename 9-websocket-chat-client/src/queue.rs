//! FIFO hand-off between the input reader and the connection writer.
//!
//! The queue is unbounded and `enqueue` never waits on the writer. There is
//! exactly one consumer: `dequeue` takes `&mut OutboundQueue` and the queue is
//! not `Clone`.

use tokio::sync::mpsc;

use crate::frame::Frame;

/// Creates a connected producer/consumer pair.
pub fn outbound_queue() -> (QueueProducer, OutboundQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueProducer { tx }, OutboundQueue { rx })
}

#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::UnboundedSender<Frame>,
}

/// Returned by [`QueueProducer::enqueue`] once the consumer is gone. Hands the
/// frame back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub struct QueueClosed(pub Frame);

impl QueueProducer {
    /// Appends a frame to the tail of the queue.
    ///
    /// Fails only when the consumer has been dropped, i.e. the session is over.
    pub fn enqueue(&self, frame: Frame) -> Result<(), QueueClosed> {
        self.tx.send(frame).map_err(|error| QueueClosed(error.0))
    }
}

#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl OutboundQueue {
    /// Waits for the next frame in enqueue order.
    ///
    /// Returns `None` once every producer has been dropped and the queue is
    /// drained, which is how the end of local input reaches the writer.
    ///
    /// Cancel safe: a frame is never lost if this future is dropped before it
    /// completes.
    pub async fn dequeue(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Number of frames still waiting to be sent.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
