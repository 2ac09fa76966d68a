// Bounded blocking buffer between the acquisition producer and the averaging worker
//
// Blocks travel over a bounded crossbeam channel, so a full buffer stalls the
// producer instead of discarding data. Cancel and finish are broadcast by
// dropping the sender of a signal channel, which disconnects every receiver
// selecting on it.

use crate::error::{ErpError, Result};
use crate::types::{Block, BlockShape};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for buffer monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BufferMetrics {
    pub total_pushed: u64,
    pub total_popped: u64,
    /// Number of pushes that had to wait for free space
    pub producer_stalls: u64,
    pub current_size: usize,
    pub peak_size: usize,
    pub capacity: usize,
}

/// Channels of one buffer session; replaced wholesale by `reset`
struct Lanes {
    blocks_tx: Sender<Block>,
    blocks_rx: Receiver<Block>,
    cancel_tx: Option<Sender<()>>,
    cancel_rx: Receiver<()>,
    finish_tx: Option<Sender<()>>,
    finish_rx: Receiver<()>,
}

impl Lanes {
    fn new(capacity: usize) -> Self {
        let (blocks_tx, blocks_rx) = channel::bounded(capacity);
        let (cancel_tx, cancel_rx) = channel::bounded(0);
        let (finish_tx, finish_rx) = channel::bounded(0);

        Self {
            blocks_tx,
            blocks_rx,
            cancel_tx: Some(cancel_tx),
            cancel_rx,
            finish_tx: Some(finish_tx),
            finish_rx,
        }
    }

    fn is_closed(&self) -> bool {
        self.cancel_tx.is_none()
    }

    fn is_finished(&self) -> bool {
        self.finish_tx.is_none()
    }
}

#[derive(Default)]
struct ShapeLatch {
    shape: Option<BlockShape>,
    fault: Option<(BlockShape, BlockShape)>,
}

fn is_cancelled(cancel_rx: &Receiver<()>) -> bool {
    matches!(cancel_rx.try_recv(), Err(TryRecvError::Disconnected))
}

/// Thread-safe bounded FIFO of fixed-shape blocks
///
/// `push` blocks while the buffer is full, `pop` blocks while it is empty.
/// `cancel` closes the buffer and wakes every waiting thread; `pop` then
/// returns `None`. `finish` ends the stream gracefully: queued blocks are
/// still handed out before `pop` returns `None`.
pub struct BoundedBlockBuffer {
    lanes: RwLock<Lanes>,
    latch: Mutex<ShapeLatch>,
    capacity: usize,

    total_pushed: AtomicU64,
    total_popped: AtomicU64,
    producer_stalls: AtomicU64,
    peak_size: AtomicUsize,
}

impl BoundedBlockBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ErpError::InvalidConfig(
                "buffer capacity must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            lanes: RwLock::new(Lanes::new(capacity)),
            latch: Mutex::new(ShapeLatch::default()),
            capacity,
            total_pushed: AtomicU64::new(0),
            total_popped: AtomicU64::new(0),
            producer_stalls: AtomicU64::new(0),
            peak_size: AtomicUsize::new(0),
        })
    }

    /// Enqueue a block, waiting while the buffer is full
    ///
    /// The first block latches the shape. A block of any other shape closes
    /// the buffer and returns `ShapeMismatch`.
    pub fn push(&self, block: Block) -> Result<()> {
        let (blocks_tx, cancel_rx, finish_rx) = {
            let lanes = self.lanes.read();
            if lanes.is_closed() || lanes.is_finished() {
                return Err(ErpError::BufferClosed);
            }
            (
                lanes.blocks_tx.clone(),
                lanes.cancel_rx.clone(),
                lanes.finish_rx.clone(),
            )
        };

        self.latch_shape(&block)?;

        match blocks_tx.try_send(block) {
            Ok(()) => {}
            Err(TrySendError::Full(block)) => {
                self.producer_stalls.fetch_add(1, Ordering::Relaxed);
                crossbeam::select! {
                    send(blocks_tx, block) -> sent => sent.map_err(|_| ErpError::BufferClosed)?,
                    recv(cancel_rx) -> _ => return Err(ErpError::BufferClosed),
                    recv(finish_rx) -> _ => return Err(ErpError::BufferClosed),
                }
            }
            Err(TrySendError::Disconnected(_)) => return Err(ErpError::BufferClosed),
        }

        self.total_pushed.fetch_add(1, Ordering::Relaxed);
        self.peak_size.fetch_max(blocks_tx.len(), Ordering::Relaxed);
        Ok(())
    }

    /// Dequeue the oldest block, waiting while the buffer is empty
    ///
    /// Returns `None` once the buffer has been cancelled or faulted, or once
    /// a finished buffer has been drained.
    pub fn pop(&self) -> Option<Block> {
        let (blocks_rx, cancel_rx, finish_rx) = {
            let lanes = self.lanes.read();
            (
                lanes.blocks_rx.clone(),
                lanes.cancel_rx.clone(),
                lanes.finish_rx.clone(),
            )
        };

        if is_cancelled(&cancel_rx) {
            return None;
        }

        let block = crossbeam::select! {
            recv(blocks_rx) -> block => block.ok(),
            recv(cancel_rx) -> _ => None,
            // Finished: hand out whatever is still queued
            recv(finish_rx) -> _ => {
                if is_cancelled(&cancel_rx) {
                    None
                } else {
                    blocks_rx.try_recv().ok()
                }
            }
        };

        self.count_popped(block)
    }

    /// Dequeue without waiting
    pub fn try_pop(&self) -> Option<Block> {
        let lanes = self.lanes.read();
        if lanes.is_closed() {
            return None;
        }
        let block = lanes.blocks_rx.try_recv().ok();
        drop(lanes);

        self.count_popped(block)
    }

    /// Close the buffer and release every thread blocked in `push` or `pop`
    pub fn cancel(&self) {
        self.lanes.write().cancel_tx.take();
    }

    /// Stop accepting blocks and let `pop` drain the queue
    pub fn finish(&self) {
        self.lanes.write().finish_tx.take();
    }

    /// Reopen the buffer, dropping queued blocks, the latched shape and any fault
    ///
    /// Threads still waiting on the previous session are released as if cancelled.
    pub fn reset(&self) {
        *self.lanes.write() = Lanes::new(self.capacity);
        *self.latch.lock() = ShapeLatch::default();

        self.total_pushed.store(0, Ordering::Relaxed);
        self.total_popped.store(0, Ordering::Relaxed);
        self.producer_stalls.store(0, Ordering::Relaxed);
        self.peak_size.store(0, Ordering::Relaxed);
    }

    /// The shape mismatch that closed this buffer, if any
    pub fn fault(&self) -> Option<ErpError> {
        self.latch
            .lock()
            .fault
            .map(|(expected, found)| ErpError::ShapeMismatch { expected, found })
    }

    pub fn shape(&self) -> Option<BlockShape> {
        self.latch.lock().shape
    }

    pub fn is_closed(&self) -> bool {
        self.lanes.read().is_closed()
    }

    pub fn is_finished(&self) -> bool {
        self.lanes.read().is_finished()
    }

    pub fn len(&self) -> usize {
        self.lanes.read().blocks_rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.read().blocks_rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metrics(&self) -> BufferMetrics {
        BufferMetrics {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            total_popped: self.total_popped.load(Ordering::Relaxed),
            producer_stalls: self.producer_stalls.load(Ordering::Relaxed),
            current_size: self.len(),
            peak_size: self.peak_size.load(Ordering::Relaxed),
            capacity: self.capacity,
        }
    }

    fn latch_shape(&self, block: &Block) -> Result<()> {
        let found = block.shape();
        let mut latch = self.latch.lock();

        match latch.shape {
            Some(expected) if expected != found => {
                log::error!(
                    "Rejecting block {}: expected {}, found {}",
                    block.sequence,
                    expected,
                    found
                );
                latch.fault = Some((expected, found));
                drop(latch);
                self.cancel();
                Err(ErpError::ShapeMismatch { expected, found })
            }
            Some(_) => Ok(()),
            None => {
                latch.shape = Some(found);
                Ok(())
            }
        }
    }

    fn count_popped(&self, block: Option<Block>) -> Option<Block> {
        if block.is_some() {
            self.total_popped.fetch_add(1, Ordering::Relaxed);
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn create_test_block(seq: u64, channels: usize, samples: usize) -> Block {
        Block::new(seq, DMatrix::from_element(channels, samples, seq as f64))
    }

    #[test]
    fn test_push_pop_fifo() {
        let buffer = BoundedBlockBuffer::new(4).unwrap();

        for seq in 0..3 {
            buffer.push(create_test_block(seq, 2, 5)).unwrap();
        }
        assert_eq!(buffer.len(), 3);

        assert_eq!(buffer.pop().unwrap().sequence, 0);
        assert_eq!(buffer.pop().unwrap().sequence, 1);
        assert_eq!(buffer.try_pop().unwrap().sequence, 2);
        assert!(buffer.try_pop().is_none());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(BoundedBlockBuffer::new(0).is_err());
    }

    #[test]
    fn test_shape_mismatch_closes_buffer() {
        let buffer = BoundedBlockBuffer::new(4).unwrap();
        buffer.push(create_test_block(0, 2, 5)).unwrap();

        let err = buffer.push(create_test_block(1, 2, 6)).unwrap_err();
        assert!(matches!(err, ErpError::ShapeMismatch { .. }));
        assert!(buffer.is_closed());
        assert!(matches!(buffer.fault(), Some(ErpError::ShapeMismatch { .. })));

        assert!(matches!(
            buffer.push(create_test_block(2, 2, 5)),
            Err(ErpError::BufferClosed)
        ));
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn test_cancel_unblocks_pop() {
        let buffer = Arc::new(BoundedBlockBuffer::new(4).unwrap());

        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.pop())
        };

        thread::sleep(Duration::from_millis(50));
        buffer.cancel();

        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn test_backpressure_stalls_producer() {
        let buffer = Arc::new(BoundedBlockBuffer::new(2).unwrap());

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for seq in 0..3 {
                    buffer.push(create_test_block(seq, 1, 4)).unwrap();
                }
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.metrics().producer_stalls, 1);

        assert_eq!(buffer.pop().unwrap().sequence, 0);
        producer.join().unwrap();

        assert_eq!(buffer.pop().unwrap().sequence, 1);
        assert_eq!(buffer.pop().unwrap().sequence, 2);

        let metrics = buffer.metrics();
        assert_eq!(metrics.total_pushed, 3);
        assert_eq!(metrics.total_popped, 3);
        assert_eq!(metrics.peak_size, 2);
    }

    #[test]
    fn test_cancel_unblocks_push() {
        let buffer = Arc::new(BoundedBlockBuffer::new(1).unwrap());
        buffer.push(create_test_block(0, 1, 4)).unwrap();

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.push(create_test_block(1, 1, 4)))
        };

        thread::sleep(Duration::from_millis(50));
        buffer.cancel();

        assert!(matches!(
            producer.join().unwrap(),
            Err(ErpError::BufferClosed)
        ));
    }

    #[test]
    fn test_finish_drains_queue() {
        let buffer = BoundedBlockBuffer::new(4).unwrap();
        buffer.push(create_test_block(0, 1, 4)).unwrap();
        buffer.push(create_test_block(1, 1, 4)).unwrap();
        buffer.finish();
        assert!(buffer.is_finished());

        assert!(matches!(
            buffer.push(create_test_block(2, 1, 4)),
            Err(ErpError::BufferClosed)
        ));
        assert_eq!(buffer.pop().unwrap().sequence, 0);
        assert_eq!(buffer.pop().unwrap().sequence, 1);
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn test_finish_unblocks_waiting_pop() {
        let buffer = Arc::new(BoundedBlockBuffer::new(4).unwrap());

        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.pop())
        };

        thread::sleep(Duration::from_millis(50));
        buffer.finish();

        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn test_reset_reopens() {
        let buffer = BoundedBlockBuffer::new(2).unwrap();
        buffer.push(create_test_block(0, 1, 4)).unwrap();
        buffer.cancel();
        buffer.reset();

        assert!(!buffer.is_closed());
        assert!(buffer.is_empty());
        assert!(buffer.shape().is_none());

        buffer.push(create_test_block(1, 3, 8)).unwrap();
        assert_eq!(buffer.pop().unwrap().sequence, 1);
    }

    #[test]
    fn test_reset_releases_waiting_producer() {
        let buffer = Arc::new(BoundedBlockBuffer::new(1).unwrap());
        buffer.push(create_test_block(0, 1, 4)).unwrap();

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.push(create_test_block(1, 1, 4)))
        };

        thread::sleep(Duration::from_millis(50));
        buffer.reset();

        assert!(matches!(
            producer.join().unwrap(),
            Err(ErpError::BufferClosed)
        ));
        assert!(buffer.is_empty());
        assert_eq!(buffer.metrics().total_pushed, 0);
    }
}
