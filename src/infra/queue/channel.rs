//! In-process bounded queue on a crossbeam channel.

use std::time::Duration;

use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};

use crate::core::{BoundedQueue, PutMode, WorkError};

/// Thread-safe bounded FIFO. Share it behind an `Arc`.
///
/// The queue holds both channel ends, so it never disconnects while alive.
#[derive(Debug)]
pub struct ChannelQueue<T> {
    capacity: usize,
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> ChannelQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Errors
    ///
    /// `WorkError::InvalidConfig` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, WorkError> {
        if capacity == 0 {
            return Err(WorkError::InvalidConfig("queue capacity must be greater than 0".into()));
        }
        let (tx, rx) = bounded(capacity);
        Ok(Self { capacity, tx, rx })
    }

    /// Drop everything queued, returning how many items were discarded.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }
}

impl<T: Send> BoundedQueue<T> for ChannelQueue<T> {
    fn put(&self, item: T, mode: PutMode) -> Result<(), WorkError> {
        match mode {
            PutMode::Block => self.tx.send(item).map_err(|_| WorkError::Disconnected),
            PutMode::Timeout(timeout) => self.tx.send_timeout(item, timeout).map_err(|e| match e {
                SendTimeoutError::Timeout(_) => WorkError::Timeout,
                SendTimeoutError::Disconnected(_) => WorkError::Disconnected,
            }),
            PutMode::Reject => self.tx.try_send(item).map_err(|e| match e {
                TrySendError::Full(_) => WorkError::QueueFull {
                    capacity: self.capacity,
                },
                TrySendError::Disconnected(_) => WorkError::Disconnected,
            }),
        }
    }

    fn get(&self, timeout: Option<Duration>) -> Result<T, WorkError> {
        match timeout {
            None => self.rx.recv().map_err(|_| WorkError::Disconnected),
            Some(timeout) => self.rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => WorkError::Timeout,
                RecvTimeoutError::Disconnected => WorkError::Disconnected,
            }),
        }
    }

    fn try_get(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    fn len(&self) -> usize {
        self.rx.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
