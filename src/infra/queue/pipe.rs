//! Cross-process bounded queue over a pair of byte pipes.
//!
//! Items put on a [`PipeQueue`] are framed (see [`super::frame`]) and written
//! to the peer; items the peer writes are decoded into a local bounded buffer
//! and handed out by `get`. Two pump threads move frames between the pipes and
//! the local buffers. When the inbound buffer is full the reader pump stops
//! reading, the OS pipe fills up and the peer's writes block, so backpressure
//! crosses the process boundary.

use std::io::{BufReader, BufWriter, Read, Write};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::frame::{read_frame, write_frame};
use crate::core::worker::ProcessWorker;
use crate::core::{BoundedQueue, PutMode, WorkError};

/// Bounded queue endpoint whose peer lives in another process.
pub struct PipeQueue<T> {
    capacity: usize,
    outbound: Option<Sender<T>>,
    inbound: Receiver<T>,
    writer: Option<JoinHandle<()>>,
}

impl<T> PipeQueue<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Create an endpoint reading peer items from `reader` and writing ours to
    /// `writer`; each direction buffers at most `capacity` items locally.
    ///
    /// # Errors
    ///
    /// `WorkError::InvalidConfig` for a zero capacity, `WorkError::Worker` if a
    /// pump thread cannot be spawned.
    pub fn new<R, W>(reader: R, writer: W, capacity: usize) -> Result<Self, WorkError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        if capacity == 0 {
            return Err(WorkError::InvalidConfig("queue capacity must be greater than 0".into()));
        }
        let (out_tx, out_rx) = bounded::<T>(capacity);
        let (in_tx, in_rx) = bounded::<T>(capacity);

        let writer_pump = thread::Builder::new()
            .name("bw-pipe-writer".into())
            .spawn(move || pump_out(&out_rx, writer))
            .map_err(|e| WorkError::Worker(format!("failed to spawn pipe writer: {e}")))?;
        // The reader pump is detached: it ends at peer EOF or once this
        // endpoint is dropped and its next decoded item has nowhere to go.
        let _reader = thread::Builder::new()
            .name("bw-pipe-reader".into())
            .spawn(move || pump_in(reader, &in_tx))
            .map_err(|e| WorkError::Worker(format!("failed to spawn pipe reader: {e}")))?;

        Ok(Self {
            capacity,
            outbound: Some(out_tx),
            inbound: in_rx,
            writer: Some(writer_pump),
        })
    }

    /// Endpoint on this process's stdin/stdout, for use inside a child
    /// started with [`ProcessWorker::piped`].
    ///
    /// # Errors
    ///
    /// Same as [`PipeQueue::new`].
    pub fn stdio(capacity: usize) -> Result<Self, WorkError> {
        Self::new(std::io::stdin(), std::io::stdout(), capacity)
    }

    /// Endpoint talking to a running child started with
    /// [`ProcessWorker::piped`].
    ///
    /// # Errors
    ///
    /// `WorkError::Worker` if the child is not running or its stdio was not
    /// piped (or already taken), otherwise as [`PipeQueue::new`].
    pub fn from_worker(worker: &mut ProcessWorker, capacity: usize) -> Result<Self, WorkError> {
        let (stdin, stdout) = worker
            .take_stdio()
            .ok_or_else(|| WorkError::Worker("child stdio is not piped".into()))?;
        Self::new(stdout, stdin, capacity)
    }
}

impl<T> PipeQueue<T> {
    /// Stop sending: flush everything already put, then close the outbound
    /// pipe so the peer sees end of stream. Items can still be received.
    pub fn close(&mut self) {
        self.outbound = None;
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                warn!("Pipe writer panicked");
            }
        }
    }

    fn sender(&self) -> Result<&Sender<T>, WorkError> {
        self.outbound.as_ref().ok_or(WorkError::Disconnected)
    }
}

impl<T> Drop for PipeQueue<T> {
    fn drop(&mut self) {
        // Dropping the sender lets the writer pump flush and exit on its own.
        self.outbound = None;
    }
}

impl<T> std::fmt::Debug for PipeQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeQueue")
            .field("capacity", &self.capacity)
            .field("inbound", &self.inbound.len())
            .field("closed", &self.outbound.is_none())
            .finish()
    }
}

impl<T: Send> BoundedQueue<T> for PipeQueue<T> {
    fn put(&self, item: T, mode: PutMode) -> Result<(), WorkError> {
        let tx = self.sender()?;
        match mode {
            PutMode::Block => tx.send(item).map_err(|_| WorkError::Disconnected),
            PutMode::Timeout(timeout) => tx.send_timeout(item, timeout).map_err(|e| match e {
                SendTimeoutError::Timeout(_) => WorkError::Timeout,
                SendTimeoutError::Disconnected(_) => WorkError::Disconnected,
            }),
            PutMode::Reject => tx.try_send(item).map_err(|e| match e {
                TrySendError::Full(_) => WorkError::QueueFull {
                    capacity: self.capacity,
                },
                TrySendError::Disconnected(_) => WorkError::Disconnected,
            }),
        }
    }

    fn get(&self, timeout: Option<Duration>) -> Result<T, WorkError> {
        match timeout {
            None => self.inbound.recv().map_err(|_| WorkError::Disconnected),
            Some(timeout) => self.inbound.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => WorkError::Timeout,
                RecvTimeoutError::Disconnected => WorkError::Disconnected,
            }),
        }
    }

    fn try_get(&self) -> Option<T> {
        self.inbound.try_recv().ok()
    }

    fn len(&self) -> usize {
        self.inbound.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

fn pump_out<T: Serialize, W: Write>(items: &Receiver<T>, writer: W) {
    let mut writer = BufWriter::new(writer);
    for item in items {
        if let Err(e) = write_frame(&mut writer, &item) {
            warn!(error = %e, "Pipe writer stopped");
            return;
        }
    }
    debug!("Pipe writer drained and closed");
}

fn pump_in<T: DeserializeOwned, R: Read>(reader: R, items: &Sender<T>) {
    let mut reader = BufReader::new(reader);
    loop {
        match read_frame::<T, _>(&mut reader) {
            Ok(Some(item)) => {
                if items.send(item).is_err() {
                    debug!("Pipe endpoint dropped, reader exiting");
                    return;
                }
            }
            Ok(None) => {
                debug!("Pipe peer closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Pipe reader stopped");
                return;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::worker::Worker;
    use std::process::Command;

    #[test]
    fn test_round_trip_through_child_process() {
        let mut worker = ProcessWorker::piped("cat", Command::new("cat"));
        worker.start().unwrap();
        let mut queue = PipeQueue::<(u64, String)>::from_worker(&mut worker, 8).unwrap();

        for i in 0..50 {
            queue.put((i, format!("item-{i}")), PutMode::Block).unwrap();
        }
        let received: Vec<u64> = (0..50)
            .map(|_| queue.get(Some(Duration::from_secs(5))).unwrap().0)
            .collect();
        assert_eq!(received, (0..50).collect::<Vec<_>>());

        queue.close();
        assert_eq!(queue.put((99, String::new()), PutMode::Block), Err(WorkError::Disconnected));
        worker.join().unwrap();
        assert_eq!(queue.get(Some(Duration::from_secs(5))), Err(WorkError::Disconnected));
    }

    #[test]
    fn test_from_worker_requires_piped_stdio() {
        let mut worker = ProcessWorker::new("true", Command::new("true"));
        worker.start().unwrap();
        assert!(matches!(
            PipeQueue::<u8>::from_worker(&mut worker, 4),
            Err(WorkError::Worker(_))
        ));
        worker.join().unwrap();
    }
}
