//! Workers: a unit of execution backed by an OS thread or a child process.
//!
//! Both backings share one contract: a worker is created idle, started once
//! with [`Worker::start`], and waited on with [`Worker::join`]. A worker is not
//! restartable.

use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::core::WorkError;

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Built but not started.
    Created,
    /// Started and not yet joined.
    Running,
    /// Joined.
    Finished,
}

/// Uniform start/join contract over threads and processes.
pub trait Worker: Send {
    /// Worker name used in logs and thread names.
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> WorkerState;

    /// Launch the worker.
    ///
    /// # Errors
    ///
    /// `WorkError::Worker` if the worker was already started or the OS refused
    /// to create the thread/process.
    fn start(&mut self) -> Result<(), WorkError>;

    /// Block until the worker finishes.
    ///
    /// # Errors
    ///
    /// `WorkError::Worker` if the worker was never started or panicked,
    /// `WorkError::ProcessExit` if a child process exited unsuccessfully.
    fn join(&mut self) -> Result<(), WorkError>;

    /// Whether the worker has run to completion (non-blocking).
    fn is_finished(&mut self) -> bool;
}

type Body = Box<dyn FnOnce() + Send + 'static>;

/// Worker running a closure on a dedicated, named OS thread.
pub struct ThreadWorker {
    name: String,
    body: Option<Body>,
    handle: Option<JoinHandle<()>>,
    stack_size: Option<usize>,
    state: WorkerState,
}

impl ThreadWorker {
    /// Create an idle worker for `body`.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Some(Box::new(body)),
            handle: None,
            stack_size: None,
            state: WorkerState::Created,
        }
    }

    /// Override the thread stack size.
    #[must_use]
    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }
}

impl Worker for ThreadWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> WorkerState {
        self.state
    }

    fn start(&mut self) -> Result<(), WorkError> {
        let Some(body) = self.body.take() else {
            return Err(WorkError::Worker(format!("worker `{}` already started", self.name)));
        };
        let mut builder = thread::Builder::new().name(self.name.clone());
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let handle = builder
            .spawn(body)
            .map_err(|e| WorkError::Worker(format!("failed to spawn `{}`: {e}", self.name)))?;
        debug!(worker = %self.name, "Thread worker started");
        self.handle = Some(handle);
        self.state = WorkerState::Running;
        Ok(())
    }

    fn join(&mut self) -> Result<(), WorkError> {
        let Some(handle) = self.handle.take() else {
            return Err(WorkError::Worker(format!("worker `{}` is not running", self.name)));
        };
        self.state = WorkerState::Finished;
        handle.join().map_err(|_| {
            warn!(worker = %self.name, "Thread worker panicked");
            WorkError::Worker(format!("worker `{}` panicked", self.name))
        })
    }

    fn is_finished(&mut self) -> bool {
        match &self.handle {
            Some(handle) => handle.is_finished(),
            None => self.state == WorkerState::Finished,
        }
    }
}

impl std::fmt::Debug for ThreadWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadWorker")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Worker running an external entry point as a child process.
///
/// The child shares no memory with the caller; exchange data through a
/// [`PipeQueue`](crate::infra::queue::PipeQueue) over its stdio.
#[derive(Debug)]
pub struct ProcessWorker {
    name: String,
    command: Command,
    child: Option<Child>,
    exit_code: Option<i32>,
    state: WorkerState,
}

impl ProcessWorker {
    /// Create an idle worker for `command`.
    pub fn new(name: impl Into<String>, command: Command) -> Self {
        Self {
            name: name.into(),
            command,
            child: None,
            exit_code: None,
            state: WorkerState::Created,
        }
    }

    /// Create an idle worker whose stdin and stdout are piped back to the
    /// caller, ready for [`ProcessWorker::take_stdio`].
    pub fn piped(name: impl Into<String>, mut command: Command) -> Self {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        Self::new(name, command)
    }

    /// Take the child's piped stdin/stdout once it is running.
    pub fn take_stdio(&mut self) -> Option<(ChildStdin, ChildStdout)> {
        let child = self.child.as_mut()?;
        Some((child.stdin.take()?, child.stdout.take()?))
    }

    /// OS process id while running.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Exit code recorded by `join`, `None` before that or if killed by a signal.
    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }
}

impl Worker for ProcessWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> WorkerState {
        self.state
    }

    fn start(&mut self) -> Result<(), WorkError> {
        if self.state != WorkerState::Created {
            return Err(WorkError::Worker(format!("worker `{}` already started", self.name)));
        }
        let child = self
            .command
            .spawn()
            .map_err(|e| WorkError::Worker(format!("failed to spawn `{}`: {e}", self.name)))?;
        debug!(worker = %self.name, pid = child.id(), "Process worker started");
        self.child = Some(child);
        self.state = WorkerState::Running;
        Ok(())
    }

    fn join(&mut self) -> Result<(), WorkError> {
        let Some(mut child) = self.child.take() else {
            return Err(WorkError::Worker(format!("worker `{}` is not running", self.name)));
        };
        // Close our end of stdin so children reading it see EOF.
        drop(child.stdin.take());
        let status = child
            .wait()
            .map_err(|e| WorkError::Worker(format!("failed to wait for `{}`: {e}", self.name)))?;
        self.state = WorkerState::Finished;
        self.exit_code = status.code();
        if status.success() {
            Ok(())
        } else {
            Err(WorkError::ProcessExit {
                name: self.name.clone(),
                code: status.code(),
            })
        }
    }

    fn is_finished(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => self.state == WorkerState::Finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_thread_worker_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut worker = ThreadWorker::new("bw-test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(worker.state(), WorkerState::Created);
        worker.start().unwrap();
        assert!(worker.start().is_err());
        worker.join().unwrap();
        assert_eq!(worker.state(), WorkerState::Finished);
        assert!(worker.is_finished());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_worker_panic_reported_on_join() {
        let mut worker = ThreadWorker::new("bw-panic", || panic!("boom"));
        worker.start().unwrap();
        assert!(matches!(worker.join(), Err(WorkError::Worker(_))));
    }

    #[test]
    fn test_join_before_start_fails() {
        let mut worker = ThreadWorker::new("bw-idle", || {});
        assert!(worker.join().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_worker_exit_codes() {
        let mut ok = ProcessWorker::new("true", Command::new("true"));
        ok.start().unwrap();
        ok.join().unwrap();
        assert_eq!(ok.exit_code(), Some(0));

        let mut command = Command::new("sh");
        command.args(["-c", "exit 7"]);
        let mut failing = ProcessWorker::new("exit-7", command);
        failing.start().unwrap();
        assert_eq!(
            failing.join(),
            Err(WorkError::ProcessExit {
                name: "exit-7".into(),
                code: Some(7)
            })
        );
        assert!(failing.is_finished());
    }
}
