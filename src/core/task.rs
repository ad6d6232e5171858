//! Periodic tasks.
//!
//! A [`Task`] owns one [`ThreadWorker`] whose loop waits on a [`Timer`] and
//! invokes a callback at every tick. Callback errors and panics are logged and
//! the loop keeps going; the loop ends only when the callback returns
//! [`Flow::Stop`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::process::Command;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::core::worker::{ProcessWorker, ThreadWorker, Worker};
use crate::core::{AppResult, Timer, WorkError};

/// Exit code a process-backed callback uses to request its task to stop.
pub const STOP_EXIT_CODE: i32 = 3;

/// What the task loop does after a callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Wait for the next tick.
    Continue,
    /// Run the callback again right away; the timer is re-armed a full period
    /// after the last repeated call.
    Repeat,
    /// Leave the loop for good.
    Stop,
}

/// Result of one callback invocation.
pub type TaskResult = AppResult<Flow>;

/// Work run by a task at each tick.
pub trait Callback: Send + 'static {
    /// Run once.
    ///
    /// # Errors
    ///
    /// Any error is logged by the task loop and treated as transient.
    fn call(&mut self) -> TaskResult;
}

impl<F> Callback for F
where
    F: FnMut() -> TaskResult + Send + 'static,
{
    fn call(&mut self) -> TaskResult {
        self()
    }
}

/// Callback running a fresh child process per tick.
///
/// Success continues the schedule, exit code `stop_code` stops it, any other
/// outcome is a transient failure.
pub struct ProcessCallback {
    name: String,
    make_command: Box<dyn FnMut() -> Command + Send>,
    stop_code: i32,
}

impl ProcessCallback {
    /// Build the command with `make_command` at every tick.
    pub fn new<F>(name: impl Into<String>, make_command: F) -> Self
    where
        F: FnMut() -> Command + Send + 'static,
    {
        Self {
            name: name.into(),
            make_command: Box::new(make_command),
            stop_code: STOP_EXIT_CODE,
        }
    }

    /// Use another exit code as the stop signal.
    #[must_use]
    pub const fn with_stop_code(mut self, stop_code: i32) -> Self {
        self.stop_code = stop_code;
        self
    }
}

impl Callback for ProcessCallback {
    fn call(&mut self) -> TaskResult {
        let mut worker = ProcessWorker::new(self.name.clone(), (self.make_command)());
        worker.start()?;
        match worker.join() {
            Ok(()) => Ok(Flow::Continue),
            Err(WorkError::ProcessExit { code: Some(code), .. }) if code == self.stop_code => {
                Ok(Flow::Stop)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Built, worker not started.
    Created = 0,
    /// Loop running.
    Running = 1,
    /// Loop exited after a stop request.
    Stopped = 2,
}

impl TaskState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// How the loop paces callback invocations.
enum Schedule {
    Periodic(Timer),
    /// Back-to-back calls; the callback paces itself by blocking.
    Continuous,
}

/// Callback scheduled on its own worker thread.
pub struct Task {
    id: Uuid,
    name: String,
    state: Arc<AtomicU8>,
    worker: Mutex<ThreadWorker>,
}

impl Task {
    /// Create a task running `callback` at every tick of `timer`.
    pub fn new<C: Callback>(name: impl Into<String>, timer: Timer, callback: C) -> Self {
        Self::build(name.into(), Schedule::Periodic(timer), callback)
    }

    /// Create a task whose callback runs back-to-back and paces itself,
    /// typically by blocking on a queue with a bounded wait.
    pub fn continuous<C: Callback>(name: impl Into<String>, callback: C) -> Self {
        Self::build(name.into(), Schedule::Continuous, callback)
    }

    /// Create and start a task running `callback` once per `period`.
    ///
    /// # Errors
    ///
    /// `WorkError::InvalidConfig` for a zero period, `WorkError::Worker` if the
    /// thread cannot be spawned.
    pub fn every<C: Callback>(
        name: impl Into<String>,
        period: Duration,
        callback: C,
    ) -> Result<Self, WorkError> {
        let mut task = Self::new(name, Timer::new(period)?, callback);
        task.start()?;
        Ok(task)
    }

    fn build<C: Callback>(name: String, schedule: Schedule, callback: C) -> Self {
        let id = Uuid::new_v4();
        let state = Arc::new(AtomicU8::new(TaskState::Created as u8));
        let loop_state = Arc::clone(&state);
        let loop_name = name.clone();
        let worker = ThreadWorker::new(thread_name(&name), move || {
            run_loop(&loop_name, id, schedule, callback);
            loop_state.store(TaskState::Stopped as u8, Ordering::Release);
        });
        Self {
            id,
            name,
            state,
            worker: Mutex::new(worker),
        }
    }

    /// Start the worker.
    ///
    /// # Errors
    ///
    /// `WorkError::Worker` if already started or the thread cannot be spawned.
    pub fn start(&mut self) -> Result<(), WorkError> {
        self.worker.get_mut().start()?;
        let _ = self.state.compare_exchange(
            TaskState::Created as u8,
            TaskState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        info!(task = %self.name, task_id = %self.id, "Task started");
        Ok(())
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique id, also attached to the task's log lines.
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the loop has exited.
    pub fn is_stopped(&self) -> bool {
        self.state() == TaskState::Stopped
    }

    /// Block until the loop exits. Only returns once the callback has asked
    /// to stop.
    ///
    /// # Errors
    ///
    /// `WorkError::Worker` if the task was never started.
    pub fn join(&mut self) -> Result<(), WorkError> {
        self.worker.get_mut().join()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn run_loop<C: Callback>(name: &str, id: Uuid, mut schedule: Schedule, mut callback: C) {
    let mut repeating = false;
    loop {
        match &mut schedule {
            Schedule::Periodic(timer) => {
                if repeating {
                    timer.rearm();
                }
                timer.wait();
            }
            Schedule::Continuous => {}
        }
        repeating = false;
        loop {
            match invoke(name, id, &mut callback) {
                Flow::Continue => break,
                Flow::Repeat => repeating = true,
                Flow::Stop => {
                    info!(task = %name, task_id = %id, "Task stopped");
                    return;
                }
            }
        }
    }
}

fn invoke<C: Callback>(name: &str, id: Uuid, callback: &mut C) -> Flow {
    match panic::catch_unwind(AssertUnwindSafe(|| callback.call())) {
        Ok(Ok(flow)) => flow,
        Ok(Err(e)) => {
            error!(task = %name, task_id = %id, error = %format!("{e:#}"), "Task callback failed");
            Flow::Continue
        }
        Err(payload) => {
            let reason = panic_reason(&*payload);
            error!(task = %name, task_id = %id, panic = %reason, "Task callback panicked");
            debug!(task = %name, "Continuing after panic");
            Flow::Continue
        }
    }
}

/// Name of the OS thread running task `task`.
pub(crate) fn thread_name(task: &str) -> String {
    format!("bw-task-{task}")
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

/// Run a user callback, reporting a panic as an error.
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> AppResult<R>) -> AppResult<R> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(anyhow::anyhow!("panicked: {}", panic_reason(&*payload))))
}
