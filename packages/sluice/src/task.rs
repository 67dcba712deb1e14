//! Units of work that a [`Launcher`](crate::launch::Launcher) can run.

use std::{
    fmt::{self, Display, Formatter},
    future::Future,
    panic::resume_unwind,
    sync::atomic::{AtomicU8, Ordering},
};


/// An independently schedulable unit of work
///
/// Implemented by [`FnTask`] for async closures and [`BlockingTask`] for synchronous closures which
/// should run on the blocking thread pool. Results travel back either through the task's output or
/// over channels the caller wires up itself.
pub trait Task: Send + 'static {
    /// What the task yields when it completes
    type Output: Send + 'static;

    /// Consume the task into the future that runs it
    fn execute(self) -> impl Future<Output = Self::Output> + Send;
}

/// Task that runs an async closure
#[derive(Debug, Clone)]
pub struct FnTask<F>(F);

/// Wrap an async closure as a task
pub fn task_fn<F, Fut>(f: F) -> FnTask<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    FnTask(f)
}

impl<F, Fut> Task for FnTask<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    type Output = Fut::Output;

    fn execute(self) -> impl Future<Output = Self::Output> + Send {
        (self.0)()
    }
}

/// Task that runs a synchronous closure on the blocking thread pool
#[derive(Debug, Clone)]
pub struct BlockingTask<F>(F);

/// Wrap a synchronous closure as a task
pub fn blocking_task<F, O>(f: F) -> BlockingTask<F>
where
    F: FnOnce() -> O + Send + 'static,
    O: Send + 'static,
{
    BlockingTask(f)
}

impl<F, O> Task for BlockingTask<F>
where
    F: FnOnce() -> O + Send + 'static,
    O: Send + 'static,
{
    type Output = O;

    fn execute(self) -> impl Future<Output = O> + Send {
        async move {
            match tokio::task::spawn_blocking(self.0).await {
                Ok(output) => output,
                // surface the closure's panic as this task's panic
                Err(e) if e.is_panic() => resume_unwind(e.into_panic()),
                Err(e) => panic!("blocking task did not run: {}", e),
            }
        }
    }
}


/// Identifier of a launched task, unique per [`Launcher`](crate::launch::Launcher)
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// The raw id number
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Lifecycle state of a launched task
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum TaskState {
    /// Launched but not yet polled
    Created,
    /// Polled at least once and not yet finished
    Running,
    /// Ran to completion
    Completed,
    /// Panicked or was aborted before completing
    Failed,
}

impl TaskState {
    fn from_u8(byte: u8) -> Self {
        match byte {
            0 => TaskState::Created,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            3 => TaskState::Failed,
            _ => unreachable!("invalid task state byte: {}", byte),
        }
    }

    /// Whether the task has finished, successfully or not
    pub fn is_finished(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

// atomically shared task state.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell(AtomicU8::new(TaskState::Created as u8))
    }

    pub(crate) fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: TaskState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
