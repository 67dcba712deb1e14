//! Launching tasks and joining them.

use crate::{
    task::{Task, TaskId, TaskState, StateCell},
    tracker::{CompletionTracker, CompletionGuard},
};
use std::{
    any::Any,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering::Relaxed},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::error::Elapsed,
};
use tracing::Instrument;


/// Error for joining a task which did not run to completion
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum JoinError {
    /// The task panicked
    #[error("{id} panicked: {message}")]
    Panicked {
        /// Which task panicked
        id: TaskId,
        /// The panic message, if it was a string
        message: String,
    },
    /// The task was aborted before it completed
    #[error("{id} was aborted")]
    Aborted {
        /// Which task was aborted
        id: TaskId,
    },
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}


/// Starts tasks concurrently and tracks how many are still outstanding
///
/// Cloning produces another handle which shares the same tracker and id sequence.
#[derive(Debug, Clone)]
pub struct Launcher {
    tracker: CompletionTracker,
    next_id: Arc<AtomicU64>,
    handle: Option<Handle>,
}

impl Launcher {
    /// Construct a launcher which spawns onto the ambient tokio runtime
    ///
    /// Launching through it panics if called outside of a tokio runtime.
    pub fn new() -> Self {
        Launcher {
            tracker: CompletionTracker::new(),
            next_id: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// Construct a launcher which spawns onto the given runtime
    pub fn with_handle(handle: Handle) -> Self {
        Launcher { handle: Some(handle), ..Launcher::new() }
    }

    /// Start a task concurrently
    pub fn launch<K: Task>(&self, task: K) -> TaskHandle<K::Output> {
        self.start(None, async move { task.execute().await })
    }

    /// Start a task concurrently, with a name for logging
    pub fn launch_named<K: Task>(
        &self,
        name: impl Into<String>,
        task: K,
    ) -> TaskHandle<K::Output> {
        self.start(Some(name.into()), async move { task.execute().await })
    }

    /// Start a plain future concurrently, tracked like any other task
    pub fn spawn<F>(&self, fut: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.start(None, fut)
    }

    fn start<F>(&self, name: Option<String>, fut: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Relaxed));
        let state = Arc::new(StateCell::new());
        let span = info_span!("task", id = id.get(), name = name.as_deref().unwrap_or(""));
        let mut lifecycle = Lifecycle {
            id,
            state: Arc::clone(&state),
            completed: false,
            _guard: self.tracker.enter(),
        };
        let task = async move {
            lifecycle.state.set(TaskState::Running);
            trace!("task running");
            let output = fut.await;
            lifecycle.complete();
            output
        }
        .instrument(span);
        let join = match &self.handle {
            Some(handle) => handle.spawn(task),
            None => tokio::spawn(task),
        };
        TaskHandle { id, name, state, join }
    }

    /// The tracker counting this launcher's outstanding tasks
    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    /// Number of launched tasks which have not yet finished
    pub fn outstanding(&self) -> usize {
        self.tracker.outstanding()
    }

    /// Wait until every launched task has finished
    pub async fn wait_all(&self) {
        self.tracker.wait().await
    }

    /// Wait until every launched task has finished, or the timeout elapses
    pub async fn wait_all_within(&self, timeout: Duration) -> Result<(), Elapsed> {
        self.tracker.wait_within(timeout).await
    }

    /// Block the current thread until every launched task has finished
    ///
    /// Must not be called from a runtime worker thread.
    pub fn wait_all_blocking(&self) {
        self.tracker.wait_blocking()
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Launcher::new()
    }
}

// moved into a launched task, so that dropping it marks the task as finished.
struct Lifecycle {
    id: TaskId,
    state: Arc<StateCell>,
    completed: bool,
    // dropped after Drop::drop runs, so the state is final before the tracker is decremented
    _guard: CompletionGuard,
}

impl Lifecycle {
    fn complete(&mut self) {
        self.completed = true;
        self.state.set(TaskState::Completed);
        trace!("task completed");
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if !self.completed {
            self.state.set(TaskState::Failed);
            warn!(id = self.id.get(), "task ended without completing");
        }
    }
}


/// Handle to a launched task
///
/// Dropping the handle detaches the task rather than aborting it.
#[derive(Debug)]
pub struct TaskHandle<O> {
    id: TaskId,
    name: Option<String>,
    state: Arc<StateCell>,
    join: JoinHandle<O>,
}

impl<O> TaskHandle<O> {
    /// The task's id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The task's name, if it was launched with one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The task's current lifecycle state
    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Whether the task has finished, successfully or not
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Abort the task
    ///
    /// This is advisory in the sense that a task is only aborted at its next suspension point, and
    /// a task running on the blocking pool keeps running.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Wait for the task to finish and take its output
    pub async fn join(self) -> Result<O, JoinError> {
        let id = self.id;
        self.join.await.map_err(|e| {
            if e.is_panic() {
                JoinError::Panicked { id, message: panic_message(&*e.into_panic()) }
            } else {
                JoinError::Aborted { id }
            }
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::api::channel,
        guarded::GuardedState,
        task::{task_fn, blocking_task},
    };

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn wait_all_after_many_launches() {
        crate::init_test_tracing();
        let launcher = Launcher::new();
        let counter = GuardedState::new(0);
        let handles = (0..100)
            .map(|_| {
                let counter = counter.clone();
                launcher.launch(task_fn(move || async move {
                    counter.with_lock(|n| *n += 1).await;
                }))
            })
            .collect::<Vec<_>>();
        launcher.wait_all().await;
        assert_eq!(launcher.outstanding(), 0);
        assert_eq!(counter.snapshot().await, 100);
        for handle in handles {
            assert_eq!(handle.state(), TaskState::Completed);
            handle.join().await.unwrap();
        }
    }

    #[tokio::test]
    async fn ids_are_unique_and_names_kept() {
        let launcher = Launcher::new();
        let a = launcher.launch_named("alpha", task_fn(|| async { 1 }));
        let b = launcher.clone().spawn(async { 2 });
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), Some("alpha"));
        assert_eq!(b.name(), None);
        assert_eq!(a.join().await, Ok(1));
        assert_eq!(b.join().await, Ok(2));
    }

    #[tokio::test]
    async fn panic_is_reported_and_tracker_released() {
        let launcher = Launcher::new();
        let handle = launcher.launch(task_fn(|| async {
            panic!("task failed loudly");
        }));
        let id = handle.id();
        launcher.wait_all().await;
        assert_eq!(handle.state(), TaskState::Failed);
        assert_eq!(
            handle.join().await,
            Err::<(), _>(JoinError::Panicked { id, message: "task failed loudly".into() }),
        );
    }

    #[tokio::test]
    async fn blocking_panic_is_reported() {
        let launcher = Launcher::new();
        let handle = launcher.launch(blocking_task(|| -> u8 { panic!("blocking failure") }));
        match handle.join().await {
            Err(JoinError::Panicked { message, .. }) => assert_eq!(message, "blocking failure"),
            other => panic!("unexpected join result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn abort_is_reported() {
        let launcher = Launcher::new();
        let (_send, recv) = channel::<()>(0);
        let handle = launcher.spawn(async move {
            let _ = recv.recv().await;
        });
        tokio::task::yield_now().await;
        handle.abort();
        launcher.wait_all().await;
        assert_eq!(handle.state(), TaskState::Failed);
        assert!(matches!(handle.join().await, Err(JoinError::Aborted { .. })));
    }

    #[test]
    fn launcher_with_explicit_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .build()
            .unwrap();
        let launcher = Launcher::with_handle(runtime.handle().clone());
        for _ in 0..10 {
            let _ = launcher.launch(blocking_task(|| ()));
        }
        launcher.wait_all_blocking();
        assert_eq!(launcher.outstanding(), 0);
    }
}
