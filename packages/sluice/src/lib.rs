//! In-process concurrency orchestration: bounded channels, guarded shared state, signal barriers,
//! pipeline stages, fan-out/fan-in aggregation, and task launching with completion tracking.

#[macro_use]
extern crate tracing;

mod channel;
pub mod guarded;
pub mod signal;
pub mod task;
pub mod tracker;
pub mod launch;
pub mod pipeline;
pub mod select;
pub mod fan;
pub mod config;
pub mod runtime;

pub use crate::channel::api::*;
pub use crate::{
    guarded::GuardedState,
    signal::{signal, Signal, Waiter},
    task::{task_fn, blocking_task, Task, TaskId, TaskState},
    tracker::CompletionTracker,
    launch::{Launcher, TaskHandle},
    pipeline::Pipeline,
    select::{Select, Selected},
    config::RuntimeConfig,
    runtime::Orchestrator,
};

/// Error types
pub mod error {
    pub use crate::channel::error::*;
}

/// Future types
pub mod future {
    pub use crate::channel::api::future::*;
}

#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
