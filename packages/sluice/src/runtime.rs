//! The orchestration context.

use crate::{
    channel::api::{channel, Receiver, Sender},
    config::{ConfigError, RuntimeConfig},
    fan::{self, Collected, Raced},
    launch::Launcher,
    pipeline::Pipeline,
    task::Task,
};
use std::{
    future::Future,
    path::Path,
    time::Duration,
};
use tokio::runtime::{Handle, Runtime};


/// Owns everything an orchestration needs: the runtime, a launcher bound to it, and the config
///
/// Tasks launched through the orchestrator are torn down with it. [`shutdown`](Self::shutdown)
/// waits for every launched task before dropping the runtime.
#[derive(Debug)]
pub struct Orchestrator {
    runtime: Runtime,
    launcher: Launcher,
    config: RuntimeConfig,
}

impl Orchestrator {
    /// Build the runtime described by `config`
    pub fn new(config: RuntimeConfig) -> Result<Self, ConfigError> {
        let runtime = config.build_runtime()?;
        let launcher = Launcher::with_handle(runtime.handle().clone());
        debug!(?config, "orchestrator started");
        Ok(Orchestrator { runtime, launcher, config })
    }

    /// Load a config file and build the runtime it describes
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Orchestrator::new(RuntimeConfig::load(path)?)
    }

    /// The launcher for starting tracked tasks on this orchestrator's runtime
    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// The config this orchestrator was built with
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Handle to the underlying runtime
    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Create a channel with the configured capacity
    pub fn channel<T>(&self) -> (Sender<T>, Receiver<T>) {
        channel(self.config.channel_capacity)
    }

    /// Start a pipeline from `items`, with channels of the configured capacity
    pub fn pipeline<T, I>(&self, items: I) -> Pipeline<T>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T> + Send + 'static,
        I::IntoIter: Send,
    {
        Pipeline::source(&self.launcher, self.config.channel_capacity, items)
    }

    /// Collect the output of every task, with the configured collect deadline
    pub async fn collect_all<K, I>(&self, tasks: I) -> Collected<K::Output>
    where
        K: Task,
        I: IntoIterator<Item = K>,
    {
        fan::collect_all(&self.launcher, tasks, self.config.collect_deadline()).await
    }

    /// Race tasks against the configured race deadline, or against `fallback` if none is set
    pub async fn race_first<K, I>(&self, tasks: I, fallback: Duration) -> Raced<K::Output>
    where
        K: Task,
        I: IntoIterator<Item = K>,
    {
        let deadline = self.config.race_deadline().unwrap_or(fallback);
        fan::race_first(&self.launcher, tasks, deadline).await
    }

    /// Run a future to completion on this orchestrator's runtime, blocking the current thread
    ///
    /// Panics if called from within an async context.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Wait for every launched task to finish, then tear down the runtime
    pub fn shutdown(self) {
        let Orchestrator { runtime, launcher, .. } = self;
        runtime.block_on(launcher.wait_all());
        trace!("all launched tasks finished, dropping runtime");
        drop(runtime);
    }

    /// Like [`shutdown`](Self::shutdown), but stop waiting for tasks once the timeout elapses
    ///
    /// Returns whether every task finished. Tasks still running are cancelled at their next
    /// suspension point.
    pub fn shutdown_within(self, timeout: Duration) -> bool {
        let Orchestrator { runtime, launcher, .. } = self;
        let finished = runtime.block_on(launcher.wait_all_within(timeout)).is_ok();
        if !finished {
            warn!(outstanding = launcher.outstanding(), "shutting down with tasks still running");
        }
        runtime.shutdown_timeout(Duration::ZERO);
        finished
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        guarded::GuardedState,
        task::{task_fn, blocking_task},
    };

    fn orchestrator(toml: &str) -> Orchestrator {
        Orchestrator::new(RuntimeConfig::from_toml_str(toml).unwrap()).unwrap()
    }

    #[test]
    fn shutdown_waits_for_launched_tasks() {
        crate::init_test_tracing();
        let orchestrator = orchestrator("worker_threads = 2");
        let counter = GuardedState::new(0);
        for _ in 0..50 {
            let counter = counter.clone();
            orchestrator.launcher().launch(blocking_task(move || {
                std::thread::sleep(Duration::from_millis(1));
                counter.blocking_with_lock(|n| *n += 1);
            }));
        }
        orchestrator.shutdown();
        assert_eq!(counter.into_inner().unwrap(), 50);
    }

    #[test]
    fn pipeline_uses_configured_capacity() {
        let orchestrator = orchestrator("channel_capacity = 0");
        let (send, _recv) = orchestrator.channel::<()>();
        assert_eq!(send.capacity(), 0);
        let out = orchestrator
            .block_on(orchestrator.pipeline(vec!["a", "b"]).map(str::to_uppercase).collect())
            .unwrap();
        assert_eq!(out, vec!["A", "B"]);
        orchestrator.shutdown();
    }

    #[test]
    fn deadlines_come_from_config() {
        let orchestrator = orchestrator("collect_deadline_ms = 20\nrace_deadline_ms = 20");
        let slow = || task_fn(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let collected = orchestrator.block_on(orchestrator.collect_all(vec![slow()]));
        assert_eq!(collected, Collected::TimedOut { partial: vec![], missing: 1 });
        let raced = orchestrator
            .block_on(orchestrator.race_first(vec![slow()], Duration::from_secs(600)));
        assert_eq!(raced, Raced::TimedOut);
        assert!(!orchestrator.shutdown_within(Duration::from_millis(10)));
    }
}
