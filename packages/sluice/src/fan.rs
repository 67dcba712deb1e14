//! Fan-out/fan-in aggregation.
//!
//! Aggregators launch tasks which report into a shared buffered channel. The channel is sized so
//! that a report never blocks, which means a task whose result is abandoned after a timeout still
//! runs to completion and exits instead of leaking.

use crate::{
    channel::api::{channel, Receiver},
    launch::Launcher,
    select::{Select, Selected},
    task::Task,
};
use std::time::Duration;


/// Outcome of [`collect_all`]
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Collected<V> {
    /// Every task reported, in order of reporting
    Complete(Vec<V>),
    /// The deadline elapsed before every task reported
    TimedOut {
        /// Results which were reported before the deadline, in order of reporting
        partial: Vec<V>,
        /// How many tasks had not reported
        missing: usize,
    },
    /// Every task exited, but some exited without reporting, such as by panicking
    Incomplete {
        /// Results which were reported, in order of reporting
        partial: Vec<V>,
        /// How many tasks did not report
        missing: usize,
    },
}

impl<V> Collected<V> {
    /// Get the results if every task reported
    pub fn complete(self) -> Option<Vec<V>> {
        match self {
            Collected::Complete(results) => Some(results),
            _ => None,
        }
    }

    /// Get whatever results were reported
    pub fn into_results(self) -> Vec<V> {
        match self {
            Collected::Complete(results) => results,
            Collected::TimedOut { partial, .. } => partial,
            Collected::Incomplete { partial, .. } => partial,
        }
    }
}

/// Launch every task and wait for all of them to report their output
///
/// Results are gathered in order of reporting, not in order of launch. Without a deadline, this
/// waits as long as tasks keep running, but returns [`Collected::Incomplete`] rather than blocking
/// forever if a task exits without reporting.
pub async fn collect_all<K, I>(
    launcher: &Launcher,
    tasks: I,
    deadline: Option<Duration>,
) -> Collected<K::Output>
where
    K: Task,
    I: IntoIterator<Item = K>,
{
    let tasks = tasks.into_iter().collect::<Vec<_>>();
    let expected = tasks.len();
    let (send, recv) = channel(expected);
    for task in tasks {
        let send = send.clone();
        launcher.spawn(async move {
            let output = task.execute().await;
            // sized so this never blocks, even once the aggregator has given up
            let _ = send.send(output).await;
        });
    }
    drop(send);
    gather(recv, expected, deadline).await
}

async fn gather<V>(recv: Receiver<V>, expected: usize, deadline: Option<Duration>) -> Collected<V> {
    let mut results = Vec::with_capacity(expected);
    let receive_all = async {
        while results.len() < expected {
            match recv.recv().await {
                Ok(Some(result)) => results.push(result),
                _ => break,
            }
        }
    };
    let finished = match deadline {
        Some(deadline) => tokio::time::timeout(deadline, receive_all).await.is_ok(),
        None => {
            receive_all.await;
            true
        }
    };
    let missing = expected - results.len();
    if !finished {
        debug!(missing, "collect deadline elapsed");
        Collected::TimedOut { partial: results, missing }
    } else if missing > 0 {
        warn!(missing, "tasks exited without reporting");
        Collected::Incomplete { partial: results, missing }
    } else {
        Collected::Complete(results)
    }
}


/// Outcome of [`race_first`] and [`race_within`]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Raced<V> {
    /// A task finished before the deadline, and this is its output
    Finished(V),
    /// The deadline elapsed first
    TimedOut,
    /// Every task exited without reporting, such as by panicking
    Lost,
}

impl<V> Raced<V> {
    /// Convert into an `Option`, mapping both timeout and loss to `None`
    pub fn finished(self) -> Option<V> {
        match self {
            Raced::Finished(v) => Some(v),
            _ => None,
        }
    }
}

/// Launch every task and take the output of whichever finishes first, unless the deadline
/// elapses first
///
/// The losing tasks are not aborted: they run to completion and their outputs are discarded.
pub async fn race_first<K, I>(
    launcher: &Launcher,
    tasks: I,
    deadline: Duration,
) -> Raced<K::Output>
where
    K: Task,
    I: IntoIterator<Item = K>,
{
    let tasks = tasks.into_iter().collect::<Vec<_>>();
    let (send, recv) = channel(tasks.len());
    for task in tasks {
        let send = send.clone();
        launcher.spawn(async move {
            let output = task.execute().await;
            // sized so this never blocks, even once abandoned
            let _ = send.send(output).await;
        });
    }
    drop(send);
    let outcome = Select::new()
        .recv(&recv, |result| match result {
            Ok(Some(output)) => Raced::Finished(output),
            _ => Raced::Lost,
        })
        .timeout(deadline)
        .run()
        .await;
    match outcome {
        Selected::Ready(raced) => raced,
        Selected::TimedOut => Raced::TimedOut,
    }
}

/// Launch a task and take its output, unless the deadline elapses first
pub async fn race_within<K: Task>(
    launcher: &Launcher,
    task: K,
    deadline: Duration,
) -> Raced<K::Output> {
    race_first(launcher, [task], deadline).await
}


/// Fan several receivers into one
///
/// Each input is forwarded by its own task. The returned receiver is exhausted once every input is
/// exhausted, and messages from one input keep their relative order.
pub fn merge<T, I>(launcher: &Launcher, inputs: I, capacity: usize) -> Receiver<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Receiver<T>>,
{
    let (send, recv) = channel(capacity);
    for input in inputs {
        let send = send.clone();
        launcher.spawn(async move {
            loop {
                match input.recv().await {
                    Ok(Some(msg)) => {
                        if send.send(msg).await.is_err() {
                            trace!("merged output abandoned");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(%e, "merged input failed");
                        break;
                    }
                }
            }
        });
    }
    recv
}
