//! Pipeline stages chained end to end with channels.
//!
//! A stage reads its input channel to exhaustion and closes its output channel exactly once, on
//! every exit path. Downstream stages learn that upstream is done only through that close.

use crate::{
    channel::api::{channel, Receiver, Sender},
    error::{RecvError, SendErrorCause},
    launch::{JoinError, Launcher, TaskHandle},
    task::task_fn,
};
use std::{
    convert::Infallible,
    future::{ready, Future},
};
use thiserror::Error;


/// Counts of items a stage handled
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct StageStats {
    /// Items received from the input channel
    pub received: usize,
    /// Items sent into the output channel
    pub sent: usize,
}

/// Error for a stage which stopped before passing everything downstream
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum StageError<E> {
    /// The stage function failed on an item
    #[error("stage function failed: {0}")]
    Failed(E),
    /// Every receiver of the output channel was dropped
    #[error("all downstream receivers were dropped")]
    NoReceivers,
    /// The input or output channel was cancelled
    #[error("channel was cancelled")]
    Cancelled,
}

impl<E> From<SendErrorCause> for StageError<E> {
    fn from(cause: SendErrorCause) -> Self {
        match cause {
            SendErrorCause::NoReceivers(_) => StageError::NoReceivers,
            SendErrorCause::Cancelled(_) => StageError::Cancelled,
        }
    }
}

// owns a stage's output sender, closing it when dropped.
struct CloseOnDrop<T>(Option<Sender<T>>);

impl<T> CloseOnDrop<T> {
    fn new(sender: Sender<T>) -> Self {
        CloseOnDrop(Some(sender))
    }

    fn sender(&self) -> &Sender<T> {
        match &self.0 {
            Some(sender) => sender,
            None => unreachable!("stage output already released"),
        }
    }

    // cancel the output instead of closing it.
    fn cancel(mut self) {
        if let Some(sender) = self.0.take() {
            sender.cancel();
        }
    }
}

impl<T> Drop for CloseOnDrop<T> {
    fn drop(&mut self) {
        if let Some(sender) = self.0.take() {
            if !sender.try_close() {
                warn!("stage output was closed by someone other than its stage");
            }
        }
    }
}

// receive the rest of the input, discarding it.
async fn drain<T>(input: &Receiver<T>, stats: &mut StageStats) {
    while let Ok(Some(_)) = input.recv().await {
        stats.received += 1;
    }
}

// shared loop behind every stage which has both an input and an output.
async fn run_stage<I, O, E, F, Fut>(
    input: Receiver<I>,
    output: Sender<O>,
    mut f: F,
) -> Result<StageStats, StageError<E>>
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<O, E>>,
{
    let output = CloseOnDrop::new(output);
    let mut stats = StageStats::default();
    loop {
        let item = match input.recv().await {
            Ok(Some(item)) => item,
            Ok(None) => {
                trace!(?stats, "stage input exhausted");
                return Ok(stats);
            }
            Err(RecvError::Cancelled(_)) => {
                debug!(?stats, "stage input cancelled, cancelling output");
                output.cancel();
                return Err(StageError::Cancelled);
            }
        };
        stats.received += 1;
        let mapped = match f(item).await {
            Ok(mapped) => mapped,
            Err(e) => {
                // downstream sees exhausted without waiting on the drain
                drop(output);
                drain(&input, &mut stats).await;
                return Err(StageError::Failed(e));
            }
        };
        let sent = output.sender().send(mapped).await;
        if let Err(e) = sent {
            drop(output);
            drain(&input, &mut stats).await;
            return Err(e.cause.into());
        }
        stats.sent += 1;
    }
}

/// Source stage: send every item into `output`, then close it
pub async fn source<T, I>(items: I, output: Sender<T>) -> Result<StageStats, StageError<Infallible>>
where
    I: IntoIterator<Item = T>,
{
    let output = CloseOnDrop::new(output);
    let mut stats = StageStats::default();
    for item in items {
        output.sender().send(item).await.map_err(|e| StageError::from(e.cause))?;
        stats.sent += 1;
    }
    Ok(stats)
}

/// Transform stage: send `f` of every input item into `output`
pub async fn transform<I, O, F>(
    input: Receiver<I>,
    output: Sender<O>,
    mut f: F,
) -> Result<StageStats, StageError<Infallible>>
where
    F: FnMut(I) -> O,
{
    run_stage(input, output, move |item| ready(Ok(f(item)))).await
}

/// Fallible transform stage
///
/// The first error stops sending. The output is closed right away, then the rest of the input is
/// drained, after which the error is returned.
pub async fn try_transform<I, O, E, F>(
    input: Receiver<I>,
    output: Sender<O>,
    mut f: F,
) -> Result<StageStats, StageError<E>>
where
    F: FnMut(I) -> Result<O, E>,
{
    run_stage(input, output, move |item| ready(f(item))).await
}

/// Transform stage with an async function
pub async fn transform_async<I, O, F, Fut>(
    input: Receiver<I>,
    output: Sender<O>,
    mut f: F,
) -> Result<StageStats, StageError<Infallible>>
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = O>,
{
    run_stage(input, output, move |item| {
        let fut = f(item);
        async move { Ok(fut.await) }
    }).await
}

/// Sink stage: run `f` on every input item
pub async fn sink<T, F>(input: Receiver<T>, mut f: F) -> Result<StageStats, StageError<Infallible>>
where
    F: FnMut(T),
{
    let mut stats = StageStats::default();
    loop {
        match input.recv().await {
            Ok(Some(item)) => {
                stats.received += 1;
                f(item);
            }
            Ok(None) => return Ok(stats),
            Err(RecvError::Cancelled(_)) => return Err(StageError::Cancelled),
        }
    }
}


// ==== pipeline builder ====


/// Error for a pipeline which did not run cleanly
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage reported an error
    #[error("stage {index} ({name}) failed: {cause:#}")]
    Stage {
        /// Position of the stage, counting from the source
        index: usize,
        /// Name the stage was launched with
        name: String,
        /// What the stage reported
        cause: anyhow::Error,
    },
    /// A stage task panicked or was aborted
    #[error("stage {index} did not finish")]
    Join {
        /// Position of the stage, counting from the source
        index: usize,
        /// Why the stage did not finish
        #[source]
        error: JoinError,
    },
    /// The final output was cancelled, without any stage reporting why
    #[error("pipeline output was cancelled")]
    Cancelled,
}

type StageTask = TaskHandle<Result<StageStats, anyhow::Error>>;

/// Builder for a chain of stages, each launched as its own task
///
/// Each stage is connected to the next by a channel of the pipeline's capacity, so stages stream
/// items through as soon as they are produced.
pub struct Pipeline<T> {
    launcher: Launcher,
    capacity: usize,
    head: Receiver<T>,
    stages: Vec<StageTask>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Start a pipeline with a source stage sending `items`
    pub fn source<I>(launcher: &Launcher, capacity: usize, items: I) -> Self
    where
        I: IntoIterator<Item = T> + Send + 'static,
        I::IntoIter: Send,
    {
        let (send, recv) = channel(capacity);
        let stage = launcher.launch_named("source", task_fn(move || async move {
            source(items, send).await.map_err(anyhow::Error::from)
        }));
        Pipeline {
            launcher: launcher.clone(),
            capacity,
            head: recv,
            stages: vec![stage],
        }
    }

    /// Start a pipeline reading from an existing channel
    pub fn from_receiver(launcher: &Launcher, capacity: usize, recv: Receiver<T>) -> Self {
        Pipeline {
            launcher: launcher.clone(),
            capacity,
            head: recv,
            stages: Vec::new(),
        }
    }

    fn push<O, Fut>(
        self,
        name: &str,
        stage: impl FnOnce(Receiver<T>, Sender<O>) -> Fut,
    ) -> Pipeline<O>
    where
        O: Send + 'static,
        Fut: Future<Output = Result<StageStats, anyhow::Error>> + Send + 'static,
    {
        let Pipeline { launcher, capacity, head, mut stages } = self;
        let (send, recv) = channel(capacity);
        let fut = stage(head, send);
        let name = format!("{}#{}", name, stages.len());
        stages.push(launcher.launch_named(name, task_fn(move || fut)));
        Pipeline { launcher, capacity, head: recv, stages }
    }

    /// Add a stage mapping each item
    pub fn map<O, F>(self, f: F) -> Pipeline<O>
    where
        O: Send + 'static,
        F: FnMut(T) -> O + Send + 'static,
    {
        self.push("map", move |input, output| async move {
            transform(input, output, f).await.map_err(anyhow::Error::from)
        })
    }

    /// Add a stage mapping each item fallibly
    ///
    /// The first error is reported when the pipeline is joined. Items produced before it still
    /// flow downstream.
    pub fn try_map<O, E, F>(self, f: F) -> Pipeline<O>
    where
        O: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnMut(T) -> Result<O, E> + Send + 'static,
    {
        self.push("try_map", move |input, output| async move {
            try_transform(input, output, f).await.map_err(anyhow::Error::from)
        })
    }

    /// Add a stage mapping each item with an async function
    pub fn then<O, F, Fut>(self, f: F) -> Pipeline<O>
    where
        O: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        self.push("then", move |input, output| async move {
            transform_async(input, output, f).await.map_err(anyhow::Error::from)
        })
    }

    /// Finish the pipeline with a sink stage running `f` on each item
    pub fn for_each<F>(self, f: F) -> PipelineHandle
    where
        F: FnMut(T) + Send + 'static,
    {
        let Pipeline { launcher, head, mut stages, .. } = self;
        let name = format!("for_each#{}", stages.len());
        stages.push(launcher.launch_named(name, task_fn(move || async move {
            sink(head, f).await.map_err(anyhow::Error::from)
        })));
        PipelineHandle { stages }
    }

    /// Split into the final output channel and the handle to join the stages
    pub fn into_parts(self) -> (Receiver<T>, PipelineHandle) {
        (self.head, PipelineHandle { stages: self.stages })
    }

    /// Receive every item of the final output, then join the stages
    pub async fn collect(self) -> Result<Vec<T>, PipelineError> {
        let (recv, handle) = self.into_parts();
        let mut items = Vec::new();
        let mut cancelled = false;
        loop {
            match recv.recv().await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => break,
                Err(RecvError::Cancelled(_)) => {
                    cancelled = true;
                    break;
                }
            }
        }
        handle.join().await?;
        if cancelled {
            return Err(PipelineError::Cancelled);
        }
        Ok(items)
    }
}

/// Handle for joining the stages of a pipeline
#[derive(Debug)]
pub struct PipelineHandle {
    stages: Vec<StageTask>,
}

impl PipelineHandle {
    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether there are no stages, as for a pipeline built from a bare receiver
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Wait for every stage to finish, returning their stats in order
    ///
    /// Every stage is joined even if an earlier one failed. The first failure is returned.
    pub async fn join(self) -> Result<Vec<StageStats>, PipelineError> {
        let mut all_stats = Vec::with_capacity(self.stages.len());
        let mut first_error = None;
        for (index, stage) in self.stages.into_iter().enumerate() {
            let name = stage.name().unwrap_or_default().to_owned();
            let error = match stage.join().await {
                Ok(Ok(stats)) => {
                    all_stats.push(stats);
                    continue;
                }
                Ok(Err(cause)) => PipelineError::Stage { index, name, cause },
                Err(error) => PipelineError::Join { index, error },
            };
            warn!(%error, "pipeline stage failed");
            first_error.get_or_insert(error);
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(all_stats),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::guarded::GuardedState;
    use std::{
        fmt,
        time::Duration,
    };

    #[derive(Debug, PartialEq)]
    struct Odd(u32);

    impl fmt::Display for Odd {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "{} is odd", self.0)
        }
    }

    impl std::error::Error for Odd {}

    #[tokio::test]
    async fn three_stages_five_items() {
        crate::init_test_tracing();
        let (send_a, recv_a) = channel(0);
        let (send_b, recv_b) = channel(1);
        let (send_c, recv_c) = channel(2);
        let stage_1 = tokio::spawn(source(1..=5, send_a));
        let stage_2 = tokio::spawn(transform(recv_a, send_b, |n: u32| n * 10));
        let stage_3 = tokio::spawn(transform(recv_b, send_c, |n: u32| n + 1));
        let mut out = Vec::new();
        while let Some(n) = recv_c.recv().await.unwrap() {
            out.push(n);
        }
        assert_eq!(out, vec![11, 21, 31, 41, 51]);
        // the final output is closed exactly once and stays exhausted
        assert_eq!(recv_c.recv().await, Ok(None));
        assert_eq!(stage_1.await.unwrap(), Ok(StageStats { received: 0, sent: 5 }));
        assert_eq!(stage_2.await.unwrap(), Ok(StageStats { received: 5, sent: 5 }));
        assert_eq!(stage_3.await.unwrap(), Ok(StageStats { received: 5, sent: 5 }));
    }

    #[tokio::test]
    async fn streaming_not_batch() {
        let (send_a, recv_a) = channel(0);
        let (send_b, recv_b) = channel(0);
        tokio::spawn(transform(recv_a, send_b, |n: u32| n * 2));
        // the first item passes through before the source has finished
        send_a.send(1).await.unwrap();
        assert_eq!(recv_b.recv().await, Ok(Some(2)));
        send_a.send(2).await.unwrap();
        assert_eq!(recv_b.recv().await, Ok(Some(4)));
        drop(send_a);
        assert_eq!(recv_b.recv().await, Ok(None));
    }

    #[tokio::test]
    async fn failure_drains_input_and_closes_output() {
        let (send_a, recv_a) = channel(0);
        let (send_b, recv_b) = channel(8);
        let producer = tokio::spawn(source(vec![2, 4, 5, 6, 8], send_a));
        let stage = tokio::spawn(try_transform(recv_a, send_b, |n: u32| {
            if n % 2 == 0 { Ok(n / 2) } else { Err(Odd(n)) }
        }));
        assert_eq!(producer.await.unwrap(), Ok(StageStats { received: 0, sent: 5 }));
        assert_eq!(stage.await.unwrap(), Err(StageError::Failed(Odd(5))));
        assert_eq!(recv_b.recv().await, Ok(Some(1)));
        assert_eq!(recv_b.recv().await, Ok(Some(2)));
        assert_eq!(recv_b.recv().await, Ok(None));
    }

    #[tokio::test]
    async fn failure_closes_output_before_upstream_finishes() {
        let (send_a, recv_a) = channel(0);
        let (send_b, recv_b) = channel::<u32>(1);
        let stage = tokio::spawn(try_transform(recv_a, send_b, |n: u32| Err::<u32, _>(Odd(n))));
        send_a.send(1).await.unwrap();
        // upstream is still open, yet downstream already sees exhausted
        assert_eq!(recv_b.recv().await, Ok(None));
        assert!(!stage.is_finished());
        send_a.send(3).await.unwrap();
        drop(send_a);
        assert_eq!(stage.await.unwrap(), Err(StageError::Failed(Odd(1))));
    }

    #[tokio::test]
    async fn dropped_downstream_does_not_block_upstream() {
        let (send_a, recv_a) = channel(0);
        let (send_b, recv_b) = channel(0);
        drop(recv_b);
        let producer = tokio::spawn(source(0..100, send_a));
        let stage = transform(recv_a, send_b, |n: u32| n).await;
        assert_eq!(stage, Err(StageError::NoReceivers));
        assert_eq!(producer.await.unwrap().map(|s| s.sent), Ok(100));
    }

    #[tokio::test]
    async fn cancellation_travels_downstream() {
        let (send_a, recv_a) = channel::<u32>(4);
        let (send_b, recv_b) = channel(4);
        let (send_c, recv_c) = channel(4);
        tokio::spawn(transform(recv_a, send_b, |n| n));
        tokio::spawn(transform(recv_b, send_c, |n| n));
        send_a.cancel();
        assert!(matches!(recv_c.recv().await, Err(RecvError::Cancelled(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn builder_collects_and_joins() {
        let launcher = Launcher::new();
        let seen = GuardedState::new(0);
        let out = Pipeline::source(&launcher, 2, 1..=5u32)
            .map(|n| n * 3)
            .then({
                let seen = seen.clone();
                move |n| {
                    let seen = seen.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        seen.with_lock(|c| *c += 1).await;
                        n + 1
                    }
                }
            })
            .collect()
            .await
            .unwrap();
        assert_eq!(out, vec![4, 7, 10, 13, 16]);
        assert_eq!(seen.snapshot().await, 5);
        launcher.wait_all().await;
    }

    #[tokio::test]
    async fn builder_reports_failing_stage() {
        let launcher = Launcher::new();
        let (recv, handle) = Pipeline::source(&launcher, 0, vec![2u32, 3, 4])
            .try_map(|n| if n % 2 == 0 { Ok(n) } else { Err(Odd(n)) })
            .into_parts();
        let mut got = Vec::new();
        while let Ok(Some(n)) = recv.recv().await {
            got.push(n);
        }
        assert_eq!(got, vec![2]);
        match handle.join().await {
            Err(PipelineError::Stage { index, cause, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(cause.to_string(), "stage function failed: 3 is odd");
            }
            other => panic!("unexpected pipeline result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn builder_for_each_sink() {
        let launcher = Launcher::new();
        let total = GuardedState::new(0u32);
        let handle = Pipeline::source(&launcher, 1, 1..=4u32)
            .map(|n| n * n)
            .for_each({
                let total = total.clone();
                move |n| total.try_with_lock(|t| *t += n).unwrap()
            });
        assert_eq!(handle.len(), 3);
        let stats = handle.join().await.unwrap();
        assert_eq!(stats[2], StageStats { received: 4, sent: 0 });
        assert_eq!(total.snapshot().await, 30);
    }
}
