//! Waiting on whichever of several event sources is ready first.

use crate::{
    channel::{
        api::Receiver,
        polling::{self, Timeout},
    },
    error::{CancelledError, RecvError},
    signal::Waiter,
};
use rand::Rng;
use smallvec::SmallVec;
use std::{
    fmt::{self, Debug, Formatter},
    future::{poll_fn, Future},
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};


type Arm<'a, R> = Pin<Box<dyn Future<Output = R> + Send + 'a>>;

/// Outcome of a [`Select`]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Selected<R> {
    /// An arm became ready, and this is what its handler returned
    Ready(R),
    /// The timeout elapsed before any arm became ready
    TimedOut,
}

impl<R> Selected<R> {
    /// Convert into an `Option`, mapping a timeout to `None`
    pub fn ready(self) -> Option<R> {
        match self {
            Selected::Ready(r) => Some(r),
            Selected::TimedOut => None,
        }
    }
}

/// Waits on several heterogeneous event sources and runs the handler of whichever is ready first
///
/// When several arms are ready at once, which one is chosen is random, so that no arm is
/// systematically starved. Arms which lose are abandoned without consuming anything: a message is
/// only taken out of a channel by the arm that wins.
///
/// ```
/// # async fn demo() {
/// use sluice::{channel, select::{Select, Selected}};
/// use std::time::Duration;
///
/// let (send_a, recv_a) = channel::<u32>(1);
/// let (_send_b, recv_b) = channel::<&str>(1);
/// send_a.send(7).await.unwrap();
/// let picked = Select::new()
///     .recv(&recv_a, |msg| format!("a: {:?}", msg))
///     .recv(&recv_b, |msg| format!("b: {:?}", msg))
///     .timeout(Duration::from_secs(1))
///     .run()
///     .await;
/// assert_eq!(picked, Selected::Ready("a: Ok(Some(7))".to_owned()));
/// # }
/// ```
pub struct Select<'a, R> {
    arms: SmallVec<[Arm<'a, R>; 4]>,
    timeout: Option<Duration>,
}

impl<'a, R: 'a> Select<'a, R> {
    /// Construct with no arms and no timeout
    pub fn new() -> Self {
        Select { arms: SmallVec::new(), timeout: None }
    }

    /// Add an arm which receives from a channel
    pub fn recv<T, F>(mut self, recv: &'a Receiver<T>, handler: F) -> Self
    where
        T: Send + 'a,
        F: FnOnce(Result<Option<T>, RecvError>) -> R + Send + 'a,
    {
        self.arms.push(Box::pin(async move { handler(recv.recv().await) }));
        self
    }

    /// Add an arm which waits for a signal to fire
    pub fn signal<F>(mut self, waiter: &'a Waiter, handler: F) -> Self
    where
        F: FnOnce(Result<(), CancelledError>) -> R + Send + 'a,
    {
        self.arms.push(Box::pin(async move { handler(waiter.wait().await) }));
        self
    }

    /// Add an arm which waits for an arbitrary future
    ///
    /// If another arm wins, the future is dropped.
    pub fn future<Fut, F>(mut self, fut: Fut, handler: F) -> Self
    where
        Fut: Future + Send + 'a,
        F: FnOnce(Fut::Output) -> R + Send + 'a,
    {
        self.arms.push(Box::pin(async move { handler(fut.await) }));
        self
    }

    /// Give up once this much time has elapsed without any arm becoming ready
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of arms
    pub fn len(&self) -> usize {
        self.arms.len()
    }

    /// Whether there are no arms
    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Wait for the first arm to become ready, or the timeout to elapse
    ///
    /// The timeout is measured on the tokio clock, so this must run within a tokio runtime with
    /// time enabled if a timeout is set. With no arms and no timeout, this never resolves.
    pub async fn run(self) -> Selected<R> {
        let Select { mut arms, timeout } = self;
        let mut sleep = timeout.map(|timeout| Box::pin(tokio::time::sleep(timeout)));
        poll_fn(|cx| {
            if let Poll::Ready(r) = poll_arms(&mut arms, cx) {
                return Poll::Ready(Selected::Ready(r));
            }
            if let Some(sleep) = sleep.as_mut() {
                if sleep.as_mut().poll(cx).is_ready() {
                    debug!("select timed out");
                    return Poll::Ready(Selected::TimedOut);
                }
            }
            Poll::Pending
        }).await
    }

    /// Block the current thread until the first arm becomes ready, or the timeout elapses
    ///
    /// Only usable with arms which do not need a tokio runtime, such as channel and signal arms.
    pub fn block(self) -> Selected<R> {
        let Select { mut arms, timeout } = self;
        let timeout = timeout
            .map_or(Timeout::Never, |timeout| Timeout::At(Instant::now() + timeout));
        let mut fut = poll_fn(|cx| poll_arms(&mut arms, cx));
        match polling::poll(&mut fut, timeout) {
            Some(r) => Selected::Ready(r),
            None => {
                debug!("select timed out");
                Selected::TimedOut
            }
        }
    }

    /// Run the handler of an arm which is ready right now, if any
    ///
    /// The equivalent of a select with a default case.
    pub fn try_now(self) -> Option<R> {
        let Select { mut arms, .. } = self;
        let mut fut = poll_fn(|cx| poll_arms(&mut arms, cx));
        polling::poll(&mut fut, Timeout::NonBlocking)
    }
}

impl<'a, R: 'a> Default for Select<'a, R> {
    fn default() -> Self {
        Select::new()
    }
}

impl<'a, R> Debug for Select<'a, R> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Select")
            .field("arms", &self.arms.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

// poll every arm once, starting from a random one, until one is ready.
fn poll_arms<R>(arms: &mut [Arm<'_, R>], cx: &mut Context) -> Poll<R> {
    if arms.is_empty() {
        return Poll::Pending;
    }
    let start = rand::thread_rng().gen_range(0..arms.len());
    for i in 0..arms.len() {
        let arm = &mut arms[(start + i) % arms.len()];
        if let Poll::Ready(r) = arm.as_mut().poll(cx) {
            return Poll::Ready(r);
        }
    }
    Poll::Pending
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::api::channel,
        signal::signal,
    };
    use std::thread;

    #[derive(Debug, PartialEq)]
    enum Which {
        A(u32),
        B(u32),
        Exhausted,
    }

    #[test]
    fn no_fixed_priority() {
        let (send_a, recv_a) = channel(1000);
        let (send_b, recv_b) = channel(1000);
        for i in 0..1000 {
            send_a.send(i).try_now().unwrap();
            send_b.send(i).try_now().unwrap();
        }
        let (mut a, mut b) = (0, 0);
        for _ in 0..200 {
            let picked = Select::new()
                .recv(&recv_a, |r| Which::A(r.unwrap().unwrap()))
                .recv(&recv_b, |r| Which::B(r.unwrap().unwrap()))
                .try_now();
            match picked {
                Some(Which::A(_)) => a += 1,
                Some(Which::B(_)) => b += 1,
                other => panic!("unexpected pick: {:?}", other),
            }
        }
        assert_eq!(a + b, 200);
        assert!(a > 0 && b > 0, "a = {}, b = {}", a, b);
        // the losing arm never consumed anything
        assert_eq!(recv_a.len() + recv_b.len(), 2000 - 200);
    }

    #[test]
    fn try_now_is_default_case() {
        let (_send, recv) = channel::<u32>(1);
        let picked = Select::new().recv(&recv, |_| ()).try_now();
        assert!(picked.is_none());
    }

    #[tokio::test]
    async fn default_case_loop_takes_from_parked_task() {
        let (send, recv) = channel(0);
        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            send.send("task").await.unwrap();
        });
        let mut idle = 0;
        let got = loop {
            match Select::new().recv(&recv, |r| r.unwrap()).try_now() {
                Some(msg) => break msg,
                None => {
                    idle += 1;
                    assert!(idle < 100, "default case never received");
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        };
        assert_eq!(got, Some("task"));
        sender.await.unwrap();
    }

    #[test]
    fn block_wakes_on_later_message() {
        let (send, recv) = channel(0);
        let (_signal, waiter) = signal();
        let join = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            send.send(5).block().unwrap();
        });
        let picked = Select::new()
            .recv(&recv, |r| match r.unwrap() {
                Some(n) => Which::A(n),
                None => Which::Exhausted,
            })
            .signal(&waiter, |_| Which::B(0))
            .block();
        assert_eq!(picked, Selected::Ready(Which::A(5)));
        join.join().unwrap();
    }

    #[test]
    fn block_times_out() {
        let (_send, recv) = channel::<u32>(0);
        let picked = Select::new()
            .recv(&recv, |_| ())
            .timeout(Duration::from_millis(10))
            .block();
        assert_eq!(picked, Selected::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out_on_tokio_clock() {
        let (_send, recv) = channel::<u32>(0);
        let picked = Select::new()
            .recv(&recv, |_| "message")
            .future(tokio::time::sleep(Duration::from_secs(5)), |()| "slow")
            .timeout(Duration::from_secs(2))
            .run()
            .await;
        assert_eq!(picked, Selected::TimedOut);
    }

    #[tokio::test]
    async fn run_signal_arm() {
        let (signal, waiter) = signal();
        let (_send, recv) = channel::<u32>(0);
        tokio::spawn(async move { signal.fire() });
        let picked = Select::new()
            .recv(&recv, |_| "message")
            .signal(&waiter, |fired| {
                assert!(fired.is_ok());
                "signal"
            })
            .run()
            .await;
        assert_eq!(picked.ready(), Some("signal"));
    }
}
