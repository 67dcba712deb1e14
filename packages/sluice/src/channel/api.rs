// exposed API of channels

use self::future::*;
use super::{
    error::*,
    core,
};
use std::{
    fmt::{self, Debug, Formatter},
    sync::atomic::Ordering::Relaxed,
};


// ==== helper functions for adapting core API to exposed API ====


// cancel the channel, dropping buffered elems outside of the lock.
fn cancel<T>(channel: &core::Channel<T>) {
    let dropped = channel.lock().cancel();
    if !dropped.is_empty() {
        trace!(dropped = dropped.len(), "channel cancelled with buffered messages");
    }
    drop(dropped);
}

// 1. increment channel send count.
// 2. clone another handle to the channel.
fn clone_sender<T>(channel: &core::Channel<T>) -> core::Channel<T> {
    channel.send_count().fetch_add(1, Relaxed);
    channel.clone()
}

// 1. decrement channel send count.
// 2. if cancel_on_drop is true, cancel the channel.
// 3. if cancel_on_drop is false, and the send count was lowered to 0, close the channel unless it
//    was already closed.
fn drop_sender<T>(channel: &core::Channel<T>, cancel_on_drop: bool) {
    let prev_send_count = channel.send_count().fetch_sub(1, Relaxed);
    if cancel_on_drop {
        cancel(channel);
    } else if prev_send_count == 1 && channel.lock().close() {
        trace!("last sender dropped, channel closed");
    }
}

// 1. increment channel recv count.
// 2. clone another handle to the channel.
fn clone_receiver<T>(channel: &core::Channel<T>) -> core::Channel<T> {
    channel.recv_count().fetch_add(1, Relaxed);
    channel.clone()
}

// 1. decrement channel recv count.
// 2. if the recv count was lowered to 0, set the send state to no receivers.
fn drop_receiver<T>(channel: &core::Channel<T>) {
    let prev_recv_count = channel.recv_count().fetch_sub(1, Relaxed);
    if prev_recv_count == 1 {
        let dropped = channel.lock().set_no_receivers();
        drop(dropped);
    }
}

// convert send state byte into typed representation of optional terminal error state.
//
// the closed state is not an error state, as sending into a closed channel panics.
fn send_error(send_state_byte: u8) -> Option<SendErrorCause> {
    if send_state_byte == core::SendState::Normal as u8
        || send_state_byte == core::SendState::Closed as u8
    {
        None
    } else if send_state_byte == core::SendState::NoReceivers as u8 {
        Some(NoReceiversError.into())
    } else if send_state_byte == core::SendState::Cancelled as u8 {
        Some(CancelledError.into())
    } else {
        unreachable!("invalid send_state_byte: {}", send_state_byte);
    }
}

// convert recv state byte into typed representation of optional terminal state.
//
// the closed state only becomes terminal once the buffer is drained, which the caller must know.
fn recv_terminal_state(recv_state_byte: u8, drained: bool) -> Option<RecvTerminalState> {
    if recv_state_byte == core::RecvState::Normal as u8 {
        None
    } else if recv_state_byte == core::RecvState::Closed as u8 {
        drained.then_some(RecvTerminalState::Exhausted)
    } else if recv_state_byte == core::RecvState::Cancelled as u8 {
        Some(RecvTerminalState::Error(CancelledError.into()))
    } else {
        unreachable!("invalid recv_state_byte: {}", recv_state_byte)
    }
}


// ==== the exposed API ====


/// Create a bounded channel
///
/// Up to `capacity` messages may be buffered before sending exerts backpressure. A capacity of 0
/// creates a rendezvous channel, in which a send only completes once a receiver is waiting to take
/// the message.
///
/// Messages are received in the order they were sent. The channel is closed by calling
/// [`Sender::close`], or when the last sender is dropped, after which receivers drain the
/// remaining buffered messages and then observe the "exhausted" state as `Ok(None)`.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let channel_1 = core::Channel::new(capacity);
    let channel_2 = channel_1.clone();
    let send = Sender { channel: channel_1, cancel_on_drop: false };
    let recv = Receiver(channel_2);
    (send, recv)
}


/// Sender handle to a bounded channel
///
/// Sender handles may be cloned to create multiple producers. Closing is the job of the producing
/// side only: once any sender handle closes the channel, any further send through any handle is a
/// programming error and panics.
pub struct Sender<T> {
    channel: core::Channel<T>,
    cancel_on_drop: bool,
}

impl<T> Sender<T> {
    /// Create a future to send a message on this channel
    ///
    /// See the API of [`SendFut`], as it is not only a future, but also provides additional
    /// methods, including the API for blocking on a send operation or trying to send immediately.
    ///
    /// Panics if the channel has been closed.
    pub fn send(&self, msg: T) -> SendFut<'_, T> {
        if self.channel.send_state() == core::SendState::Closed as u8 {
            panic!("send on closed channel");
        }
        SendFut::new(core::Send::new(&self.channel, msg))
    }

    /// Close the channel
    ///
    /// Receivers will still receive all messages that were buffered before closing, and then
    /// observe the "exhausted" state. Sends still parked on this channel panic when next polled.
    ///
    /// Panics if the channel was already closed.
    pub fn close(&self) {
        if !self.try_close() {
            panic!("close of closed channel");
        }
    }

    /// Close the channel if it is not already closed
    ///
    /// Returns whether this call closed the channel.
    pub fn try_close(&self) -> bool {
        let closed = self.channel.lock().close();
        if closed {
            trace!("channel closed");
        }
        closed
    }

    /// Cancel the channel
    ///
    /// This causes all buffered messages to be dropped and all receivers to enter the
    /// [`CancelledError`] terminal state, unless they already observed the channel being exhausted.
    /// Further sends return a [`CancelledError`], unless the channel was closed, in which case they
    /// still panic.
    pub fn cancel(&self) {
        cancel(&self.channel);
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.channel.lock().is_closed()
    }

    /// Maximum number of buffered messages
    pub fn capacity(&self) -> usize {
        self.channel.bound()
    }

    /// Number of currently buffered messages
    pub fn len(&self) -> usize {
        self.channel.lock().len()
    }

    /// Whether there are no currently buffered messages
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles send into the same channel
    pub fn same_channel(&self, other: &Sender<T>) -> bool {
        self.channel.same_channel(&other.channel)
    }

    /// Set whether this `Sender` cancels the channel if dropped
    ///
    /// Defaults to false, in which case dropping the last sender closes the channel. When a sender
    /// is cloned, the cloned sender inherits the original sender's `cancel_on_drop` property.
    pub fn set_cancel_on_drop(&mut self, cancel_on_drop: bool) -> &mut Self {
        self.cancel_on_drop = cancel_on_drop;
        self
    }

    /// Ownership-chaining version of [`set_cancel_on_drop`](Self::set_cancel_on_drop)
    pub fn with_cancel_on_drop(mut self, cancel_on_drop: bool) -> Self {
        self.cancel_on_drop = cancel_on_drop;
        self
    }

    /// If the senders of this channel have entered a terminal error state, get that state
    ///
    /// If this returns `Some`, all attempts to send will return a corresponding error.
    pub fn terminal_state(&self) -> Option<SendErrorCause> {
        send_error(self.channel.send_state())
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Sender {
            channel: clone_sender(&self.channel),
            cancel_on_drop: self.cancel_on_drop,
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        drop_sender(&self.channel, self.cancel_on_drop);
    }
}

impl<T> Debug for Sender<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Sender")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}


/// Receiver handle to a bounded channel
///
/// Receiver handles may be cloned, in which case each message is received by exactly one of them.
/// Once all receivers are dropped, sends fail with [`NoReceiversError`] rather than blocking.
pub struct Receiver<T>(core::Channel<T>);

impl<T> Receiver<T> {
    /// Create a future to receive a message from this channel
    ///
    /// See the API of [`RecvFut`], as it is not only a future, but also provides additional
    /// methods, including the API for blocking on a recv operation or trying to recv immediately.
    pub fn recv(&self) -> RecvFut<'_, T> {
        RecvFut::new(core::Recv::new(&self.0))
    }

    /// If the receivers of this channel have entered a terminal state, get that terminal state
    ///
    /// If this returns `Some`, all receivers for this channel are permanently in that terminal
    /// state, and all attempts to receive will return a corresponding value.
    pub fn terminal_state(&self) -> Option<RecvTerminalState> {
        let recv_state = self.0.recv_state();
        if recv_state == core::RecvState::Normal as u8 {
            return None;
        }
        let drained = self.0.lock().len() == 0;
        recv_terminal_state(recv_state, drained)
    }

    /// Maximum number of buffered messages
    pub fn capacity(&self) -> usize {
        self.0.bound()
    }

    /// Number of currently buffered messages
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether there are no currently buffered messages
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert into a [`Stream`](futures::Stream) of received messages
    ///
    /// The stream ends once the channel is exhausted. If the channel is cancelled, it yields the
    /// error once and then ends.
    #[cfg(feature = "futures")]
    pub fn into_stream(self) -> RecvStream<T> {
        RecvStream { receiver: self, fut: None, done: false }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Receiver(clone_receiver(&self.0))
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        drop_receiver(&self.0);
    }
}

impl<T> Debug for Receiver<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("terminal_state", &self.terminal_state())
            .finish()
    }
}


// future types for channels.
pub(crate) mod future {
    use super::*;
    use crate::channel::{
        core,
        polling::{Timeout, poll},
    };
    use std::{
        task::{Poll, Context},
        future::{Future, poll_fn},
        marker::PhantomData,
        pin::Pin,
        time::{Duration, Instant},
    };

    /// Future for sending into a [`Sender`]
    ///
    /// Once this future parks, a receiver may take its message directly, after which this future
    /// resolves to `Ok` when next polled. Until then, the send operation may be aborted and its
    /// message retrieved by calling [`rescind`](Self::rescind) (or by dropping).
    ///
    /// Parked send futures are served in the order they first parked.
    ///
    /// Errors are "sticky": If this resolves to an error, that error has become the terminal state
    /// for all of this channel's senders, and any further send operation will return the same
    /// error.
    pub struct SendFut<'a, T> {
        fut: core::Send<T>,
        _sender: PhantomData<&'a Sender<T>>,
    }

    fn map_send_result<T>(result: Result<(), (u8, T)>) -> Result<(), SendError<T>> {
        result.map_err(|(send_state_byte, msg)| match send_error(send_state_byte) {
            Some(cause) => SendError { msg, cause },
            None => unreachable!("send resolved to error with non-error state"),
        })
    }

    impl<'a, T> SendFut<'a, T> {
        pub(super) fn new(fut: core::Send<T>) -> Self {
            SendFut { fut, _sender: PhantomData }
        }

        // poll with a timeout, rescinding the message if it times out.
        fn poll_timeout(&mut self, timeout: Timeout) -> Result<(), TrySendError<T>> {
            let polled = {
                let fut = &mut self.fut;
                poll(&mut poll_fn(|cx| fut.poll(cx)), timeout)
            };
            match polled {
                Some(result) => map_send_result(result).map_err(TrySendError::from),
                None => match self.fut.cancel() {
                    Some(msg) => Err(SendError { msg, cause: WouldBlockError.into() }),
                    // a receiver took the message after the last poll
                    None => Ok(()),
                },
            }
        }

        /// If the message has not yet been sent, abort the send operation and rescind the message
        ///
        /// Returns `None` if this future already resolved or rescinded, or if a receiver already
        /// took the message from this parked send.
        pub fn rescind(&mut self) -> Option<T> {
            self.fut.cancel()
        }

        /// Try to resolve this future immediately without blocking
        ///
        /// If this returns [`WouldBlockError`], the message is handed back in the error. Either
        /// way, this counts as this future resolving. This method will panic if this future has
        /// already resolved or rescinded.
        pub fn try_now(&mut self) -> Result<(), TrySendError<T>> {
            assert!(!self.is_terminated(), "SendFut.try_now called after terminated");
            self.poll_timeout(Timeout::NonBlocking)
        }

        /// Block until this future resolves
        ///
        /// When this method returns, that counts as this future resolving. This method will panic
        /// if this future has already resolved or rescinded.
        pub fn block(&mut self) -> Result<(), SendError<T>> {
            assert!(!self.is_terminated(), "SendFut.block called after terminated");
            let fut = &mut self.fut;
            match poll(&mut poll_fn(|cx| fut.poll(cx)), Timeout::Never) {
                Some(result) => map_send_result(result),
                None => unreachable!("poll timed out with Timeout::Never"),
            }
        }

        /// Block until this future resolves or a timeout elapses
        ///
        /// If this returns [`WouldBlockError`], the message is handed back in the error. Either
        /// way, this counts as this future resolving. This method will panic if this future has
        /// already resolved or rescinded.
        pub fn block_timeout(&mut self, timeout: Duration) -> Result<(), TrySendError<T>> {
            assert!(!self.is_terminated(), "SendFut.block_timeout called after terminated");
            self.block_deadline(Instant::now() + timeout)
        }

        /// Block until this future resolves or the deadline is reached
        ///
        /// If this returns [`WouldBlockError`], the message is handed back in the error. Either
        /// way, this counts as this future resolving. This method will panic if this future has
        /// already resolved or rescinded.
        pub fn block_deadline(&mut self, deadline: Instant) -> Result<(), TrySendError<T>> {
            assert!(!self.is_terminated(), "SendFut.block_deadline called after terminated");
            self.poll_timeout(Timeout::At(deadline))
        }

        /// Whether this future has already resolved or rescinded
        pub fn is_terminated(&self) -> bool {
            self.fut.is_terminated()
        }
    }

    impl<'a, T> Future for SendFut<'a, T> {
        type Output = Result<(), SendError<T>>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
            let this = self.get_mut();
            // for implementation of FusedFuture
            if this.is_terminated() {
                return Poll::Pending;
            }
            this.fut.poll(cx).map(map_send_result)
        }
    }

    // core futures hold no self-references
    impl<'a, T> Unpin for SendFut<'a, T> {}

    #[cfg(feature = "futures")]
    impl<'a, T> futures::future::FusedFuture for SendFut<'a, T> {
        fn is_terminated(&self) -> bool {
            Self::is_terminated(self)
        }
    }


    /// Future for receiving from a [`Receiver`]
    ///
    /// Resolves to `Ok(None)` to represent the "exhausted" state: the channel was closed and all
    /// buffered messages have been received.
    ///
    /// A message will not be dequeued from the channel until this future resolves (a call to
    /// `poll` returns `Poll::Ready`). If this future has not yet resolved, the receive operation
    /// may be aborted by calling [`abort`](Self::abort) (or by dropping), and no message is lost.
    ///
    /// Parked receive futures are served in the order they first parked.
    pub struct RecvFut<'a, T> {
        fut: core::Recv<T>,
        _receiver: PhantomData<&'a Receiver<T>>,
    }

    pub(crate) fn map_recv_result<T>(result: Result<T, u8>) -> Result<Option<T>, RecvError> {
        match result {
            Ok(msg) => Ok(Some(msg)),
            Err(recv_state_byte) => match recv_terminal_state(recv_state_byte, true) {
                Some(RecvTerminalState::Exhausted) => Ok(None),
                Some(RecvTerminalState::Error(error)) => Err(error),
                None => unreachable!("recv resolved to error with normal state"),
            }
        }
    }

    impl<'a, T> RecvFut<'a, T> {
        pub(super) fn new(fut: core::Recv<T>) -> Self {
            RecvFut { fut, _receiver: PhantomData }
        }

        // poll with a timeout, aborting if it times out.
        fn poll_timeout(&mut self, timeout: Timeout) -> Result<Option<T>, TryRecvError> {
            let polled = {
                let fut = &mut self.fut;
                poll(&mut poll_fn(|cx| fut.poll(cx)), timeout)
            };
            match polled {
                Some(result) => map_recv_result(result).map_err(TryRecvError::from),
                None => {
                    self.fut.cancel();
                    Err(WouldBlockError.into())
                }
            }
        }

        /// Try to abort this receive operation
        ///
        /// This aborts the receive operation, unless this future has already resolved or aborted,
        /// in which case this does nothing. This method never panics.
        pub fn abort(&mut self) {
            self.fut.cancel();
        }

        /// Block until this future resolves
        ///
        /// When this method returns, that counts as this future resolving. This method will panic
        /// if this future has already resolved or aborted.
        pub fn block(&mut self) -> Result<Option<T>, RecvError> {
            assert!(!self.is_terminated(), "RecvFut.block called after terminated");
            let fut = &mut self.fut;
            match poll(&mut poll_fn(|cx| fut.poll(cx)), Timeout::Never) {
                Some(result) => map_recv_result(result),
                None => unreachable!("poll timed out with Timeout::Never"),
            }
        }

        /// Try to resolve this future immediately without blocking
        ///
        /// Either way, this counts as this future resolving. This method will panic if this future
        /// has already resolved or aborted.
        pub fn try_now(&mut self) -> Result<Option<T>, TryRecvError> {
            assert!(!self.is_terminated(), "RecvFut.try_now called after terminated");
            self.poll_timeout(Timeout::NonBlocking)
        }

        /// Block until this future resolves or a timeout elapses
        ///
        /// Either way, this counts as this future resolving. This method will panic if this future
        /// has already resolved or aborted.
        pub fn block_timeout(&mut self, timeout: Duration) -> Result<Option<T>, TryRecvError> {
            assert!(!self.is_terminated(), "RecvFut.block_timeout called after terminated");
            self.block_deadline(Instant::now() + timeout)
        }

        /// Block until this future resolves or the deadline is reached
        ///
        /// Either way, this counts as this future resolving. This method will panic if this future
        /// has already resolved or aborted.
        pub fn block_deadline(&mut self, deadline: Instant) -> Result<Option<T>, TryRecvError> {
            assert!(!self.is_terminated(), "RecvFut.block_deadline called after terminated");
            self.poll_timeout(Timeout::At(deadline))
        }

        /// Whether this future has already resolved or aborted
        pub fn is_terminated(&self) -> bool {
            self.fut.is_terminated()
        }
    }

    impl<'a, T> Future for RecvFut<'a, T> {
        type Output = Result<Option<T>, RecvError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
            let this = self.get_mut();
            // for implementation of FusedFuture
            if this.is_terminated() {
                return Poll::Pending;
            }
            this.fut.poll(cx).map(map_recv_result)
        }
    }

    impl<'a, T> Unpin for RecvFut<'a, T> {}

    #[cfg(feature = "futures")]
    impl<'a, T> futures::future::FusedFuture for RecvFut<'a, T> {
        fn is_terminated(&self) -> bool {
            Self::is_terminated(self)
        }
    }


    /// [`Stream`](futures::Stream) of messages from a [`Receiver`]
    #[cfg(feature = "futures")]
    pub struct RecvStream<T> {
        pub(super) receiver: Receiver<T>,
        pub(super) fut: Option<core::Recv<T>>,
        pub(super) done: bool,
    }

    #[cfg(feature = "futures")]
    impl<T> RecvStream<T> {
        /// Get back the underlying receiver, aborting any receive in progress
        pub fn into_inner(self) -> Receiver<T> {
            self.receiver
        }
    }

    #[cfg(feature = "futures")]
    impl<T> Unpin for RecvStream<T> {}

    #[cfg(feature = "futures")]
    impl<T> futures::Stream for RecvStream<T> {
        type Item = Result<T, RecvError>;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
            let this = self.get_mut();
            if this.done {
                return Poll::Ready(None);
            }
            let receiver = &this.receiver;
            let fut = this.fut.get_or_insert_with(|| core::Recv::new(&receiver.0));
            let result = match fut.poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(result) => result,
            };
            this.fut = None;
            match map_recv_result(result) {
                Ok(Some(msg)) => Poll::Ready(Some(Ok(msg))),
                Ok(None) => {
                    this.done = true;
                    Poll::Ready(None)
                }
                Err(e) => {
                    this.done = true;
                    Poll::Ready(Some(Err(e)))
                }
            }
        }
    }

    #[cfg(feature = "futures")]
    impl<T> futures::stream::FusedStream for RecvStream<T> {
        fn is_terminated(&self) -> bool {
            self.done
        }
    }
}


// ==== tests ====


#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        thread,
        time::Duration,
        sync::{Arc, Barrier},
    };

    #[test]
    fn basic_1000_test() {
        let (send, recv) = channel(500);

        let join_1 = thread::spawn(move || {
            for i in 1..=1000 {
                send.send(i).block_timeout(Duration::from_millis(100)).unwrap();
                if i < 1000 && i % 100 == 0 {
                    thread::sleep(Duration::from_millis(5));
                }
            }
            send.close();
        });
        let join_2 = thread::spawn(move || {
            for i in 1..=1000 {
                let j = recv.recv().block_timeout(Duration::from_millis(500)).unwrap().unwrap();
                assert_eq!(i, j);
            }
            assert!(recv.recv().block_timeout(Duration::from_millis(100)).unwrap().is_none());
        });
        join_1.join().unwrap();
        join_2.join().unwrap();
    }

    #[test]
    fn capacity_admits_exactly_bound_sends() {
        for cap in [0, 1, 3, 8] {
            let (send, recv) = channel(cap);
            for i in 0..cap {
                send.send(i).try_now().unwrap();
            }
            let err = send.send(cap).try_now().unwrap_err();
            assert_eq!(err.cause, TrySendErrorCause::from(WouldBlockError));
            assert_eq!(err.msg, cap);
            assert_eq!(send.len(), cap);

            // a receive frees exactly one slot
            if cap > 0 {
                assert_eq!(recv.recv().try_now().unwrap(), Some(0));
                send.send(cap).try_now().unwrap();
                assert!(send.send(cap + 1).try_now().is_err());
            }
        }
    }

    #[test]
    fn blocked_send_resumes_after_recv() {
        let (send, recv) = channel(2);
        send.send(1).block().unwrap();
        send.send(2).block().unwrap();
        let join = thread::spawn(move || {
            send.send(3).block().unwrap();
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!join.is_finished());
        assert_eq!(recv.recv().block().unwrap(), Some(1));
        join.join().unwrap();
        assert_eq!(recv.recv().block().unwrap(), Some(2));
        assert_eq!(recv.recv().block().unwrap(), Some(3));
        assert_eq!(recv.recv().block().unwrap(), None);
    }

    #[test]
    fn rendezvous_waits_for_receiver() {
        let (send, recv) = channel(0);
        assert!(send.send(1).try_now().is_err());
        let barrier = Arc::new(Barrier::new(2));
        let join = thread::spawn({
            let barrier = Arc::clone(&barrier);
            move || {
                barrier.wait();
                send.send(99).block().unwrap();
            }
        });
        barrier.wait();
        assert_eq!(recv.recv().block().unwrap(), Some(99));
        join.join().unwrap();
        assert_eq!(recv.recv().block().unwrap(), None);
    }

    #[test]
    fn close_drains_buffered_before_exhausted() {
        let (send, recv) = channel(4);
        for i in 0..3 {
            send.send(i).try_now().unwrap();
        }
        send.close();
        assert!(send.is_closed());
        assert_eq!(recv.terminal_state(), None);
        for i in 0..3 {
            assert_eq!(recv.recv().try_now().unwrap(), Some(i));
        }
        assert_eq!(recv.recv().try_now().unwrap(), None);
        assert_eq!(recv.recv().try_now().unwrap(), None);
        assert_eq!(recv.terminal_state(), Some(RecvTerminalState::Exhausted));
    }

    #[test]
    fn close_wakes_blocked_receivers() {
        let (send, recv) = channel::<i32>(1);
        let joins = (0..3)
            .map(|_| {
                let recv = recv.clone();
                thread::spawn(move || recv.recv().block().unwrap())
            })
            .collect::<Vec<_>>();
        thread::sleep(Duration::from_millis(20));
        send.close();
        for join in joins {
            assert_eq!(join.join().unwrap(), None);
        }
    }

    #[test]
    #[should_panic(expected = "send on closed channel")]
    fn send_after_close_panics() {
        let (send, _recv) = channel(1);
        send.close();
        let _ = send.send(1);
    }

    #[test]
    #[should_panic(expected = "close of closed channel")]
    fn double_close_panics() {
        let (send, _recv) = channel::<()>(1);
        let send_2 = send.clone();
        send.close();
        send_2.close();
    }

    #[test]
    fn dropping_last_sender_closes() {
        let (send, recv) = channel(2);
        let send_2 = send.clone();
        send.send(1).try_now().unwrap();
        drop(send);
        assert_eq!(recv.recv().try_now().unwrap(), Some(1));
        assert!(matches!(recv.recv().try_now(), Err(TryRecvError::WouldBlock(_))));
        drop(send_2);
        assert_eq!(recv.recv().try_now().unwrap(), None);
    }

    #[test]
    fn explicit_close_then_drop_is_not_double_close() {
        let (send, recv) = channel::<u8>(1);
        send.close();
        drop(send);
        assert_eq!(recv.recv().try_now().unwrap(), None);
    }

    #[test]
    fn no_receivers_returns_message() {
        let (send, recv) = channel(0);
        let join = thread::spawn(move || send.send("abandoned").block());
        thread::sleep(Duration::from_millis(20));
        drop(recv);
        let err = join.join().unwrap().unwrap_err();
        assert_eq!(err.msg, "abandoned");
        assert_eq!(err.cause, SendErrorCause::from(NoReceiversError));
    }

    #[test]
    fn cancel_drops_buffer() {
        let (send, recv) = channel(4);
        send.send(1).try_now().unwrap();
        send.cancel();
        assert_eq!(recv.recv().try_now(), Err(TryRecvError::from(CancelledError)));
        assert_eq!(send.terminal_state(), Some(SendErrorCause::from(CancelledError)));
        let err = send.send(2).try_now().unwrap_err();
        assert_eq!(err.cause, TrySendErrorCause::from(CancelledError));
    }

    #[test]
    fn cancel_on_drop() {
        let (send, recv) = channel::<()>(1);
        drop(send.with_cancel_on_drop(true));
        assert_eq!(recv.terminal_state(), Some(RecvTerminalState::Error(CancelledError.into())));
    }

    #[test]
    fn rescind_returns_message() {
        let (send, _recv) = channel(0);
        let mut fut = send.send(7);
        assert_eq!(fut.rescind(), Some(7));
        assert!(fut.is_terminated());
        assert_eq!(fut.rescind(), None);
    }

    #[test]
    fn try_now_takes_from_blocked_sender() {
        let (send, recv) = channel(0);
        let join = thread::spawn(move || send.send("parked").block());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(recv.recv().try_now(), Ok(Some("parked")));
        join.join().unwrap().unwrap();
        assert_eq!(recv.recv().try_now(), Ok(None));
    }

    #[tokio::test]
    async fn handoff_takes_parked_sends_in_order() {
        use std::{
            future::{poll_fn, Future},
            pin::Pin,
            task::Poll,
        };

        let (send, recv) = channel(0);
        let mut first = send.send(1);
        let mut second = send.send(2);
        for fut in [&mut first, &mut second] {
            let polled = poll_fn(|cx| Poll::Ready(Pin::new(&mut *fut).poll(cx))).await;
            assert!(polled.is_pending());
        }
        assert_eq!(send.len(), 0);
        assert_eq!(recv.recv().try_now(), Ok(Some(1)));
        // the taken send resolves, the other can still be rescinded
        assert!(first.await.is_ok());
        assert_eq!(second.rescind(), Some(2));
        assert!(second.is_terminated());
        assert!(matches!(recv.recv().try_now(), Err(TryRecvError::WouldBlock(_))));
    }

    #[test]
    fn parked_receiver_is_room_for_rendezvous() {
        let (send, recv) = channel(0);
        let join = thread::spawn(move || recv.recv().block());
        thread::sleep(Duration::from_millis(20));
        // the parked receiver counts as room
        send.send(4).try_now().unwrap();
        assert_eq!(join.join().unwrap(), Ok(Some(4)));
    }

    #[test]
    fn aborted_recv_loses_nothing() {
        let (send, recv) = channel(1);
        let mut fut = recv.recv();
        assert!(fut.try_now().is_err());
        send.send(5).try_now().unwrap();
        let mut fut = recv.recv();
        fut.abort();
        assert_eq!(recv.recv().try_now().unwrap(), Some(5));
    }

    #[test]
    fn stochastic_fifo() {
        use rand::prelude::*;
        use rand_pcg::Pcg32;

        for seed in 0..8u64 {
            let mut rng = Pcg32::seed_from_u64(seed);
            let cap = rng.gen_range(0..6);
            let n = 200;
            let (send, recv) = channel(cap);
            let producer_seed = rng.gen::<u64>();
            let join = thread::spawn(move || {
                let mut rng = Pcg32::seed_from_u64(producer_seed);
                for i in 0..n {
                    if rng.gen_ratio(1, 20) {
                        thread::yield_now();
                    }
                    send.send(i).block().unwrap();
                }
            });
            for i in 0..n {
                if rng.gen_ratio(1, 20) {
                    thread::yield_now();
                }
                assert_eq!(recv.recv().block().unwrap(), Some(i));
            }
            assert_eq!(recv.recv().block().unwrap(), None);
            join.join().unwrap();
        }
    }

    #[cfg(feature = "futures")]
    #[tokio::test]
    async fn stream_ends_on_exhausted() {
        use futures::StreamExt;

        let (send, recv) = channel(2);
        tokio::spawn(async move {
            for i in 0..5 {
                send.send(i).await.unwrap();
            }
        });
        let got = recv.into_stream().map(Result::unwrap).collect::<Vec<_>>().await;
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }
}
