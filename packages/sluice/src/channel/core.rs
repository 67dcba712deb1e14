// minimal safe API for the channel. the exposed API is a convenience wrapper around this.

use super::waiters::{WaiterQueue, WaiterId};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{
            Ordering::Relaxed,
            AtomicU8,
            AtomicUsize,
        },
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    task::{Poll, Context},
};


// handle to a channel.
pub(crate) struct Channel<T>(Arc<Shared<T>>);

// channel shared state.
struct Shared<T> {
    // mutex around lockable state.
    lockable: Mutex<Lockable<T>>,
    // maximum number of buffered elems. 0 means sends hand off directly to parked receivers.
    bound: usize,

    // send handle reference count.
    send_count: AtomicUsize,
    // recv handle reference count.
    recv_count: AtomicUsize,

    // begins as SendState::Normal. only written while holding the lock.
    //
    // - once changes to a value other than normal, never returns to normal. no receivers may
    //   still move on to closed or cancelled.
    // - if closed, send operations panic.
    // - if no receivers or cancelled, send operations immediately return a corresponding error.
    send_state: AtomicU8,
    // begins as RecvState::Normal. only written while holding the lock.
    //
    // - if value is RecvState::Closed, recv operations return "exhausted" once all elems are
    //   drained from Lockable.elems.
    // - if value is RecvState::Cancelled, elems have been dropped and recv operations immediately
    //   return an error.
    recv_state: AtomicU8,
}

// channel lockable state.
struct Lockable<T> {
    // storage for elems.
    elems: VecDeque<T>,
    // whether close has been called.
    closed: bool,
    // parked send futures.
    send_waiters: WaiterQueue,
    // elems of parked send futures, in the same order as send_waiters. a receive that finds
    // elems empty takes the front offer directly, which completes that send.
    offers: VecDeque<(WaiterId, T)>,
    // parked recv futures.
    recv_waiters: WaiterQueue,
}

// possible values for Shared.send_state
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum SendState {
    // sending may still be possible.
    Normal,
    // all receivers have been dropped.
    NoReceivers,
    // a sender closed the channel.
    Closed,
    // a sender cancelled the channel.
    Cancelled,
}

// possible values for Shared.recv_state
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum RecvState {
    // receiving may still be possible.
    Normal,
    // receiving may still be possible if Lockable.elems is non-empty.
    Closed,
    // a sender cancelled the channel.
    Cancelled,
}

impl<T> Lockable<T> {
    // whether a send may push an elem right now.
    //
    // parked receivers count as room, which is what lets a zero-bound channel hand off.
    fn has_room(&self, bound: usize) -> bool {
        self.elems.len() < bound.max(self.recv_waiters.len())
    }

    // number of elems a receive could take right now.
    //
    // offers are only taken while the channel is open. once closed, parked senders panic instead.
    fn available(&self, recv_state: u8) -> usize {
        if recv_state == RecvState::Normal as u8 {
            self.elems.len() + self.offers.len()
        } else {
            self.elems.len()
        }
    }

    fn has_offer(&self, id: WaiterId) -> bool {
        self.offers.iter().any(|&(offer_id, _)| offer_id == id)
    }

    // remove the offer made by the given send waiter, if a receive has not taken it.
    fn take_offer(&mut self, id: WaiterId) -> Option<T> {
        let i = self.offers.iter().position(|&(offer_id, _)| offer_id == id)?;
        self.offers.remove(i).map(|(_, elem)| elem)
    }
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Lockable<T>> {
        // we never panic while holding the lock, but an elem's destructor might.
        self.lockable.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Channel<T> {
    // construct empty channel with send and recv counts of 1.
    pub(crate) fn new(bound: usize) -> Self {
        Channel(Arc::new(Shared {
            lockable: Mutex::new(Lockable {
                elems: VecDeque::with_capacity(bound),
                closed: false,
                send_waiters: WaiterQueue::new(),
                recv_waiters: WaiterQueue::new(),
                offers: VecDeque::new(),
            }),
            bound,
            send_count: AtomicUsize::new(1),
            recv_count: AtomicUsize::new(1),
            send_state: AtomicU8::new(SendState::Normal as u8),
            recv_state: AtomicU8::new(RecvState::Normal as u8),
        }))
    }

    // clone another handle to the channel.
    pub(crate) fn clone(&self) -> Self {
        Channel(Arc::clone(&self.0))
    }

    // atomic-read the send state byte.
    pub(crate) fn send_state(&self) -> u8 {
        self.0.send_state.load(Relaxed)
    }

    // atomic-read the recv state byte.
    pub(crate) fn recv_state(&self) -> u8 {
        self.0.recv_state.load(Relaxed)
    }

    // get the send handle reference count.
    pub(crate) fn send_count(&self) -> &AtomicUsize {
        &self.0.send_count
    }

    // get the recv handle reference count.
    pub(crate) fn recv_count(&self) -> &AtomicUsize {
        &self.0.recv_count
    }

    // the maximum number of buffered elems.
    pub(crate) fn bound(&self) -> usize {
        self.0.bound
    }

    // whether both handles point to the same channel.
    pub(crate) fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // lock the channel
    pub(crate) fn lock(&self) -> Lock<'_, T> {
        Lock {
            shared: &self.0,
            lock: self.0.lock(),
        }
    }
}

// lock on a channel.
pub(crate) struct Lock<'a, T> {
    shared: &'a Shared<T>,
    lock: MutexGuard<'a, Lockable<T>>,
}

impl<'a, T> Lock<'a, T> {
    // number of buffered elems.
    pub(crate) fn len(&self) -> usize {
        self.lock.elems.len()
    }

    // whether close has already been called.
    pub(crate) fn is_closed(&self) -> bool {
        self.lock.closed
    }

    // mark the channel closed, waking all parked futures. returns false if already closed.
    pub(crate) fn close(&mut self) -> bool {
        if self.lock.closed {
            return false;
        }
        self.lock.closed = true;
        if self.shared.send_state.load(Relaxed) != SendState::Cancelled as u8 {
            self.shared.send_state.store(SendState::Closed as u8, Relaxed);
        }
        if self.shared.recv_state.load(Relaxed) == RecvState::Normal as u8 {
            self.shared.recv_state.store(RecvState::Closed as u8, Relaxed);
        }
        self.lock.send_waiters.wake_all();
        self.lock.recv_waiters.wake_all();
        true
    }

    // cancel the channel, waking all parked futures.
    //
    // returns the buffered elems, which the caller should drop after releasing the lock.
    pub(crate) fn cancel(&mut self) -> VecDeque<T> {
        if self.shared.send_state.load(Relaxed) != SendState::Closed as u8 {
            self.shared.send_state.store(SendState::Cancelled as u8, Relaxed);
        }
        let drained = self.shared.recv_state.load(Relaxed) == RecvState::Closed as u8
            && self.lock.elems.is_empty();
        if !drained {
            // receivers that already observed exhaustion keep observing it
            self.shared.recv_state.store(RecvState::Cancelled as u8, Relaxed);
        }
        self.lock.send_waiters.wake_all();
        self.lock.recv_waiters.wake_all();
        if drained {
            VecDeque::new()
        } else {
            std::mem::take(&mut self.lock.elems)
        }
    }

    // transition senders into the no receivers state, waking parked send futures.
    //
    // returns the buffered elems, which the caller should drop after releasing the lock.
    pub(crate) fn set_no_receivers(&mut self) -> VecDeque<T> {
        if self.shared.send_state.load(Relaxed) == SendState::Normal as u8 {
            self.shared.send_state.store(SendState::NoReceivers as u8, Relaxed);
        }
        self.lock.send_waiters.wake_all();
        std::mem::take(&mut self.lock.elems)
    }
}


// ==== futures ====


// send future core. must be polled to completion or cancelled.
pub(crate) struct Send<T> {
    // handle to channel.
    channel: Channel<T>,
    // elem to send. moved into the channel's offers once this future parks.
    elem: Option<T>,
    // node in the send waiter queue, once this future has parked.
    waiter: Option<WaiterId>,
    // whether resolved or cancelled.
    done: bool,
}

impl<T> Send<T> {
    pub(crate) fn new(channel: &Channel<T>, elem: T) -> Self {
        Send { channel: channel.clone(), elem: Some(elem), waiter: None, done: false }
    }

    // poll the future.
    //
    // - resolves to ok upon successfully sending, including when a receive took the elem
    //   directly from the offers while this future was parked.
    // - if the channel enters the no receivers or cancelled send state, resolves to err with the
    //   send state byte and the elem being sent.
    // - panics if the channel is closed.
    //
    // internally locks the channel. panics if already resolved or cancelled.
    pub(crate) fn poll(&mut self, cx: &mut Context) -> Poll<Result<(), (u8, T)>> {
        assert!(!self.done, "send future polled after already resolved or cancelled");
        let shared = &*self.channel.0;
        let bound = shared.bound;

        // lock the channel
        let mut lock = shared.lock();

        // a receive which took our offer also unlinked our node
        if let Some(id) = self.waiter {
            if !lock.has_offer(id) {
                self.waiter = None;
                self.done = true;
                return Poll::Ready(Ok(()));
            }
        }

        // now that channel is locked, we can check for error without race conditions
        let send_state = shared.send_state.load(Relaxed);
        if send_state != SendState::Normal as u8 {
            let elem = reclaim(&mut self.waiter, &mut self.elem, &mut lock);
            self.done = true;
            drop(lock);
            if send_state == SendState::Closed as u8 {
                panic!("send on closed channel");
            }
            let Some(elem) = elem else { unreachable!("send future lost its elem") };
            return Poll::Ready(Err((send_state, elem)));
        }

        // next, check whether we'll return pending.
        let is_front = match self.waiter {
            Some(id) => lock.send_waiters.is_front(id),
            None => lock.send_waiters.is_empty(),
        };
        if !is_front || !lock.has_room(bound) {
            // either backpressure or this future isn't at the front of the send queue
            let id = match self.waiter {
                Some(id) => id,
                None => {
                    let Some(elem) = self.elem.take()
                        else { unreachable!("send future lost its elem") };
                    let id = lock.send_waiters.push();
                    lock.offers.push_back((id, elem));
                    // a parked receiver may take the offer
                    lock.recv_waiters.wake_front();
                    *self.waiter.insert(id)
                }
            };
            lock.send_waiters.set_waker(id, cx.waker());
            return Poll::Pending;
        }
        // at this point, we know we will send the value and unlink the node now

        let Some(elem) = reclaim(&mut self.waiter, &mut self.elem, &mut lock)
            else { unreachable!("send future lost its elem") };
        self.done = true;
        lock.elems.push_back(elem);

        // notify futures that are now unblocked
        lock.recv_waiters.wake_front();
        if lock.has_room(bound) {
            lock.send_waiters.wake_front();
        }
        Poll::Ready(Ok(()))
    }

    // if not already resolved or cancelled, cancel the future and return the elem.
    //
    // returns none if a receive already took the elem from the offers, in which case the send
    // happened. internally locks the channel if the future had parked. never panics.
    pub(crate) fn cancel(&mut self) -> Option<T> {
        if self.done {
            return None;
        }
        self.done = true;
        let Some(id) = self.waiter.take() else { return self.elem.take() };
        let bound = self.channel.0.bound;
        let mut lock = self.channel.0.lock();
        let elem = lock.take_offer(id)?;
        let was_front = lock.send_waiters.remove(id);
        if was_front && lock.has_room(bound) {
            // pass the baton to the next send in line
            lock.send_waiters.wake_front();
        }
        Some(elem)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.done
    }
}

// take back a send future's elem, unlinking it from the waiter queue if parked.
fn reclaim<T>(
    waiter: &mut Option<WaiterId>,
    elem: &mut Option<T>,
    lock: &mut Lockable<T>,
) -> Option<T> {
    match waiter.take() {
        Some(id) => {
            lock.send_waiters.remove(id);
            lock.take_offer(id)
        }
        None => elem.take(),
    }
}


// recv future core. must be polled to completion or cancelled.
pub(crate) struct Recv<T> {
    // handle to channel.
    channel: Channel<T>,
    // node in the recv waiter queue, once this future has parked.
    waiter: Option<WaiterId>,
    // whether resolved or cancelled.
    done: bool,
}

impl<T> Recv<T> {
    pub(crate) fn new(channel: &Channel<T>) -> Self {
        Recv { channel: channel.clone(), waiter: None, done: false }
    }

    // poll the future.
    //
    // - resolves to ok upon successfully receiving.
    // - if the channel is closed and drained or cancelled, resolves to err with the recv state
    //   byte.
    //
    // internally locks the channel. panics if already resolved or cancelled.
    pub(crate) fn poll(&mut self, cx: &mut Context) -> Poll<Result<T, u8>> {
        assert!(!self.done, "recv future polled after already resolved or cancelled");
        let shared = &*self.channel.0;

        // lock the channel
        let mut lock = shared.lock();

        let recv_state = shared.recv_state.load(Relaxed);
        if recv_state == RecvState::Cancelled as u8 {
            finish(&mut self.done, &mut self.waiter, &mut lock);
            return Poll::Ready(Err(recv_state));
        }

        // a fresh future may only take an elem if it would not steal it from a parked one
        let is_front = match self.waiter {
            Some(id) => lock.recv_waiters.is_front(id),
            None => lock.available(recv_state) > lock.recv_waiters.len(),
        };
        if is_front {
            let mut taken = lock.elems.pop_front();
            if taken.is_none() && recv_state == RecvState::Normal as u8 {
                // direct handoff from the front parked send, which the offers are ordered by
                if let Some((id, elem)) = lock.offers.pop_front() {
                    lock.send_waiters.wake_front();
                    lock.send_waiters.remove(id);
                    taken = Some(elem);
                }
            }
            if let Some(elem) = taken {
                finish(&mut self.done, &mut self.waiter, &mut lock);

                // notify futures that are now unblocked
                if lock.available(recv_state) > 0 {
                    lock.recv_waiters.wake_front();
                } else if recv_state == RecvState::Closed as u8 {
                    lock.recv_waiters.wake_all();
                }
                lock.send_waiters.wake_front();
                return Poll::Ready(Ok(elem));
            }
        }

        if lock.elems.is_empty() && recv_state == RecvState::Closed as u8 {
            finish(&mut self.done, &mut self.waiter, &mut lock);
            return Poll::Ready(Err(recv_state));
        }

        // park
        let id = match self.waiter {
            Some(id) => id,
            None => {
                let id = *self.waiter.insert(lock.recv_waiters.push());
                // a newly parked receiver is room for a zero-bound send
                lock.send_waiters.wake_front();
                id
            }
        };
        lock.recv_waiters.set_waker(id, cx.waker());
        Poll::Pending
    }

    // if not already resolved or cancelled, cancel the future.
    //
    // internally locks the channel if the future had parked. never panics.
    pub(crate) fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if let Some(id) = self.waiter.take() {
            let mut lock = self.channel.0.lock();
            let recv_state = self.channel.0.recv_state.load(Relaxed);
            let was_front = lock.recv_waiters.remove(id);
            if was_front && lock.available(recv_state) > 0 {
                // pass the baton to the next recv in line
                lock.recv_waiters.wake_front();
            }
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.done
    }
}

// mark a recv future resolved and unlink it from the waiter queue.
fn finish<T>(done: &mut bool, waiter: &mut Option<WaiterId>, lock: &mut Lockable<T>) {
    *done = true;
    if let Some(id) = waiter.take() {
        lock.recv_waiters.remove(id);
    }
}

impl<T> Drop for Send<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T> Drop for Recv<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
