// internal future polling system, used for the blocking versions of operations.
//
// design based on pollster crate, but with extensive modifications.

use std::{
    future::Future,
    sync::{Arc, Condvar, Mutex, PoisonError},
    task::{Context, Poll, Wake, Waker},
    time::Instant,
    pin::Pin,
};


// timeout for blocking on a future.
#[derive(Debug, Copy, Clone)]
pub(crate) enum Timeout {
    // never time out.
    Never,
    // time out at the given deadline.
    At(Instant),
    // time out if the future cannot be resolved without blocking.
    NonBlocking,
}

// poll the future until it resolves or the timeout is reached, in which case return none.
//
// the future is left in its pending state upon timeout, so the caller is responsible for
// cancelling or dropping it.
pub(crate) fn poll<F>(fut: &mut F, timeout: Timeout) -> Option<F::Output>
where
    F: Future + Unpin,
{
    let parker = Arc::new(Parker {
        state: Mutex::new(State::Empty),
        cond: Condvar::new(),
    });
    let waker = Waker::from(Arc::clone(&parker));
    let mut cx = Context::from_waker(&waker);

    loop {
        // return if ready
        if let Poll::Ready(output) = Pin::new(&mut *fut).poll(&mut cx) {
            return Some(output);
        }

        // otherwise, block until notification or timeout
        let mut lock = parker.lock();

        // if a notification is already present, skip to the next loop iteration so as to release
        // the lock and try polling again without blocking.
        if let State::Notified = *lock {
            *lock = State::Empty;
            continue;
        }

        // otherwise, actually block until notification or timeout
        debug_assert!(matches!(*lock, State::Empty));
        *lock = State::Waiting;
        match timeout {
            // block on mutex + condvar indefinitely
            Timeout::Never =>
                while let State::Waiting = *lock {
                    lock = parker.cond.wait(lock).unwrap_or_else(PoisonError::into_inner);
                },

            // block on mutex + condvar until deadline, at which point return none
            Timeout::At(deadline) =>
                while let State::Waiting = *lock {
                    let Some(duration) = deadline.checked_duration_since(Instant::now())
                        else { return None };
                    let (lock2, wait_result) = parker.cond.wait_timeout(lock, duration)
                        .unwrap_or_else(PoisonError::into_inner);
                    lock = lock2;
                    if wait_result.timed_out() && matches!(*lock, State::Waiting) {
                        return None;
                    }
                },

            // dont block on mutex + condvar, return none instead
            Timeout::NonBlocking => return None,
        }
        *lock = State::Empty;
    }
}

// block the current thread on a future with no timeout.
pub(crate) fn block_on<F: Future>(fut: F) -> F::Output {
    let mut fut = Box::pin(fut);
    match poll(&mut fut, Timeout::Never) {
        Some(output) => output,
        None => unreachable!("poll timed out with Timeout::Never"),
    }
}

// synchronization state
enum State {
    Empty,
    Waiting,
    Notified,
}

// parks the polling thread until its waker is woken.
struct Parker {
    state: Mutex<State>,
    cond: Condvar,
}

impl Parker {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Wake for Parker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let mut lock = self.lock();
        match *lock {
            State::Notified => (),
            State::Empty => {
                *lock = State::Notified;
            }
            State::Waiting => {
                *lock = State::Empty;
                self.cond.notify_one();
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        thread,
        time::Duration,
    };

    #[test]
    fn non_blocking_returns_none_for_pending() {
        let mut fut = std::future::pending::<()>();
        assert!(poll(&mut fut, Timeout::NonBlocking).is_none());
        let mut fut = std::future::ready(5);
        assert_eq!(poll(&mut fut, Timeout::NonBlocking), Some(5));
    }

    #[test]
    fn deadline_elapses() {
        let start = Instant::now();
        let mut fut = std::future::pending::<()>();
        let deadline = start + Duration::from_millis(20);
        assert!(poll(&mut fut, Timeout::At(deadline)).is_none());
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn wakes_from_other_thread() {
        let (send, recv) = std::sync::mpsc::channel::<Waker>();
        let mut woken = false;
        let mut fut = std::future::poll_fn(move |cx| {
            if woken {
                Poll::Ready(())
            } else {
                woken = true;
                send.send(cx.waker().clone()).unwrap();
                Poll::Pending
            }
        });
        let join = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            recv.recv().unwrap().wake();
        });
        assert_eq!(poll(&mut fut, Timeout::Never), Some(()));
        join.join().unwrap();
    }
}
