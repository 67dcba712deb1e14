//! One-shot completion signal with broadcast semantics.
//!
//! A signal is a channel that never carries a message: firing closes it, which every waiter
//! observes as the "exhausted" state.

use crate::{
    channel::api::{channel, Receiver, Sender},
    error::{CancelledError, RecvError, RecvTerminalState, TryRecvError},
};
use std::{
    convert::Infallible,
    time::Duration,
};


/// Create a single-use signal barrier
///
/// The barrier starts armed. [`Signal::fire`] moves it to fired, at which point every [`Waiter`]
/// clone, current or future, unblocks. If the [`Signal`] is dropped without firing, waiters
/// observe [`CancelledError`] instead.
pub fn signal() -> (Signal, Waiter) {
    let (send, recv) = channel(0);
    (Signal(send.with_cancel_on_drop(true)), Waiter(recv))
}

/// Firing half of a signal barrier
#[derive(Debug)]
pub struct Signal(Sender<Infallible>);

impl Signal {
    /// Fire the signal, releasing all waiters
    pub fn fire(mut self) {
        self.0.set_cancel_on_drop(false);
        self.0.close();
        trace!("signal fired");
    }
}

/// Waiting half of a signal barrier
#[derive(Debug, Clone)]
pub struct Waiter(Receiver<Infallible>);

fn fired(result: Result<Option<Infallible>, RecvError>) -> Result<(), CancelledError> {
    match result {
        Ok(None) => Ok(()),
        Ok(Some(never)) => match never {},
        Err(RecvError::Cancelled(e)) => Err(e),
    }
}

impl Waiter {
    /// Wait until the signal fires
    pub async fn wait(&self) -> Result<(), CancelledError> {
        fired(self.0.recv().await)
    }

    /// Block the current thread until the signal fires
    pub fn wait_blocking(&self) -> Result<(), CancelledError> {
        fired(self.0.recv().block())
    }

    /// Block the current thread until the signal fires or the timeout elapses
    ///
    /// Returns whether the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, CancelledError> {
        match self.0.recv().block_timeout(timeout) {
            Ok(None) => Ok(true),
            Ok(Some(never)) => match never {},
            Err(TryRecvError::WouldBlock(_)) => Ok(false),
            Err(TryRecvError::Terminal(RecvError::Cancelled(e))) => Err(e),
        }
    }

    /// Whether the signal has fired
    pub fn is_fired(&self) -> bool {
        self.0.terminal_state() == Some(RecvTerminalState::Exhausted)
    }
}
