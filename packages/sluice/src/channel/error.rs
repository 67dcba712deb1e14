// channel error types.

use thiserror::Error;


// ==== base error types ====


/// Error for trying to send into a channel for which all receivers have been dropped
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("all receivers have been dropped")]
pub struct NoReceiversError;

/// Error for trying to use a channel which a sender has cancelled
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("channel was cancelled")]
pub struct CancelledError;

/// Error for attempting to use a channel with no or limited blocking, and the operation not
/// completing immediately or by the specified deadline
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("operation would block")]
pub struct WouldBlockError;


// ==== compound error types ====


/// Error for trying to send into a channel
///
/// The message that could not be sent is handed back to the caller.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("failed to send message: {cause}")]
pub struct SendError<T, E = SendErrorCause> {
    /// The message that could not be sent
    pub msg: T,
    /// The reason the message could not be sent
    pub cause: E,
}

/// Error for trying to send into a channel with no or limited blocking
pub type TrySendError<T> = SendError<T, TrySendErrorCause>;

impl<T, E> SendError<T, E> {
    /// Take back the message that could not be sent
    pub fn into_msg(self) -> T {
        self.msg
    }
}

impl<T> From<SendError<T>> for TrySendError<T> {
    fn from(e: SendError<T>) -> Self {
        SendError {
            msg: e.msg,
            cause: e.cause.into(),
        }
    }
}

macro_rules! compound_from {
    ($compound:ident {$(
        $variant:ident($inner:ty),
    )*})=>{$(
        impl From<$inner> for $compound {
            fn from(inner: $inner) -> Self {
                Self::$variant(inner)
            }
        }
    )*};
}

/// Terminal error state for trying to send into a channel
///
/// Sending into a channel that has been closed is not represented here: that is a programming
/// error and panics.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SendErrorCause {
    /// All receivers handles have been dropped
    #[error(transparent)]
    NoReceivers(NoReceiversError),
    /// A sender handle was used to cancel the channel
    #[error(transparent)]
    Cancelled(CancelledError),
}

compound_from!(SendErrorCause {
    NoReceivers(NoReceiversError),
    Cancelled(CancelledError),
});

/// Error for trying to send into a channel with no or limited blocking
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TrySendErrorCause {
    /// The senders of the channel have entered some terminal error state
    #[error(transparent)]
    Terminal(SendErrorCause),
    /// The operation could not be resolved immediately or by the specified deadline
    #[error(transparent)]
    WouldBlock(WouldBlockError),
}

compound_from!(TrySendErrorCause {
    Terminal(SendErrorCause),
    WouldBlock(WouldBlockError),
});

impl From<NoReceiversError> for TrySendErrorCause {
    fn from(inner: NoReceiversError) -> Self {
        TrySendErrorCause::Terminal(inner.into())
    }
}

impl From<CancelledError> for TrySendErrorCause {
    fn from(inner: CancelledError) -> Self {
        TrySendErrorCause::Terminal(inner.into())
    }
}

/// Terminal error state for trying to receive from a channel
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RecvError {
    /// A sender handle was used to cancel the channel
    #[error(transparent)]
    Cancelled(CancelledError),
}

compound_from!(RecvError {
    Cancelled(CancelledError),
});

/// Error for trying to receive from a channel with no or limited blocking
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TryRecvError {
    /// The receivers of the channel have entered some terminal error state
    #[error(transparent)]
    Terminal(RecvError),
    /// The operation could not be resolved immediately or by the specified deadline
    #[error(transparent)]
    WouldBlock(WouldBlockError),
}

compound_from!(TryRecvError {
    Terminal(RecvError),
    WouldBlock(WouldBlockError),
});

impl From<CancelledError> for TryRecvError {
    fn from(inner: CancelledError) -> Self {
        TryRecvError::Terminal(inner.into())
    }
}

/// Terminal state for trying to receive from a channel
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RecvTerminalState {
    /// The "exhausted" state, where the channel was closed and no more buffered messages remain
    #[error("channel is closed and drained")]
    Exhausted,
    /// A terminal error state
    #[error(transparent)]
    Error(RecvError),
}

compound_from!(RecvTerminalState {
    Error(RecvError),
});
