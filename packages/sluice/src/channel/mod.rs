// implementation of the bounded channel.
//
// the basic architecture is vaguely inspired by flume. it is as such:
//
// channel handles wrap around Arc<shared state>
//                                   |
//          /------------------------/
//          v
//       shared state
//          |
//          |------ it contains atomic bytes for the send state and recv state, so that handles can
//          |       check for terminal states without taking the lock.
//          |
//          \------ it contains a mutex around the lockable state:
//
//                  - a VecDeque<T> holding the buffered elements.
//
//                  - a "send waiter queue": a queue of ids each of which corresponds to a pending
//                    send future, with a slot for storing a Waker. only the front of the queue may
//                    push an element, and this is used to achieve fairness.
//
//                  - a "recv waiter queue", which is the same idea for recv futures.
//
//                  - the "offers": elements of parked send futures, in send waiter queue order.
//                    a recv that finds the buffer empty takes the front offer directly, which
//                    completes that send.
//
// a bound of 0 works by letting the front send push only while there are more parked receivers
// than buffered elements. otherwise the send parks with its element in the offers, so a
// non-blocking recv still sees it. either way a send completes only when some receiver takes it.
//
// blocking versions of operations are built as a layer on top of the futures, in the polling
// module, which parks the calling thread on a condvar.
//
// the organization of these modules is as such:
//
//      These are used like
//      library utilities:
//    /--------------------\
//
//      waiters<---------------core: This presents an abstraction for channels which is fully
//                             ^     safe, but panicky and inconvenient.
//                             |
//      polling<---------------api: This is a wrapper around core that adapts it into an API that
//                                  is convenient and defensive. The crate re-exports this API
//                                  publically.
//
// there is also the error module, which contains the relevant error types, which is also
// re-exported publically.

pub(crate) mod error;
pub(crate) mod api;
pub(crate) mod polling;

mod waiters;
mod core;
