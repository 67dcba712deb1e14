// queue of parked futures part of a channel.

use std::{
    collections::VecDeque,
    task::Waker,
};


// identifies a node linked into a `WaiterQueue`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct WaiterId(u64);

// FIFO queue of parked futures, each with a slot for its waker.
//
// the front of the queue is the future that is next in line to make progress. nodes stay linked
// when woken, and unlink themselves once they resolve or are cancelled. this is what gives
// fairness between competing senders or competing receivers.
#[derive(Default)]
pub(crate) struct WaiterQueue {
    // next id to hand out. ids are never reused within a queue.
    next_id: u64,
    // linked nodes, front first.
    nodes: VecDeque<Node>,
}

struct Node {
    id: WaiterId,
    waker: Option<Waker>,
}

impl WaiterQueue {
    // construct empty queue.
    pub(crate) fn new() -> Self {
        WaiterQueue::default()
    }

    // number of linked nodes.
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // link a new node to the back of this queue.
    pub(crate) fn push(&mut self) -> WaiterId {
        let id = WaiterId(self.next_id);
        self.next_id += 1;
        self.nodes.push_back(Node { id, waker: None });
        id
    }

    // whether the node is at the front of this queue.
    pub(crate) fn is_front(&self, id: WaiterId) -> bool {
        self.nodes.front().is_some_and(|node| node.id == id)
    }

    // whether the node is linked into this queue.
    #[cfg(test)]
    pub(crate) fn contains(&self, id: WaiterId) -> bool {
        self.nodes.iter().any(|node| node.id == id)
    }

    // install a waker into the node's slot, replacing any previous one.
    //
    // panics if the node is not linked.
    pub(crate) fn set_waker(&mut self, id: WaiterId, waker: &Waker) {
        let node = self.nodes.iter_mut()
            .find(|node| node.id == id)
            .expect("set_waker on unlinked waiter");
        match &node.waker {
            Some(prev) if prev.will_wake(waker) => (),
            _ => node.waker = Some(waker.clone()),
        }
    }

    // unlink the node. returns whether it was at the front. does nothing if not linked.
    //
    // this drops any waker the node held.
    pub(crate) fn remove(&mut self, id: WaiterId) -> bool {
        match self.nodes.iter().position(|node| node.id == id) {
            Some(i) => {
                self.nodes.remove(i);
                i == 0
            }
            None => false,
        }
    }

    // wake the node at the front, if any, leaving it linked.
    pub(crate) fn wake_front(&mut self) {
        if let Some(waker) = self.nodes.front_mut().and_then(|node| node.waker.take()) {
            waker.wake();
        }
    }

    // wake all nodes, leaving them linked.
    pub(crate) fn wake_all(&mut self) {
        for node in self.nodes.iter_mut() {
            if let Some(waker) = node.waker.take() {
                waker.wake();
            }
        }
    }
}
