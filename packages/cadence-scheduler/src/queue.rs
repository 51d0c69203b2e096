use crate::priority::PriorityLevel;
use crate::task::{Callback, CallbackHandle};
use slotmap::SlotMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct CallbackNode {
    /// `None` while the callback is running.
    callback: Option<Callback>,
    priority: PriorityLevel,
    expiration_time: f64,
    seq: u64,
}

struct QueueEntry {
    expiration_time: f64,
    seq: u64,
    handle: CallbackHandle,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Reversed so the max-heap yields the earliest expiration, FIFO on ties.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .expiration_time
            .total_cmp(&self.expiration_time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A callback taken off the queue to run.
pub struct RunningCallback {
    pub handle: CallbackHandle,
    pub callback: Callback,
    pub priority: PriorityLevel,
    pub expiration_time: f64,
}

/// Pending callbacks ordered by expiration time, FIFO within equal times.
///
/// Records live in a slot map keyed by [`CallbackHandle`]; the heap only holds
/// ordering entries. Cancelling removes the record and leaves its heap entry
/// behind, which is discarded as stale when it reaches the top.
#[derive(Default)]
pub struct CallbackQueue {
    nodes: SlotMap<CallbackHandle, CallbackNode>,
    order: BinaryHeap<QueueEntry>,
    next_seq: u64,
    pending: usize,
}

impl CallbackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        priority: PriorityLevel,
        expiration_time: f64,
        callback: Callback,
    ) -> CallbackHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        let handle = self.nodes.insert(CallbackNode {
            callback: Some(callback),
            priority,
            expiration_time,
            seq,
        });
        self.order.push(QueueEntry {
            expiration_time,
            seq,
            handle,
        });
        self.pending += 1;
        handle
    }

    fn is_live(&self, entry: &QueueEntry) -> bool {
        self.nodes.get(entry.handle).is_some_and(|node| {
            node.callback.is_some()
                && node.seq == entry.seq
                && node.expiration_time.total_cmp(&entry.expiration_time) == Ordering::Equal
        })
    }

    fn prune(&mut self) {
        while let Some(top) = self.order.peek() {
            if self.is_live(top) {
                break;
            }
            self.order.pop();
        }
    }

    /// The next callback to run and its expiration time.
    pub fn peek(&mut self) -> Option<(CallbackHandle, f64)> {
        self.prune();
        self.order
            .peek()
            .map(|entry| (entry.handle, entry.expiration_time))
    }

    pub fn first_expiration(&mut self) -> Option<f64> {
        self.peek().map(|(_, expiration)| expiration)
    }

    /// Take the first pending callback. Its record stays in the map, marked
    /// running, until [`complete`](Self::complete) or [`requeue`](Self::requeue).
    pub fn take_first(&mut self) -> Option<RunningCallback> {
        self.prune();
        let entry = self.order.pop()?;
        let node = self.nodes.get_mut(entry.handle)?;
        let callback = node.callback.take()?;
        self.pending -= 1;
        Some(RunningCallback {
            handle: entry.handle,
            callback,
            priority: node.priority,
            expiration_time: node.expiration_time,
        })
    }

    /// Put a continuation back in the running callback's place. It keeps the
    /// original sequence number, so it runs before later callbacks that share
    /// its expiration time.
    pub fn requeue(&mut self, handle: CallbackHandle, callback: Callback) -> bool {
        let Some(node) = self.nodes.get_mut(handle) else {
            return false;
        };
        if node.callback.is_some() {
            return false;
        }
        node.callback = Some(callback);
        self.order.push(QueueEntry {
            expiration_time: node.expiration_time,
            seq: node.seq,
            handle,
        });
        self.pending += 1;
        true
    }

    /// Drop the record of a callback that finished or failed.
    pub fn complete(&mut self, handle: CallbackHandle) {
        if let Some(node) = self.nodes.get(handle) {
            if node.callback.is_none() {
                self.nodes.remove(handle);
            }
        }
    }

    /// Remove a callback that has not started. Running or unknown handles are
    /// left alone.
    pub fn cancel(&mut self, handle: CallbackHandle) -> bool {
        match self.nodes.get(handle) {
            Some(node) if node.callback.is_some() => {
                self.nodes.remove(handle);
                self.pending -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, handle: CallbackHandle) -> bool {
        self.nodes
            .get(handle)
            .is_some_and(|node| node.callback.is_some())
    }

    pub fn is_running(&self, handle: CallbackHandle) -> bool {
        self.nodes
            .get(handle)
            .is_some_and(|node| node.callback.is_none())
    }

    pub fn expiration_of(&self, handle: CallbackHandle) -> Option<f64> {
        self.nodes.get(handle).map(|node| node.expiration_time)
    }

    /// Number of callbacks waiting to run.
    pub fn len(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }
}
