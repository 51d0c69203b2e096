//! Callbacks that must run before the host's next idle point.

use cadence_scheduler::{
    Callback, CallbackHandle, CallbackOptions, Continuation, PriorityLevel, Scheduler, callback,
};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

struct SyncQueueInner<S> {
    scheduler: S,
    /// `None` until the first push and again after a full drain.
    queue: RefCell<Option<VecDeque<Callback>>>,
    /// Engine callback that drains the queue on the next turn.
    armed: Cell<Option<CallbackHandle>>,
    flushing: Cell<bool>,
}

struct FlushingGuard<'a>(&'a Cell<bool>);

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// FIFO of synchronous callbacks.
///
/// The first push arms one drain at Immediate priority on the engine; callers
/// that cannot wait drain it themselves with [`flush`](Self::flush). A failing
/// callback is dropped, the callbacks after it stay queued and a new drain is
/// armed.
pub struct SyncCallbackQueue<S: Scheduler + 'static> {
    inner: Rc<SyncQueueInner<S>>,
}

impl<S: Scheduler + 'static> SyncCallbackQueue<S> {
    pub fn new(scheduler: S) -> Self {
        Self {
            inner: Rc::new(SyncQueueInner {
                scheduler,
                queue: RefCell::new(None),
                armed: Cell::new(None),
                flushing: Cell::new(false),
            }),
        }
    }

    pub fn push(&self, callback: Callback) {
        let created = {
            let mut queue = self.inner.queue.borrow_mut();
            match queue.as_mut() {
                Some(queue) => {
                    queue.push_back(callback);
                    false
                }
                None => {
                    *queue = Some(VecDeque::from([callback]));
                    true
                }
            }
        };
        // An existing queue already has a drain armed, or is being drained.
        if created {
            arm(&self.inner);
        }
    }

    /// Cancel the armed drain and run every queued callback now.
    pub fn flush(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.inner.armed.take() {
            self.inner.scheduler.cancel_callback(handle);
        }
        flush_queue(&self.inner)
    }

    pub fn len(&self) -> usize {
        self.inner.queue.borrow().as_ref().map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.get()
    }

    /// Whether a drain is waiting on the engine.
    pub fn is_armed(&self) -> bool {
        self.inner.armed.get().is_some()
    }
}

fn arm<S: Scheduler + 'static>(inner: &Rc<SyncQueueInner<S>>) {
    let weak: Weak<SyncQueueInner<S>> = Rc::downgrade(inner);
    let handle = inner.scheduler.schedule_callback(
        PriorityLevel::Immediate,
        callback(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.armed.set(None);
                flush_queue(&inner)?;
            }
            Ok(Continuation::Done)
        }),
        CallbackOptions::default(),
    );
    inner.armed.set(Some(handle));
}

fn flush_queue<S: Scheduler + 'static>(inner: &Rc<SyncQueueInner<S>>) -> anyhow::Result<()> {
    if inner.flushing.get() || inner.queue.borrow().is_none() {
        return Ok(());
    }
    inner.flushing.set(true);
    let _flushing = FlushingGuard(&inner.flushing);
    tracing::trace!("flushing sync queue");

    let mut flushed = 0usize;
    loop {
        // Callbacks may push more work, so never hold the borrow while one runs.
        let next = inner.queue.borrow_mut().as_mut().and_then(VecDeque::pop_front);
        let Some(mut unit) = next else {
            break;
        };
        loop {
            match unit(true) {
                Ok(Continuation::Done) => break,
                Ok(Continuation::Continue(next)) => unit = next,
                Err(err) => {
                    let remaining = inner.queue.borrow().as_ref().map_or(0, VecDeque::len);
                    tracing::warn!(
                        "sync callback failed after {} succeeded, {} left for the next flush",
                        flushed,
                        remaining
                    );
                    if remaining == 0 {
                        *inner.queue.borrow_mut() = None;
                    } else {
                        arm(inner);
                    }
                    return Err(err);
                }
            }
        }
        flushed += 1;
    }

    *inner.queue.borrow_mut() = None;
    tracing::trace!("sync queue drained ({} callbacks)", flushed);
    Ok(())
}
