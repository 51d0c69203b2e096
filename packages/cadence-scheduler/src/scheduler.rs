use crate::Scheduler;
use crate::error::{Result, SchedulerError};
use crate::host_loop::{HostCallbackLoop, SliceTimeout};
use crate::priority::{PriorityLevel, PriorityTimeouts};
use crate::queue::CallbackQueue;
use crate::task::{Callback, CallbackHandle, CallbackOptions, Continuation};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Running totals for inspection tools.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profiling {
    pub callbacks_scheduled: u64,
    pub callbacks_completed: u64,
    pub callbacks_cancelled: u64,
    pub callbacks_failed: u64,
    pub continuations: u64,
    pub slices: u64,
    pub timed_out_slices: u64,
}

/// Restores a `Cell` to its previous value when dropped, unwinding included.
struct Restore<'a, T: Copy> {
    cell: &'a Cell<T>,
    previous: T,
}

impl<'a, T: Copy> Restore<'a, T> {
    fn set(cell: &'a Cell<T>, value: T) -> Self {
        let previous = cell.replace(value);
        Self { cell, previous }
    }
}

impl<T: Copy> Drop for Restore<'_, T> {
    fn drop(&mut self) {
        self.cell.set(self.previous);
    }
}

struct SchedulerInner {
    host: HostCallbackLoop,
    timeouts: PriorityTimeouts,
    queue: RefCell<CallbackQueue>,
    current_priority: Cell<PriorityLevel>,
    /// Expiration of the callback being run, if any.
    current_expiration: Cell<Option<f64>>,
    current_did_timeout: Cell<bool>,
    is_executing: Cell<bool>,
    is_host_callback_scheduled: Cell<bool>,
    paused: Cell<bool>,
    profiling: RefCell<Profiling>,
}

/// Single-threaded priority scheduler driven by a [`HostCallbackLoop`].
///
/// Callbacks are kept ordered by expiration time (start time plus the
/// priority's timeout). Each granted slice runs callbacks from the front
/// until the slice runs out; a timed-out slice runs every expired callback
/// regardless of the frame budget so low priority work cannot starve.
///
/// Cloning is cheap and every clone drives the same queue.
#[derive(Clone)]
pub struct LocalScheduler {
    inner: Rc<SchedulerInner>,
}

impl LocalScheduler {
    pub fn new(host: HostCallbackLoop) -> Self {
        Self::with_timeouts(host, PriorityTimeouts::default())
    }

    pub fn with_timeouts(host: HostCallbackLoop, timeouts: PriorityTimeouts) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                host,
                timeouts,
                queue: RefCell::new(CallbackQueue::new()),
                current_priority: Cell::new(PriorityLevel::Normal),
                current_expiration: Cell::new(None),
                current_did_timeout: Cell::new(false),
                is_executing: Cell::new(false),
                is_host_callback_scheduled: Cell::new(false),
                paused: Cell::new(false),
                profiling: RefCell::new(Profiling::default()),
            }),
        }
    }

    pub fn host(&self) -> &HostCallbackLoop {
        &self.inner.host
    }

    /// True when no callback is waiting.
    pub fn is_idle(&self) -> bool {
        self.inner.queue.borrow().is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    pub fn is_pending(&self, handle: CallbackHandle) -> bool {
        self.inner.queue.borrow().is_pending(handle)
    }

    /// Absolute expiration time of a scheduled callback.
    pub fn expiration_of(&self, handle: CallbackHandle) -> Option<f64> {
        self.inner.queue.borrow().expiration_of(handle)
    }

    /// The callback that would run next.
    pub fn first_callback(&self) -> Option<CallbackHandle> {
        self.inner
            .queue
            .borrow_mut()
            .peek()
            .map(|(handle, _)| handle)
    }

    pub fn profile(&self) -> Profiling {
        self.inner.profiling.borrow().clone()
    }

    /// Stop running callbacks until [`continue_execution`](Self::continue_execution).
    pub fn pause_execution(&self) {
        tracing::debug!("scheduler paused");
        self.inner.paused.set(true);
    }

    pub fn continue_execution(&self) {
        tracing::debug!("scheduler resumed");
        self.inner.paused.set(false);
        if !self.inner.queue.borrow().is_empty() {
            ensure_host_callback_is_scheduled(&self.inner);
        }
    }

    pub fn force_frame_rate(&self, fps: u32) -> Result<()> {
        self.inner.host.force_frame_rate(fps)
    }

    /// Capture the current priority so `callback` later runs with it.
    pub fn wrap_callback<R: 'static>(
        &self,
        callback: impl FnOnce() -> R + 'static,
    ) -> Box<dyn FnOnce() -> R> {
        let priority = self.inner.current_priority.get();
        let scheduler = self.clone();
        Box::new(move || scheduler.run_with_priority(priority, callback))
    }

    /// Run `f` at Normal priority, or at the current priority if that is
    /// already less urgent than Normal.
    pub fn next<R>(&self, f: impl FnOnce() -> R) -> R {
        let priority = match self.inner.current_priority.get() {
            PriorityLevel::Immediate | PriorityLevel::UserBlocking | PriorityLevel::Normal => {
                PriorityLevel::Normal
            }
            other => other,
        };
        self.run_with_priority(priority, f)
    }
}

impl Scheduler for LocalScheduler {
    fn now(&self) -> f64 {
        self.inner.host.now()
    }

    fn schedule_callback(
        &self,
        priority: PriorityLevel,
        callback: Callback,
        options: CallbackOptions,
    ) -> CallbackHandle {
        let inner = &self.inner;
        let start = inner.host.now();
        let timeout = options
            .timeout
            .unwrap_or_else(|| inner.timeouts.timeout_for(priority));
        let expiration_time = start + timeout;

        let (handle, is_first) = {
            let mut queue = inner.queue.borrow_mut();
            let handle = queue.push(priority, expiration_time, callback);
            let is_first = queue.peek().map(|(first, _)| first) == Some(handle);
            (handle, is_first)
        };
        inner.profiling.borrow_mut().callbacks_scheduled += 1;
        tracing::trace!(
            "scheduled {:?} callback {:?} expiring at {:.2}ms",
            priority,
            handle,
            expiration_time
        );

        // A new head of the queue may need an earlier slice.
        if is_first && !inner.paused.get() {
            ensure_host_callback_is_scheduled(inner);
        }
        handle
    }

    fn cancel_callback(&self, handle: CallbackHandle) {
        if self.inner.queue.borrow_mut().cancel(handle) {
            self.inner.profiling.borrow_mut().callbacks_cancelled += 1;
            tracing::trace!("cancelled callback {:?}", handle);
        } else {
            tracing::trace!("cancel ignored for running or finished callback {:?}", handle);
        }
    }

    fn should_yield(&self) -> bool {
        let inner = &self.inner;
        if inner.current_did_timeout.get() {
            return false;
        }
        let preempted = match inner.current_expiration.get() {
            Some(current) => inner
                .queue
                .borrow_mut()
                .first_expiration()
                .is_some_and(|first| first < current),
            None => false,
        };
        preempted || inner.host.should_yield_to_host()
    }

    fn get_current_priority_level(&self) -> PriorityLevel {
        self.inner.current_priority.get()
    }

    fn run_with_priority<R>(&self, priority: PriorityLevel, f: impl FnOnce() -> R) -> R {
        let priority = match priority {
            PriorityLevel::NoPriority => PriorityLevel::Normal,
            level => level,
        };
        let _restore = Restore::set(&self.inner.current_priority, priority);
        f()
    }
}

fn ensure_host_callback_is_scheduled(inner: &Rc<SchedulerInner>) {
    if inner.is_executing.get() {
        // `flush_work` reschedules once the current callback returns.
        return;
    }
    let Some(expiration_time) = inner.queue.borrow_mut().first_expiration() else {
        return;
    };
    if inner.is_host_callback_scheduled.replace(true) {
        inner.host.cancel_host_callback();
    }
    let timeout = if expiration_time <= inner.host.now() {
        SliceTimeout::Asap
    } else {
        SliceTimeout::At(expiration_time)
    };
    let weak = Rc::downgrade(inner);
    inner.host.request_host_callback(
        Box::new(move |did_timeout| flush_work(&weak, did_timeout)),
        timeout,
    );
}

fn flush_work(weak: &Weak<SchedulerInner>, did_timeout: bool) -> Result<()> {
    let Some(inner) = weak.upgrade() else {
        return Ok(());
    };
    if inner.paused.get() {
        return Ok(());
    }

    inner.profiling.borrow_mut().slices += 1;
    if did_timeout {
        inner.profiling.borrow_mut().timed_out_slices += 1;
    }

    let result = {
        let _executing = Restore::set(&inner.is_executing, true);
        let _did_timeout = Restore::set(&inner.current_did_timeout, did_timeout);
        run_slice(&inner, did_timeout)
    };

    if inner.queue.borrow().is_empty() {
        inner.is_host_callback_scheduled.set(false);
    } else {
        ensure_host_callback_is_scheduled(&inner);
    }
    result
}

fn run_slice(inner: &Rc<SchedulerInner>, did_timeout: bool) -> Result<()> {
    if did_timeout {
        // Flush every expired callback without yielding.
        loop {
            if inner.paused.get() {
                break;
            }
            let now = inner.host.now();
            let expired = inner
                .queue
                .borrow_mut()
                .first_expiration()
                .is_some_and(|first| first <= now);
            if !expired {
                break;
            }
            flush_first_callback(inner)?;
        }
    } else {
        // Keep flushing until the frame runs out of time.
        while !inner.queue.borrow().is_empty() {
            if inner.paused.get() {
                break;
            }
            flush_first_callback(inner)?;
            if inner.host.should_yield_to_host() {
                break;
            }
        }
    }
    Ok(())
}

fn flush_first_callback(inner: &Rc<SchedulerInner>) -> Result<()> {
    let Some(running) = inner.queue.borrow_mut().take_first() else {
        return Ok(());
    };
    let handle = running.handle;

    let outcome = {
        let _priority = Restore::set(&inner.current_priority, running.priority);
        let _expiration = Restore::set(&inner.current_expiration, Some(running.expiration_time));
        (running.callback)(inner.current_did_timeout.get())
    };

    match outcome {
        Ok(Continuation::Done) => {
            inner.queue.borrow_mut().complete(handle);
            inner.profiling.borrow_mut().callbacks_completed += 1;
            Ok(())
        }
        Ok(Continuation::Continue(next)) => {
            inner.queue.borrow_mut().requeue(handle, next);
            inner.profiling.borrow_mut().continuations += 1;
            tracing::trace!("callback {:?} yielded with a continuation", handle);
            Ok(())
        }
        Err(err) => {
            inner.queue.borrow_mut().complete(handle);
            inner.profiling.borrow_mut().callbacks_failed += 1;
            tracing::warn!("callback {:?} failed: {:#}", handle, err);
            Err(SchedulerError::Callback(err))
        }
    }
}
