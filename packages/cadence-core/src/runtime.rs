use crate::config::RuntimeConfig;
use crate::error::ConfigError;
use crate::expiration::{ExpirationClock, ExpirationTime};
use crate::priority::RenderPriority;
use crate::sync_queue::SyncCallbackQueue;
use cadence_scheduler::{
    Callback, CallbackHandle, CallbackOptions, HostCallbackLoop, LocalScheduler, Profiling,
    Scheduler, SchedulerError, TimeSource,
};
use std::cell::Cell;

/// Handle returned by [`Runtime::schedule_callback`] and
/// [`Runtime::schedule_sync_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskHandle {
    Scheduled(CallbackHandle),
    /// Sync work always runs; cancelling this handle does nothing.
    SyncPlaceholder,
}

struct BatchScope<'a>(&'a Cell<u32>);

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// The scheduling surface renderer code talks to.
///
/// Speaks [`RenderPriority`] and expiration times, translating both onto the
/// engine `S`, and owns the sync callback queue.
pub struct Runtime<S: Scheduler + Clone + 'static> {
    scheduler: S,
    clock: ExpirationClock,
    sync_queue: SyncCallbackQueue<S>,
    disable_yielding: bool,
    batch_depth: Cell<u32>,
}

impl<S: Scheduler + Clone + 'static> Runtime<S> {
    pub fn new(scheduler: S) -> Self {
        Self::with_config(scheduler, &RuntimeConfig::default())
    }

    /// Build a runtime over an existing engine. Only the expiration, mode
    /// and yielding settings of `config` apply here; pacing and timeouts
    /// belong to the engine.
    pub fn with_config(scheduler: S, config: &RuntimeConfig) -> Self {
        let engine = scheduler.clone();
        let time = TimeSource::new(move || engine.now());
        Self {
            clock: ExpirationClock::new(time, config.expiration.clone(), config.mode),
            sync_queue: SyncCallbackQueue::new(scheduler.clone()),
            scheduler,
            disable_yielding: config.disable_yielding,
            batch_depth: Cell::new(0),
        }
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn expiration_clock(&self) -> &ExpirationClock {
        &self.clock
    }

    /// Offset-normalized milliseconds.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn request_current_time(&self) -> ExpirationTime {
        self.clock.request_current_time()
    }

    pub fn compute_expiration_for_priority(
        &self,
        current_time: ExpirationTime,
        priority: RenderPriority,
    ) -> ExpirationTime {
        self.clock.compute_expiration(current_time, priority)
    }

    pub fn get_current_priority_level(&self) -> RenderPriority {
        RenderPriority::from_scheduler_priority(self.scheduler.get_current_priority_level())
    }

    pub fn run_with_priority<R>(&self, priority: RenderPriority, f: impl FnOnce() -> R) -> R {
        self.scheduler
            .run_with_priority(priority.to_scheduler_priority(), f)
    }

    pub fn schedule_callback(
        &self,
        priority: RenderPriority,
        callback: Callback,
        options: CallbackOptions,
    ) -> TaskHandle {
        TaskHandle::Scheduled(self.scheduler.schedule_callback(
            priority.to_scheduler_priority(),
            callback,
            options,
        ))
    }

    /// Queue `callback` to run with `is_sync = true` on the next turn at the
    /// latest, or earlier through [`flush_sync_callback_queue`](Self::flush_sync_callback_queue).
    pub fn schedule_sync_callback(&self, callback: Callback) -> TaskHandle {
        self.sync_queue.push(callback);
        TaskHandle::SyncPlaceholder
    }

    pub fn cancel_callback(&self, handle: TaskHandle) {
        if let TaskHandle::Scheduled(handle) = handle {
            self.scheduler.cancel_callback(handle);
        }
    }

    /// Run every queued sync callback now. A failure is returned after the
    /// callbacks behind the failing one have been re-armed for the next turn.
    pub fn flush_sync_callback_queue(&self) -> Result<(), SchedulerError> {
        self.sync_queue.flush().map_err(SchedulerError::Callback)
    }

    pub fn pending_sync_callbacks(&self) -> usize {
        self.sync_queue.len()
    }

    pub fn should_yield(&self) -> bool {
        !self.disable_yielding && self.scheduler.should_yield()
    }

    /// Run `f` as one batch. Sync work queued inside is flushed when the
    /// outermost batch returns.
    pub fn batched_updates<R>(&self, f: impl FnOnce() -> R) -> Result<R, SchedulerError> {
        let result = {
            self.batch_depth.set(self.batch_depth.get() + 1);
            let _scope = BatchScope(&self.batch_depth);
            f()
        };
        if self.batch_depth.get() == 0 {
            self.flush_sync_callback_queue()?;
        }
        Ok(result)
    }

    pub fn is_batching(&self) -> bool {
        self.batch_depth.get() > 0
    }
}

impl Runtime<LocalScheduler> {
    /// Runtime over a fresh [`LocalScheduler`] driven by `host`. The host
    /// loop should already be built from `config.frame_pacing`.
    pub fn local(host: HostCallbackLoop, config: &RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let scheduler = LocalScheduler::with_timeouts(host, config.timeouts.clone());
        Ok(Self::with_config(scheduler, config))
    }

    pub fn profile(&self) -> Profiling {
        self.scheduler.profile()
    }
}
