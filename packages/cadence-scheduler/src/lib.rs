pub mod clock;
pub mod error;
pub mod host;
pub mod host_loop;
pub mod local_host;
pub mod priority;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock, TimeSource};
pub use error::SchedulerError;
pub use host::{EventLoop, FrameCallback, FrameRequestId, FrameSource, HostTask, TimerId};
pub use host_loop::{FramePacingConfig, HostCallback, HostCallbackLoop, SliceState, SliceTimeout};
pub use local_host::LocalHost;
pub use priority::{PriorityLevel, PriorityTimeouts};
pub use scheduler::{LocalScheduler, Profiling};
pub use task::{Callback, CallbackHandle, CallbackOptions, Continuation, callback};

/// The core Scheduler trait that integration layers are written against.
/// `LocalScheduler` is the single-threaded implementation; tests and other
/// runtimes can supply their own.
pub trait Scheduler {
    /// Current time in milliseconds (monotonic).
    fn now(&self) -> f64;

    /// Queue `callback` to run once its priority allows, or by its timeout at
    /// the latest.
    fn schedule_callback(
        &self,
        priority: PriorityLevel,
        callback: Callback,
        options: CallbackOptions,
    ) -> CallbackHandle;

    /// Forget a callback that has not started yet. Callbacks that are running
    /// or already finished are unaffected.
    fn cancel_callback(&self, handle: CallbackHandle);

    /// Whether cooperative work should return control to the host now.
    fn should_yield(&self) -> bool;

    /// Priority of the code currently running.
    fn get_current_priority_level(&self) -> PriorityLevel;

    /// Run `f` with `priority` as the current priority level.
    fn run_with_priority<R>(&self, priority: PriorityLevel, f: impl FnOnce() -> R) -> R;
}
