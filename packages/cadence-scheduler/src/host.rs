//! Primitives the scheduler needs from its host environment.
//!
//! A host is anything that owns an event loop: a browser tab, a desktop
//! window's message pump, or the [`LocalHost`](crate::local_host::LocalHost)
//! used by tests and the CLI. Hosts that can deliver paint-aligned frames
//! also implement [`FrameSource`].

use crate::error::SchedulerError;

/// A task posted to the host. Errors escape to whoever drives the host loop.
pub type HostTask = Box<dyn FnOnce() -> Result<(), SchedulerError>>;

/// Invoked with the frame's start timestamp in milliseconds.
pub type FrameCallback = Box<dyn FnOnce(f64) -> Result<(), SchedulerError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequestId(pub u64);

/// Minimal event-loop surface every host provides.
pub trait EventLoop {
    /// Monotonic time in milliseconds.
    fn now(&self) -> f64;

    /// Run `task` after the current turn, with no delay.
    fn post_task(&self, task: HostTask);

    /// Run `task` once `delay_ms` has elapsed.
    fn set_timeout(&self, task: HostTask, delay_ms: f64) -> TimerId;

    /// Cancel a timer. Unknown or already-fired ids are ignored.
    fn clear_timeout(&self, id: TimerId);
}

/// Hosts that can call back right before the next repaint.
pub trait FrameSource: EventLoop {
    fn request_animation_frame(&self, callback: FrameCallback) -> FrameRequestId;

    fn cancel_animation_frame(&self, id: FrameRequestId);
}
