//! Time slicing against the host's frame cadence.
//!
//! The frame-paced strategy works like an idle callback built from two host
//! primitives. An animation frame records when the frame started and sets the
//! slice deadline; a zero-delay task posted from that frame then runs the
//! scheduled callback after paint, so layout and paint count against the
//! frame budget. The frame length is re-estimated as frames arrive.
//!
//! Hosts without frames get the immediate strategy: every request posts a
//! task and the callback never has to yield.

use crate::clock::TimeSource;
use crate::error::{Result, SchedulerError};
use crate::host::{EventLoop, FrameRequestId, FrameSource, TimerId};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Callback run inside a granted slice; receives `did_timeout`.
pub type HostCallback = Box<dyn FnOnce(bool) -> Result<()>>;

/// When the requested slice must run at the latest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SliceTimeout {
    /// As soon as possible, without waiting for the next frame.
    Asap,
    /// Absolute time after which the callback runs even without idle time.
    At(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceState {
    /// Nothing requested.
    Idle,
    /// A slice was requested and has not been granted yet.
    Armed,
    /// Inside a granted slice, before its deadline.
    Running,
    /// Inside a granted slice whose deadline has passed.
    Yielding,
}

/// Frame pacing parameters. Tuning values, not correctness requirements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramePacingConfig {
    /// Starting estimate of the frame length (about 30 fps).
    pub initial_frame_time_ms: f64,
    /// Floor for the adapted frame length.
    pub min_frame_time_ms: f64,
    /// Highest rate accepted by `force_frame_rate`.
    pub max_fps: u32,
    /// Backgrounded hosts may stop delivering frames; a timer this long
    /// stands in for a frame that never arrives.
    pub animation_frame_timeout_ms: f64,
}

impl Default for FramePacingConfig {
    fn default() -> Self {
        Self {
            initial_frame_time_ms: 33.0,
            min_frame_time_ms: 8.0,
            max_fps: 125,
            animation_frame_timeout_ms: 100.0,
        }
    }
}

impl FramePacingConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(self.min_frame_time_ms > 0.0) {
            return Err("min_frame_time_ms must be greater than 0".into());
        }
        if self.initial_frame_time_ms < self.min_frame_time_ms {
            return Err("initial_frame_time_ms must be at least min_frame_time_ms".into());
        }
        if self.max_fps == 0 {
            return Err("max_fps must be greater than 0".into());
        }
        if !(self.animation_frame_timeout_ms > 0.0) {
            return Err("animation_frame_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }
}

struct FlushGuard<'a>(&'a Cell<bool>);

impl<'a> FlushGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct FramePaced {
    host: Rc<dyn FrameSource>,
    time: TimeSource,
    config: FramePacingConfig,
    scheduled: RefCell<Option<HostCallback>>,
    timeout: Cell<Option<SliceTimeout>>,
    message_scheduled: Cell<bool>,
    frame_scheduled: Cell<bool>,
    flushing: Cell<bool>,
    frame_deadline: Cell<f64>,
    previous_frame_time: Cell<f64>,
    active_frame_time: Cell<f64>,
    fps_locked: Cell<bool>,
    pending_frame: Cell<Option<FrameRequestId>>,
    pending_frame_timer: Cell<Option<TimerId>>,
}

impl FramePaced {
    fn new(host: Rc<dyn FrameSource>, config: FramePacingConfig) -> Self {
        let clock_host = Rc::clone(&host);
        Self {
            host,
            time: TimeSource::new(move || clock_host.now()),
            scheduled: RefCell::new(None),
            timeout: Cell::new(None),
            message_scheduled: Cell::new(false),
            frame_scheduled: Cell::new(false),
            flushing: Cell::new(false),
            frame_deadline: Cell::new(0.0),
            previous_frame_time: Cell::new(config.initial_frame_time_ms),
            active_frame_time: Cell::new(config.initial_frame_time_ms),
            fps_locked: Cell::new(false),
            pending_frame: Cell::new(None),
            pending_frame_timer: Cell::new(None),
            config,
        }
    }

    fn request(self: &Rc<Self>, callback: HostCallback, timeout: SliceTimeout) {
        *self.scheduled.borrow_mut() = Some(callback);
        self.timeout.set(Some(timeout));
        if self.flushing.get() || timeout == SliceTimeout::Asap {
            // Don't wait for the next frame; continue in a new host task.
            self.post_message();
        } else if !self.frame_scheduled.get() {
            self.frame_scheduled.set(true);
            self.request_frame_with_timeout();
        }
    }

    fn cancel(&self) {
        self.scheduled.borrow_mut().take();
        self.message_scheduled.set(false);
        self.timeout.set(None);
    }

    fn should_yield(&self) -> bool {
        self.frame_deadline.get() <= self.time.now()
    }

    fn post_message(self: &Rc<Self>) {
        if self.message_scheduled.replace(true) {
            return;
        }
        let weak = Rc::downgrade(self);
        self.host.post_task(Box::new(move || match weak.upgrade() {
            Some(this) => this.on_message(),
            None => Ok(()),
        }));
    }

    /// Pair the frame request with a timer in case frames stop arriving.
    fn request_frame_with_timeout(self: &Rc<Self>) {
        let frame_weak = Rc::downgrade(self);
        let frame = self.host.request_animation_frame(Box::new(move |timestamp| {
            let Some(this) = frame_weak.upgrade() else {
                return Ok(());
            };
            this.pending_frame.set(None);
            if let Some(timer) = this.pending_frame_timer.take() {
                this.host.clear_timeout(timer);
            }
            let frame_time = timestamp - this.time.offset();
            this.animation_tick(frame_time)
        }));

        let timer_weak = Rc::downgrade(self);
        let timer = self.host.set_timeout(
            Box::new(move || {
                let Some(this) = timer_weak.upgrade() else {
                    return Ok(());
                };
                this.pending_frame_timer.set(None);
                if let Some(frame) = this.pending_frame.take() {
                    this.host.cancel_animation_frame(frame);
                }
                tracing::trace!("animation frame did not arrive in time, ticking from timer");
                this.animation_tick(this.time.now())
            }),
            self.config.animation_frame_timeout_ms,
        );

        self.pending_frame.set(Some(frame));
        self.pending_frame_timer.set(Some(timer));
    }

    fn animation_tick(self: &Rc<Self>, frame_time: f64) -> Result<()> {
        if self.scheduled.borrow().is_some() {
            // Request the next frame up front so a long frame can't make us
            // miss it; if the queue drains meanwhile, that tick exits early.
            self.request_frame_with_timeout();
        } else {
            self.frame_scheduled.set(false);
            return Ok(());
        }

        let active = self.active_frame_time.get();
        let previous = self.previous_frame_time.get();
        let mut next_frame_time = frame_time - self.frame_deadline.get() + active;
        if next_frame_time < active && previous < active && !self.fps_locked.get() {
            // Two short frames in a row: the host refreshes faster than we
            // assumed. Take the larger sample in case one was an anomaly.
            if next_frame_time < self.config.min_frame_time_ms {
                next_frame_time = self.config.min_frame_time_ms;
            }
            let adapted = next_frame_time.max(previous);
            if adapted != active {
                tracing::debug!("adapting frame time from {:.2}ms to {:.2}ms", active, adapted);
            }
            self.active_frame_time.set(adapted);
        } else {
            self.previous_frame_time.set(next_frame_time);
        }

        self.frame_deadline
            .set(frame_time + self.active_frame_time.get());
        self.post_message();
        Ok(())
    }

    fn on_message(self: &Rc<Self>) -> Result<()> {
        self.message_scheduled.set(false);

        let Some(callback) = self.scheduled.borrow_mut().take() else {
            self.timeout.set(None);
            return Ok(());
        };
        let timeout = self.timeout.take();
        let now = self.time.now();

        let mut did_timeout = false;
        if self.frame_deadline.get() - now <= 0.0 {
            // No time left in this frame. Run anyway only if the callback's
            // own timeout has been exceeded.
            let expired = match timeout {
                Some(SliceTimeout::Asap) => true,
                Some(SliceTimeout::At(at)) => at <= now,
                None => false,
            };
            if !expired {
                if !self.frame_scheduled.get() {
                    self.frame_scheduled.set(true);
                    self.request_frame_with_timeout();
                }
                *self.scheduled.borrow_mut() = Some(callback);
                self.timeout.set(timeout);
                tracing::trace!("frame budget exhausted, waiting for the next frame");
                return Ok(());
            }
            tracing::debug!("slice timed out at {:.2}ms, forcing callback", now);
            did_timeout = true;
        }

        let _flushing = FlushGuard::enter(&self.flushing);
        callback(did_timeout)
    }

    fn force_frame_rate(&self, fps: u32) -> Result<()> {
        if fps > self.config.max_fps {
            return Err(SchedulerError::UnsupportedFrameRate {
                fps,
                max: self.config.max_fps,
            });
        }
        if fps > 0 {
            self.active_frame_time.set((1000.0 / f64::from(fps)).floor());
            self.fps_locked.set(true);
        } else {
            self.active_frame_time.set(self.config.initial_frame_time_ms);
            self.fps_locked.set(false);
        }
        Ok(())
    }

    fn state(&self) -> SliceState {
        if self.flushing.get() {
            if self.should_yield() {
                SliceState::Yielding
            } else {
                SliceState::Running
            }
        } else if self.scheduled.borrow().is_some() {
            SliceState::Armed
        } else {
            SliceState::Idle
        }
    }
}

struct Immediate {
    host: Rc<dyn EventLoop>,
    time: TimeSource,
    callback: RefCell<Option<HostCallback>>,
    /// A dispatch task is waiting in the host's queue.
    posted: Cell<bool>,
    flushing: Cell<bool>,
}

impl Immediate {
    fn new(host: Rc<dyn EventLoop>) -> Self {
        let clock_host = Rc::clone(&host);
        Self {
            host,
            time: TimeSource::new(move || clock_host.now()),
            callback: RefCell::new(None),
            posted: Cell::new(false),
            flushing: Cell::new(false),
        }
    }

    fn request(self: &Rc<Self>, callback: HostCallback, _timeout: SliceTimeout) {
        // The latest request replaces whatever is armed.
        *self.callback.borrow_mut() = Some(callback);
        if self.posted.replace(true) {
            return;
        }
        let weak = Rc::downgrade(self);
        self.host.post_task(Box::new(move || match weak.upgrade() {
            Some(this) => this.dispatch(),
            None => Ok(()),
        }));
    }

    fn dispatch(&self) -> Result<()> {
        self.posted.set(false);
        let Some(callback) = self.callback.borrow_mut().take() else {
            return Ok(());
        };
        let _flushing = FlushGuard::enter(&self.flushing);
        callback(false)
    }

    fn cancel(&self) {
        self.callback.borrow_mut().take();
    }

    fn state(&self) -> SliceState {
        if self.flushing.get() {
            SliceState::Running
        } else if self.callback.borrow().is_some() {
            SliceState::Armed
        } else {
            SliceState::Idle
        }
    }
}

#[derive(Clone)]
enum Strategy {
    FramePaced(Rc<FramePaced>),
    Immediate(Rc<Immediate>),
}

/// Owns at most one outstanding host slice request and tells cooperative work
/// when the current slice is used up.
#[derive(Clone)]
pub struct HostCallbackLoop {
    strategy: Strategy,
}

impl HostCallbackLoop {
    /// Pace slices to the host's animation frames.
    pub fn frame_paced(host: Rc<dyn FrameSource>, config: FramePacingConfig) -> Self {
        tracing::debug!(
            "host callback loop using frame-paced slices ({:.0}ms initial frame)",
            config.initial_frame_time_ms
        );
        Self {
            strategy: Strategy::FramePaced(Rc::new(FramePaced::new(host, config))),
        }
    }

    /// Fallback for hosts without frames: run each request on the next turn
    /// and never ask callbacks to yield.
    pub fn immediate(host: Rc<dyn EventLoop>) -> Self {
        tracing::debug!("host callback loop using immediate fallback slices");
        Self {
            strategy: Strategy::Immediate(Rc::new(Immediate::new(host))),
        }
    }

    pub fn is_frame_paced(&self) -> bool {
        matches!(self.strategy, Strategy::FramePaced(_))
    }

    /// Offset-normalized host time in milliseconds.
    pub fn now(&self) -> f64 {
        match &self.strategy {
            Strategy::FramePaced(paced) => paced.time.now(),
            Strategy::Immediate(immediate) => immediate.time.now(),
        }
    }

    /// Arm a slice for `callback`, replacing any callback already armed.
    pub fn request_host_callback(&self, callback: HostCallback, timeout: SliceTimeout) {
        match &self.strategy {
            Strategy::FramePaced(paced) => paced.request(callback, timeout),
            Strategy::Immediate(immediate) => immediate.request(callback, timeout),
        }
    }

    pub fn cancel_host_callback(&self) {
        match &self.strategy {
            Strategy::FramePaced(paced) => paced.cancel(),
            Strategy::Immediate(immediate) => immediate.cancel(),
        }
    }

    pub fn should_yield_to_host(&self) -> bool {
        match &self.strategy {
            Strategy::FramePaced(paced) => paced.should_yield(),
            Strategy::Immediate(_) => false,
        }
    }

    /// Pin the frame rate, or pass 0 to return to adaptive pacing. Has no
    /// effect on the immediate strategy.
    pub fn force_frame_rate(&self, fps: u32) -> Result<()> {
        match &self.strategy {
            Strategy::FramePaced(paced) => paced.force_frame_rate(fps),
            Strategy::Immediate(_) => Ok(()),
        }
    }

    pub fn state(&self) -> SliceState {
        match &self.strategy {
            Strategy::FramePaced(paced) => paced.state(),
            Strategy::Immediate(immediate) => immediate.state(),
        }
    }

    /// Deadline of the current frame, if frames are in use.
    pub fn frame_deadline(&self) -> Option<f64> {
        match &self.strategy {
            Strategy::FramePaced(paced) => Some(paced.frame_deadline.get()),
            Strategy::Immediate(_) => None,
        }
    }

    /// Current frame length estimate, if frames are in use.
    pub fn active_frame_time(&self) -> Option<f64> {
        match &self.strategy {
            Strategy::FramePaced(paced) => Some(paced.active_frame_time.get()),
            Strategy::Immediate(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::local_host::LocalHost;

    fn paced() -> Rc<FramePaced> {
        let host = Rc::new(LocalHost::with_frames(ManualClock::new(), 16.0));
        Rc::new(FramePaced::new(host, FramePacingConfig::default()))
    }

    fn tick(paced: &Rc<FramePaced>, frame_time: f64) {
        *paced.scheduled.borrow_mut() = Some(Box::new(|_| Ok(())));
        paced.animation_tick(frame_time).unwrap();
    }

    #[test]
    fn test_adapts_to_faster_refresh() {
        let paced = paced();
        for frame_time in [16.0, 32.0, 48.0] {
            tick(&paced, frame_time);
        }
        assert_eq!(paced.active_frame_time.get(), 16.0);
        assert_eq!(paced.frame_deadline.get(), 64.0);
    }

    #[test]
    fn test_frame_time_never_drops_below_floor() {
        let paced = paced();
        for frame_time in [16.0, 18.0, 20.0] {
            tick(&paced, frame_time);
        }
        assert_eq!(paced.active_frame_time.get(), 8.0);
    }

    #[test]
    fn test_single_short_frame_is_ignored() {
        let paced = paced();
        for frame_time in [16.0, 18.0, 51.0] {
            tick(&paced, frame_time);
        }
        assert_eq!(paced.active_frame_time.get(), 33.0);
    }

    #[test]
    fn test_locked_rate_does_not_adapt() {
        let paced = paced();
        paced.force_frame_rate(60).unwrap();
        for frame_time in [16.0, 18.0, 20.0] {
            tick(&paced, frame_time);
        }
        assert_eq!(paced.active_frame_time.get(), 16.0);
    }

    #[test]
    fn test_tick_without_work_releases_frame() {
        let paced = paced();
        paced.frame_scheduled.set(true);
        paced.animation_tick(16.0).unwrap();
        assert!(!paced.frame_scheduled.get());
        assert_eq!(paced.frame_deadline.get(), 0.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(FramePacingConfig::default().validate().is_ok());
        let config = FramePacingConfig {
            initial_frame_time_ms: 4.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = FramePacingConfig {
            max_fps: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
