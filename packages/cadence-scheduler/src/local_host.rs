//! A single-threaded host event loop.
//!
//! `LocalHost` models the three queues a browser-like host offers: posted
//! tasks (run in order, one per turn), timers, and animation frames aligned to
//! a fixed refresh interval. Driven by a [`ManualClock`] it is fully
//! deterministic and time only moves when the loop jumps to the next timer or
//! frame, or when work calls [`LocalHost::advance`] to account for time it
//! spent. Driven by a [`SystemClock`](crate::clock::SystemClock) it sleeps
//! instead.

use crate::clock::{Clock, ManualClock};
use crate::error::Result;
use crate::host::{EventLoop, FrameCallback, FrameRequestId, FrameSource, HostTask, TimerId};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

struct Timer {
    id: TimerId,
    due: f64,
    task: HostTask,
}

enum NextEvent {
    Timer(f64),
    Frame(f64),
}

pub struct LocalHost {
    clock: Rc<dyn Clock>,
    frame_interval: Option<f64>,
    tasks: RefCell<VecDeque<HostTask>>,
    timers: RefCell<Vec<Timer>>,
    frames: RefCell<Vec<(FrameRequestId, FrameCallback)>>,
    next_id: Cell<u64>,
    frames_delivered: Cell<u64>,
}

impl LocalHost {
    pub fn new(clock: impl Clock + 'static, frame_interval: Option<f64>) -> Self {
        Self {
            clock: Rc::new(clock),
            frame_interval: frame_interval.filter(|interval| *interval > 0.0),
            tasks: RefCell::new(VecDeque::new()),
            timers: RefCell::new(Vec::new()),
            frames: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            frames_delivered: Cell::new(0),
        }
    }

    /// Virtual-time host with frames every `frame_interval` ms.
    pub fn with_frames(clock: ManualClock, frame_interval: f64) -> Self {
        Self::new(clock, Some(frame_interval))
    }

    /// Virtual-time host that cannot deliver animation frames.
    pub fn without_frames(clock: ManualClock) -> Self {
        Self::new(clock, None)
    }

    pub fn supports_frames(&self) -> bool {
        self.frame_interval.is_some()
    }

    /// Let time pass, as if the caller did `ms` worth of work.
    pub fn advance(&self, ms: f64) {
        self.clock.wait_until(self.clock.now() + ms);
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.get()
    }

    pub fn is_idle(&self) -> bool {
        self.pending_tasks() == 0 && self.pending_timers() == 0 && self.pending_frames() == 0
    }

    fn allocate_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn next_frame_time(&self) -> Option<f64> {
        let interval = self.frame_interval?;
        if self.frames.borrow().is_empty() {
            return None;
        }
        let now = self.clock.now();
        Some(((now / interval).floor() + 1.0) * interval)
    }

    fn next_event(&self) -> Option<NextEvent> {
        let timer = self
            .timers
            .borrow()
            .iter()
            .map(|timer| timer.due)
            .min_by(f64::total_cmp);
        match (timer, self.next_frame_time()) {
            (Some(due), Some(frame)) if due < frame => Some(NextEvent::Timer(due)),
            (_, Some(frame)) => Some(NextEvent::Frame(frame)),
            (Some(due), None) => Some(NextEvent::Timer(due)),
            (None, None) => None,
        }
    }

    fn fire_timer(&self, due: f64) -> Result<()> {
        self.clock.wait_until(due);
        let task = {
            let mut timers = self.timers.borrow_mut();
            // Earliest due first; insertion order breaks ties.
            let index = timers
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due))
                .map(|(index, _)| index);
            index.map(|index| timers.remove(index).task)
        };
        match task {
            Some(task) => task(),
            None => Ok(()),
        }
    }

    fn fire_frame(&self, frame_time: f64) -> Result<()> {
        self.clock.wait_until(frame_time);
        let callbacks = std::mem::take(&mut *self.frames.borrow_mut());
        self.frames_delivered.set(self.frames_delivered.get() + 1);
        tracing::trace!("delivering frame at {:.2}ms to {} callbacks", frame_time, callbacks.len());
        let mut first_error = None;
        for (_, callback) in callbacks {
            if let Err(err) = callback(frame_time) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run one posted task, or else jump to the next timer or frame and fire
    /// it. Returns `Ok(false)` when nothing is left.
    pub fn run_next(&self) -> Result<bool> {
        let task = self.tasks.borrow_mut().pop_front();
        if let Some(task) = task {
            task()?;
            return Ok(true);
        }
        match self.next_event() {
            Some(NextEvent::Timer(due)) => self.fire_timer(due).map(|()| true),
            Some(NextEvent::Frame(at)) => self.fire_frame(at).map(|()| true),
            None => Ok(false),
        }
    }

    /// Drain every task, timer and frame. The first error stops the loop;
    /// anything still queued stays queued.
    pub fn run_until_idle(&self) -> Result<()> {
        while self.run_next()? {}
        Ok(())
    }

    /// Run everything due at or before `deadline`, then move time to it.
    pub fn run_until(&self, deadline: f64) -> Result<()> {
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            if let Some(task) = task {
                task()?;
                continue;
            }
            match self.next_event() {
                Some(NextEvent::Timer(due)) if due <= deadline => self.fire_timer(due)?,
                Some(NextEvent::Frame(at)) if at <= deadline => self.fire_frame(at)?,
                _ => break,
            }
        }
        self.clock.wait_until(deadline);
        Ok(())
    }

    /// Run only the tasks already posted, without moving time.
    pub fn run_posted_tasks(&self) -> Result<()> {
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => task()?,
                None => return Ok(()),
            }
        }
    }
}

impl EventLoop for LocalHost {
    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn post_task(&self, task: HostTask) {
        self.tasks.borrow_mut().push_back(task);
    }

    fn set_timeout(&self, task: HostTask, delay_ms: f64) -> TimerId {
        let id = TimerId(self.allocate_id());
        let due = self.clock.now() + delay_ms.max(0.0);
        self.timers.borrow_mut().push(Timer { id, due, task });
        id
    }

    fn clear_timeout(&self, id: TimerId) {
        self.timers.borrow_mut().retain(|timer| timer.id != id);
    }
}

impl FrameSource for LocalHost {
    fn request_animation_frame(&self, callback: FrameCallback) -> FrameRequestId {
        let id = FrameRequestId(self.allocate_id());
        self.frames.borrow_mut().push((id, callback));
        id
    }

    fn cancel_animation_frame(&self, id: FrameRequestId) {
        self.frames.borrow_mut().retain(|(frame, _)| *frame != id);
    }
}
