use cadence_scheduler::{
    CallbackOptions, Continuation, EventLoop, FrameCallback, FrameRequestId, FrameSource,
    HostCallback, HostCallbackLoop, HostTask, LocalHost, LocalScheduler, ManualClock,
    PriorityLevel, Scheduler, SchedulerError, SliceState, SliceTimeout, TimerId, callback,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn frame_paced(clock: ManualClock) -> (Rc<LocalHost>, LocalScheduler) {
    let host = Rc::new(LocalHost::with_frames(clock, 16.0));
    let scheduler = LocalScheduler::new(HostCallbackLoop::frame_paced(
        host.clone(),
        Default::default(),
    ));
    (host, scheduler)
}

#[test]
fn test_expired_callback_is_forced_without_idle_time() {
    let (host, scheduler) = frame_paced(ManualClock::new());
    let log = Rc::new(RefCell::new(Vec::new()));

    // Someone else's frame work runs first and eats the whole frame.
    {
        let busy_host = host.clone();
        host.request_animation_frame(Box::new(move |_| {
            let inner = busy_host.clone();
            busy_host.post_task(Box::new(move || -> Result<(), SchedulerError> {
                inner.advance(50.0);
                Ok(())
            }));
            Ok(())
        }));
    }

    for (label, options) in [
        ("deadline", CallbackOptions::with_timeout(10.0)),
        ("relaxed", CallbackOptions::default()),
    ] {
        let log = log.clone();
        let sch = scheduler.clone();
        scheduler.schedule_callback(
            PriorityLevel::Normal,
            callback(move |did_timeout| {
                log.borrow_mut().push((label, did_timeout, sch.now()));
                Ok(Continuation::Done)
            }),
            options,
        );
    }

    host.run_until_idle().unwrap();

    assert_eq!(
        *log.borrow(),
        vec![("deadline", true, 66.0), ("relaxed", false, 80.0)]
    );
    assert_eq!(scheduler.profile().timed_out_slices, 1);
}

#[test]
fn test_timed_out_slice_does_not_yield() {
    let (host, scheduler) = frame_paced(ManualClock::new());
    let yielded = Rc::new(Cell::new(None));
    {
        let sch = scheduler.clone();
        let host = host.clone();
        let yielded = yielded.clone();
        scheduler.schedule_callback(
            PriorityLevel::Immediate,
            callback(move |did_timeout| {
                assert!(did_timeout);
                host.advance(500.0);
                yielded.set(Some(sch.should_yield()));
                Ok(Continuation::Done)
            }),
            Default::default(),
        );
    }
    host.run_until_idle().unwrap();
    assert_eq!(yielded.get(), Some(false));
    assert_eq!(host.frames_delivered(), 0);
}

#[test]
fn test_force_frame_rate() {
    let (_host, scheduler) = frame_paced(ManualClock::new());
    let host_loop = scheduler.host();
    assert_eq!(host_loop.active_frame_time(), Some(33.0));

    let err = scheduler.force_frame_rate(200).unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::UnsupportedFrameRate { fps: 200, max: 125 }
    ));
    assert_eq!(host_loop.active_frame_time(), Some(33.0));

    scheduler.force_frame_rate(60).unwrap();
    assert_eq!(host_loop.active_frame_time(), Some(16.0));

    scheduler.force_frame_rate(0).unwrap();
    assert_eq!(host_loop.active_frame_time(), Some(33.0));
}

#[test]
fn test_forced_frame_rate_sets_slice_length() {
    let (host, scheduler) = frame_paced(ManualClock::new());
    scheduler.force_frame_rate(100).unwrap();
    let deadline = Rc::new(Cell::new(None));
    {
        let sch = scheduler.clone();
        let deadline = deadline.clone();
        scheduler.schedule_callback(
            PriorityLevel::Normal,
            callback(move |_| {
                deadline.set(sch.host().frame_deadline());
                Ok(Continuation::Done)
            }),
            Default::default(),
        );
    }
    host.run_until_idle().unwrap();
    assert_eq!(deadline.get(), Some(26.0));
}

#[test]
fn test_immediate_strategy_ignores_frame_rate() {
    let host = Rc::new(LocalHost::without_frames(ManualClock::new()));
    let host_loop = HostCallbackLoop::immediate(host);
    assert!(!host_loop.is_frame_paced());
    assert!(host_loop.force_frame_rate(500).is_ok());
    assert_eq!(host_loop.active_frame_time(), None);
    assert_eq!(host_loop.frame_deadline(), None);
    assert!(!host_loop.should_yield_to_host());
}

fn logging(log: &Rc<RefCell<Vec<&'static str>>>, label: &'static str) -> HostCallback {
    let log = log.clone();
    Box::new(move |_: bool| -> Result<(), SchedulerError> {
        log.borrow_mut().push(label);
        Ok(())
    })
}

#[test]
fn test_immediate_request_replaces_armed_callback() {
    let host = Rc::new(LocalHost::without_frames(ManualClock::new()));
    let host_loop = HostCallbackLoop::immediate(host.clone());
    let log = Rc::new(RefCell::new(Vec::new()));

    host_loop.request_host_callback(logging(&log, "first"), SliceTimeout::Asap);
    host_loop.request_host_callback(logging(&log, "second"), SliceTimeout::Asap);
    assert_eq!(host_loop.state(), SliceState::Armed);
    assert_eq!(host.pending_tasks(), 1);

    host.run_until_idle().unwrap();
    assert_eq!(*log.borrow(), vec!["second"]);
    assert_eq!(host_loop.state(), SliceState::Idle);
}

#[test]
fn test_immediate_cancel_reaches_request_made_during_slice() {
    let host = Rc::new(LocalHost::without_frames(ManualClock::new()));
    let host_loop = HostCallbackLoop::immediate(host.clone());
    let log = Rc::new(RefCell::new(Vec::new()));
    {
        let log = log.clone();
        let inner_loop = host_loop.clone();
        host_loop.request_host_callback(
            Box::new(move |_: bool| -> Result<(), SchedulerError> {
                log.borrow_mut().push("outer");
                inner_loop.request_host_callback(logging(&log, "nested"), SliceTimeout::Asap);
                inner_loop.cancel_host_callback();
                Ok(())
            }),
            SliceTimeout::Asap,
        );
    }

    host.run_until_idle().unwrap();
    assert_eq!(*log.borrow(), vec!["outer"]);
    assert_eq!(host_loop.state(), SliceState::Idle);
}

#[test]
fn test_immediate_request_made_during_slice_runs_next_turn() {
    let host = Rc::new(LocalHost::without_frames(ManualClock::new()));
    let host_loop = HostCallbackLoop::immediate(host.clone());
    let log = Rc::new(RefCell::new(Vec::new()));
    {
        let log = log.clone();
        let inner_loop = host_loop.clone();
        host_loop.request_host_callback(
            Box::new(move |_: bool| -> Result<(), SchedulerError> {
                log.borrow_mut().push("outer");
                inner_loop.request_host_callback(logging(&log, "nested"), SliceTimeout::Asap);
                Ok(())
            }),
            SliceTimeout::Asap,
        );
    }

    host.run_next().unwrap();
    assert_eq!(*log.borrow(), vec!["outer"]);
    assert_eq!(host_loop.state(), SliceState::Armed);

    host.run_until_idle().unwrap();
    assert_eq!(*log.borrow(), vec!["outer", "nested"]);
}

#[test]
fn test_slice_states() {
    let (host, scheduler) = frame_paced(ManualClock::new());
    assert_eq!(scheduler.host().state(), SliceState::Idle);

    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let sch = scheduler.clone();
        let host = host.clone();
        let seen = seen.clone();
        scheduler.schedule_callback(
            PriorityLevel::Normal,
            callback(move |_| {
                seen.borrow_mut().push(sch.host().state());
                host.advance(40.0);
                seen.borrow_mut().push(sch.host().state());
                Ok(Continuation::Done)
            }),
            Default::default(),
        );
    }
    assert_eq!(scheduler.host().state(), SliceState::Armed);

    host.run_until_idle().unwrap();
    assert_eq!(
        *seen.borrow(),
        vec![SliceState::Running, SliceState::Yielding]
    );
    assert_eq!(scheduler.host().state(), SliceState::Idle);
}

/// A host that stopped painting, like a backgrounded browser tab: frame
/// requests are accepted but never delivered.
struct Backgrounded(Rc<LocalHost>);

impl EventLoop for Backgrounded {
    fn now(&self) -> f64 {
        self.0.now()
    }

    fn post_task(&self, task: HostTask) {
        self.0.post_task(task);
    }

    fn set_timeout(&self, task: HostTask, delay_ms: f64) -> TimerId {
        self.0.set_timeout(task, delay_ms)
    }

    fn clear_timeout(&self, id: TimerId) {
        self.0.clear_timeout(id);
    }
}

impl FrameSource for Backgrounded {
    fn request_animation_frame(&self, _callback: FrameCallback) -> FrameRequestId {
        FrameRequestId(0)
    }

    fn cancel_animation_frame(&self, _id: FrameRequestId) {}
}

#[test]
fn test_timer_stands_in_for_missing_frames() {
    let host = Rc::new(LocalHost::with_frames(ManualClock::new(), 16.0));
    let scheduler = LocalScheduler::new(HostCallbackLoop::frame_paced(
        Rc::new(Backgrounded(host.clone())),
        Default::default(),
    ));
    let ran_at = Rc::new(Cell::new(None));
    {
        let sch = scheduler.clone();
        let ran_at = ran_at.clone();
        scheduler.schedule_callback(
            PriorityLevel::Low,
            callback(move |did_timeout| {
                assert!(!did_timeout);
                ran_at.set(Some(sch.now()));
                Ok(Continuation::Done)
            }),
            Default::default(),
        );
    }
    assert_eq!(host.pending_timers(), 1);

    host.run_until_idle().unwrap();
    assert_eq!(ran_at.get(), Some(100.0));
    assert_eq!(host.frames_delivered(), 0);
}

#[test]
fn test_frame_timestamps_use_normalized_time() {
    let (host, scheduler) = frame_paced(ManualClock::starting_at(50_000.0));
    assert_eq!(scheduler.now(), 0.0);

    let observed = Rc::new(Cell::new(None));
    {
        let sch = scheduler.clone();
        let observed = observed.clone();
        scheduler.schedule_callback(
            PriorityLevel::Normal,
            callback(move |_| {
                observed.set(Some((sch.now(), sch.host().frame_deadline())));
                Ok(Continuation::Done)
            }),
            Default::default(),
        );
    }
    host.run_until_idle().unwrap();
    assert_eq!(observed.get(), Some((16.0, Some(49.0))));
}
