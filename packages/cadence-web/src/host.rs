//! `EventLoop` and `FrameSource` over the browser's own primitives.
//!
//! Three long-lived JS closures serve every request: one `MessageChannel`
//! handler for posted tasks, one timer handler that receives its key as the
//! `setTimeout` argument, and one `requestAnimationFrame` handler that runs
//! every frame callback requested for that frame. Pending Rust callbacks live
//! in `Shared`, so cancelling a timer or frame never leaks a JS closure.

use cadence_scheduler::{
    EventLoop, FrameCallback, FramePacingConfig, FrameRequestId, FrameSource, HostCallbackLoop,
    HostTask, SchedulerError, TimerId,
};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use thiserror::Error;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{MessageChannel, MessagePort, Performance, Window};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("no global `window` exists")]
    NoWindow,
}

#[derive(Default)]
struct Shared {
    tasks: RefCell<VecDeque<HostTask>>,
    timers: RefCell<HashMap<u64, (i32, HostTask)>>,
    frames: RefCell<Vec<(FrameRequestId, FrameCallback)>>,
    /// Browser handle of the animation frame serving `frames`.
    frame_handle: Cell<Option<i32>>,
    next_id: Cell<u64>,
}

impl Shared {
    fn allocate_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }
}

fn report(result: Result<(), SchedulerError>) {
    if let Err(err) = result {
        tracing::error!("scheduled work failed: {}", err);
        web_sys::console::error_1(&JsValue::from_str(&err.to_string()));
    }
}

struct MessageLoop {
    port: MessagePort,
    _on_message: Closure<dyn FnMut()>,
}

pub struct BrowserHost {
    window: Window,
    performance: Option<Performance>,
    shared: Rc<Shared>,
    /// `None` where `MessageChannel` is missing; tasks then go through
    /// `setTimeout(0)`.
    messages: Option<MessageLoop>,
    on_timer: Closure<dyn FnMut(JsValue)>,
    on_frame: Closure<dyn FnMut(f64)>,
}

impl BrowserHost {
    pub fn new() -> Result<Self, InstallError> {
        let window = web_sys::window().ok_or(InstallError::NoWindow)?;
        let performance = window.performance();
        let shared = Rc::new(Shared::default());

        let timer_shared = Rc::clone(&shared);
        let on_timer = Closure::<dyn FnMut(JsValue)>::new(move |key: JsValue| {
            let Some(key) = key.as_f64() else {
                return;
            };
            let task = timer_shared.timers.borrow_mut().remove(&(key as u64));
            if let Some((_, task)) = task {
                report(task());
            }
        });

        let frame_shared = Rc::clone(&shared);
        let on_frame = Closure::<dyn FnMut(f64)>::new(move |timestamp: f64| {
            frame_shared.frame_handle.set(None);
            let callbacks = std::mem::take(&mut *frame_shared.frames.borrow_mut());
            for (_, callback) in callbacks {
                report(callback(timestamp));
            }
        });

        let messages = MessageChannel::new().ok().map(|channel| {
            let message_shared = Rc::clone(&shared);
            let on_message = Closure::<dyn FnMut()>::new(move || {
                let task = message_shared.tasks.borrow_mut().pop_front();
                if let Some(task) = task {
                    report(task());
                }
            });
            channel
                .port1()
                .set_onmessage(Some(on_message.as_ref().unchecked_ref()));
            MessageLoop {
                port: channel.port2(),
                _on_message: on_message,
            }
        });

        Ok(Self {
            window,
            performance,
            shared,
            messages,
            on_timer,
            on_frame,
        })
    }

    pub fn has_message_channel(&self) -> bool {
        self.messages.is_some()
    }

    /// Probe the browser once and pick a strategy for the rest of the page's
    /// life: frame-paced slices when `MessageChannel` exists, otherwise the
    /// immediate fallback over `setTimeout(0)`.
    pub fn install(config: FramePacingConfig) -> Result<HostCallbackLoop, InstallError> {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        let host = Rc::new(Self::new()?);
        if host.has_message_channel() {
            tracing::debug!("installing frame-paced browser scheduler");
            Ok(HostCallbackLoop::frame_paced(host, config))
        } else {
            tracing::debug!("MessageChannel unavailable, installing timer-driven scheduler");
            Ok(HostCallbackLoop::immediate(host))
        }
    }
}

impl EventLoop for BrowserHost {
    fn now(&self) -> f64 {
        match &self.performance {
            Some(performance) => performance.now(),
            None => js_sys::Date::now(),
        }
    }

    fn post_task(&self, task: HostTask) {
        let Some(messages) = &self.messages else {
            self.set_timeout(task, 0.0);
            return;
        };
        self.shared.tasks.borrow_mut().push_back(task);
        if let Err(err) = messages.port.post_message(&JsValue::UNDEFINED) {
            tracing::error!("postMessage failed: {:?}", err);
            self.shared.tasks.borrow_mut().pop_back();
        }
    }

    fn set_timeout(&self, task: HostTask, delay_ms: f64) -> TimerId {
        let key = self.shared.allocate_id();
        let handle = self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_1(
                self.on_timer.as_ref().unchecked_ref(),
                delay_ms.max(0.0) as i32,
                &JsValue::from_f64(key as f64),
            );
        match handle {
            Ok(handle) => {
                self.shared.timers.borrow_mut().insert(key, (handle, task));
            }
            Err(err) => tracing::error!("setTimeout failed: {:?}", err),
        }
        TimerId(key)
    }

    fn clear_timeout(&self, id: TimerId) {
        if let Some((handle, _)) = self.shared.timers.borrow_mut().remove(&id.0) {
            self.window.clear_timeout_with_handle(handle);
        }
    }
}

impl FrameSource for BrowserHost {
    fn request_animation_frame(&self, callback: FrameCallback) -> FrameRequestId {
        let id = FrameRequestId(self.shared.allocate_id());
        self.shared.frames.borrow_mut().push((id, callback));
        if self.shared.frame_handle.get().is_none() {
            match self
                .window
                .request_animation_frame(self.on_frame.as_ref().unchecked_ref())
            {
                Ok(handle) => self.shared.frame_handle.set(Some(handle)),
                Err(err) => tracing::error!("requestAnimationFrame failed: {:?}", err),
            }
        }
        id
    }

    fn cancel_animation_frame(&self, id: FrameRequestId) {
        let now_empty = {
            let mut frames = self.shared.frames.borrow_mut();
            frames.retain(|(frame, _)| *frame != id);
            frames.is_empty()
        };
        if now_empty {
            if let Some(handle) = self.shared.frame_handle.take() {
                if let Err(err) = self.window.cancel_animation_frame(handle) {
                    tracing::error!("cancelAnimationFrame failed: {:?}", err);
                }
            }
        }
    }
}
