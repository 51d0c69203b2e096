//! Browser adapter: a [`BrowserHost`] for the engine and a `WebScheduler`
//! class for JavaScript callers.

pub mod host;

pub use host::{BrowserHost, InstallError};

use cadence_core::{RenderPriority, Runtime, RuntimeConfig, TaskHandle};
use cadence_scheduler::{Callback, CallbackOptions, Continuation, LocalScheduler, callback};
use slotmap::{Key, KeyData};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

/// Handle value JavaScript sees for sync callbacks. Real handles never
/// encode to 0 because slot versions are odd.
const SYNC_PLACEHOLDER: u64 = 0;

fn to_js(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Wrap a JS function as a scheduler callback. A function returned from the
/// call is treated as its continuation.
fn js_callback(function: js_sys::Function) -> Callback {
    callback(move |did_timeout| {
        let result = function
            .call1(&JsValue::NULL, &JsValue::from_bool(did_timeout))
            .map_err(|err| anyhow::anyhow!("callback threw: {:?}", err))?;
        match result.dyn_into::<js_sys::Function>() {
            Ok(next) => Ok(Continuation::Continue(js_callback(next))),
            Err(_) => Ok(Continuation::Done),
        }
    })
}

#[wasm_bindgen]
pub struct WebScheduler {
    runtime: Runtime<LocalScheduler>,
}

#[wasm_bindgen]
impl WebScheduler {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<WebScheduler, JsValue> {
        Self::with_config(&RuntimeConfig::default())
    }

    /// Build from a JSON `RuntimeConfig`.
    #[wasm_bindgen(js_name = fromConfig)]
    pub fn from_config(json: &str) -> Result<WebScheduler, JsValue> {
        let config = RuntimeConfig::from_json_str(json).map_err(to_js)?;
        Self::with_config(&config)
    }

    fn with_config(config: &RuntimeConfig) -> Result<WebScheduler, JsValue> {
        let host_loop = BrowserHost::install(config.frame_pacing.clone()).map_err(to_js)?;
        let runtime = Runtime::local(host_loop, config).map_err(to_js)?;
        Ok(Self { runtime })
    }

    pub fn now(&self) -> f64 {
        self.runtime.now()
    }

    #[wasm_bindgen(js_name = scheduleCallback)]
    pub fn schedule_callback(
        &self,
        priority: u8,
        callback: js_sys::Function,
        timeout: Option<f64>,
    ) -> Result<u64, JsValue> {
        let priority = RenderPriority::try_from(priority).map_err(to_js)?;
        let handle =
            self.runtime
                .schedule_callback(priority, js_callback(callback), CallbackOptions { timeout });
        Ok(match handle {
            TaskHandle::Scheduled(handle) => handle.data().as_ffi(),
            TaskHandle::SyncPlaceholder => SYNC_PLACEHOLDER,
        })
    }

    #[wasm_bindgen(js_name = cancelCallback)]
    pub fn cancel_callback(&self, handle: u64) {
        if handle == SYNC_PLACEHOLDER {
            return;
        }
        let handle = KeyData::from_ffi(handle).into();
        self.runtime.cancel_callback(TaskHandle::Scheduled(handle));
    }

    #[wasm_bindgen(js_name = scheduleSyncCallback)]
    pub fn schedule_sync_callback(&self, callback: js_sys::Function) -> u64 {
        self.runtime.schedule_sync_callback(js_callback(callback));
        SYNC_PLACEHOLDER
    }

    #[wasm_bindgen(js_name = flushSyncCallbackQueue)]
    pub fn flush_sync_callback_queue(&self) -> Result<(), JsValue> {
        self.runtime.flush_sync_callback_queue().map_err(to_js)
    }

    #[wasm_bindgen(js_name = runWithPriority)]
    pub fn run_with_priority(
        &self,
        priority: u8,
        function: &js_sys::Function,
    ) -> Result<JsValue, JsValue> {
        let priority = RenderPriority::try_from(priority).map_err(to_js)?;
        self.runtime
            .run_with_priority(priority, || function.call0(&JsValue::NULL))
    }

    #[wasm_bindgen(js_name = getCurrentPriorityLevel)]
    pub fn get_current_priority_level(&self) -> u8 {
        self.runtime.get_current_priority_level().as_u8()
    }

    #[wasm_bindgen(js_name = shouldYield)]
    pub fn should_yield(&self) -> bool {
        self.runtime.should_yield()
    }

    #[wasm_bindgen(js_name = forceFrameRate)]
    pub fn force_frame_rate(&self, fps: u32) -> Result<(), JsValue> {
        self.runtime.scheduler().force_frame_rate(fps).map_err(to_js)
    }
}
