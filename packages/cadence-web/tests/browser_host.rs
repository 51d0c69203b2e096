use cadence_scheduler::{EventLoop, FramePacingConfig, FrameSource};
use cadence_web::{BrowserHost, WebScheduler};
use wasm_bindgen::prelude::*;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

#[wasm_bindgen_test]
fn test_install_picks_frame_pacing_in_browsers() {
    let host_loop = BrowserHost::install(FramePacingConfig::default()).unwrap();
    assert!(host_loop.is_frame_paced());
    assert_eq!(host_loop.active_frame_time(), Some(33.0));
}

#[wasm_bindgen_test]
fn test_clock_is_monotonic() {
    let host = BrowserHost::new().unwrap();
    let first = host.now();
    let second = host.now();
    assert!(second >= first);
}

#[wasm_bindgen_test]
fn test_cancelled_requests_do_not_fire() {
    let host = BrowserHost::new().unwrap();
    let timer = host.set_timeout(Box::new(|| panic!("cancelled timer fired")), 0.0);
    host.clear_timeout(timer);
    let frame = host.request_animation_frame(Box::new(|_| panic!("cancelled frame fired")));
    host.cancel_animation_frame(frame);
}

#[wasm_bindgen_test]
fn test_web_scheduler_priorities() {
    let scheduler = WebScheduler::new().unwrap();
    assert_eq!(scheduler.get_current_priority_level(), 97);

    let level = scheduler
        .run_with_priority(98, &js_sys::Function::new_no_args("return 1;"))
        .unwrap();
    assert_eq!(level.as_f64(), Some(1.0));

    let noop = js_sys::Function::new_no_args("");
    assert!(scheduler.schedule_callback(42, noop.clone(), None).is_err());
    let handle = scheduler.schedule_callback(96, noop, None).unwrap();
    assert_ne!(handle, 0);
    scheduler.cancel_callback(handle);
}

#[wasm_bindgen_test]
fn test_sync_flush_runs_js_callbacks() {
    let scheduler = WebScheduler::new().unwrap();
    let counter = js_sys::Function::new_no_args("globalThis.__cadenceSync = (globalThis.__cadenceSync || 0) + 1;");
    scheduler.schedule_sync_callback(counter.clone());
    scheduler.schedule_sync_callback(counter);
    scheduler.flush_sync_callback_queue().unwrap();

    let count = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("__cadenceSync")).unwrap();
    assert_eq!(count.as_f64(), Some(2.0));
}
