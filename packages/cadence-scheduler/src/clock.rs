use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Readings above this are treated as epoch-based and made relative to the
/// first reading so they stay small.
const OFFSET_THRESHOLD_MS: f64 = 10_000.0;

/// A monotonic millisecond clock.
pub trait Clock {
    /// Current time in milliseconds.
    fn now(&self) -> f64;

    /// Block (or jump, for virtual clocks) until `deadline_ms`.
    fn wait_until(&self, deadline_ms: f64);
}

/// Real time measured from the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn wait_until(&self, deadline_ms: f64) {
        let remaining = deadline_ms - self.now();
        if remaining > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(remaining / 1000.0));
        }
    }
}

/// Virtual time that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(ms: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(ms)),
        }
    }

    pub fn set(&self, ms: f64) {
        // Monotonic: never move backwards.
        if ms > self.now.get() {
            self.now.set(ms);
        }
    }

    pub fn advance(&self, ms: f64) {
        self.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }

    fn wait_until(&self, deadline_ms: f64) {
        self.set(deadline_ms);
    }
}

/// Offset-normalized view over a clock.
///
/// If the first reading is small (a high resolution, page-relative clock) it
/// is used as is. Otherwise every reading is reported relative to the first
/// one, which keeps values small enough for 32-bit expiration arithmetic.
#[derive(Clone)]
pub struct TimeSource {
    read: Rc<dyn Fn() -> f64>,
    offset: f64,
}

impl TimeSource {
    pub fn new(read: impl Fn() -> f64 + 'static) -> Self {
        let initial = read();
        let offset = if initial < OFFSET_THRESHOLD_MS {
            0.0
        } else {
            initial
        };
        Self {
            read: Rc::new(read),
            offset,
        }
    }

    pub fn from_clock<C: Clock + 'static>(clock: C) -> Self {
        Self::new(move || clock.now())
    }

    pub fn now(&self) -> f64 {
        (self.read)() - self.offset
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }
}

impl std::fmt::Debug for TimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSource")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}
