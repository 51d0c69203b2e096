use slotmap::new_key_type;

new_key_type! {
    /// Generational handle to a scheduled callback. A handle whose slot has
    /// been reused no longer matches and is treated as stale.
    pub struct CallbackHandle;
}

/// What a unit of work reports back when it returns.
pub enum Continuation {
    /// The logical task is finished.
    Done,
    /// More work remains; run `next` as the same task.
    Continue(Callback),
}

impl Continuation {
    pub fn is_done(&self) -> bool {
        matches!(self, Continuation::Done)
    }

    /// Shorthand for `Continuation::Continue(Box::new(f))`.
    pub fn then(f: impl FnOnce(bool) -> anyhow::Result<Continuation> + 'static) -> Self {
        Continuation::Continue(Box::new(f))
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Continuation::Done => f.write_str("Done"),
            Continuation::Continue(_) => f.write_str("Continue(..)"),
        }
    }
}

/// A unit of scheduled work. The argument is `did_timeout`: true when the
/// unit runs because its deadline passed rather than because idle time was
/// available.
pub type Callback = Box<dyn FnOnce(bool) -> anyhow::Result<Continuation>>;

/// Wrap a closure as a [`Callback`].
pub fn callback(f: impl FnOnce(bool) -> anyhow::Result<Continuation> + 'static) -> Callback {
    Box::new(f)
}

/// Per-request scheduling options.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CallbackOptions {
    /// Overrides the priority-derived timeout, in milliseconds.
    pub timeout: Option<f64>,
}

impl CallbackOptions {
    pub fn with_timeout(timeout_ms: f64) -> Self {
        Self {
            timeout: Some(timeout_ms),
        }
    }
}
