use thiserror::Error;

/// Errors surfaced by the scheduling engine.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A raw priority value that maps to no known level.
    #[error("unknown priority level: {0}")]
    UnknownPriority(u8),

    /// Frame rates above the supported maximum are rejected.
    #[error("unsupported frame rate {fps}: expected 0..={max} fps")]
    UnsupportedFrameRate { fps: u32, max: u32 },

    /// A scheduled callback failed while running.
    #[error(transparent)]
    Callback(#[from] anyhow::Error),
}

pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;
