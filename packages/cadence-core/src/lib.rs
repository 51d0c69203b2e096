pub mod config;
pub mod error;
pub mod expiration;
pub mod mode;
pub mod priority;
pub mod runtime;
pub mod sync_queue;

pub use config::RuntimeConfig;
pub use error::ConfigError;
pub use expiration::{
    ExpirationClock, ExpirationConfig, ExpirationTime, UNIT_SIZE, compute_expiration_bucket,
    expiration_time_to_ms, ms_to_expiration_time,
};
pub use mode::TypeOfMode;
pub use priority::RenderPriority;
pub use runtime::{Runtime, TaskHandle};
pub use sync_queue::SyncCallbackQueue;
