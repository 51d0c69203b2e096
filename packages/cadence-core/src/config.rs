use crate::error::ConfigError;
use crate::expiration::ExpirationConfig;
use crate::mode::TypeOfMode;
use cadence_scheduler::{FramePacingConfig, PriorityTimeouts};
use serde::{Deserialize, Serialize};

/// Everything tunable about a runtime, loadable from JSON.
///
/// ```json
/// {
///   "frame_pacing": { "initial_frame_time_ms": 16.0 },
///   "mode": "BATCHED | CONCURRENT",
///   "disable_yielding": false
/// }
/// ```
///
/// Missing sections and fields take their defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub frame_pacing: FramePacingConfig,
    pub timeouts: PriorityTimeouts,
    pub expiration: ExpirationConfig,
    pub mode: TypeOfMode,
    /// Never ask callbacks to yield, whatever the host says.
    pub disable_yielding: bool,
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.frame_pacing
            .validate()
            .map_err(|message| ConfigError::invalid("frame_pacing", message))?;
        self.timeouts
            .validate()
            .map_err(|message| ConfigError::invalid("timeouts", message))?;
        self.expiration
            .validate()
            .map_err(|message| ConfigError::invalid("expiration", message))?;
        Ok(())
    }
}
