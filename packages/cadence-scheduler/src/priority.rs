use crate::error::SchedulerError;
use serde::{Deserialize, Serialize};

/// Engine priority levels. Lower discriminants are more urgent, except
/// `NoPriority` which marks the absence of a level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PriorityLevel {
    NoPriority = 0,
    Immediate = 1,
    UserBlocking = 2,
    #[default]
    Normal = 3,
    Low = 4,
    Idle = 5,
}

impl PriorityLevel {
    pub const ALL: [PriorityLevel; 6] = [
        PriorityLevel::NoPriority,
        PriorityLevel::Immediate,
        PriorityLevel::UserBlocking,
        PriorityLevel::Normal,
        PriorityLevel::Low,
        PriorityLevel::Idle,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PriorityLevel {
    type Error = SchedulerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PriorityLevel::NoPriority),
            1 => Ok(PriorityLevel::Immediate),
            2 => Ok(PriorityLevel::UserBlocking),
            3 => Ok(PriorityLevel::Normal),
            4 => Ok(PriorityLevel::Low),
            5 => Ok(PriorityLevel::Idle),
            other => Err(SchedulerError::UnknownPriority(other)),
        }
    }
}

/// Milliseconds from scheduling until a callback of each level expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityTimeouts {
    /// Negative: already expired when scheduled.
    pub immediate_ms: f64,
    pub user_blocking_ms: f64,
    pub normal_ms: f64,
    pub low_ms: f64,
    /// Effectively never.
    pub idle_ms: f64,
}

/// Largest 31-bit signed integer; the idle timeout.
pub const MAX_SIGNED_31_BIT_INT: f64 = 1_073_741_823.0;

impl Default for PriorityTimeouts {
    fn default() -> Self {
        Self {
            immediate_ms: -1.0,
            user_blocking_ms: 250.0,
            normal_ms: 5000.0,
            low_ms: 10_000.0,
            idle_ms: MAX_SIGNED_31_BIT_INT,
        }
    }
}

impl PriorityTimeouts {
    pub fn timeout_for(&self, level: PriorityLevel) -> f64 {
        match level {
            PriorityLevel::Immediate => self.immediate_ms,
            PriorityLevel::UserBlocking => self.user_blocking_ms,
            PriorityLevel::Idle => self.idle_ms,
            PriorityLevel::Low => self.low_ms,
            PriorityLevel::Normal | PriorityLevel::NoPriority => self.normal_ms,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let ordered = [
            ("immediate_ms", self.immediate_ms),
            ("user_blocking_ms", self.user_blocking_ms),
            ("normal_ms", self.normal_ms),
            ("low_ms", self.low_ms),
            ("idle_ms", self.idle_ms),
        ];
        for pair in ordered.windows(2) {
            let (a_name, a) = pair[0];
            let (b_name, b) = pair[1];
            if !(a < b) {
                return Err(format!("{a_name} must be less than {b_name}"));
            }
        }
        Ok(())
    }
}
