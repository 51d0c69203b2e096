//! Application-level priorities and their mapping onto the engine's levels.

use cadence_scheduler::{PriorityLevel, SchedulerError};
use serde::{Deserialize, Serialize};

/// Priority as seen by renderer code.
///
/// Values are ascending in urgency so they compare like numbers, and start
/// at 90 so they can never be mistaken for a raw [`PriorityLevel`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RenderPriority {
    /// The absence of a priority.
    NoPriority = 90,
    Idle = 95,
    Low = 96,
    #[default]
    Normal = 97,
    UserBlocking = 98,
    Immediate = 99,
}

impl RenderPriority {
    pub const ALL: [RenderPriority; 6] = [
        RenderPriority::Immediate,
        RenderPriority::UserBlocking,
        RenderPriority::Normal,
        RenderPriority::Low,
        RenderPriority::Idle,
        RenderPriority::NoPriority,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn to_scheduler_priority(self) -> PriorityLevel {
        match self {
            RenderPriority::Immediate => PriorityLevel::Immediate,
            RenderPriority::UserBlocking => PriorityLevel::UserBlocking,
            RenderPriority::Normal => PriorityLevel::Normal,
            RenderPriority::Low => PriorityLevel::Low,
            RenderPriority::Idle => PriorityLevel::Idle,
            RenderPriority::NoPriority => PriorityLevel::NoPriority,
        }
    }

    pub fn from_scheduler_priority(level: PriorityLevel) -> Self {
        match level {
            PriorityLevel::Immediate => RenderPriority::Immediate,
            PriorityLevel::UserBlocking => RenderPriority::UserBlocking,
            PriorityLevel::Normal => RenderPriority::Normal,
            PriorityLevel::Low => RenderPriority::Low,
            PriorityLevel::Idle => RenderPriority::Idle,
            PriorityLevel::NoPriority => RenderPriority::NoPriority,
        }
    }
}

impl From<RenderPriority> for PriorityLevel {
    fn from(priority: RenderPriority) -> Self {
        priority.to_scheduler_priority()
    }
}

impl From<PriorityLevel> for RenderPriority {
    fn from(level: PriorityLevel) -> Self {
        RenderPriority::from_scheduler_priority(level)
    }
}

impl TryFrom<u8> for RenderPriority {
    type Error = SchedulerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            99 => Ok(RenderPriority::Immediate),
            98 => Ok(RenderPriority::UserBlocking),
            97 => Ok(RenderPriority::Normal),
            96 => Ok(RenderPriority::Low),
            95 => Ok(RenderPriority::Idle),
            90 => Ok(RenderPriority::NoPriority),
            other => Err(SchedulerError::UnknownPriority(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_is_bijective() {
        for priority in RenderPriority::ALL {
            let level = priority.to_scheduler_priority();
            assert_eq!(RenderPriority::from_scheduler_priority(level), priority);
        }
        for level in PriorityLevel::ALL {
            assert_eq!(RenderPriority::from(level).to_scheduler_priority(), level);
        }
    }

    #[test]
    fn test_raw_values_round_trip() {
        for priority in RenderPriority::ALL {
            assert_eq!(RenderPriority::try_from(priority.as_u8()).unwrap(), priority);
        }
    }

    #[test]
    fn test_unknown_raw_value_is_rejected() {
        for raw in [0u8, 1, 5, 89, 91, 94, 100, 255] {
            assert!(matches!(
                RenderPriority::try_from(raw),
                Err(SchedulerError::UnknownPriority(value)) if value == raw
            ));
        }
    }

    #[test]
    fn test_ordering_matches_urgency() {
        assert!(RenderPriority::Immediate > RenderPriority::UserBlocking);
        assert!(RenderPriority::UserBlocking > RenderPriority::Normal);
        assert!(RenderPriority::Idle > RenderPriority::NoPriority);
    }
}
