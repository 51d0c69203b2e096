//! Expiration times: deadlines on an inverted, bucketed scale.
//!
//! One unit is 10 ms. Larger values are more urgent, so the clock counts
//! *down* as wall time moves forward. Four values at the top and bottom of
//! the range are sentinels and never produced by bucketing. Past roughly
//! 124 days of uptime the scale bottoms out and every later time reads as
//! [`ExpirationTime::EARLIEST`].

use crate::mode::TypeOfMode;
use crate::priority::RenderPriority;
use cadence_scheduler::TimeSource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds per expiration unit.
pub const UNIT_SIZE: u32 = 10;

/// A deadline on the inverted scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpirationTime(pub u32);

impl ExpirationTime {
    /// No pending work.
    pub const NO_WORK: Self = Self(0);
    /// Work that only runs once nothing else is pending.
    pub const NEVER: Self = Self(1);
    /// Must run synchronously, ahead of everything else.
    pub const SYNC: Self = Self(1_073_741_823);
    /// Batched with the current event, still ahead of any bucketed time.
    pub const BATCHED: Self = Self(Self::SYNC.0 - 1);

    /// Lowest value that is not a sentinel.
    pub const EARLIEST: Self = Self(Self::NEVER.0 + 1);

    const MAGIC_NUMBER_OFFSET: u32 = Self::BATCHED.0 - 1;

    pub fn is_sentinel(self) -> bool {
        matches!(self, Self::NO_WORK | Self::NEVER | Self::SYNC | Self::BATCHED)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ExpirationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NO_WORK => f.write_str("NoWork"),
            Self::NEVER => f.write_str("Never"),
            Self::SYNC => f.write_str("Sync"),
            Self::BATCHED => f.write_str("Batched"),
            Self(value) => write!(f, "{value}"),
        }
    }
}

/// Convert a millisecond timestamp. The result never lands on a sentinel.
pub fn ms_to_expiration_time(ms: f64) -> ExpirationTime {
    // Truncating cast: fractional units and negative times collapse to 0.
    let units = (ms / f64::from(UNIT_SIZE)) as u32;
    clamp_to_bucketed(ExpirationTime::MAGIC_NUMBER_OFFSET.saturating_sub(units))
}

fn clamp_to_bucketed(value: u32) -> ExpirationTime {
    ExpirationTime(value.max(ExpirationTime::EARLIEST.0))
}

/// Inverse of [`ms_to_expiration_time`], to unit precision. Sentinels above
/// the offset come out negative.
pub fn expiration_time_to_ms(expiration_time: ExpirationTime) -> f64 {
    let units = i64::from(ExpirationTime::MAGIC_NUMBER_OFFSET) - i64::from(expiration_time.0);
    (units * i64::from(UNIT_SIZE)) as f64
}

/// Round `num` up to the next multiple of `precision`. An exact multiple
/// still moves up one step.
fn ceiling(num: u32, precision: u32) -> u32 {
    (num / precision + 1) * precision
}

/// Bucket `current_time + expiration_ms` up to a multiple of `bucket_size_ms`
/// and express it on the inverted scale.
pub fn compute_expiration_bucket(
    current_time: ExpirationTime,
    expiration_ms: u32,
    bucket_size_ms: u32,
) -> ExpirationTime {
    let offset = ExpirationTime::MAGIC_NUMBER_OFFSET;
    let precision = (bucket_size_ms / UNIT_SIZE).max(1);
    let target = offset.saturating_sub(current_time.0) + expiration_ms / UNIT_SIZE;
    clamp_to_bucketed(offset.saturating_sub(ceiling(target, precision)))
}

/// Latency targets and bucket widths for the two bucketed priorities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationConfig {
    /// User-blocking work expires this long after it is requested...
    pub interactive_expiration_ms: u32,
    /// ...rounded up to a multiple of this.
    pub interactive_bucket_ms: u32,
    pub async_expiration_ms: u32,
    pub async_bucket_ms: u32,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            interactive_expiration_ms: 150,
            interactive_bucket_ms: 100,
            async_expiration_ms: 5000,
            async_bucket_ms: 250,
        }
    }
}

impl ExpirationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.interactive_bucket_ms < UNIT_SIZE || self.async_bucket_ms < UNIT_SIZE {
            return Err(format!("bucket sizes must be at least {UNIT_SIZE}ms"));
        }
        if self.interactive_expiration_ms > self.async_expiration_ms {
            return Err(
                "interactive_expiration_ms must not exceed async_expiration_ms".to_string(),
            );
        }
        Ok(())
    }

    pub fn compute_interactive_expiration(&self, current_time: ExpirationTime) -> ExpirationTime {
        compute_expiration_bucket(
            current_time,
            self.interactive_expiration_ms,
            self.interactive_bucket_ms,
        )
    }

    pub fn compute_async_expiration(&self, current_time: ExpirationTime) -> ExpirationTime {
        compute_expiration_bucket(current_time, self.async_expiration_ms, self.async_bucket_ms)
    }

    /// Expiration time for work of `priority` requested at `current_time` in
    /// a concurrent root.
    pub fn compute_expiration_for_priority(
        &self,
        current_time: ExpirationTime,
        priority: RenderPriority,
    ) -> ExpirationTime {
        match priority {
            RenderPriority::Immediate => ExpirationTime::SYNC,
            RenderPriority::UserBlocking => self.compute_interactive_expiration(current_time),
            // NoPriority carries no urgency of its own and is bucketed like Normal.
            RenderPriority::Normal | RenderPriority::Low | RenderPriority::NoPriority => {
                self.compute_async_expiration(current_time)
            }
            RenderPriority::Idle => ExpirationTime::NEVER,
        }
    }

    /// Like [`compute_expiration_for_priority`](Self::compute_expiration_for_priority)
    /// but honoring the root's mode: without batching everything is sync, and
    /// batched-but-legacy roots only distinguish sync from batched.
    pub fn compute_expiration_for_mode(
        &self,
        mode: TypeOfMode,
        current_time: ExpirationTime,
        priority: RenderPriority,
    ) -> ExpirationTime {
        if !mode.contains(TypeOfMode::BATCHED) {
            return ExpirationTime::SYNC;
        }
        if !mode.contains(TypeOfMode::CONCURRENT) {
            return if priority == RenderPriority::Immediate {
                ExpirationTime::SYNC
            } else {
                ExpirationTime::BATCHED
            };
        }
        self.compute_expiration_for_priority(current_time, priority)
    }

    /// Recover the priority a deadline was most likely computed with.
    pub fn infer_priority_from_expiration(
        &self,
        current_time: ExpirationTime,
        expiration_time: ExpirationTime,
    ) -> RenderPriority {
        if expiration_time == ExpirationTime::SYNC {
            return RenderPriority::Immediate;
        }
        if expiration_time == ExpirationTime::NEVER {
            return RenderPriority::Idle;
        }
        let ms_until =
            expiration_time_to_ms(expiration_time) - expiration_time_to_ms(current_time);
        if ms_until <= 0.0 {
            return RenderPriority::Immediate;
        }
        let interactive =
            f64::from(self.interactive_expiration_ms + self.interactive_bucket_ms);
        if ms_until <= interactive {
            return RenderPriority::UserBlocking;
        }
        let async_ = f64::from(self.async_expiration_ms + self.async_bucket_ms);
        if ms_until <= async_ {
            return RenderPriority::Normal;
        }
        RenderPriority::Idle
    }
}

/// Turns "now" into expiration times for a root of a given mode.
#[derive(Debug, Clone)]
pub struct ExpirationClock {
    time: TimeSource,
    config: ExpirationConfig,
    mode: TypeOfMode,
}

impl ExpirationClock {
    pub fn new(time: TimeSource, config: ExpirationConfig, mode: TypeOfMode) -> Self {
        Self { time, config, mode }
    }

    pub fn config(&self) -> &ExpirationConfig {
        &self.config
    }

    pub fn mode(&self) -> TypeOfMode {
        self.mode
    }

    /// Offset-normalized milliseconds.
    pub fn now(&self) -> f64 {
        self.time.now()
    }

    pub fn request_current_time(&self) -> ExpirationTime {
        ms_to_expiration_time(self.time.now())
    }

    pub fn compute_expiration(
        &self,
        current_time: ExpirationTime,
        priority: RenderPriority,
    ) -> ExpirationTime {
        self.config
            .compute_expiration_for_mode(self.mode, current_time, priority)
    }

    /// Compute an expiration time, nudged one unit later if it would collide
    /// with the tree currently being rendered so the update lands in its own
    /// batch.
    pub fn compute_expiration_for_update(
        &self,
        current_time: ExpirationTime,
        priority: RenderPriority,
        rendering: Option<ExpirationTime>,
    ) -> ExpirationTime {
        let expiration_time = self.compute_expiration(current_time, priority);
        match rendering {
            Some(rendering) if rendering == expiration_time && !expiration_time.is_sentinel() => {
                ExpirationTime(expiration_time.0 - 1)
            }
            _ => expiration_time,
        }
    }

    pub fn infer_priority(&self, expiration_time: ExpirationTime) -> RenderPriority {
        self.config
            .infer_priority_from_expiration(self.request_current_time(), expiration_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExpirationConfig {
        ExpirationConfig::default()
    }

    #[test]
    fn test_sentinel_values() {
        assert_eq!(ExpirationTime::SYNC.as_u32(), 1_073_741_823);
        assert_eq!(ExpirationTime::BATCHED.as_u32(), 1_073_741_822);
        assert!(ExpirationTime::SYNC > ExpirationTime::BATCHED);
        assert!(ExpirationTime::NEVER < ms_to_expiration_time(1e9));
        assert!(!ExpirationTime::EARLIEST.is_sentinel());
        assert_eq!(ExpirationTime::SYNC.to_string(), "Sync");
        assert_eq!(ExpirationTime(42).to_string(), "42");
    }

    #[test]
    fn test_long_uptime_stays_clear_of_sentinels() {
        let config = config();
        for ms in [1.07e10, 1.2e10, 5e10] {
            let current = ms_to_expiration_time(ms);
            assert!(!current.is_sentinel(), "{ms}ms gave {current}");
            for expiration in [
                config.compute_interactive_expiration(current),
                config.compute_async_expiration(current),
            ] {
                assert!(!expiration.is_sentinel(), "{ms}ms bucketed to {expiration}");
                assert!(expiration <= current);
            }
        }
        assert_eq!(ms_to_expiration_time(5e10), ExpirationTime::EARLIEST);
    }

    #[test]
    fn test_ms_conversion() {
        assert_eq!(ms_to_expiration_time(0.0).as_u32(), 1_073_741_821);
        assert_eq!(ms_to_expiration_time(19.9).as_u32(), 1_073_741_820);
        assert_eq!(expiration_time_to_ms(ms_to_expiration_time(1234.0)), 1230.0);
        assert_eq!(expiration_time_to_ms(ExpirationTime::SYNC), -20.0);
    }

    #[test]
    fn test_user_blocking_bucket_boundaries() {
        let config = config();
        for current in 522..=526 {
            assert_eq!(
                config.compute_interactive_expiration(ExpirationTime(current)),
                ExpirationTime(501)
            );
        }
        assert_eq!(
            config.compute_interactive_expiration(ExpirationTime(527)),
            ExpirationTime(511)
        );
    }

    #[test]
    fn test_async_bucket_boundaries() {
        let config = config();
        for current in 522..=546 {
            assert_eq!(
                config.compute_async_expiration(ExpirationTime(current)),
                ExpirationTime(21)
            );
        }
        assert_eq!(
            config.compute_async_expiration(ExpirationTime(547)),
            ExpirationTime(46)
        );
    }

    #[test]
    fn test_mode_overrides() {
        let config = config();
        let now = ms_to_expiration_time(100.0);
        assert_eq!(
            config.compute_expiration_for_mode(TypeOfMode::NO_MODE, now, RenderPriority::Idle),
            ExpirationTime::SYNC
        );
        assert_eq!(
            config.compute_expiration_for_mode(TypeOfMode::BATCHED, now, RenderPriority::Low),
            ExpirationTime::BATCHED
        );
        assert_eq!(
            config.compute_expiration_for_mode(
                TypeOfMode::BATCHED,
                now,
                RenderPriority::Immediate
            ),
            ExpirationTime::SYNC
        );
        assert_eq!(
            config.compute_expiration_for_mode(
                TypeOfMode::concurrent() | TypeOfMode::STRICT,
                now,
                RenderPriority::Idle
            ),
            ExpirationTime::NEVER
        );
    }

    #[test]
    fn test_infer_priority() {
        let config = config();
        let now = ms_to_expiration_time(1000.0);
        assert_eq!(
            config.infer_priority_from_expiration(now, ExpirationTime::SYNC),
            RenderPriority::Immediate
        );
        assert_eq!(
            config.infer_priority_from_expiration(now, ExpirationTime::NEVER),
            RenderPriority::Idle
        );
        assert_eq!(
            config.infer_priority_from_expiration(now, config.compute_interactive_expiration(now)),
            RenderPriority::UserBlocking
        );
        assert_eq!(
            config.infer_priority_from_expiration(now, config.compute_async_expiration(now)),
            RenderPriority::Normal
        );
        assert_eq!(
            config.infer_priority_from_expiration(now, ms_to_expiration_time(900.0)),
            RenderPriority::Immediate
        );
        assert_eq!(
            config.infer_priority_from_expiration(now, ms_to_expiration_time(60_000.0)),
            RenderPriority::Idle
        );
    }

    #[test]
    fn test_update_avoids_rendering_batch() {
        let clock = ExpirationClock::new(
            TimeSource::new(|| 0.0),
            config(),
            TypeOfMode::concurrent(),
        );
        let now = clock.request_current_time();
        let normal = clock.compute_expiration(now, RenderPriority::Normal);
        assert_eq!(
            clock.compute_expiration_for_update(now, RenderPriority::Normal, Some(normal)),
            ExpirationTime(normal.0 - 1)
        );
        assert_eq!(
            clock.compute_expiration_for_update(
                now,
                RenderPriority::Immediate,
                Some(ExpirationTime::SYNC)
            ),
            ExpirationTime::SYNC
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());
        let bad = ExpirationConfig {
            async_bucket_ms: 5,
            ..config()
        };
        assert!(bad.validate().is_err());
    }
}
