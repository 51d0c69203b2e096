//! Property tests for expiration time computation.

use cadence_core::{
    ExpirationConfig, ExpirationTime, RenderPriority, TypeOfMode, ms_to_expiration_time,
};
use proptest::prelude::*;

const MAGIC_NUMBER_OFFSET: u32 = ExpirationTime::BATCHED.0 - 1;

fn arb_priority() -> impl Strategy<Value = RenderPriority> {
    prop_oneof![
        Just(RenderPriority::Immediate),
        Just(RenderPriority::UserBlocking),
        Just(RenderPriority::Normal),
        Just(RenderPriority::Low),
        Just(RenderPriority::Idle),
        Just(RenderPriority::NoPriority),
    ]
}

/// Timestamps up to roughly a day of uptime.
fn arb_ms() -> impl Strategy<Value = f64> {
    0.0..86_400_000.0f64
}

fn compute(ms: f64, priority: RenderPriority) -> ExpirationTime {
    ExpirationConfig::default().compute_expiration_for_mode(
        TypeOfMode::concurrent(),
        ms_to_expiration_time(ms),
        priority,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn immediate_is_always_sync(ms in arb_ms()) {
        prop_assert_eq!(compute(ms, RenderPriority::Immediate), ExpirationTime::SYNC);
    }

    #[test]
    fn idle_is_always_never(ms in arb_ms()) {
        prop_assert_eq!(compute(ms, RenderPriority::Idle), ExpirationTime::NEVER);
    }

    #[test]
    fn deadlines_approach_as_time_advances(
        a in arb_ms(),
        b in arb_ms(),
        priority in arb_priority(),
    ) {
        let (earlier, later) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(compute(earlier, priority) >= compute(later, priority));
    }

    #[test]
    fn bucketed_values_avoid_sentinels(ms in arb_ms(), priority in arb_priority()) {
        let expiration = compute(ms, priority);
        match priority {
            RenderPriority::Immediate | RenderPriority::Idle => {
                prop_assert!(expiration.is_sentinel());
            }
            _ => prop_assert!(!expiration.is_sentinel()),
        }
    }

    #[test]
    fn async_requests_in_one_bucket_coalesce(
        bucket in 20u32..40_000_000,
        first in 0u32..25,
        second in 0u32..25,
    ) {
        // 500 units of latency, 25-unit buckets.
        let current = |offset: u32| ExpirationTime(MAGIC_NUMBER_OFFSET + 500 - (bucket * 25 + offset));
        let config = ExpirationConfig::default();
        prop_assert_eq!(
            config.compute_async_expiration(current(first)),
            config.compute_async_expiration(current(second))
        );
    }

    #[test]
    fn interactive_requests_in_one_bucket_coalesce(
        bucket in 2u32..100_000_000,
        first in 0u32..10,
        second in 0u32..10,
    ) {
        let current = |offset: u32| ExpirationTime(MAGIC_NUMBER_OFFSET + 15 - (bucket * 10 + offset));
        let config = ExpirationConfig::default();
        prop_assert_eq!(
            config.compute_interactive_expiration(current(first)),
            config.compute_interactive_expiration(current(second))
        );
    }

    #[test]
    fn user_blocking_expires_before_normal(ms in arb_ms()) {
        prop_assert!(compute(ms, RenderPriority::UserBlocking) > compute(ms, RenderPriority::Normal));
    }

    #[test]
    fn inferred_priority_matches_bucket(ms in arb_ms()) {
        let config = ExpirationConfig::default();
        let now = ms_to_expiration_time(ms);
        for priority in [RenderPriority::UserBlocking, RenderPriority::Normal] {
            let expiration = config.compute_expiration_for_priority(now, priority);
            prop_assert_eq!(config.infer_priority_from_expiration(now, expiration), priority);
        }
    }
}
