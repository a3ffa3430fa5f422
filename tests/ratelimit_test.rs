//! Integration tests for the per-provider quota gate.

use std::sync::Arc;
use std::thread;

use chrono::{TimeZone, Utc};
use conductor::clock::ManualClock;
use conductor::{ConductorError, FreeTierLimits, ProviderKind, ProviderRegistry, RateLimiter};

fn clock_at(h: u32, m: u32, s: u32) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, s).unwrap(),
    ))
}

fn limiter(provider: ProviderKind, limits: FreeTierLimits, clock: Arc<ManualClock>) -> RateLimiter {
    let mut registry = ProviderRegistry::builtin();
    registry.override_limits(provider, limits).unwrap();
    RateLimiter::new(&registry, clock)
}

// ============================================================================
// Daily ceiling
// ============================================================================

#[test]
fn request_below_ceiling_passes_and_at_ceiling_is_rejected() {
    let clock = clock_at(9, 0, 0);
    let limiter = limiter(
        ProviderKind::HuggingFace,
        FreeTierLimits::unlimited().requests_per_day(1000),
        clock,
    );

    for _ in 0..999 {
        limiter.acquire(ProviderKind::HuggingFace).unwrap().commit(0);
    }
    // 999 recorded: the 1000th request is still allowed.
    limiter.acquire(ProviderKind::HuggingFace).unwrap().commit(0);

    let err = limiter.acquire(ProviderKind::HuggingFace).err().unwrap();
    assert!(err.is_rate_limit());
    assert_eq!(limiter.status(ProviderKind::HuggingFace).unwrap().remaining, Some(0));
}

#[test]
fn rejection_carries_time_until_midnight() {
    let clock = clock_at(23, 0, 0);
    let limiter = limiter(
        ProviderKind::OpenRouter,
        FreeTierLimits::unlimited().requests_per_day(1),
        clock,
    );
    limiter.acquire(ProviderKind::OpenRouter).unwrap().commit(0);

    match limiter.check_limit(ProviderKind::OpenRouter) {
        Err(ConductorError::RateLimitExceeded {
            provider,
            retry_after,
            ..
        }) => {
            assert_eq!(provider, ProviderKind::OpenRouter);
            assert_eq!(retry_after.as_secs(), 3600);
        }
        other => panic!("expected RateLimitExceeded, got {other:?}"),
    }
}

#[test]
fn counters_reset_after_utc_midnight() {
    let clock = clock_at(23, 59, 0);
    let limiter = limiter(
        ProviderKind::OpenRouter,
        FreeTierLimits::unlimited().requests_per_day(2),
        clock.clone(),
    );
    for _ in 0..2 {
        limiter.acquire(ProviderKind::OpenRouter).unwrap().commit(5);
    }
    assert!(limiter.check_limit(ProviderKind::OpenRouter).is_err());

    clock.advance(chrono::Duration::minutes(2));

    let status = limiter.check_limit(ProviderKind::OpenRouter).unwrap();
    assert_eq!(status.request_count, 0);
    assert_eq!(status.token_count, 0);
    assert_eq!(
        status.reset_at,
        Utc.with_ymd_and_hms(2026, 3, 16, 0, 0, 0).unwrap()
    );
}

#[test]
fn token_ceiling_blocks_once_reached() {
    let clock = clock_at(12, 0, 0);
    let limiter = limiter(
        ProviderKind::Cerebras,
        FreeTierLimits::unlimited().tokens_per_day(1000),
        clock,
    );
    limiter.acquire(ProviderKind::Cerebras).unwrap().commit(600);
    limiter.acquire(ProviderKind::Cerebras).unwrap().commit(400);

    let err = limiter.check_limit(ProviderKind::Cerebras).unwrap_err();
    assert!(err.to_string().contains("token"));
}

// ============================================================================
// Per-minute window
// ============================================================================

#[test]
fn minute_window_slides() {
    let clock = clock_at(12, 0, 0);
    let limiter = limiter(
        ProviderKind::OpenRouter,
        FreeTierLimits::unlimited().requests_per_minute(2),
        clock.clone(),
    );
    limiter.acquire(ProviderKind::OpenRouter).unwrap().commit(0);
    clock.advance(chrono::Duration::seconds(30));
    limiter.acquire(ProviderKind::OpenRouter).unwrap().commit(0);

    let err = limiter.acquire(ProviderKind::OpenRouter).err().unwrap();
    assert_eq!(err.retry_after().map(|d| d.as_secs()), Some(30));

    clock.advance(chrono::Duration::seconds(31));
    assert!(limiter.acquire(ProviderKind::OpenRouter).is_ok());
}

// ============================================================================
// Reservations
// ============================================================================

#[test]
fn dropped_permit_returns_the_slot() {
    let clock = clock_at(8, 0, 0);
    let limiter = limiter(
        ProviderKind::OpenRouter,
        FreeTierLimits::unlimited().requests_per_day(1),
        clock,
    );

    let permit = limiter.acquire(ProviderKind::OpenRouter).unwrap();
    assert!(limiter.check_limit(ProviderKind::OpenRouter).is_err());
    drop(permit);

    let status = limiter.check_limit(ProviderKind::OpenRouter).unwrap();
    assert_eq!(status.request_count, 0);
}

#[test]
fn concurrent_acquires_never_exceed_ceiling() {
    let clock = clock_at(10, 0, 0);
    let limiter = Arc::new(limiter(
        ProviderKind::HuggingFace,
        FreeTierLimits::unlimited().requests_per_day(25),
        clock,
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || {
                let mut granted = 0;
                for _ in 0..20 {
                    if let Ok(permit) = limiter.acquire(ProviderKind::HuggingFace) {
                        permit.commit(1);
                        granted += 1;
                    }
                }
                granted
            })
        })
        .collect();

    let granted: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(granted, 25);
    assert_eq!(
        limiter.status(ProviderKind::HuggingFace).unwrap().request_count,
        25
    );
}

#[test]
fn record_usage_counts_without_reservation() {
    let clock = clock_at(10, 0, 0);
    let limiter = limiter(ProviderKind::Replicate, FreeTierLimits::unlimited(), clock);
    limiter.record_usage(ProviderKind::Replicate, 42).unwrap();

    let status = limiter.status(ProviderKind::Replicate).unwrap();
    assert_eq!(status.request_count, 1);
    assert_eq!(status.token_count, 42);
    assert_eq!(status.remaining, None);
    assert!(status.allowed);
}

// ============================================================================
// Admin surface
// ============================================================================

#[test]
fn reset_zeroes_counters_and_status_all_is_ordered() {
    let clock = clock_at(10, 0, 0);
    let limiter = limiter(
        ProviderKind::OpenRouter,
        FreeTierLimits::unlimited().requests_per_day(1),
        clock,
    );
    limiter.acquire(ProviderKind::OpenRouter).unwrap().commit(3);
    limiter.reset(ProviderKind::OpenRouter).unwrap();
    assert!(limiter.check_limit(ProviderKind::OpenRouter).is_ok());

    let providers: Vec<_> = limiter.status_all().into_iter().map(|s| s.provider).collect();
    assert_eq!(providers, ProviderKind::ALL.to_vec());
}

#[test]
fn unknown_provider_is_not_found() {
    let registry = ProviderRegistry::new(vec![
        ProviderRegistry::builtin()
            .get(ProviderKind::OpenRouter)
            .unwrap()
            .clone(),
    ])
    .unwrap();
    let limiter = RateLimiter::new(&registry, clock_at(10, 0, 0));

    assert!(matches!(
        limiter.check_limit(ProviderKind::Cerebras),
        Err(ConductorError::NotFound(_))
    ));
}
