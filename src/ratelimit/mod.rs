//! Per-provider free-tier rate limiting.
//!
//! Each provider owns one [`RateWindow`] behind its own mutex, so callers for
//! different providers never contend. Every gate decision happens under that
//! mutex: the check and the reservation of a request slot are a single
//! critical section, which keeps the request count at or below the daily
//! ceiling no matter how many handlers race.
//!
//! # Windows
//!
//! - **Daily**: request and token counters that zero out lazily the first
//!   time a check observes `now > reset_at` (next UTC midnight). There is
//!   no timer.
//! - **Per minute**: a bounded list of recent request timestamps; entries
//!   older than 60 seconds are pruned on every access.
//!
//! # Reservation flow
//!
//! ```text
//! acquire(provider) ──► RatePermit ──► provider call ok ──► permit.commit(tokens)
//!                                  └─► call failed / dropped ──► slot released
//! ```
//!
//! No lock is held while the provider call is in flight.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::clock::{Clock, next_utc_midnight};
use crate::registry::ProviderRegistry;
use crate::telemetry;
use crate::types::{FreeTierLimits, ProviderKind};
use crate::{ConductorError, Result};

/// Upper bound on remembered request timestamps per provider.
const MAX_RECENT: usize = 1024;

fn minute() -> chrono::Duration {
    chrono::Duration::seconds(60)
}

/// Mutable counters for one provider.
#[derive(Debug)]
struct RateWindow {
    request_count: u64,
    token_count: u64,
    recent: VecDeque<DateTime<Utc>>,
    reset_at: DateTime<Utc>,
    /// Bumped on every daily reset so stale permits can tell.
    epoch: u64,
    recent_cap: usize,
}

impl RateWindow {
    fn new(now: DateTime<Utc>, limits: &FreeTierLimits) -> Self {
        let recent_cap = limits
            .requests_per_minute
            .map_or(MAX_RECENT, |n| (n as usize).clamp(1, MAX_RECENT));
        Self {
            request_count: 0,
            token_count: 0,
            recent: VecDeque::new(),
            reset_at: next_utc_midnight(now),
            epoch: 0,
            recent_cap,
        }
    }

    /// Lazy daily reset.
    fn roll(&mut self, now: DateTime<Utc>) {
        if now > self.reset_at {
            self.request_count = 0;
            self.token_count = 0;
            self.recent.clear();
            self.reset_at = next_utc_midnight(now);
            self.epoch += 1;
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while self.recent.front().is_some_and(|t| now - *t >= minute()) {
            self.recent.pop_front();
        }
    }

    fn push_recent(&mut self, at: DateTime<Utc>) {
        self.recent.push_back(at);
        while self.recent.len() > self.recent_cap {
            self.recent.pop_front();
        }
    }

    /// Gate check. `Err` carries (reason, retry-after).
    fn evaluate(&self, limits: &FreeTierLimits, now: DateTime<Utc>) -> std::result::Result<(), (String, Duration)> {
        let until_reset = seconds_until(now, self.reset_at);
        if let Some(max) = limits.requests_per_day
            && self.request_count >= max
        {
            return Err((format!("daily request limit of {max} reached"), until_reset));
        }
        if let Some(max) = limits.tokens_per_day
            && self.token_count >= max
        {
            return Err((format!("daily token limit of {max} reached"), until_reset));
        }
        if let Some(max) = limits.requests_per_minute
            && self.recent.len() as u64 >= max
        {
            let retry = self
                .recent
                .front()
                .map_or(Duration::from_secs(1), |oldest| seconds_until(now, *oldest + minute()));
            return Err((format!("per-minute request limit of {max} reached"), retry));
        }
        Ok(())
    }

    fn status(&self, provider: ProviderKind, limits: &FreeTierLimits, now: DateTime<Utc>) -> RateLimitStatus {
        RateLimitStatus {
            provider,
            allowed: self.evaluate(limits, now).is_ok(),
            request_count: self.request_count,
            token_count: self.token_count,
            requests_last_minute: self.recent.len() as u64,
            remaining: limits
                .requests_per_day
                .map(|max| max.saturating_sub(self.request_count)),
            tokens_remaining: limits
                .tokens_per_day
                .map(|max| max.saturating_sub(self.token_count)),
            reset_at: self.reset_at,
            limits: *limits,
        }
    }
}

/// Whole seconds from `now` to `at`, at least one.
fn seconds_until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    let secs = (at - now).num_seconds().max(1);
    Duration::from_secs(secs as u64)
}

/// Snapshot of a provider's quota.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub provider: ProviderKind,
    /// Whether a request issued now would pass the gate.
    pub allowed: bool,
    pub request_count: u64,
    pub token_count: u64,
    pub requests_last_minute: u64,
    /// Requests left today; `None` when the provider has no daily request cap.
    pub remaining: Option<u64>,
    /// Tokens left today; `None` when the provider has no daily token cap.
    pub tokens_remaining: Option<u64>,
    pub reset_at: DateTime<Utc>,
    pub limits: FreeTierLimits,
}

struct Slot {
    limits: FreeTierLimits,
    window: Arc<Mutex<RateWindow>>,
}

/// Process-wide rate limiter, one window per registered provider.
pub struct RateLimiter {
    slots: HashMap<ProviderKind, Slot>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create windows for every provider in the registry.
    pub fn new(registry: &ProviderRegistry, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let slots = registry
            .list()
            .into_iter()
            .map(|d| {
                let slot = Slot {
                    limits: d.limits,
                    window: Arc::new(Mutex::new(RateWindow::new(now, &d.limits))),
                };
                (d.id, slot)
            })
            .collect();
        Self { slots, clock }
    }

    fn slot(&self, provider: ProviderKind) -> Result<&Slot> {
        self.slots
            .get(&provider)
            .ok_or_else(|| ConductorError::NotFound(format!("no rate window for provider '{provider}'")))
    }

    fn lock(window: &Mutex<RateWindow>) -> MutexGuard<'_, RateWindow> {
        window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check whether a request may be issued now, without reserving it.
    ///
    /// Returns the current status when allowed, or `RateLimitExceeded` with a
    /// retry-after hint.
    pub fn check_limit(&self, provider: ProviderKind) -> Result<RateLimitStatus> {
        let slot = self.slot(provider)?;
        let now = self.clock.now();
        let mut window = Self::lock(&slot.window);
        window.roll(now);
        window.prune(now);
        window
            .evaluate(&slot.limits, now)
            .map_err(|(reason, retry_after)| rejected(provider, reason, retry_after))?;
        Ok(window.status(provider, &slot.limits, now))
    }

    /// Atomically check the gate and reserve one request slot.
    ///
    /// The returned permit must be [`commit`](RatePermit::commit)ted after a
    /// successful provider call; dropping it uncommitted gives the slot back.
    pub fn acquire(&self, provider: ProviderKind) -> Result<RatePermit> {
        let slot = self.slot(provider)?;
        let now = self.clock.now();
        let mut window = Self::lock(&slot.window);
        window.roll(now);
        window.prune(now);
        if let Err((reason, retry_after)) = window.evaluate(&slot.limits, now) {
            return Err(rejected(provider, reason, retry_after));
        }
        window.request_count += 1;
        window.push_recent(now);
        debug!(
            provider = %provider,
            request_count = window.request_count,
            "rate limit slot reserved"
        );
        Ok(RatePermit {
            provider,
            window: Arc::clone(&slot.window),
            epoch: window.epoch,
            stamp: now,
            committed: false,
        })
    }

    /// Record a completed request that did not go through [`acquire`](Self::acquire).
    pub fn record_usage(&self, provider: ProviderKind, tokens: u64) -> Result<()> {
        let slot = self.slot(provider)?;
        let now = self.clock.now();
        let mut window = Self::lock(&slot.window);
        window.roll(now);
        window.prune(now);
        window.request_count += 1;
        window.token_count += tokens;
        window.push_recent(now);
        Ok(())
    }

    /// Current quota snapshot (never fails on exhaustion; see `allowed`).
    pub fn status(&self, provider: ProviderKind) -> Result<RateLimitStatus> {
        let slot = self.slot(provider)?;
        let now = self.clock.now();
        let mut window = Self::lock(&slot.window);
        window.roll(now);
        window.prune(now);
        Ok(window.status(provider, &slot.limits, now))
    }

    /// Snapshots for every provider, in provider order.
    pub fn status_all(&self) -> Vec<RateLimitStatus> {
        let mut kinds: Vec<_> = self.slots.keys().copied().collect();
        kinds.sort();
        kinds
            .into_iter()
            .filter_map(|p| self.status(p).ok())
            .collect()
    }

    /// Zero a provider's counters immediately (operator action).
    pub fn reset(&self, provider: ProviderKind) -> Result<()> {
        let slot = self.slot(provider)?;
        let now = self.clock.now();
        let mut window = Self::lock(&slot.window);
        let epoch = window.epoch + 1;
        *window = RateWindow::new(now, &slot.limits);
        window.epoch = epoch;
        Ok(())
    }
}

fn rejected(provider: ProviderKind, reason: String, retry_after: Duration) -> ConductorError {
    metrics::counter!(telemetry::RATE_LIMITED_TOTAL, "provider" => provider.as_str()).increment(1);
    ConductorError::RateLimitExceeded {
        provider,
        reason,
        retry_after,
    }
}

/// A reserved request slot.
///
/// Holds no lock; it only remembers which window (and which day of that
/// window) it was taken from.
#[must_use = "dropping a permit releases the reserved request slot"]
pub struct RatePermit {
    provider: ProviderKind,
    window: Arc<Mutex<RateWindow>>,
    epoch: u64,
    stamp: DateTime<Utc>,
    committed: bool,
}

impl RatePermit {
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Keep the reserved request and add the tokens it consumed.
    ///
    /// Tokens from a call that straddled the daily reset are not charged to
    /// the new day.
    pub fn commit(mut self, tokens: u64) {
        let mut window = RateLimiter::lock(&self.window);
        if window.epoch == self.epoch {
            window.token_count += tokens;
        }
        self.committed = true;
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut window = RateLimiter::lock(&self.window);
        // A daily reset already discarded this reservation.
        if window.epoch != self.epoch {
            return;
        }
        window.request_count = window.request_count.saturating_sub(1);
        if let Some(pos) = window.recent.iter().rposition(|t| *t == self.stamp) {
            window.recent.remove(pos);
        }
    }
}
