//! Security envelope: token-bucket rate limiting, abuse heuristics, and
//! the sanitizer. Audit ingestion rides the global shard's audit table.

pub mod sanitize;

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CONFIG;
use crate::error::{Error, Result};
use crate::models::AccountId;

/// Response headers carried back by every rate-limited request.
#[derive(Debug, Clone, Copy)]
pub struct RateStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket per key; a key is (account, endpoint family) or a source
/// address. Budgets refill continuously over a one-minute horizon.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> RateLimiter {
        RateLimiter {
            buckets: DashMap::new(),
        }
    }

    pub fn check(&self, key: &str, budget_per_minute: u32) -> Result<RateStatus> {
        let budget = budget_per_minute.max(1) as f64;
        let refill_per_sec = budget / 60.0;
        let now = Instant::now();
        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: budget,
            last_refill: now,
        });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(budget);
        bucket.last_refill = now;
        if bucket.tokens < 1.0 {
            let retry_after_secs = ((1.0 - bucket.tokens) / refill_per_sec).ceil() as u64;
            return Err(Error::RateLimited { retry_after_secs });
        }
        bucket.tokens -= 1.0;
        Ok(RateStatus {
            limit: budget_per_minute,
            remaining: bucket.tokens.floor() as u32,
            reset_secs: ((budget - bucket.tokens) / refill_per_sec).ceil() as u64,
        })
    }

    /// Budget for an endpoint family; the default comes from
    /// RATE_LIMIT_DEFAULT.
    pub fn family_budget(family: &str) -> u32 {
        let default = CONFIG.rate_limit_default;
        match family {
            "auth" => 20,
            "combat" => 60,
            "trade" => 90,
            "messages" => 40,
            "provisioner" => 30,
            _ => default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbuseSignal {
    FailedLogin,
    Trade,
    Message,
}

struct SignalWindow {
    events: VecDeque<Instant>,
}

/// Sliding-window heuristics. Tripping a window soft-degrades the
/// account: budgets are cut rather than the account being locked out.
pub struct AbuseDetector {
    windows: DashMap<(AccountId, AbuseSignal), SignalWindow>,
    degraded_until: DashMap<AccountId, Instant>,
}

const DEGRADE_DURATION: Duration = Duration::from_secs(10 * 60);

fn signal_policy(signal: AbuseSignal) -> (usize, Duration) {
    match signal {
        // credential stuffing: failed logins per 5 minutes
        AbuseSignal::FailedLogin => (10, Duration::from_secs(5 * 60)),
        // market manipulation: rapid buy-sell cycling per minute
        AbuseSignal::Trade => (30, Duration::from_secs(60)),
        // message flooding per minute
        AbuseSignal::Message => (20, Duration::from_secs(60)),
    }
}

impl Default for AbuseDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl AbuseDetector {
    pub fn new() -> AbuseDetector {
        AbuseDetector {
            windows: DashMap::new(),
            degraded_until: DashMap::new(),
        }
    }

    /// Record a signal; returns true when this push tripped the window.
    pub fn record(&self, account: AccountId, signal: AbuseSignal) -> bool {
        let (threshold, window) = signal_policy(signal);
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry((account, signal))
            .or_insert(SignalWindow {
                events: VecDeque::new(),
            });
        entry.events.push_back(now);
        while let Some(front) = entry.events.front() {
            if now.duration_since(*front) > window {
                entry.events.pop_front();
            } else {
                break;
            }
        }
        if entry.events.len() > threshold {
            self.degraded_until
                .insert(account, now + DEGRADE_DURATION);
            true
        } else {
            false
        }
    }

    pub fn is_degraded(&self, account: AccountId) -> bool {
        match self.degraded_until.get(&account) {
            Some(until) => Instant::now() < *until,
            None => false,
        }
    }
}

/// Process-wide security state, created once at startup.
#[derive(Clone)]
pub struct SecurityEnvelope {
    pub limiter: Arc<RateLimiter>,
    pub abuse: Arc<AbuseDetector>,
}

impl Default for SecurityEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityEnvelope {
    pub fn new() -> SecurityEnvelope {
        SecurityEnvelope {
            limiter: Arc::new(RateLimiter::new()),
            abuse: Arc::new(AbuseDetector::new()),
        }
    }

    /// Family budget, halved while the account is soft-degraded.
    pub fn effective_budget(&self, account: Option<AccountId>, family: &str) -> u32 {
        let budget = RateLimiter::family_budget(family);
        match account {
            Some(account) if self.abuse.is_degraded(account) => (budget / 2).max(1),
            _ => budget,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rate_limiter_exhausts_and_reports() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check("acct:trade", 5).unwrap();
        }
        let err = limiter.check("acct:trade", 5).unwrap_err();
        match err {
            Error::RateLimited { retry_after_secs } => assert!(retry_after_secs >= 1),
            other => panic!("unexpected {:?}", other),
        }
        // separate keys are independent
        limiter.check("acct:auth", 5).unwrap();
    }

    #[test]
    fn test_abuse_detector_trips_on_flood() {
        let detector = AbuseDetector::new();
        let account = AccountId::new();
        let mut tripped = false;
        for _ in 0..25 {
            tripped |= detector.record(account, AbuseSignal::Message);
        }
        assert!(tripped);
        assert!(detector.is_degraded(account));
        assert!(!detector.is_degraded(AccountId::new()));
    }

    #[test]
    fn test_degraded_budget_halved() {
        let envelope = SecurityEnvelope::new();
        let account = AccountId::new();
        let normal = envelope.effective_budget(Some(account), "trade");
        for _ in 0..40 {
            envelope.abuse.record(account, AbuseSignal::Trade);
        }
        let degraded = envelope.effective_budget(Some(account), "trade");
        assert_eq!(degraded, normal / 2);
    }
}
