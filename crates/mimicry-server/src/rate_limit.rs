use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::Mutex;

use mimicry_core::game_trait::ConnectionId;

use crate::config::LimitsConfig;

/// Kinds of inbound traffic that draw from separate budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitClass {
    /// Gameplay requests forwarded to the tick loop.
    Request,
    /// Full snapshot requests. Each one costs the authority a whole
    /// world serialization.
    Resync,
}

/// Token budget for one class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    pub burst: f64,
    pub refill_per_sec: f64,
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(quota: Quota, now: Instant) -> Self {
        Self {
            tokens: quota.burst,
            last_refill: now,
        }
    }

    fn take(&mut self, quota: Quota, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * quota.refill_per_sec).min(quota.burst);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-connection, per-class token buckets checked before anything reaches
/// the tick loop.
pub struct RateLimiter {
    buckets: Mutex<HashMap<(ConnectionId, LimitClass), TokenBucket>>,
    request: Quota,
    resync: Quota,
}

impl RateLimiter {
    pub fn new(request: Quota, resync: Quota) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            request,
            resync,
        }
    }

    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self::new(
            Quota {
                burst: limits.request_burst,
                refill_per_sec: limits.request_rate_per_sec,
            },
            Quota {
                burst: limits.resync_burst,
                refill_per_sec: limits.resync_rate_per_sec,
            },
        )
    }

    fn quota(&self, class: LimitClass) -> Quota {
        match class {
            LimitClass::Request => self.request,
            LimitClass::Resync => self.resync,
        }
    }

    /// Spend one token of `class` for `connection`. False when the budget is
    /// exhausted.
    pub async fn check(&self, connection: ConnectionId, class: LimitClass) -> bool {
        let quota = self.quota(class);
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let allowed = buckets
            .entry((connection, class))
            .or_insert_with(|| TokenBucket::full(quota, now))
            .take(quota, now);
        if !allowed {
            tracing::debug!(connection, ?class, "Rate limited");
        }
        allowed
    }

    /// Forget every bucket of a departed connection.
    pub async fn remove(&self, connection: ConnectionId) {
        self.buckets
            .lock()
            .await
            .retain(|(owner, _), _| *owner != connection);
    }
}
