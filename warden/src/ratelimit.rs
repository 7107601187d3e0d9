//! Fixed-window request throttling keyed by client identity.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of one rate-limit check, carrying what the caller needs for response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time left until the current window closes.
    pub reset_after: Duration,
}

impl RateDecision {
    pub fn reset_at(&self) -> DateTime<Utc> {
        let reset_after = chrono::Duration::from_std(self.reset_after)
            .unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() + reset_after
    }

    /// Whole seconds a rejected client should wait, never less than one.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        let secs = if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        };
        secs.max(1)
    }
}

/// A throttling gate. One instance per policy; implementations must serialize updates per key.
pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str) -> RateDecision;

    /// Drop entries whose window has closed, returning how many were removed.
    fn sweep(&self) -> usize;

    fn limit(&self) -> u32;
}

/// Named threshold for one class of endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    const MINUTE: Duration = Duration::from_secs(60);

    /// Ordinary API traffic
    pub const fn general() -> Self {
        Self {
            name: "general",
            limit: 100,
            window: Self::MINUTE,
        }
    }

    /// Credential endpoints: register, login, refresh
    pub const fn auth() -> Self {
        Self {
            name: "auth",
            limit: 10,
            window: Self::MINUTE,
        }
    }

    /// Highly sensitive account changes
    pub const fn strict() -> Self {
        Self {
            name: "strict",
            limit: 5,
            window: Self::MINUTE,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    resets_at: Instant,
}

/// In-process fixed-window counter backed by a sharded map.
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn from_policy(policy: RateLimitPolicy) -> Self {
        Self::new(policy.limit, policy.window)
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// `check` against an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        // The entry guard holds the shard lock for the whole read-modify-write
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            resets_at: now + self.window,
        });
        let window = entry.value_mut();

        if now >= window.resets_at {
            window.count = 0;
            window.resets_at = now + self.window;
        }

        let reset_after = window.resets_at.saturating_duration_since(now);
        if window.count >= self.limit {
            return RateDecision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_after,
            };
        }

        window.count += 1;
        RateDecision {
            allowed: true,
            limit: self.limit,
            remaining: self.limit - window.count,
            reset_after,
        }
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| window.resets_at > now);
        before.saturating_sub(self.windows.len())
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn limit(&self) -> u32 {
        self.limit
    }
}

/// Periodically sweep closed windows out of `limiter`.
pub fn spawn_sweeper(limiter: Arc<dyn RateLimiter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately and there is nothing to sweep yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = limiter.sweep();
            if removed > 0 {
                debug!(removed, "Swept expired rate limit windows");
            }
        }
    })
}
