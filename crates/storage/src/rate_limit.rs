use std::time::Duration;

use crate::{Store, StoreError};

/// Fixed-window rate limiter over the shared counting store.
///
/// Each instance owns one scope (`global`, `webhook`, `whatsapp`) with its own
/// window length and ceiling; the scope becomes part of the store key so
/// instances never collide. The increment is atomic, so a burst of concurrent
/// checks for the same key can overshoot the ceiling by at most the number of
/// requests in flight, and every overshooting request still observes
/// `allowed == false`.
#[derive(Clone)]
pub struct RateLimiter {
    store: Store,
    scope: &'static str,
    max_requests: u64,
    window: Duration,
}

/// Outcome of a rate-limit check, with the data needed for response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Time until the current window expires.
    pub reset_after: Duration,
}

impl RateLimiter {
    pub fn new(store: Store, scope: &'static str, max_requests: u64, window: Duration) -> Self {
        Self {
            store,
            scope,
            max_requests,
            window,
        }
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    /// Counts this request against `identifier`'s window and decides.
    ///
    /// Callers must not perform the protected side effect when
    /// `allowed == false`; the store failure policy (fail open or closed) is
    /// also the caller's.
    pub async fn check(&self, identifier: &str) -> Result<RateDecision, StoreError> {
        let key = format!("ratelimit:{}:{}", self.scope, identifier);
        let window = self.store.incr_window(&key, self.window).await?;
        Ok(RateDecision {
            allowed: window.count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(window.count),
            reset_after: window.ttl_remaining,
        })
    }
}
