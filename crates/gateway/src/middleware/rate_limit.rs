//! Rate limiting middleware using per-client window counters
//!
//! Two classes share one counter table keyed by (client address, class):
//! - `General`: every request, 100 per 15 minutes by default
//! - `Auth`: login and registration, 5 failed attempts per 15 minutes
//!
//! Auth slots are reserved before the request proceeds and refunded when the
//! response succeeds, so concurrent failures can never overshoot the budget.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use orderly_common::{config::RateLimitConfig, errors::AppError, metrics};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::context::RequestContext;
use crate::routes::path_has_prefix;
use crate::AppState;

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Routes whose failed attempts count against the auth budget
const AUTH_LIMITED_PREFIXES: &[&str] = &["/v1/users/login", "/v1/users/register"];

/// Source of time for window bookkeeping
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[cfg(test)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterClass {
    General,
    Auth,
}

impl LimiterClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterClass::General => "general",
            LimiterClass::Auth => "auth",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Quota {
    pub limit: u32,
    pub window: Duration,
}

#[derive(Debug)]
struct WindowCounter {
    count: u32,
    started: Instant,
}

/// Outcome of one admission check
#[derive(Debug, Clone)]
pub struct Decision {
    pub class: LimiterClass,
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
    key: String,
    window_started: Instant,
}

impl Decision {
    /// Whole seconds until the window resets, rounded up
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Write the `RateLimit-*` headers for client-side backoff
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        headers.insert(RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(RATELIMIT_RESET, HeaderValue::from(self.reset_secs()));
    }

    fn rejection(&self) -> AppError {
        match self.class {
            LimiterClass::General => AppError::RateLimited {
                limit: self.limit,
                retry_after_secs: self.reset_secs(),
            },
            LimiterClass::Auth => AppError::AuthRateLimited {
                limit: self.limit,
                retry_after_secs: self.reset_secs(),
            },
        }
    }
}

/// Admission control service owning the counter table
pub struct AdmissionController {
    general: Quota,
    auth: Quota,
    clock: Arc<dyn Clock>,
    counters: Mutex<HashMap<(String, LimiterClass), WindowCounter>>,
}

impl AdmissionController {
    pub fn new(general: Quota, auth: Quota, clock: Arc<dyn Clock>) -> Self {
        Self {
            general,
            auth,
            clock,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let window = Duration::from_secs(config.window_secs);
        Self::new(
            Quota { limit: config.general_max, window },
            Quota { limit: config.auth_max, window },
            clock,
        )
    }

    fn quota(&self, class: LimiterClass) -> Quota {
        match class {
            LimiterClass::General => self.general,
            LimiterClass::Auth => self.auth,
        }
    }

    /// Check and, when admitted, consume one slot for `key` in `class`.
    ///
    /// A window whose age is at least its duration restarts before the check.
    /// Rejected requests do not consume a slot.
    pub fn acquire(&self, key: &str, class: LimiterClass) -> Decision {
        let quota = self.quota(class);
        let now = self.clock.now();

        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters
            .entry((key.to_string(), class))
            .or_insert(WindowCounter { count: 0, started: now });

        if now.saturating_duration_since(counter.started) >= quota.window {
            counter.count = 0;
            counter.started = now;
        }

        let allowed = counter.count < quota.limit;
        if allowed {
            counter.count += 1;
        }

        let elapsed = now.saturating_duration_since(counter.started);
        Decision {
            class,
            allowed,
            limit: quota.limit,
            remaining: quota.limit.saturating_sub(counter.count),
            reset_after: quota.window.saturating_sub(elapsed),
            key: key.to_string(),
            window_started: counter.started,
        }
    }

    /// Give back a slot taken by `decision`, unless its window already reset
    pub fn release(&self, decision: &Decision) {
        if !decision.allowed {
            return;
        }

        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(counter) = counters.get_mut(&(decision.key.clone(), decision.class)) {
            if counter.started == decision.window_started {
                counter.count = counter.count.saturating_sub(1);
            }
        }
    }

    /// Drop counters whose window has elapsed; returns how many were removed
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let before = counters.len();
        counters.retain(|(_, class), counter| {
            now.saturating_duration_since(counter.started) < self.quota(*class).window
        });
        before - counters.len()
    }

    /// Number of live counters
    pub fn tracked_keys(&self) -> usize {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Whether `path` is subject to the auth limiter
pub fn is_auth_limited(path: &str) -> bool {
    AUTH_LIMITED_PREFIXES
        .iter()
        .any(|prefix| path_has_prefix(path, prefix))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = match RequestContext::of(&request) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let limiter = &state.limiter;

    let general = limiter.acquire(&ctx.client, LimiterClass::General);
    if !general.allowed {
        tracing::warn!(
            request_id = %ctx.request_id,
            client = %ctx.client,
            path = %ctx.path,
            "Rate limit exceeded"
        );
        metrics::record_rate_limited(LimiterClass::General.as_str());
        return reject(&general, &general);
    }

    let auth_slot = if is_auth_limited(&ctx.path) {
        let auth = limiter.acquire(&ctx.client, LimiterClass::Auth);
        if !auth.allowed {
            tracing::warn!(
                request_id = %ctx.request_id,
                client = %ctx.client,
                path = %ctx.path,
                "Auth rate limit exceeded"
            );
            metrics::record_rate_limited(LimiterClass::Auth.as_str());
            return reject(&auth, &general);
        }
        Some(auth)
    } else {
        None
    };

    let mut response = next.run(request).await;

    // Only failed attempts count against the auth budget
    if let Some(auth) = auth_slot {
        if response.status().as_u16() < 400 {
            limiter.release(&auth);
        }
    }

    general.write_headers(response.headers_mut());
    response
}

fn reject(decision: &Decision, general: &Decision) -> Response {
    let mut response = decision.rejection().into_response();
    general.write_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(15 * 60);

    fn controller(clock: Arc<ManualClock>) -> AdmissionController {
        AdmissionController::new(
            Quota { limit: 100, window: WINDOW },
            Quota { limit: 5, window: WINDOW },
            clock,
        )
    }

    #[test]
    fn test_general_limit_and_reset() {
        let clock = Arc::new(ManualClock::new());
        let limiter = controller(clock.clone());

        for i in 1..=100 {
            let decision = limiter.acquire("10.0.0.1", LimiterClass::General);
            assert!(decision.allowed, "request {} should be admitted", i);
            assert_eq!(decision.remaining, 100 - i);
        }

        let rejected = limiter.acquire("10.0.0.1", LimiterClass::General);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert!(matches!(rejected.rejection(), AppError::RateLimited { limit: 100, .. }));

        clock.advance(WINDOW);
        let after_reset = limiter.acquire("10.0.0.1", LimiterClass::General);
        assert!(after_reset.allowed);
        assert_eq!(after_reset.remaining, 99);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let clock = Arc::new(ManualClock::new());
        let limiter = controller(clock.clone());
        for _ in 0..100 {
            limiter.acquire("a", LimiterClass::General);
        }

        clock.advance(WINDOW - Duration::from_millis(1));
        assert!(!limiter.acquire("a", LimiterClass::General).allowed);

        clock.advance(Duration::from_millis(1));
        assert!(limiter.acquire("a", LimiterClass::General).allowed);
    }

    #[test]
    fn test_keys_and_classes_are_independent() {
        let limiter = controller(Arc::new(ManualClock::new()));
        for _ in 0..5 {
            assert!(limiter.acquire("a", LimiterClass::Auth).allowed);
        }
        assert!(!limiter.acquire("a", LimiterClass::Auth).allowed);
        assert!(limiter.acquire("b", LimiterClass::Auth).allowed);
        assert!(limiter.acquire("a", LimiterClass::General).allowed);
    }

    #[test]
    fn test_release_refunds_successful_attempts() {
        let limiter = controller(Arc::new(ManualClock::new()));

        for _ in 0..20 {
            let decision = limiter.acquire("a", LimiterClass::Auth);
            assert!(decision.allowed);
            limiter.release(&decision);
        }

        for _ in 0..5 {
            assert!(limiter.acquire("a", LimiterClass::Auth).allowed);
        }
        let sixth = limiter.acquire("a", LimiterClass::Auth);
        assert!(!sixth.allowed);
        assert!(matches!(sixth.rejection(), AppError::AuthRateLimited { limit: 5, .. }));
    }

    #[test]
    fn test_release_after_reset_does_not_touch_new_window() {
        let clock = Arc::new(ManualClock::new());
        let limiter = controller(clock.clone());

        let stale = limiter.acquire("a", LimiterClass::Auth);
        clock.advance(WINDOW);
        let fresh = limiter.acquire("a", LimiterClass::Auth);
        assert_eq!(fresh.remaining, 4);

        limiter.release(&stale);
        assert_eq!(limiter.acquire("a", LimiterClass::Auth).remaining, 3);
    }

    #[test]
    fn test_reset_secs_rounds_up() {
        let clock = Arc::new(ManualClock::new());
        let limiter = controller(clock.clone());
        limiter.acquire("a", LimiterClass::General);
        clock.advance(Duration::from_millis(1500));
        let decision = limiter.acquire("a", LimiterClass::General);
        assert_eq!(decision.reset_secs(), 899);

        let mut headers = HeaderMap::new();
        decision.write_headers(&mut headers);
        assert_eq!(headers[RATELIMIT_LIMIT], "100");
        assert_eq!(headers[RATELIMIT_REMAINING], "98");
        assert_eq!(headers[RATELIMIT_RESET], "899");
    }

    #[test]
    fn test_sweep_expired() {
        let clock = Arc::new(ManualClock::new());
        let limiter = controller(clock.clone());
        limiter.acquire("a", LimiterClass::General);
        clock.advance(Duration::from_secs(60));
        limiter.acquire("b", LimiterClass::General);

        clock.advance(WINDOW - Duration::from_secs(30));
        assert_eq!(limiter.sweep_expired(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_concurrent_acquire_never_overshoots() {
        let limiter = Arc::new(controller(Arc::new(ManualClock::new())));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|_| limiter.acquire("burst", LimiterClass::General).allowed)
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }

    #[test]
    fn test_auth_limited_paths() {
        assert!(is_auth_limited("/v1/users/login"));
        assert!(is_auth_limited("/v1/users/register"));
        assert!(!is_auth_limited("/v1/users/profile"));
        assert!(!is_auth_limited("/v1/users/loginx"));
    }
}
