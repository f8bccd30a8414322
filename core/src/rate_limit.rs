use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::warn;

use crate::envelope::{Usage, UsageEntry};

/// One named weight budget of an exchange, e.g. 1200 weight per minute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitRule {
    pub kind: String,
    pub ceiling: u64,
    pub window_ms: u64,
}

impl LimitRule {
    pub fn new(kind: impl Into<String>, ceiling: u64, window: Duration) -> Self {
        Self {
            kind: kind.into(),
            ceiling,
            window_ms: window.as_millis() as u64,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct WindowState {
    weight: u64,
    window_start: u64,
    overflows: u64,
}

/// Millisecond clock anchored to the wall clock at construction and driven by
/// tokio's monotonic [`Instant`], so paused-time tests move it forward.
#[derive(Debug, Clone, Copy)]
struct Clock {
    epoch_ms: u64,
    origin: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            epoch_ms: crate::now_ms(),
            origin: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch_ms + self.origin.elapsed().as_millis() as u64
    }
}

/// Fixed-window weight accounting for one exchange.
///
/// `reserve` never suspends: it books the weight and returns how long the
/// caller must wait before issuing the request (0 when it may go now).
/// Each limit type is tracked independently and updated under its map
/// entry's lock, so concurrent reservations never lose an update.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    rules: Vec<LimitRule>,
    state: DashMap<String, WindowState>,
    skew_step_ms: u64,
    clock: Clock,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, rules: Vec<LimitRule>) -> Self {
        Self {
            name: name.into(),
            rules,
            state: DashMap::new(),
            skew_step_ms: crate::config::current().rate_skew_ms,
            clock: Clock::new(),
        }
    }

    /// Override the extra delay added per consecutive overflow.
    pub fn with_skew(mut self, skew_step_ms: u64) -> Self {
        self.skew_step_ms = skew_step_ms;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[LimitRule] {
        &self.rules
    }

    pub fn reserve(&self, kind: &str, weight: u64) -> u64 {
        self.reserve_at(kind, weight, self.clock.now_ms())
    }

    /// Book `weight` against `kind` as of `now_ms` and return the wait in
    /// milliseconds.
    ///
    /// Past the window boundary the accumulated weight is replaced by the
    /// request's weight and the window restarts at the boundary floor of
    /// `now_ms`. An overflowing request is not booked; its wait is the time
    /// left to the boundary plus a skew that grows with every consecutive
    /// overflow, so callers released by the same boundary do not stampede.
    pub fn reserve_at(&self, kind: &str, weight: u64, now_ms: u64) -> u64 {
        let Some(rule) = self.rule(kind) else {
            warn!(limiter = %self.name, kind, "reserve on unknown limit type");
            return 0;
        };
        let window = rule.window_ms.max(1);
        let mut entry = self.state.entry(kind.to_string()).or_default();
        let st = entry.value_mut();

        if now_ms >= st.window_start + window {
            st.weight = weight;
            st.window_start = now_ms - now_ms % window;
            st.overflows = 0;
            return 0;
        }

        if st.weight + weight > rule.ceiling {
            st.overflows += 1;
            let boundary = st.window_start + window;
            return boundary - now_ms + st.overflows * self.skew_step_ms;
        }

        st.weight += weight;
        st.overflows = 0;
        0
    }

    pub fn usage(&self) -> Usage {
        self.usage_at(self.clock.now_ms())
    }

    /// Fraction of each configured budget consumed in the current window,
    /// in rule order. A type whose window has elapsed reports 0.
    pub fn usage_at(&self, now_ms: u64) -> Usage {
        self.rules
            .iter()
            .map(|rule| {
                let value = match self.state.get(&rule.kind) {
                    Some(st) if now_ms < st.window_start + rule.window_ms.max(1) => {
                        if rule.ceiling == 0 {
                            1.0
                        } else {
                            st.weight as f64 / rule.ceiling as f64
                        }
                    }
                    _ => 0.0,
                };
                UsageEntry::new(rule.kind.clone(), value)
            })
            .collect()
    }

    /// Reserve and sleep until the reservation is granted. Returns the total
    /// time spent waiting.
    pub async fn acquire(&self, kind: &str, weight: u64) -> Duration {
        let started = Instant::now();
        loop {
            let wait = self.reserve(kind, weight);
            if wait == 0 {
                break;
            }
            if crate::config::metrics_enabled() {
                metrics::counter!("gateway_rate_limit_wait_ms", "limiter" => self.name.clone())
                    .increment(wait);
            }
            tracing::debug!(limiter = %self.name, kind, wait_ms = wait, "rate limit wait");
            time::sleep(Duration::from_millis(wait)).await;
        }
        started.elapsed()
    }

    fn rule(&self, kind: &str) -> Option<&LimitRule> {
        self.rules.iter().find(|r| r.kind == kind)
    }
}

static LIMITERS: Lazy<Mutex<HashMap<String, Arc<RateLimiter>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Process-wide limiter for `name`, created with `rules` on first use.
/// Adapters of the same exchange share the budget through this handle.
pub fn shared_limiter(name: &str, rules: impl FnOnce() -> Vec<LimitRule>) -> Arc<RateLimiter> {
    let mut map = LIMITERS.lock().unwrap_or_else(PoisonError::into_inner);
    map.entry(name.to_string())
        .or_insert_with(|| Arc::new(RateLimiter::new(name, rules())))
        .clone()
}
