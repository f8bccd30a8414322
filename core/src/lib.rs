use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod envelope;
pub mod error;
pub mod keyed_mutex;
pub mod metrics;
pub mod rate_limit;
pub mod reference;
pub mod retry;

pub use envelope::{Envelope, ProfileSnapshot, Reply, Stage, TimeProfile, Usage, UsageEntry};
pub use error::{GatewayError, TransportError};
pub use keyed_mutex::KeyedMutex;
pub use rate_limit::{shared_limiter, LimitRule, RateLimiter};
pub use reference::{shared_cache, ReferenceCache};
pub use retry::{
    classify, Backoff, FailureKind, Matcher, RetryEngine, RetryFailure, RetryPolicy, RetryState,
    Signature,
};

/// Wall-clock milliseconds since the Unix epoch, 0 if the clock is before it.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
