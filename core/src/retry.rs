use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::envelope::TimeProfile;
use crate::error::TransportError;

/// One way a transport error can be recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Exchange or OS error code, compared case-insensitively.
    Code(&'static str),
    Status(u16),
    /// Substring of the lower-cased message.
    Message(&'static str),
}

impl Matcher {
    fn matches(&self, err: &TransportError, message: &str) -> bool {
        match self {
            Matcher::Code(code) => err
                .code
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(code)),
            Matcher::Status(status) => err.status == Some(*status),
            Matcher::Message(needle) => message.contains(needle),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Base delay multiplied by the number of attempts made so far.
    Linear(Duration),
}

impl Backoff {
    pub fn delay(&self, attempts: u32) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Linear(d) => d.saturating_mul(attempts.max(1)),
        }
    }
}

/// A transient failure pattern and how long to wait before trying again.
#[derive(Debug)]
pub struct Signature {
    pub name: &'static str,
    pub matchers: &'static [Matcher],
    pub backoff: Backoff,
}

impl Signature {
    pub fn matches(&self, err: &TransportError) -> bool {
        let message = err.normalized();
        self.matchers.iter().any(|m| m.matches(err, &message))
    }
}

const fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

pub static SIGNATURES: &[Signature] = &[
    Signature {
        name: "too many requests",
        matchers: &[
            Matcher::Status(429),
            Matcher::Message("too many requests"),
            Matcher::Code("-1003"),
            Matcher::Code("429000"),
            Matcher::Code("10006"),
            Matcher::Message("too many visits"),
        ],
        backoff: Backoff::Fixed(ms(1_000)),
    },
    Signature {
        name: "ip blocked",
        matchers: &[Matcher::Status(403), Matcher::Status(418)],
        backoff: Backoff::Linear(ms(10_000)),
    },
    Signature {
        name: "server timeout",
        matchers: &[
            Matcher::Status(504),
            Matcher::Status(408),
            Matcher::Code("ETIMEDOUT"),
            Matcher::Message("timed out"),
            Matcher::Message("timeout"),
        ],
        backoff: Backoff::Fixed(ms(10_000)),
    },
    Signature {
        name: "gateway",
        matchers: &[Matcher::Status(502), Matcher::Status(503)],
        backoff: Backoff::Fixed(ms(5_000)),
    },
    Signature {
        name: "connection reset",
        matchers: &[
            Matcher::Code("ECONNRESET"),
            Matcher::Message("connection reset"),
        ],
        backoff: Backoff::Fixed(ms(1_000)),
    },
    Signature {
        name: "socket hang up",
        matchers: &[
            Matcher::Message("socket hang up"),
            Matcher::Message("connection closed before message completed"),
        ],
        backoff: Backoff::Fixed(ms(1_000)),
    },
    Signature {
        name: "dns",
        matchers: &[
            Matcher::Code("ENOTFOUND"),
            Matcher::Code("EAI_AGAIN"),
            Matcher::Message("dns error"),
            Matcher::Message("failed to lookup address"),
        ],
        backoff: Backoff::Fixed(ms(2_000)),
    },
    Signature {
        name: "tls",
        matchers: &[Matcher::Message("handshake")],
        backoff: Backoff::Fixed(ms(2_000)),
    },
    Signature {
        name: "unknown error",
        matchers: &[Matcher::Message("unknown error"), Matcher::Code("-1000")],
        backoff: Backoff::Fixed(ms(500)),
    },
    Signature {
        name: "bad request",
        matchers: &[Matcher::Message("bad request")],
        backoff: Backoff::Fixed(ms(100)),
    },
    Signature {
        name: "recv window",
        matchers: &[
            Matcher::Message("recv window"),
            Matcher::Message("recvwindow"),
            Matcher::Message("recv_window"),
        ],
        backoff: Backoff::Fixed(ms(500)),
    },
    Signature {
        name: "timestamp expired",
        matchers: &[Matcher::Message("timestamp expired")],
        backoff: Backoff::Fixed(ms(500)),
    },
    Signature {
        name: "trading disabled",
        matchers: &[Matcher::Message("rest api trading not enabled")],
        backoff: Backoff::Fixed(ms(2_000)),
    },
    Signature {
        name: "cancel busy",
        matchers: &[Matcher::Message("cannot cancel order right now")],
        backoff: Backoff::Fixed(ms(500)),
    },
];

/// First signature matching `err`, or `None` for a permanent failure.
pub fn classify(err: &TransportError) -> Option<&'static Signature> {
    SIGNATURES.iter().find(|s| s.matches(err))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting,
    Retrying,
    Succeeded,
    FailedFinal,
}

impl fmt::Display for RetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RetryState::Attempting => "attempting",
            RetryState::Retrying => "retrying",
            RetryState::Succeeded => "succeeded",
            RetryState::FailedFinal => "failed_final",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The error matched no transient signature.
    Permanent,
    /// Every allowed attempt failed transiently.
    Exhausted,
    Cancelled,
}

#[derive(Error, Debug, Clone)]
#[error("{reason}")]
pub struct RetryFailure {
    pub reason: String,
    pub attempts: u32,
    pub state: RetryState,
    pub kind: FailureKind,
    pub error: Option<TransportError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::config::current().max_retries,
        }
    }
}

/// Runs one exchange operation until it succeeds, fails permanently, runs
/// out of attempts or is cancelled.
#[derive(Debug, Clone)]
pub struct RetryEngine {
    connector: String,
    policy: RetryPolicy,
}

impl RetryEngine {
    pub fn new(connector: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            connector: connector.into(),
            policy,
        }
    }

    pub fn connector(&self) -> &str {
        &self.connector
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Call `op` until it resolves. The same `profile` spans every attempt;
    /// its attempt counter is advanced after each backoff sleep.
    pub async fn run<T, F, Fut>(
        &self,
        profile: &TimeProfile,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        self.transition(RetryState::Attempting, profile.attempts());
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(profile)),
                r = op() => r,
            };
            let err = match outcome {
                Ok(v) => {
                    self.transition(RetryState::Succeeded, profile.attempts());
                    return Ok(v);
                }
                Err(e) => e,
            };

            let attempts = profile.attempts();
            let Some(signature) = classify(&err) else {
                return Err(self.finalize(err.message.clone(), attempts, FailureKind::Permanent, err));
            };
            if attempts >= self.policy.max_retries {
                let reason = format!("[{}] {}", self.connector, err.message);
                return Err(self.finalize(reason, attempts, FailureKind::Exhausted, err));
            }

            let delay = signature.backoff.delay(attempts);
            warn!(
                connector = %self.connector,
                cause = signature.name,
                error = %err,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying exchange call"
            );
            if crate::config::metrics_enabled() {
                metrics::counter!(
                    "gateway_retries_total",
                    "connector" => self.connector.clone(),
                    "cause" => signature.name
                )
                .increment(1);
            }
            self.transition(RetryState::Retrying, attempts);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(profile)),
                _ = tokio::time::sleep(delay) => {}
            }
            profile.next_attempt();
        }
    }

    fn transition(&self, state: RetryState, attempt: u32) {
        debug!(connector = %self.connector, %state, attempt, "retry state");
    }

    fn finalize(
        &self,
        reason: String,
        attempts: u32,
        kind: FailureKind,
        err: TransportError,
    ) -> RetryFailure {
        self.transition(RetryState::FailedFinal, attempts);
        if crate::config::metrics_enabled() {
            metrics::counter!("gateway_failures_total", "connector" => self.connector.clone())
                .increment(1);
        }
        RetryFailure {
            reason,
            attempts,
            state: RetryState::FailedFinal,
            kind,
            error: Some(err),
        }
    }

    fn cancelled(&self, profile: &TimeProfile) -> RetryFailure {
        let attempts = profile.attempts();
        self.transition(RetryState::FailedFinal, attempts);
        RetryFailure {
            reason: format!("[{}] cancelled", self.connector),
            attempts,
            state: RetryState::FailedFinal,
            kind: FailureKind::Cancelled,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(err: TransportError) -> Option<&'static str> {
        classify(&err).map(|s| s.name)
    }

    #[test]
    fn classifies_by_status_code_and_message() {
        assert_eq!(sig(TransportError::new("x").with_status(429)), Some("too many requests"));
        assert_eq!(sig(TransportError::new("x").with_code("429000")), Some("too many requests"));
        assert_eq!(sig(TransportError::new("x").with_status(403)), Some("ip blocked"));
        assert_eq!(sig(TransportError::new("Connection reset by peer")), Some("connection reset"));
        assert_eq!(
            sig(TransportError::new("Timestamp for this request is outside of the recvWindow.")),
            Some("recv window")
        );
        assert_eq!(sig(TransportError::new("Invalid symbol.").with_status(400)), None);
    }

    #[test]
    fn linear_backoff_scales_with_attempts() {
        let b = Backoff::Linear(Duration::from_secs(10));
        assert_eq!(b.delay(1), Duration::from_secs(10));
        assert_eq!(b.delay(3), Duration::from_secs(30));
        assert_eq!(Backoff::Fixed(ms(5)).delay(7), ms(5));
    }
}
