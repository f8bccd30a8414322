use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};

/// Consumption of one limit type, `value` being weight used over ceiling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
}

impl UsageEntry {
    pub fn new(kind: impl Into<String>, value: f64) -> Self {
        Self {
            kind: kind.into(),
            value,
        }
    }
}

pub type Usage = Vec<UsageEntry>;

/// The two timed phases of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Queue,
    Exchange,
}

#[derive(Debug, Default, Clone, Copy)]
struct Phase {
    start: Option<u64>,
    end: Option<u64>,
}

impl Phase {
    fn open(&mut self, now: u64) {
        match (self.start, self.end) {
            (None, _) => self.start = Some(now),
            (Some(_), None) => {}
            // Re-opened on a later attempt: shift the start back so the
            // elapsed time already spent in this phase carries over.
            (Some(start), Some(end)) => {
                self.start = Some(now.saturating_sub(end - start));
                self.end = None;
            }
        }
    }

    fn close(&mut self, now: u64) {
        if let (Some(start), None) = (self.start, self.end) {
            self.end = Some(now.max(start));
        }
    }
}

#[derive(Debug)]
struct ProfileState {
    attempts: u32,
    incoming: u64,
    outcoming: Option<u64>,
    queue: Phase,
    exchange: Phase,
}

impl ProfileState {
    fn phase(&mut self, stage: Stage) -> &mut Phase {
        match stage {
            Stage::Queue => &mut self.queue,
            Stage::Exchange => &mut self.exchange,
        }
    }
}

/// Timing record of one adapter call, shared between the pipeline stages
/// and every retry attempt of the call.
#[derive(Debug, Clone)]
pub struct TimeProfile {
    inner: Arc<Mutex<ProfileState>>,
}

impl Default for TimeProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProfile {
    pub fn new() -> Self {
        Self::started_at(crate::now_ms())
    }

    pub fn started_at(incoming: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProfileState {
                attempts: 1,
                incoming,
                outcoming: None,
                queue: Phase::default(),
                exchange: Phase::default(),
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut ProfileState) -> R) -> R {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn open_at(&self, stage: Stage, now: u64) {
        self.with(|s| s.phase(stage).open(now));
    }

    pub fn close_at(&self, stage: Stage, now: u64) {
        self.with(|s| s.phase(stage).close(now));
    }

    pub fn start_queue(&self) {
        self.open_at(Stage::Queue, crate::now_ms());
    }

    pub fn end_queue(&self) {
        self.close_at(Stage::Queue, crate::now_ms());
    }

    pub fn start_exchange(&self) {
        self.open_at(Stage::Exchange, crate::now_ms());
    }

    pub fn end_exchange(&self) {
        self.close_at(Stage::Exchange, crate::now_ms());
    }

    /// Close whatever phase the failed attempt left open and count the next
    /// attempt.
    pub fn next_attempt(&self) {
        let now = crate::now_ms();
        self.with(|s| {
            s.queue.close(now);
            s.exchange.close(now);
            s.attempts += 1;
        });
    }

    pub fn attempts(&self) -> u32 {
        self.with(|s| s.attempts)
    }

    pub fn finish_at(&self, now: u64) {
        self.with(|s| {
            s.queue.close(now);
            s.exchange.close(now);
            s.outcoming = Some(now.max(s.incoming));
        });
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        self.with(|s| ProfileSnapshot {
            attempts: s.attempts,
            incoming_time: s.incoming,
            outcoming_time: s.outcoming,
            queue_start_time: s.queue.start,
            queue_end_time: s.queue.end,
            exchange_request_start_time: s.exchange.start,
            exchange_request_end_time: s.exchange.end,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    pub attempts: u32,
    pub incoming_time: u64,
    pub outcoming_time: Option<u64>,
    pub queue_start_time: Option<u64>,
    pub queue_end_time: Option<u64>,
    pub exchange_request_start_time: Option<u64>,
    pub exchange_request_end_time: Option<u64>,
}

impl ProfileSnapshot {
    pub fn queue_ms(&self) -> Option<u64> {
        Some(self.queue_end_time?.saturating_sub(self.queue_start_time?))
    }

    pub fn exchange_ms(&self) -> Option<u64> {
        Some(
            self.exchange_request_end_time?
                .saturating_sub(self.exchange_request_start_time?),
        )
    }
}

/// Uniform result of every adapter operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T> {
    Ok {
        data: T,
        usage: Usage,
        time_profile: ProfileSnapshot,
    },
    Fail {
        reason: String,
        usage: Usage,
        time_profile: ProfileSnapshot,
    },
}

impl<T> Envelope<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Envelope::Ok { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Envelope::Ok { data, .. } => Some(data),
            Envelope::Fail { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Envelope::Ok { .. } => None,
            Envelope::Fail { reason, .. } => Some(reason),
        }
    }

    pub fn usage(&self) -> &Usage {
        match self {
            Envelope::Ok { usage, .. } | Envelope::Fail { usage, .. } => usage,
        }
    }

    pub fn time_profile(&self) -> &ProfileSnapshot {
        match self {
            Envelope::Ok { time_profile, .. } | Envelope::Fail { time_profile, .. } => time_profile,
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            Envelope::Ok { data, .. } => Ok(data),
            Envelope::Fail { reason, .. } => Err(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        match self {
            Envelope::Ok {
                data,
                usage,
                time_profile,
            } => Envelope::Ok {
                data: f(data),
                usage,
                time_profile,
            },
            Envelope::Fail {
                reason,
                usage,
                time_profile,
            } => Envelope::Fail {
                reason,
                usage,
                time_profile,
            },
        }
    }
}

impl<T: Serialize> Serialize for Envelope<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("Envelope", 5)?;
        match self {
            Envelope::Ok { data, .. } => {
                st.serialize_field("status", "OK")?;
                st.serialize_field("data", data)?;
                st.serialize_field("reason", &None::<String>)?;
            }
            Envelope::Fail { reason, .. } => {
                st.serialize_field("status", "NOTOK")?;
                st.serialize_field("data", &None::<T>)?;
                st.serialize_field("reason", reason)?;
            }
        }
        st.serialize_field("usage", self.usage())?;
        st.serialize_field("timeProfile", self.time_profile())?;
        st.end()
    }
}

/// Builds the final envelope of a call from its usage snapshot and profile.
#[derive(Debug, Clone)]
pub struct Reply {
    usage: Usage,
    profile: TimeProfile,
}

impl Reply {
    pub fn new(usage: Usage, profile: TimeProfile) -> Self {
        Self { usage, profile }
    }

    pub fn ok<T>(self, data: T) -> Envelope<T> {
        self.profile.finish_at(crate::now_ms());
        Envelope::Ok {
            data,
            usage: self.usage,
            time_profile: self.profile.snapshot(),
        }
    }

    pub fn fail<T>(self, reason: impl Display) -> Envelope<T> {
        self.profile.finish_at(crate::now_ms());
        Envelope::Fail {
            reason: reason.to_string(),
            usage: self.usage,
            time_profile: self.profile.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reopened_phase_carries_elapsed_time() {
        let profile = TimeProfile::started_at(1_000);
        profile.open_at(Stage::Exchange, 1_000);
        profile.close_at(Stage::Exchange, 1_300);
        profile.open_at(Stage::Exchange, 2_000);
        profile.close_at(Stage::Exchange, 2_100);
        let snap = profile.snapshot();
        assert_eq!(snap.exchange_request_start_time, Some(1_700));
        assert_eq!(snap.exchange_ms(), Some(400));
    }

    #[test]
    fn second_open_keeps_first_start() {
        let profile = TimeProfile::started_at(0);
        profile.open_at(Stage::Queue, 10);
        profile.open_at(Stage::Queue, 20);
        profile.close_at(Stage::Queue, 5);
        let snap = profile.snapshot();
        assert_eq!(snap.queue_start_time, Some(10));
        assert_eq!(snap.queue_end_time, Some(10));
    }
}
