#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use agents::transport::{Transport, TransportRequest};
use async_trait::async_trait;
use gateway_core::{LimitRule, RateLimiter, TransportError};
use serde_json::Value;

/// Transport answering from a fixed script and recording what was sent.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<Value, TransportError>>>,
    sent: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<Value, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            sent: Mutex::default(),
        })
    }

    /// Every reply succeeds with the given bodies, in order.
    pub fn ok(bodies: Vec<Value>) -> Arc<Self> {
        Self::new(bodies.into_iter().map(Ok).collect())
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn request(&self, i: usize) -> TransportRequest {
        self.requests()[i].clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, req: &TransportRequest) -> Result<Value, TransportError> {
        self.sent.lock().unwrap().push(req.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("no scripted reply")))
    }
}

/// Private limiter so tests never share budget.
pub fn limiter(name: &str, rules: Vec<LimitRule>) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(name, rules))
}

/// Exchange error as the REST transport reports it for a 4xx body.
pub fn venue_error(status: u16, code: &str, message: &str) -> TransportError {
    TransportError::new(message).with_status(status).with_code(code)
}
