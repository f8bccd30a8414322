use gateway_core::config;
use gateway_core::{
    Envelope, GatewayError, RateLimiter, Reply, RetryEngine, RetryPolicy, TimeProfile,
    TransportError, Usage,
};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument, Span};

use crate::transport::{Transport, TransportRequest};

/// Rate-limit weight of one endpoint and the limit type it counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cost {
    pub limit: &'static str,
    pub weight: u64,
}

impl Cost {
    pub const fn new(limit: &'static str, weight: u64) -> Self {
        Self { limit, weight }
    }
}

/// Turns a 2xx body into its payload or an error, for exchanges that report
/// failures inside successful responses.
pub type Unwrap = fn(Value) -> Result<Value, TransportError>;

pub fn passthrough(body: Value) -> Result<Value, TransportError> {
    Ok(body)
}

/// The metered, retried request pipeline shared by every adapter of one
/// exchange instance.
#[derive(Clone)]
pub struct Connector {
    name: String,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    retry: RetryEngine,
    unwrap: Unwrap,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("name", &self.name)
            .field("limiter", &self.limiter.name())
            .field("retry", &self.retry)
            .finish()
    }
}

impl Connector {
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>, limiter: Arc<RateLimiter>) -> Self {
        let name = name.into();
        Self {
            retry: RetryEngine::new(name.clone(), RetryPolicy::default()),
            name,
            transport,
            limiter,
            unwrap: passthrough,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_unwrap(mut self, unwrap: Unwrap) -> Self {
        self.unwrap = unwrap;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryEngine::new(self.name.clone(), policy);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn usage(&self) -> Usage {
        self.limiter.usage()
    }

    /// Start one public operation. All requests fetched through the scope
    /// share its time profile.
    pub fn scope(&self, operation: &'static str) -> Scope<'_> {
        Scope {
            connector: self,
            operation,
            profile: TimeProfile::new(),
            span: info_span!("exchange_call", exchange = %self.name, operation),
        }
    }

    /// Single-request operation: fetch, map with `map`, wrap in an envelope.
    pub async fn call<T, F>(
        &self,
        operation: &'static str,
        cost: Cost,
        req: TransportRequest,
        map: F,
    ) -> Envelope<T>
    where
        F: FnOnce(Value) -> Result<T, GatewayError>,
    {
        let scope = self.scope(operation);
        let result = scope.fetch(cost, req).await.and_then(map);
        scope.finish(result)
    }

    pub fn unsupported<T>(&self, operation: &'static str) -> Envelope<T> {
        self.reject(operation, GatewayError::Unsupported)
    }

    pub fn reject<T>(&self, operation: &'static str, err: GatewayError) -> Envelope<T> {
        self.scope(operation).finish(Err(err))
    }

    /// Successful envelope for operations answered without a request.
    pub fn fixed<T>(&self, operation: &'static str, value: T) -> Envelope<T> {
        self.scope(operation).finish(Ok(value))
    }
}

pub struct Scope<'a> {
    connector: &'a Connector,
    operation: &'static str,
    profile: TimeProfile,
    span: Span,
}

impl Scope<'_> {
    pub fn profile(&self) -> &TimeProfile {
        &self.profile
    }

    /// Reserve weight, send, unwrap; retried as a whole on transient errors.
    pub async fn fetch(&self, cost: Cost, req: TransportRequest) -> Result<Value, GatewayError> {
        let connector = self.connector;
        // unsigned private calls never reach the limiter
        if req.private && !connector.transport.authenticated() {
            return Err(GatewayError::MissingCredentials);
        }
        let profile = &self.profile;
        let req = &req;
        let operation = self.operation;
        connector
            .retry
            .run(profile, &connector.cancel, move || async move {
                profile.start_queue();
                connector.limiter.acquire(cost.limit, cost.weight).await;
                profile.end_queue();

                profile.start_exchange();
                let res = connector.transport.request(req).await;
                profile.end_exchange();
                if config::metrics_enabled() {
                    metrics::counter!(
                        "gateway_requests_total",
                        "exchange" => connector.name.clone(),
                        "operation" => operation
                    )
                    .increment(1);
                }
                res.and_then(connector.unwrap)
            })
            .instrument(self.span.clone())
            .await
            .map_err(GatewayError::from)
    }

    pub fn finish<T>(self, result: Result<T, GatewayError>) -> Envelope<T> {
        let reply = Reply::new(self.connector.usage(), self.profile);
        let _entered = self.span.enter();
        match result {
            Ok(value) => {
                debug!("operation succeeded");
                reply.ok(value)
            }
            Err(err) => {
                match &err {
                    GatewayError::Unsupported | GatewayError::FuturesTypeMissing => {
                        debug!(reason = %err, "operation rejected")
                    }
                    _ => warn!(reason = %err, "operation failed"),
                }
                reply.fail(err)
            }
        }
    }
}
