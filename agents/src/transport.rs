use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use gateway_core::config::{self, Credentials};
use gateway_core::TransportError;
use reqwest::{Client, Proxy, StatusCode};
use serde_json::Value;
use std::error::Error as _;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        })
    }
}

impl From<Method> for reqwest::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One exchange call, described independently of how it is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Needs account credentials.
    pub private: bool,
}

impl TransportRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            private: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_opt<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Seam between adapters and the wire. Implementations may sign requests;
/// tests substitute scripted transports.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, req: &TransportRequest) -> Result<Value, TransportError>;

    /// Whether private requests can be sent at all.
    fn authenticated(&self) -> bool {
        true
    }
}

/// Header names carrying the API key and passphrase on private calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthHeaders {
    pub key: &'static str,
    pub passphrase: Option<&'static str>,
}

impl AuthHeaders {
    pub const fn key(key: &'static str) -> Self {
        Self {
            key,
            passphrase: None,
        }
    }

    pub const fn with_passphrase(key: &'static str, passphrase: &'static str) -> Self {
        Self {
            key,
            passphrase: Some(passphrase),
        }
    }
}

/// JSON-over-HTTP transport built on reqwest.
pub struct RestTransport {
    client: Client,
    base_url: String,
    credentials: Credentials,
    auth: AuthHeaders,
}

impl fmt::Debug for RestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestTransport")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl RestTransport {
    /// Client with the configured request timeout and optional SOCKS5 proxy.
    /// A key without the passphrase the exchange requires is refused.
    pub fn new(base_url: &str, credentials: Credentials, auth: AuthHeaders) -> Result<Self> {
        if auth.passphrase.is_some()
            && !credentials.api_key.is_empty()
            && credentials.passphrase.is_none()
        {
            bail!("API_PASSPHRASE is required for {base_url}");
        }
        let cfg = config::current();
        let mut builder = Client::builder()
            .user_agent("exchange-gateway")
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(proxy) = &cfg.proxy_url {
            if !proxy.is_empty() {
                builder = builder
                    .proxy(Proxy::all(format!("socks5h://{}", proxy)).context("invalid proxy URL")?);
            }
        }
        let client = builder.build().context("building HTTP client")?;
        Ok(Self::with_client(client, base_url, credentials, auth))
    }

    pub fn with_client(
        client: Client,
        base_url: &str,
        credentials: Credentials,
        auth: AuthHeaders,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            auth,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for RestTransport {
    async fn request(&self, req: &TransportRequest) -> Result<Value, TransportError> {
        let url = format!("{}{}", self.base_url, req.path);
        let mut builder = self.client.request(req.method.into(), &url);
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        if req.private {
            builder = builder.header(self.auth.key, &self.credentials.api_key);
            if let (Some(header), Some(passphrase)) = (self.auth.passphrase, &self.credentials.passphrase) {
                builder = builder.header(header, passphrase);
            }
        }
        #[cfg(feature = "debug-logs")]
        tracing::debug!(method = %req.method, %url, "sending request");

        let resp = builder.send().await.map_err(from_reqwest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(error_from_body(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            TransportError::new(format!("malformed response body: {e}"))
                .with_status(status.as_u16())
                .with_body(text)
        })
    }

    fn authenticated(&self) -> bool {
        !self.credentials.api_key.is_empty()
    }
}

/// Flatten reqwest's error chain so the classifier sees the root cause
/// (e.g. "connection reset by peer" or "dns error").
fn from_reqwest(err: reqwest::Error) -> TransportError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    let mut out = TransportError::new(message);
    if let Some(status) = err.status() {
        out = out.with_status(status.as_u16());
    }
    if err.is_timeout() {
        out = out.with_code("ETIMEDOUT");
    }
    out
}

const CODE_FIELDS: &[&str] = &["code", "retCode", "error_code"];
const MESSAGE_FIELDS: &[&str] = &["msg", "message", "retMsg", "error", "sMsg"];

/// Extract the exchange's error code and message from a non-2xx body,
/// falling back to the HTTP reason phrase.
pub fn error_from_body(status: StatusCode, body: &str) -> TransportError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|v| {
        CODE_FIELDS.iter().find_map(|f| match v.get(*f)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    });
    let message = parsed
        .as_ref()
        .and_then(|v| {
            MESSAGE_FIELDS
                .iter()
                .find_map(|f| v.get(*f)?.as_str().filter(|s| !s.is_empty()))
                .map(str::to_string)
        })
        .or_else(|| {
            let trimmed = body.trim();
            (parsed.is_none() && !trimmed.is_empty() && trimmed.len() <= 200)
                .then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
        });

    let mut err = TransportError::new(message)
        .with_status(status.as_u16())
        .with_body(body);
    if let Some(code) = code {
        err = err.with_code(code);
    }
    err
}
