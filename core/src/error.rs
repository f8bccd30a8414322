use thiserror::Error;

use crate::retry::RetryFailure;

/// Failure reported by a transport: an HTTP status and exchange error code
/// when the venue provided them, plus a human readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
    pub body: Option<String>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            body: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Lower-cased message used for signature matching.
    pub fn normalized(&self) -> String {
        self.message.to_lowercase()
    }
}

/// Terminal failure of one adapter operation. `Display` is the envelope
/// reason.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error(transparent)]
    Call(#[from] RetryFailure),
    #[error("method not supported")]
    Unsupported,
    #[error("futures type missing")]
    FuturesTypeMissing,
    #[error("api credentials missing")]
    MissingCredentials,
    #[error("{0}")]
    Domain(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl GatewayError {
    pub fn domain(msg: impl Into<String>) -> Self {
        GatewayError::Domain(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        GatewayError::Malformed(msg.into())
    }
}
