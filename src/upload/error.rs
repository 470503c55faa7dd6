use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Remote operation an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    UploadCredentials,
    ObjectUpload,
    Parse,
    Status,
    Submit,
    Poll,
    SafeSubmit,
    Workflow,
}

impl Endpoint {
    /// API path for the platform endpoints, `None` for local stages.
    pub fn path(self) -> Option<&'static str> {
        match self {
            Endpoint::UploadCredentials => Some("/global/commodity/upload/sts"),
            Endpoint::Parse => Some("/global/commodity/upload/create"),
            Endpoint::Status => Some("/global/commodity/upload/status"),
            Endpoint::Submit => Some("/global/commodity/upload/submit"),
            Endpoint::ObjectUpload | Endpoint::Poll | Endpoint::SafeSubmit | Endpoint::Workflow => {
                None
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Endpoint::UploadCredentials => "upload_credentials",
            Endpoint::ObjectUpload => "object_upload",
            Endpoint::Parse => "parse",
            Endpoint::Status => "status",
            Endpoint::Submit => "submit",
            Endpoint::Poll => "poll",
            Endpoint::SafeSubmit => "safe_submit",
            Endpoint::Workflow => "workflow",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportErrorKind {
    Timeout,
    Connection,
    Unexpected,
}

/// Failure to get any HTTP response at all.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("unexpected transport failure: {0}")]
    Unexpected(String),
}

impl TransportError {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::Timeout(_) => TransportErrorKind::Timeout,
            TransportError::Connection(_) => TransportErrorKind::Connection,
            TransportError::Unexpected(_) => TransportErrorKind::Unexpected,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connection(err.to_string())
        } else {
            TransportError::Unexpected(err.to_string())
        }
    }
}

/// Orchestrator-level failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainErrorCode {
    ParsingNotComplete,
    ParsingFailed,
    OfflineAnalysis,
    UnknownStatus,
    UnexpectedStatus,
    StatusCheckFailed,
    AutoPollFailed,
    PollCancelled,
    InvalidInput,
}

impl DomainErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DomainErrorCode::ParsingNotComplete => "PARSING_NOT_COMPLETE",
            DomainErrorCode::ParsingFailed => "PARSING_FAILED",
            DomainErrorCode::OfflineAnalysis => "OFFLINE_ANALYSIS",
            DomainErrorCode::UnknownStatus => "UNKNOWN_STATUS",
            DomainErrorCode::UnexpectedStatus => "UNEXPECTED_STATUS",
            DomainErrorCode::StatusCheckFailed => "STATUS_CHECK_FAILED",
            DomainErrorCode::AutoPollFailed => "AUTO_POLL_FAILED",
            DomainErrorCode::PollCancelled => "POLL_CANCELLED",
            DomainErrorCode::InvalidInput => "INVALID_INPUT",
        }
    }
}

/// Machine-readable classification carried by every [`OperationError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ErrorCode {
    Transport(TransportErrorKind),
    /// Non-200 HTTP status from the platform API.
    Http(u16),
    /// Non-zero `c` in the response envelope.
    Api(String),
    ParseError,
    /// Non-200 status from object storage.
    Upload(u16),
    Domain(DomainErrorCode),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Transport(TransportErrorKind::Timeout) => f.write_str("TIMEOUT"),
            ErrorCode::Transport(TransportErrorKind::Connection) => f.write_str("CONNECTION"),
            ErrorCode::Transport(TransportErrorKind::Unexpected) => f.write_str("UNEXPECTED"),
            ErrorCode::Http(status) => write!(f, "HTTP_{}", status),
            ErrorCode::Api(code) => f.write_str(code),
            ErrorCode::ParseError => f.write_str("PARSE_ERROR"),
            ErrorCode::Upload(status) => write!(f, "UPLOAD_{}", status),
            ErrorCode::Domain(code) => f.write_str(code.as_str()),
        }
    }
}

/// The request as it was sent, minus the signature. Secrets never enter it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestEcho {
    pub method: String,
    pub path: String,
    pub params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl RequestEcho {
    pub fn local(params: impl IntoIterator<Item = (&'static str, String)>) -> Self {
        Self {
            method: "LOCAL".to_string(),
            path: String::new(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            body: None,
        }
    }
}

/// Structured failure returned by every operation in place of a panic.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{endpoint}: {message} (code {code})")]
pub struct OperationError {
    pub message: String,
    pub code: ErrorCode,
    pub endpoint: Endpoint,
    pub request: RequestEcho,
    /// Raw remote payload when one was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    pub attempts: u32,
    /// Lower-level failure this one was derived from.
    #[source]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<OperationError>>,
}

impl OperationError {
    pub fn new(endpoint: Endpoint, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            endpoint,
            request: RequestEcho::default(),
            raw: None,
            attempts: 1,
            cause: None,
        }
    }

    pub fn domain(endpoint: Endpoint, code: DomainErrorCode, message: impl Into<String>) -> Self {
        Self::new(endpoint, ErrorCode::Domain(code), message)
    }

    pub fn transport(endpoint: Endpoint, err: &TransportError) -> Self {
        Self::new(endpoint, ErrorCode::Transport(err.kind()), err.to_string())
    }

    pub fn with_request(mut self, request: RequestEcho) -> Self {
        self.request = request;
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_cause(mut self, cause: OperationError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn domain_code(&self) -> Option<DomainErrorCode> {
        match self.code {
            ErrorCode::Domain(code) => Some(code),
            _ => None,
        }
    }
}

pub type OperationResult<T> = Result<T, OperationError>;
