//! Shared error type across hitmeter crates.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Stable error codes (safe to log and match on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed bind address or config file.
    Configuration,
    /// Listening socket could not be acquired.
    Bind,
    /// Instrument name registered twice.
    DuplicateMetric,
    /// Instrument name not registered (or registered with another kind).
    UnknownMetric,
    /// Label tuple length does not match the schema.
    LabelArity,
    /// Bad instrument definition (name, label or buckets).
    InvalidMetric,
    /// Registry used after `unregister_all`.
    RegistryClosed,
    /// Lifecycle handle closed twice.
    AlreadyClosed,
    /// Listener did not shut down cleanly.
    Shutdown,
    /// Result record could not be decoded.
    Decode,
}

impl ErrorCode {
    /// String representation used in logs and HTTP error bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Configuration => "CONFIGURATION",
            ErrorCode::Bind => "BIND",
            ErrorCode::DuplicateMetric => "DUPLICATE_METRIC",
            ErrorCode::UnknownMetric => "UNKNOWN_METRIC",
            ErrorCode::LabelArity => "LABEL_ARITY",
            ErrorCode::InvalidMetric => "INVALID_METRIC",
            ErrorCode::RegistryClosed => "REGISTRY_CLOSED",
            ErrorCode::AlreadyClosed => "ALREADY_CLOSED",
            ErrorCode::Shutdown => "SHUTDOWN",
            ErrorCode::Decode => "DECODE",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, HitmeterError>;

/// Unified error type used by core and exporter.
#[derive(Debug, Error)]
pub enum HitmeterError {
    #[error("invalid bind address {0:?}: must look like '0.0.0.0:8880'")]
    InvalidAddress(String),
    #[error("config: {0}")]
    Config(String),
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("metric already registered: {0}")]
    DuplicateMetric(String),
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
    #[error("metric {metric} expects {expected} label values, got {got}")]
    LabelArity {
        metric: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("invalid buckets: {0}")]
    InvalidBuckets(String),
    #[error("registry closed")]
    RegistryClosed,
    #[error("already closed")]
    AlreadyClosed,
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
    #[error("shutdown: {0}")]
    Shutdown(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("{} errors, first: {}", .0.len(), first_message(.0))]
    Multiple(Vec<HitmeterError>),
}

fn first_message(errs: &[HitmeterError]) -> String {
    errs.first().map(ToString::to_string).unwrap_or_default()
}

impl HitmeterError {
    /// Map an error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            HitmeterError::InvalidAddress(_) | HitmeterError::Config(_) => ErrorCode::Configuration,
            HitmeterError::Bind { .. } => ErrorCode::Bind,
            HitmeterError::DuplicateMetric(_) => ErrorCode::DuplicateMetric,
            HitmeterError::UnknownMetric(_) => ErrorCode::UnknownMetric,
            HitmeterError::LabelArity { .. } => ErrorCode::LabelArity,
            HitmeterError::InvalidName(_) | HitmeterError::InvalidBuckets(_) => {
                ErrorCode::InvalidMetric
            }
            HitmeterError::RegistryClosed => ErrorCode::RegistryClosed,
            HitmeterError::AlreadyClosed => ErrorCode::AlreadyClosed,
            HitmeterError::ShutdownTimeout(_) | HitmeterError::Shutdown(_) => ErrorCode::Shutdown,
            HitmeterError::Decode(_) => ErrorCode::Decode,
            HitmeterError::Multiple(errs) => errs
                .first()
                .map(HitmeterError::code)
                .unwrap_or(ErrorCode::Shutdown),
        }
    }

    /// Collapse a list of collected errors: none is `Ok`, one is returned
    /// as is, more become `Multiple`.
    pub fn collect(mut errs: Vec<HitmeterError>) -> Result<()> {
        match errs.len() {
            0 => Ok(()),
            1 => Err(errs.remove(0)),
            _ => Err(HitmeterError::Multiple(errs)),
        }
    }
}
