//! Error types for smtp-relay.

use std::fmt;
use std::io;

/// Process-level error type: startup, configuration and listener failures.
#[derive(Debug)]
pub enum Error {
    /// I/O errors (network, file operations)
    Io(io::Error),
    /// TLS/certificate errors
    Tls(String),
    /// Configuration errors
    Config(String),
}

/// Failure of a single relay invocation.
///
/// These never leave the pipeline: they are recorded in the
/// [`SendOutcome`](crate::SendOutcome) and logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The payload could not be parsed as a MIME message
    MalformedMessage(String),
    /// The message has no usable From address
    NoSenderAddress,
    /// The delivery provider call failed
    Delivery(DeliveryError),
}

/// Errors reported by a [`DeliveryProvider`](crate::DeliveryProvider).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network or protocol failure talking to the provider
    Transport(String),
    /// The provider answered with a non-success status
    Rejected { status: u16, body: String },
    /// The request could not be turned into a provider message
    InvalidRequest(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Tls(msg) => write!(f, "TLS error: {msg}"),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMessage(msg) => write!(f, "malformed message: {msg}"),
            Self::NoSenderAddress => write!(f, "message has no sender address"),
            Self::Delivery(e) => write!(f, "delivery failed: {e}"),
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Rejected { status, body } => {
                write!(f, "provider rejected request with status {status}: {body}")
            }
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Delivery(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for DeliveryError {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DeliveryError> for RelayError {
    fn from(e: DeliveryError) -> Self {
        Self::Delivery(e)
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for DeliveryError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<lettre::error::Error> for DeliveryError {
    fn from(e: lettre::error::Error) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io_err) => io_err,
            other => Self::other(other.to_string()),
        }
    }
}

/// Result type alias for smtp-relay startup operations.
pub type Result<T> = std::result::Result<T, Error>;
