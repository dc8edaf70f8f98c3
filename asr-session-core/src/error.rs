//! Error taxonomy for the ASR session core.
//!
//! Mirrors the six error kinds in the specification: configuration errors
//! and vendor-fatal errors are fatal, transient connection errors and
//! reconnectable vendor errors trigger the reconnect supervisor, and local
//! I/O warnings / protocol anomalies are logged but never fail the session.

use thiserror::Error;

/// Trait for error types that provide a machine-readable error code, used
/// when forwarding vendor errors to the host's `asr_error` sink.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &str;
}

/// Disposition an error has on the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Surface to the host and transition the session to `Closed`.
    Fatal,
    /// Hand off to the reconnect supervisor; session keeps retrying.
    Reconnectable,
    /// Surface to the host as a non-fatal error; session stays open.
    NonFatal,
}

/// Errors raised by the session orchestrator and its components.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Missing required credentials or malformed configuration JSON.
    /// Fatal; surfaced at `on_init` and the session never starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connect timeout, transport closure, or invalid message framing.
    /// Reconnectable by default.
    #[error("transient connection error: {0}")]
    Connection(String),

    /// Vendor-reported error identified by a vendor-specific code.
    /// Whether this is reconnectable is decided by the extension-specific
    /// predicate passed to [`classify_vendor_error`].
    #[error("vendor error {code}: {message}")]
    Vendor {
        /// Vendor-specific error code (string form; vendors use ints or enums).
        code: String,
        message: String,
        /// Pre-computed disposition, set by the caller via `classify_vendor_error`.
        disposition: ErrorDisposition,
    },
}

impl SessionError {
    /// Returns how the orchestrator should react to this error.
    #[must_use]
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            Self::Configuration(_) => ErrorDisposition::Fatal,
            Self::Connection(_) => ErrorDisposition::Reconnectable,
            Self::Vendor { disposition, .. } => *disposition,
        }
    }
}

impl ErrorCode for SessionError {
    fn code(&self) -> &str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::Connection(_) => "transient_connection_error",
            Self::Vendor { code, .. } => code,
        }
    }
}

/// Classifies a vendor-reported error code using an extension-specific
/// predicate for "is this code reconnectable" (taxonomy kind 3 vs 4).
#[must_use]
pub fn classify_vendor_error(
    code: impl Into<String>,
    message: impl Into<String>,
    is_reconnectable: impl FnOnce(&str) -> bool,
) -> SessionError {
    let code = code.into();
    let disposition = if is_reconnectable(&code) {
        ErrorDisposition::Reconnectable
    } else {
        ErrorDisposition::Fatal
    };
    SessionError::Vendor {
        code,
        message: message.into(),
        disposition,
    }
}

/// Convenience `Result` alias used throughout the crate.
pub type SessionResult<T> = Result<T, SessionError>;
