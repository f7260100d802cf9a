//! Error taxonomy for the forwarding core.
//!
//! Each variant corresponds to one entry of the error taxonomy: an HTTP
//! status to surface to the client, the historical error-page code (kept
//! so log lines and error pages stay recognizable), and, where applicable,
//! the transport error that caused it.

use std::io;

/// A terminal or provisional forwarding failure.
///
/// `fail()` may overwrite a prior `FwdError` with a later one; the last
/// one recorded wins if every candidate is exhausted.
#[derive(Debug, thiserror::Error)]
pub enum FwdError {
    #[error("forwarding denied by access control")]
    AccessDenied,

    #[error("proxy is shutting down")]
    ShuttingDown,

    #[error("DNS resolution failed for {host}: {source}")]
    DnsFail { host: String, source: io::Error },

    #[error("connect to {host}:{port} failed: {source}")]
    ConnectFail {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("connect to {host}:{port} timed out")]
    ConnectTimeout { host: String, port: u16 },

    #[error("TLS handshake with {host}:{port} failed: {source}")]
    TlsFail {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("unsupported request protocol")]
    UnsupportedProtocol,

    #[error("failed to allocate outgoing socket: {source}")]
    SocketAllocFail { source: io::Error },

    #[error("no forwarding candidates available")]
    CannotForward,
}

impl FwdError {
    /// HTTP status to surface to the client if this error survives to
    /// `completed()` with an empty entry.
    pub fn http_status(&self) -> u16 {
        match self {
            FwdError::AccessDenied => 403,
            FwdError::ShuttingDown => 503,
            FwdError::DnsFail { .. } => 503,
            FwdError::ConnectFail { .. } => 503,
            FwdError::ConnectTimeout { .. } => 504,
            FwdError::TlsFail { .. } => 503,
            FwdError::UnsupportedProtocol => 400,
            FwdError::SocketAllocFail { .. } => 500,
            FwdError::CannotForward => 503,
        }
    }

    /// The historical error-page code, preserved for log-message and
    /// error-page continuity.
    pub fn page_code(&self) -> &'static str {
        match self {
            FwdError::AccessDenied => "ERR_FORWARDING_DENIED",
            FwdError::ShuttingDown => "ERR_SHUTTING_DOWN",
            FwdError::DnsFail { .. } => "ERR_DNS_FAIL",
            FwdError::ConnectFail { .. } => "ERR_CONNECT_FAIL",
            FwdError::ConnectTimeout { .. } => "ERR_CONNECT_FAIL",
            FwdError::TlsFail { .. } => "ERR_CONNECT_FAIL",
            FwdError::UnsupportedProtocol => "ERR_UNSUP_REQ",
            FwdError::SocketAllocFail { .. } => "ERR_SOCKET_FAILURE",
            FwdError::CannotForward => "ERR_CANNOT_FORWARD",
        }
    }

    /// True for errors that are terminal regardless of remaining retry
    /// budget (DNS failure against a direct origin sets `dont_retry`; the
    /// caller is responsible for that half of the rule, this just names
    /// which errors are "connect-class" for statistics/logging purposes).
    pub fn is_connect_class(&self) -> bool {
        matches!(
            self,
            FwdError::DnsFail { .. }
                | FwdError::ConnectFail { .. }
                | FwdError::ConnectTimeout { .. }
                | FwdError::TlsFail { .. }
        )
    }
}
