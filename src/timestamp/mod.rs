//! RFC3161 trusted timestamping.
//!
//! A resilient client for public Time-Stamping Authority servers: ordered
//! fallback list, bounded retries with progressive backoff, and error
//! classification that separates "try the next server" from "stop wasting
//! attempts on this one".

mod client;
mod request;

pub use client::{HttpTransport, TimestampAuthorityClient, TsaTransport};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;

/// Per-call TSA failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsaErrorKind {
    Http405,
    Http400,
    AuthenticationError,
    Timeout,
    SslError,
    DnsError,
    UnknownError,
}

impl TsaErrorKind {
    /// Whether another attempt against the same server can help.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TsaErrorKind::Http405 | TsaErrorKind::Http400 | TsaErrorKind::AuthenticationError
        )
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            TsaErrorKind::Http405 => "HTTP_405",
            TsaErrorKind::Http400 => "HTTP_400",
            TsaErrorKind::AuthenticationError => "AUTHENTICATION_ERROR",
            TsaErrorKind::Timeout => "TIMEOUT",
            TsaErrorKind::SslError => "SSL_ERROR",
            TsaErrorKind::DnsError => "DNS_ERROR",
            TsaErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

/// A classified failure from one timestamp attempt.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {message}", kind.label())]
pub struct TsaError {
    pub kind: TsaErrorKind,
    pub message: String,
}

impl TsaError {
    pub fn new(kind: TsaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(TsaErrorKind::UnknownError, message)
    }
}

/// An RFC3161 token obtained from a TSA server.
#[derive(Debug, Clone)]
pub struct TimestampToken {
    /// DER-encoded TimeStampToken (a CMS ContentInfo)
    pub der: Vec<u8>,
    /// genTime from the embedded TSTInfo
    pub gen_time: DateTime<Utc>,
    /// URL of the server that issued the token
    pub server: String,
}

/// Outcome of a timestamp acquisition across the fallback list.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TimestampResult {
    /// Whether a token was obtained
    pub success: bool,
    /// The token, present iff `success`
    #[serde(skip)]
    pub token: Option<TimestampToken>,
    /// Human-readable generation time ("YYYY-MM-DD HH:MM:SS UTC")
    pub timestamp_info: Option<String>,
    /// Server that answered, present iff `success`
    pub server_used: Option<String>,
    /// Failure description, present iff not `success`
    pub error: Option<String>,
}

impl TimestampResult {
    pub(crate) fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            token: None,
            timestamp_info: None,
            server_used: None,
            error: Some(error.into()),
        }
    }
}

/// Supplies a timestamp token over a message imprint during signature
/// assembly, so the embedded token always attests the real signed content.
pub trait TimestampProvider {
    /// Obtain a DER-encoded timestamp token covering `imprint`.
    fn timestamp(&self, imprint: &[u8]) -> Result<Vec<u8>>;
}

/// Cooperative cancellation signal threaded through the retry loop, so an
/// abandoned caller does not leave a blocked backoff sleep running.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next attempt boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_retryable_kinds() {
        assert!(!TsaErrorKind::Http405.is_retryable());
        assert!(!TsaErrorKind::Http400.is_retryable());
        assert!(!TsaErrorKind::AuthenticationError.is_retryable());
        assert!(TsaErrorKind::Timeout.is_retryable());
        assert!(TsaErrorKind::DnsError.is_retryable());
        assert!(TsaErrorKind::UnknownError.is_retryable());
    }

    #[test]
    fn test_tsa_error_display() {
        let err = TsaError::new(TsaErrorKind::Timeout, "read timed out");
        assert_eq!(err.to_string(), "TIMEOUT: read timed out");
    }

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());
        assert!(flag.clone().is_cancelled());
    }
}
