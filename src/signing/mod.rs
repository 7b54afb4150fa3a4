//! Document signing pipeline.
//!
//! Ties the other modules together: a [`SignatureRequest`] describes one
//! signing job; [`SigningOrchestrator`] validates it, loads the identity,
//! prepares the incremental update, produces the detached CMS signature and
//! applies the no-timestamp retry policy. Results are always returned as a
//! [`SignatureResult`], never a panic or a bare error, so host applications
//! can relay them directly to a UI.

mod appearance;
pub(crate) mod byterange;
mod orchestrator;
mod signer;

pub use byterange::ByteRangeCalculator;
pub use orchestrator::SigningOrchestrator;
pub use signer::CmsSigner;

use std::path::PathBuf;

use crate::error::ErrorKind;
use crate::geometry::Rect;

/// One PDF signing job.
#[derive(Clone)]
pub struct SignatureRequest {
    /// PDF to sign
    pub document_path: PathBuf,
    /// PKCS#12 archive holding the signing identity
    pub certificate_path: PathBuf,
    /// Archive password
    pub certificate_password: String,
    /// Name shown in the stamp and the signature dictionary
    pub signer_name: String,
    /// /Location entry and stamp line
    pub location: String,
    /// /Reason entry and stamp line
    pub reason: String,
    /// Stamp rectangle in page space
    pub rect: Rect,
    /// 1-based page for the stamp
    pub page: usize,
    /// Whether to request an RFC3161 timestamp
    pub enable_timestamp: bool,
    /// TSA tried before the default list
    pub timestamp_url: Option<String>,
}

impl SignatureRequest {
    /// Create a request with the default stamp placement (150x50 at
    /// (100, 100) on page 1) and timestamping off.
    pub fn new(
        document_path: impl Into<PathBuf>,
        certificate_path: impl Into<PathBuf>,
        certificate_password: impl Into<String>,
    ) -> Self {
        Self {
            document_path: document_path.into(),
            certificate_path: certificate_path.into(),
            certificate_password: certificate_password.into(),
            signer_name: String::new(),
            location: String::new(),
            reason: String::new(),
            rect: Rect::new(100.0, 100.0, 150.0, 50.0),
            page: 1,
            enable_timestamp: false,
            timestamp_url: None,
        }
    }

    pub fn with_signer_name(mut self, name: impl Into<String>) -> Self {
        self.signer_name = name.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the stamp rectangle.
    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    /// Set the 1-based stamp page.
    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    /// Request an RFC3161 timestamp.
    pub fn with_timestamp(mut self, enable: bool) -> Self {
        self.enable_timestamp = enable;
        self
    }

    /// Set a TSA tried before the default list.
    pub fn with_timestamp_url(mut self, url: impl Into<String>) -> Self {
        self.timestamp_url = Some(url.into());
        self
    }
}

impl std::fmt::Debug for SignatureRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureRequest")
            .field("document_path", &self.document_path)
            .field("certificate_path", &self.certificate_path)
            .field("certificate_password", &"[REDACTED]")
            .field("signer_name", &self.signer_name)
            .field("location", &self.location)
            .field("reason", &self.reason)
            .field("rect", &self.rect)
            .field("page", &self.page)
            .field("enable_timestamp", &self.enable_timestamp)
            .field("timestamp_url", &self.timestamp_url)
            .finish()
    }
}

/// Outcome of one signing job.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SignatureResult {
    /// Whether a signed document was produced
    pub success: bool,
    /// Human-readable outcome summary
    pub message: String,
    /// Path of the signed copy, present iff `success`
    pub signed_path: Option<PathBuf>,
    /// Whether the embedded signature carries a timestamp token
    pub timestamp_used: bool,
    /// Generation time from the preflight probe
    pub timestamp_info: Option<String>,
    /// TSA server that answered the probe
    pub tsa_server_used: Option<String>,
    /// Non-fatal degradation notice (timestamp requested but dropped)
    pub warning: Option<String>,
    /// Failure description, present iff not `success`
    pub error: Option<String>,
    /// Machine-readable failure classification
    pub error_kind: Option<ErrorKind>,
}

impl SignatureResult {
    /// JSON form used by host bridges.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub(crate) fn from_error(err: crate::error::Error) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            signed_path: None,
            timestamp_used: false,
            timestamp_info: None,
            tsa_server_used: None,
            warning: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_request_debug_redacts_password() {
        let request = SignatureRequest::new("doc.pdf", "cert.p12", "hunter2");
        let debug = format!("{:?}", request);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_request_builder_defaults() {
        let request = SignatureRequest::new("doc.pdf", "cert.p12", "pw");
        assert_eq!(request.page, 1);
        assert!(!request.enable_timestamp);
        assert_eq!(request.rect.width, 150.0);
        assert_eq!(request.rect.height, 50.0);
    }

    #[test]
    fn test_result_from_error_carries_kind() {
        let result = SignatureResult::from_error(Error::InvalidSigner);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Input));
        assert!(result.error.is_some());
    }
}
