//! # Firmador
//!
//! PDF digital signing with PKCS#12 identities and RFC3161 trusted
//! timestamps.
//!
//! ## Core Features
//!
//! ### Certificates
//! - **PKCS#12 Loading**: password-verified archives, key + chain extraction
//! - **Certificate Metadata**: subject, issuer, validity window, key usages,
//!   serial number, algorithms
//! - **Key Hygiene**: private-key bytes zeroized on drop, never logged
//!
//! ### Timestamping
//! - **RFC3161 Client**: ordered fallback across five public TSA servers
//! - **Resilience**: bounded per-server retries, progressive backoff,
//!   error classification, cooperative cancellation
//! - **Real-Digest Tokens**: the embedded token covers the final signature
//!   bytes, not a placeholder
//!
//! ### Signing
//! - **Detached CMS**: PKCS#7 SignedData over the document's ByteRange
//! - **Incremental Updates**: the input file's bytes are never rewritten
//! - **Visible Stamp**: widget annotation with signer, date, location,
//!   reason and timestamp lines
//! - **Graceful Degradation**: timestamp failure downgrades to a signed
//!   document with a warning instead of failing the job
//!
//! ## Quick Start
//!
//! ```ignore
//! use firmador::{SignatureRequest, SigningOrchestrator};
//!
//! let request = SignatureRequest::new("contract.pdf", "identity.p12", "secret")
//!     .with_signer_name("Jane Doe")
//!     .with_location("San Jose")
//!     .with_reason("Approval")
//!     .with_timestamp(true);
//!
//! let result = SigningOrchestrator::new().sign_document(&request);
//! if result.success {
//!     println!("signed copy at {:?}", result.signed_path);
//! }
//! ```

pub mod certificate;
pub mod config;
pub mod error;
pub mod geometry;
pub mod pdf;
pub mod signing;
pub mod timestamp;

pub use certificate::{CertificateInfo, CertificateStore, KeyMaterial, KeyUsage};
pub use config::{SigningConfig, TsaConfig, DEFAULT_TSA_SERVERS};
pub use error::{Error, ErrorKind, Result};
pub use geometry::Rect;
pub use signing::{SignatureRequest, SignatureResult, SigningOrchestrator};
pub use timestamp::{CancelFlag, TimestampAuthorityClient, TimestampResult};

use std::path::Path;

/// Read the leaf certificate metadata out of a PKCS#12 archive.
///
/// Convenience wrapper over [`CertificateStore::load`] +
/// [`CertificateStore::certificate_info`].
pub fn inspect_certificate(
    path: impl AsRef<Path>,
    password: &str,
) -> Result<CertificateInfo> {
    CertificateStore::load(path, password)?.certificate_info()
}

/// Sign a PDF with the default configuration.
///
/// Equivalent to `SigningOrchestrator::new().sign_document(request)`.
pub fn sign_document(request: &SignatureRequest) -> SignatureResult {
    SigningOrchestrator::new().sign_document(request)
}
