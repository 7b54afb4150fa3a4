//! Error types for the signing library.
//!
//! Every failure surfaced to the host carries a machine-readable kind
//! ([`ErrorKind`]) in addition to its message. Messages never contain
//! passwords or private-key bytes.

/// Result type alias for signing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error taxonomy used by the host to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Bad or missing arguments, missing files. Immediate, no retry.
    Input,
    /// Wrong password or unreadable archive. Immediate, no retry.
    Credential,
    /// TSA connectivity failure. Non-fatal for signing (downgrades to a
    /// no-timestamp result).
    Network,
    /// Cryptographic or document-structure failure. Fatal.
    Signing,
    /// Filesystem failure.
    Io,
}

/// Error types that can occur during certificate inspection and signing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required request field was blank
    #[error("Missing input: {0}")]
    MissingInput(&'static str),

    /// Referenced file does not exist
    #[error("File not found: {0}")]
    NotFound(String),

    /// Signer name was blank
    #[error("Signer name is required")]
    InvalidSigner,

    /// PKCS#12 MAC verification failed
    #[error("Wrong password for certificate archive")]
    WrongPassword,

    /// Archive bytes are not a readable PKCS#12 structure
    #[error("Corrupt certificate archive: {0}")]
    CorruptArchive(String),

    /// Archive parsed but holds no private-key entry
    #[error("Certificate archive contains no identity")]
    NoIdentity,

    /// X.509 certificate could not be parsed
    #[error("Certificate parse error: {0}")]
    CertificateParse(String),

    /// Every configured TSA server was exhausted
    #[error("Timestamp unavailable: {0}")]
    TimestampUnavailable(String),

    /// CMS/PKCS#7 signature assembly failure
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Input document is not a usable PDF
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Machine-readable kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingInput(_) | Error::NotFound(_) | Error::InvalidSigner => ErrorKind::Input,
            Error::WrongPassword | Error::CorruptArchive(_) | Error::NoIdentity => {
                ErrorKind::Credential
            },
            Error::TimestampUnavailable(_) => ErrorKind::Network,
            Error::CertificateParse(_) | Error::Signing(_) | Error::InvalidPdf(_) => {
                ErrorKind::Signing
            },
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input_kind() {
        let err = Error::MissingInput("pdf path");
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(format!("{}", err).contains("pdf path"));
    }

    #[test]
    fn test_credential_errors_never_leak_password() {
        let err = Error::WrongPassword;
        let msg = format!("{}", err);
        assert!(!msg.contains("test1234"));
        assert_eq!(err.kind(), ErrorKind::Credential);
    }

    #[test]
    fn test_timestamp_unavailable_is_network() {
        let err = Error::TimestampUnavailable("all servers failed".to_string());
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
