//! End-to-end signing pipeline with the no-timestamp retry policy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};

use super::appearance::appearance_lines;
use super::byterange::ByteRangeCalculator;
use super::signer::CmsSigner;
use super::{SignatureRequest, SignatureResult};
use crate::certificate::CertificateStore;
use crate::config::{SigningConfig, TsaConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::pdf::{prepare_signature_update, PdfDocument, SignatureFieldSpec};
use crate::timestamp::{
    TimestampAuthorityClient, TimestampProvider, TsaTransport,
};

/// Probe message for the preflight timestamp check. The reply pins a
/// responsive server and supplies the generation time shown in the stamp;
/// its token is discarded.
const PROBE_MESSAGE: &[u8] = b"timestamp-preflight-probe";

const RETRY_WARNING: &str =
    "Timestamp was requested but failed, document signed without timestamp";

/// Drives one signing job from request to signed file.
///
/// State machine: Validate -> LoadIdentity -> BuildAppearance ->
/// Sign(withTimestamp) -> Done, with a single retry without timestamp when
/// the first pass fails for a network reason. Never panics; every outcome
/// becomes a [`SignatureResult`].
pub struct SigningOrchestrator {
    tsa_config: TsaConfig,
    signing_config: SigningConfig,
    transport: Option<Arc<dyn TsaTransport>>,
}

impl Default for SigningOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl SigningOrchestrator {
    pub fn new() -> Self {
        Self::with_configs(TsaConfig::default(), SigningConfig::default())
    }

    pub fn with_configs(tsa_config: TsaConfig, signing_config: SigningConfig) -> Self {
        Self {
            tsa_config,
            signing_config,
            transport: None,
        }
    }

    /// Replace the TSA transport (used by tests).
    pub fn with_transport(mut self, transport: Arc<dyn TsaTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sign the document described by `request`.
    ///
    /// When timestamping was requested and the pipeline fails for a network
    /// reason, the job is re-run once without a timestamp; that success
    /// carries a warning instead of failing the whole job.
    pub fn sign_document(&self, request: &SignatureRequest) -> SignatureResult {
        info!(
            "Starting PDF signing process for: {}",
            request.document_path.display()
        );

        if let Err(err) = validate(request) {
            warn!("Request validation failed: {}", err);
            return SignatureResult::from_error(err);
        }

        match self.run(request, request.enable_timestamp) {
            Ok(outcome) => outcome.into_result(),
            Err(err) if request.enable_timestamp && err.kind() == ErrorKind::Network => {
                warn!("Signing with timestamp failed, retrying without: {}", err);
                match self.run(request, false) {
                    Ok(mut outcome) => {
                        outcome.warning = Some(RETRY_WARNING.to_string());
                        outcome.into_result()
                    },
                    Err(retry_err) => {
                        error!("Retry without timestamp also failed: {}", retry_err);
                        SignatureResult::from_error(retry_err)
                    },
                }
            },
            Err(err) => {
                error!("Signing failed: {}", err);
                SignatureResult::from_error(err)
            },
        }
    }

    fn run(&self, request: &SignatureRequest, with_timestamp: bool) -> Result<PipelineOutcome> {
        let store = CertificateStore::load(
            &request.certificate_path,
            &request.certificate_password,
        )?;
        let identity = store.extract_identity()?;
        let cert_info = store.certificate_info()?;
        if !cert_info.is_currently_valid {
            warn!(
                "Signing certificate is outside its validity period ({} to {})",
                cert_info.valid_from, cert_info.valid_to
            );
        }

        let doc = PdfDocument::load(&request.document_path)?;

        let mut timestamp_info = None;
        let mut pinned_server = None;
        let mut warning = None;
        if with_timestamp {
            let probe = self
                .client()
                .get_timestamp_token(PROBE_MESSAGE, request.timestamp_url.as_deref());
            if probe.success {
                info!(
                    "Timestamp preflight succeeded via {:?}",
                    probe.server_used
                );
                timestamp_info = probe.timestamp_info;
                pinned_server = probe.server_used;
            } else {
                warn!(
                    "Timestamp preflight failed: {}",
                    probe.error.as_deref().unwrap_or("unknown")
                );
                warning = Some(RETRY_WARNING.to_string());
            }
        }
        let timestamp_active = pinned_server.is_some();

        let display_target = pinned_server
            .as_deref()
            .or(request.timestamp_url.as_deref())
            .unwrap_or("");
        // The stamp reflects what was asked for, not what this pass attempts:
        // on the no-timestamp retry it must still read "Requested but not
        // available" rather than "Not included".
        let lines = appearance_lines(
            &request.signer_name,
            &request.location,
            &request.reason,
            request.enable_timestamp,
            timestamp_info.as_deref(),
            TimestampAuthorityClient::display_name(display_target),
        );

        let calc = ByteRangeCalculator::new(self.signing_config.estimated_signature_size);
        let field_spec = SignatureFieldSpec {
            page: request.page,
            rect: request.rect,
            field_name: "Signature1".to_string(),
            signer_name: request.signer_name.clone(),
            reason: request.reason.clone(),
            location: request.location.clone(),
            appearance_lines: lines,
            placeholder_size: calc.placeholder_size(),
        };
        let prepared = prepare_signature_update(&doc, &field_spec)?;
        let signed_bytes =
            ByteRangeCalculator::extract_signed_bytes(&prepared.bytes, &prepared.byte_range)?;

        let signer = CmsSigner::new(&identity);
        let signature = if timestamp_active {
            let provider = TsaCallbackProvider {
                client: self.client(),
                preferred: pinned_server.clone(),
            };
            signer.sign(&signed_bytes, Some(&provider))?
        } else {
            signer.sign(&signed_bytes, None)?
        };

        let mut bytes = prepared.bytes;
        calc.insert_signature(&mut bytes, prepared.contents_offset, &signature)?;

        let output = output_path(&request.document_path, &self.signing_config.output_suffix);
        std::fs::write(&output, &bytes)?;
        info!("PDF signed successfully: {}", output.display());

        Ok(PipelineOutcome {
            signed_path: output,
            timestamp_used: timestamp_active,
            timestamp_info: if timestamp_active { timestamp_info } else { None },
            tsa_server_used: pinned_server,
            warning,
        })
    }

    fn client(&self) -> TimestampAuthorityClient {
        match &self.transport {
            Some(transport) => TimestampAuthorityClient::with_transport(
                self.tsa_config.clone(),
                Arc::clone(transport),
            ),
            None => TimestampAuthorityClient::new(self.tsa_config.clone()),
        }
    }
}

/// Requests the embedded token over the real signature bytes, pinned to the
/// server that answered the preflight probe.
struct TsaCallbackProvider {
    client: TimestampAuthorityClient,
    preferred: Option<String>,
}

impl TimestampProvider for TsaCallbackProvider {
    fn timestamp(&self, imprint: &[u8]) -> Result<Vec<u8>> {
        let result = self
            .client
            .get_timestamp_token(imprint, self.preferred.as_deref());
        match result.token {
            Some(token) if result.success => Ok(token.der),
            _ => Err(Error::TimestampUnavailable(
                result
                    .error
                    .unwrap_or_else(|| "timestamp acquisition failed".to_string()),
            )),
        }
    }
}

struct PipelineOutcome {
    signed_path: PathBuf,
    timestamp_used: bool,
    timestamp_info: Option<String>,
    tsa_server_used: Option<String>,
    warning: Option<String>,
}

impl PipelineOutcome {
    fn into_result(self) -> SignatureResult {
        let message = if self.timestamp_used {
            "Document signed successfully".to_string()
        } else {
            "Document signed successfully (without timestamp)".to_string()
        };
        SignatureResult {
            success: true,
            message,
            signed_path: Some(self.signed_path),
            timestamp_used: self.timestamp_used,
            timestamp_info: self.timestamp_info,
            tsa_server_used: self.tsa_server_used,
            warning: self.warning,
            error: None,
            error_kind: None,
        }
    }
}

fn validate(request: &SignatureRequest) -> Result<()> {
    if request.document_path.as_os_str().is_empty() {
        return Err(Error::MissingInput("document path"));
    }
    if request.certificate_path.as_os_str().is_empty() {
        return Err(Error::MissingInput("certificate path"));
    }
    if request.certificate_password.is_empty() {
        return Err(Error::MissingInput("certificate password"));
    }
    if request.signer_name.trim().is_empty() {
        return Err(Error::InvalidSigner);
    }
    if !request.document_path.exists() {
        return Err(Error::NotFound(request.document_path.display().to_string()));
    }
    if !request.certificate_path.exists() {
        return Err(Error::NotFound(
            request.certificate_path.display().to_string(),
        ));
    }
    Ok(())
}

/// `<stem><suffix>.<ext>` next to the input; the original is never touched.
fn output_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    input.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_inserts_suffix() {
        let out = output_path(Path::new("/tmp/report.pdf"), "_signed");
        assert_eq!(out, Path::new("/tmp/report_signed.pdf"));
    }

    #[test]
    fn test_output_path_without_extension() {
        let out = output_path(Path::new("/tmp/report"), "_signed");
        assert_eq!(out, Path::new("/tmp/report_signed"));
    }

    #[test]
    fn test_validate_blank_fields() {
        let request = SignatureRequest::new("", "cert.p12", "pw").with_signer_name("Jane");
        assert!(matches!(
            validate(&request),
            Err(Error::MissingInput("document path"))
        ));

        let request = SignatureRequest::new("doc.pdf", "cert.p12", "").with_signer_name("Jane");
        assert!(matches!(
            validate(&request),
            Err(Error::MissingInput("certificate password"))
        ));
    }

    #[test]
    fn test_validate_blank_signer() {
        let request = SignatureRequest::new("doc.pdf", "cert.p12", "pw").with_signer_name("   ");
        assert!(matches!(validate(&request), Err(Error::InvalidSigner)));
    }

    #[test]
    fn test_validate_missing_files() {
        let request =
            SignatureRequest::new("/no/such/doc.pdf", "/no/such/cert.p12", "pw")
                .with_signer_name("Jane");
        assert!(matches!(validate(&request), Err(Error::NotFound(_))));
    }
}
