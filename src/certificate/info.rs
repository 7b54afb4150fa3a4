//! X.509 certificate metadata extraction.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use x509_parser::prelude::*;

use crate::error::{Error, Result};

lazy_static! {
    /// Fallback CN extraction when structured attribute parsing yields nothing.
    static ref CN_PATTERN: Regex = Regex::new(r"CN=([^,]+)").unwrap();
}

/// Semantic key-usage flags decoded from the 9-bit KeyUsage extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum KeyUsage {
    DigitalSignature,
    NonRepudiation,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    KeyCertSign,
    CrlSign,
    EncipherOnly,
    DecipherOnly,
}

impl KeyUsage {
    /// Human-readable label as shown by the host UI.
    pub fn label(&self) -> &'static str {
        match self {
            KeyUsage::DigitalSignature => "Digital Signature",
            KeyUsage::NonRepudiation => "Non Repudiation",
            KeyUsage::KeyEncipherment => "Key Encipherment",
            KeyUsage::DataEncipherment => "Data Encipherment",
            KeyUsage::KeyAgreement => "Key Agreement",
            KeyUsage::KeyCertSign => "Certificate Sign",
            KeyUsage::CrlSign => "CRL Sign",
            KeyUsage::EncipherOnly => "Encipher Only",
            KeyUsage::DecipherOnly => "Decipher Only",
        }
    }
}

impl std::fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Metadata derived from an X.509 certificate. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CertificateInfo {
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Common name from the subject DN
    pub common_name: String,
    /// Serial number as uppercase hex
    pub serial_number: String,
    /// Start of the validity window (UTC)
    pub valid_from: DateTime<Utc>,
    /// End of the validity window (UTC)
    pub valid_to: DateTime<Utc>,
    /// Signature algorithm name
    pub signature_algorithm: String,
    /// Public-key algorithm name
    pub public_key_algorithm: String,
    /// X.509 version (3 for v3)
    pub version: u32,
    /// Decoded key-usage flags
    pub key_usages: Vec<KeyUsage>,
    /// Whether now falls within the validity window
    pub is_currently_valid: bool,
}

impl CertificateInfo {
    /// JSON form used by host bridges.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Parse a DER-encoded X.509 certificate into [`CertificateInfo`].
pub fn parse_certificate_info(der: &[u8]) -> Result<CertificateInfo> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::CertificateParse(e.to_string()))?;

    let subject = cert.subject().to_string();
    let issuer = cert.issuer().to_string();
    let common_name = extract_common_name(cert.subject(), &subject);

    let serial_number = cert
        .raw_serial()
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<String>();

    let validity = cert.validity();
    let valid_from = DateTime::<Utc>::from_timestamp(validity.not_before.timestamp(), 0)
        .ok_or_else(|| Error::CertificateParse("notBefore out of range".to_string()))?;
    let valid_to = DateTime::<Utc>::from_timestamp(validity.not_after.timestamp(), 0)
        .ok_or_else(|| Error::CertificateParse("notAfter out of range".to_string()))?;

    Ok(CertificateInfo {
        common_name,
        serial_number,
        valid_from,
        valid_to,
        signature_algorithm: signature_algorithm_name(&cert),
        public_key_algorithm: public_key_algorithm_name(&cert),
        version: cert.version().0 + 1,
        key_usages: decode_key_usages(&cert),
        is_currently_valid: validity.is_valid(),
        subject,
        issuer,
    })
}

/// Common name from the subject DN's CN attribute (OID 2.5.4.3), falling back
/// to a regex match on the DN text.
fn extract_common_name(name: &X509Name<'_>, dn_text: &str) -> String {
    if let Some(cn) = name
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
    {
        return cn.to_string();
    }

    CN_PATTERN
        .captures(dn_text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn decode_key_usages(cert: &X509Certificate<'_>) -> Vec<KeyUsage> {
    let mut usages = Vec::new();
    if let Ok(Some(ext)) = cert.key_usage() {
        let ku = &ext.value;
        if ku.digital_signature() {
            usages.push(KeyUsage::DigitalSignature);
        }
        if ku.non_repudiation() {
            usages.push(KeyUsage::NonRepudiation);
        }
        if ku.key_encipherment() {
            usages.push(KeyUsage::KeyEncipherment);
        }
        if ku.data_encipherment() {
            usages.push(KeyUsage::DataEncipherment);
        }
        if ku.key_agreement() {
            usages.push(KeyUsage::KeyAgreement);
        }
        if ku.key_cert_sign() {
            usages.push(KeyUsage::KeyCertSign);
        }
        if ku.crl_sign() {
            usages.push(KeyUsage::CrlSign);
        }
        if ku.encipher_only() {
            usages.push(KeyUsage::EncipherOnly);
        }
        if ku.decipher_only() {
            usages.push(KeyUsage::DecipherOnly);
        }
    }
    usages
}

fn signature_algorithm_name(cert: &X509Certificate<'_>) -> String {
    match cert.signature_algorithm.algorithm.to_id_string().as_str() {
        "1.2.840.113549.1.1.5" => "SHA1withRSA".to_string(),
        "1.2.840.113549.1.1.11" => "SHA256withRSA".to_string(),
        "1.2.840.113549.1.1.12" => "SHA384withRSA".to_string(),
        "1.2.840.113549.1.1.13" => "SHA512withRSA".to_string(),
        "1.2.840.10045.4.3.2" => "SHA256withECDSA".to_string(),
        "1.2.840.10045.4.3.3" => "SHA384withECDSA".to_string(),
        other => other.to_string(),
    }
}

fn public_key_algorithm_name(cert: &X509Certificate<'_>) -> String {
    match cert
        .public_key()
        .algorithm
        .algorithm
        .to_id_string()
        .as_str()
    {
        "1.2.840.113549.1.1.1" => "RSA".to_string(),
        "1.2.840.10045.2.1" => "EC".to_string(),
        "1.3.101.112" => "Ed25519".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cn_regex_fallback() {
        let caps = CN_PATTERN.captures("C=CR, O=Example, CN=Jane Doe, OU=QA");
        assert_eq!(caps.unwrap().get(1).unwrap().as_str(), "Jane Doe");
    }

    #[test]
    fn test_key_usage_labels() {
        assert_eq!(KeyUsage::DigitalSignature.label(), "Digital Signature");
        assert_eq!(KeyUsage::CrlSign.to_string(), "CRL Sign");
    }

    #[test]
    fn test_parse_certificate_info_rejects_garbage() {
        let err = parse_certificate_info(&[0x02, 0x01, 0x00]).unwrap_err();
        assert!(matches!(err, Error::CertificateParse(_)));
    }
}
