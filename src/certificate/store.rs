//! PKCS#12 archive loading and identity extraction.

use std::path::Path;

use log::debug;
use zeroize::Zeroizing;

use super::info::{parse_certificate_info, CertificateInfo};
use crate::error::{Error, Result};

/// Private key plus ordered certificate chain for one signing request.
///
/// Owned exclusively by the request that loaded it; never cached. The key
/// bytes are zeroized on drop.
pub struct KeyMaterial {
    /// PKCS#8 DER private key
    pub private_key_der: Zeroizing<Vec<u8>>,
    /// DER certificate chain, leaf first
    pub chain: Vec<Vec<u8>>,
}

impl KeyMaterial {
    /// DER bytes of the leaf (signing) certificate, `None` for an empty
    /// chain. [`CertificateStore::extract_identity`] never produces one.
    pub fn leaf_certificate(&self) -> Option<&[u8]> {
        self.chain.first().map(|c| c.as_slice())
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("private_key_der", &"[REDACTED]")
            .field("chain", &format!("{} certificates", self.chain.len()))
            .finish()
    }
}

/// A decrypted PKCS#12 archive.
pub struct CertificateStore {
    key_bags: Vec<Vec<u8>>,
    cert_bags: Vec<Vec<u8>>,
}

impl CertificateStore {
    /// Load and decrypt a PKCS#12 archive from disk.
    ///
    /// Fails with [`Error::NotFound`] on a missing path,
    /// [`Error::WrongPassword`] when MAC verification fails and
    /// [`Error::CorruptArchive`] on malformed PKCS#12 bytes.
    pub fn load(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        let data = std::fs::read(path)?;
        Self::from_bytes(&data, password)
    }

    /// Decrypt a PKCS#12 archive from raw bytes.
    pub fn from_bytes(data: &[u8], password: &str) -> Result<Self> {
        let pfx = p12::PFX::parse(data)
            .map_err(|e| Error::CorruptArchive(e.to_string()))?;

        if !pfx.verify_mac(password) {
            return Err(Error::WrongPassword);
        }

        let key_bags = pfx
            .key_bags(password)
            .map_err(|e| Error::CorruptArchive(e.to_string()))?;
        let cert_bags = pfx
            .cert_x509_bags(password)
            .map_err(|e| Error::CorruptArchive(e.to_string()))?;

        debug!(
            "Loaded PKCS#12 archive: {} key bag(s), {} certificate(s)",
            key_bags.len(),
            cert_bags.len()
        );

        Ok(Self {
            key_bags,
            cert_bags,
        })
    }

    /// Extract the signing identity: the first key bag and the certificate
    /// chain, leaf first. Fails with [`Error::NoIdentity`] on an archive with
    /// no private key or no certificate.
    pub fn extract_identity(&self) -> Result<KeyMaterial> {
        let key = self.key_bags.first().ok_or(Error::NoIdentity)?;
        if self.cert_bags.is_empty() {
            return Err(Error::NoIdentity);
        }
        Ok(KeyMaterial {
            private_key_der: Zeroizing::new(key.clone()),
            chain: self.cert_bags.clone(),
        })
    }

    /// Metadata for the leaf certificate.
    pub fn certificate_info(&self) -> Result<CertificateInfo> {
        let leaf = self.cert_bags.first().ok_or(Error::NoIdentity)?;
        parse_certificate_info(leaf)
    }

    /// Check whether an archive opens with the given password, collapsing
    /// every failure to `false`.
    pub fn validate(path: impl AsRef<Path>, password: &str) -> bool {
        Self::load(path, password).is_ok()
    }
}

impl std::fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateStore")
            .field("key_bags", &self.key_bags.len())
            .field("cert_bags", &self.cert_bags.len())
            .finish()
    }
}
