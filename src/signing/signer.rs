//! Detached CMS (PKCS#7) signature assembly.
//!
//! Produces the DER blob that goes into the signature dictionary's
//! /Contents: a SignedData over the ByteRange digest, carrying the full
//! certificate chain, with an optional RFC3161 token attached as the
//! id-aa-timeStampToken unsigned attribute. The token is requested over the
//! final signature bytes, after signing, so it attests what actually landed
//! in the document.

use cms::builder::{SignedDataBuilder, SignerInfoBuilder};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::ContentInfo;
use cms::signed_data::{EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfos};
use const_oid::db::rfc5911::{ID_DATA, ID_SIGNED_DATA};
use const_oid::db::rfc5912::ID_SHA_256;
use const_oid::ObjectIdentifier;
use der::asn1::SetOfVec;
use der::{Any, Decode, Encode};
use log::{debug, info};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use x509_cert::attr::Attribute;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use crate::certificate::KeyMaterial;
use crate::error::{Error, Result};
use crate::timestamp::TimestampProvider;

/// id-aa-timeStampToken (RFC 3161, appendix A)
const ID_AA_TIME_STAMP_TOKEN: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");

/// Builds detached CMS signatures from one signing identity.
pub struct CmsSigner<'a> {
    key: &'a KeyMaterial,
}

impl<'a> CmsSigner<'a> {
    pub fn new(key: &'a KeyMaterial) -> Self {
        Self { key }
    }

    /// Sign `signed_bytes` and return the DER-encoded ContentInfo.
    ///
    /// When `timestamp` is given, its token is requested over the signature
    /// value and embedded as an unsigned attribute; a provider failure fails
    /// the whole call so the orchestrator can decide whether to retry
    /// without one.
    pub fn sign(
        &self,
        signed_bytes: &[u8],
        timestamp: Option<&dyn TimestampProvider>,
    ) -> Result<Vec<u8>> {
        let digest = Sha256::digest(signed_bytes);

        let private_key = RsaPrivateKey::from_pkcs8_der(&self.key.private_key_der)
            .map_err(|e| Error::Signing(format!("unusable private key: {}", e)))?;
        let signing_key = SigningKey::<Sha256>::new(private_key);

        let leaf_der = self.key.leaf_certificate().ok_or(Error::NoIdentity)?;
        let leaf = Certificate::from_der(leaf_der)
            .map_err(|e| Error::CertificateParse(e.to_string()))?;

        let sid = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: leaf.tbs_certificate.issuer.clone(),
            serial_number: leaf.tbs_certificate.serial_number.clone(),
        });

        let digest_algorithm = AlgorithmIdentifierOwned {
            oid: ID_SHA_256,
            parameters: None,
        };

        // Detached: the PDF bytes stay outside the CMS structure
        let encap = EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        };

        let signer_info = SignerInfoBuilder::new(
            &signing_key,
            sid,
            digest_algorithm.clone(),
            &encap,
            Some(digest.as_slice()),
        )
        .map_err(|e| Error::Signing(format!("signer setup failed: {}", e)))?;

        let mut builder = SignedDataBuilder::new(&encap);
        builder
            .add_digest_algorithm(digest_algorithm)
            .map_err(|e| Error::Signing(e.to_string()))?;
        for cert_der in &self.key.chain {
            let cert = Certificate::from_der(cert_der)
                .map_err(|e| Error::CertificateParse(e.to_string()))?;
            builder
                .add_certificate(CertificateChoices::Certificate(cert))
                .map_err(|e| Error::Signing(e.to_string()))?;
        }
        builder
            .add_signer_info::<SigningKey<Sha256>, rsa::pkcs1v15::Signature>(signer_info)
            .map_err(|e| Error::Signing(format!("signing failed: {}", e)))?;

        let content_info = builder
            .build()
            .map_err(|e| Error::Signing(format!("CMS assembly failed: {}", e)))?;

        let Some(provider) = timestamp else {
            debug!("Produced detached CMS signature without timestamp");
            return content_info
                .to_der()
                .map_err(|e| Error::Signing(format!("CMS encoding failed: {}", e)));
        };

        attach_timestamp(content_info, provider)
    }
}

/// Request a token over the signature value and re-encode the structure with
/// the token as the signer's unsigned attribute.
fn attach_timestamp(
    content_info: ContentInfo,
    provider: &dyn TimestampProvider,
) -> Result<Vec<u8>> {
    let mut signed_data = content_info
        .content
        .decode_as::<SignedData>()
        .map_err(|e| Error::Signing(format!("CMS re-read failed: {}", e)))?;

    let mut infos = signed_data.signer_infos.0.into_vec();
    let signer = infos
        .first_mut()
        .ok_or_else(|| Error::Signing("CMS structure has no signer".to_string()))?;

    let token_der = provider.timestamp(signer.signature.as_bytes())?;
    let token = Any::from_der(&token_der)
        .map_err(|e| Error::Signing(format!("timestamp token is not valid DER: {}", e)))?;

    let mut values = SetOfVec::new();
    values
        .insert(token)
        .map_err(|e| Error::Signing(e.to_string()))?;
    let mut unsigned = SetOfVec::new();
    unsigned
        .insert(Attribute {
            oid: ID_AA_TIME_STAMP_TOKEN,
            values,
        })
        .map_err(|e| Error::Signing(e.to_string()))?;
    signer.unsigned_attrs = Some(unsigned);

    signed_data.signer_infos = SignerInfos(
        SetOfVec::try_from(infos).map_err(|e| Error::Signing(e.to_string()))?,
    );

    let content = Any::encode_from(&signed_data)
        .map_err(|e| Error::Signing(format!("CMS re-encoding failed: {}", e)))?;
    let stamped = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content,
    };

    info!("Embedded RFC3161 timestamp token in CMS signature");
    stamped
        .to_der()
        .map_err(|e| Error::Signing(format!("CMS encoding failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroize::Zeroizing;

    #[test]
    fn test_rejects_garbage_key_material() {
        let key = KeyMaterial {
            private_key_der: Zeroizing::new(vec![0u8; 16]),
            chain: vec![vec![1, 2, 3]],
        };
        let err = CmsSigner::new(&key).sign(b"data", None).unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[test]
    fn test_empty_chain_has_no_leaf() {
        let key = KeyMaterial {
            private_key_der: Zeroizing::new(vec![0u8; 16]),
            chain: vec![],
        };
        assert!(key.leaf_certificate().is_none());
    }
}
