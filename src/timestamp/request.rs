//! RFC3161 request encoding and response decoding.

use chrono::{DateTime, Utc};
use cmpv2::status::PkiStatus;
use der::asn1::{Int, OctetString};
use der::{Decode, Encode};
use sha2::{Digest, Sha256};
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_tsp::{MessageImprint, TimeStampReq, TimeStampResp, TspVersion, TstInfo};

use super::TsaError;

/// Build a DER-encoded TimeStampReq for `message`: SHA-256 imprint,
/// certReq=true and a fresh random nonce.
pub(crate) fn build_request(message: &[u8]) -> Result<Vec<u8>, TsaError> {
    let digest = Sha256::digest(message);

    let message_imprint = MessageImprint {
        hash_algorithm: AlgorithmIdentifierOwned {
            oid: const_oid::db::rfc5912::ID_SHA_256,
            parameters: None,
        },
        hashed_message: OctetString::new(digest.as_slice())
            .map_err(|e| TsaError::unknown(format!("imprint encoding failed: {}", e)))?,
    };

    let nonce_bytes = positive_nonce_bytes();
    let nonce = Int::new(&nonce_bytes)
        .map_err(|e| TsaError::unknown(format!("nonce encoding failed: {}", e)))?;

    let request = TimeStampReq {
        version: TspVersion::V1,
        message_imprint,
        req_policy: None,
        nonce: Some(nonce),
        cert_req: true,
        extensions: None,
    };

    request
        .to_der()
        .map_err(|e| TsaError::unknown(format!("request encoding failed: {}", e)))
}

/// Eight random bytes, zero-padded when the high bit is set so the DER
/// INTEGER stays positive as RFC 3161 requires.
fn positive_nonce_bytes() -> Vec<u8> {
    use rand::Rng;
    let raw: [u8; 8] = rand::thread_rng().gen();
    if raw[0] & 0x80 != 0 {
        let mut padded = vec![0x00];
        padded.extend_from_slice(&raw);
        padded
    } else {
        raw.to_vec()
    }
}

/// Token plus the fields pulled out of its TSTInfo.
#[derive(Debug)]
pub(crate) struct ParsedTimestamp {
    pub token_der: Vec<u8>,
    pub gen_time: DateTime<Utc>,
}

/// Decode a TimeStampResp, rejecting any reply status other than granted (0),
/// and extract the token with its generation time.
pub(crate) fn parse_response(body: &[u8]) -> Result<ParsedTimestamp, TsaError> {
    let response = TimeStampResp::from_der(body)
        .map_err(|e| TsaError::unknown(format!("invalid TimeStampResp: {}", e)))?;

    if response.status.status != PkiStatus::Accepted {
        return Err(TsaError::unknown(format!(
            "TSA server returned error status: {:?}",
            response.status.status
        )));
    }

    let token = response
        .time_stamp_token
        .ok_or_else(|| TsaError::unknown("no timestamp token in response"))?;

    let token_der = token
        .to_der()
        .map_err(|e| TsaError::unknown(format!("token re-encoding failed: {}", e)))?;

    let gen_time = extract_gen_time(&token)?;

    Ok(ParsedTimestamp {
        token_der,
        gen_time,
    })
}

/// Dig the genTime out of the token: ContentInfo → SignedData →
/// eContent OCTET STRING → TSTInfo.
fn extract_gen_time(token: &cms::content_info::ContentInfo) -> Result<DateTime<Utc>, TsaError> {
    let signed_data = token
        .content
        .decode_as::<cms::signed_data::SignedData>()
        .map_err(|e| TsaError::unknown(format!("token is not SignedData: {}", e)))?;

    let econtent = signed_data
        .encap_content_info
        .econtent
        .ok_or_else(|| TsaError::unknown("token carries no TSTInfo"))?;

    let wrapped = econtent
        .decode_as::<OctetString>()
        .map_err(|e| TsaError::unknown(format!("TSTInfo unwrap failed: {}", e)))?;

    let tst_info = TstInfo::from_der(wrapped.as_bytes())
        .map_err(|e| TsaError::unknown(format!("invalid TSTInfo: {}", e)))?;

    let unix = tst_info.gen_time.to_date_time().unix_duration().as_secs();
    DateTime::<Utc>::from_timestamp(unix as i64, 0)
        .ok_or_else(|| TsaError::unknown("genTime out of range"))
}
