//! Integration tests for the TSA fallback client.
//!
//! The HTTP layer is replaced with mock transports so the ordered-fallback
//! and retry behavior can be asserted exactly, including attempt counts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cmpv2::status::{PkiStatus, PkiStatusInfo};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{EncapsulatedContentInfo, SignedData, SignerInfos};
use const_oid::db::rfc5911::ID_SIGNED_DATA;
use const_oid::db::rfc5912::ID_SHA_256;
use const_oid::ObjectIdentifier;
use der::asn1::{GeneralizedTime, Int, OctetString, SetOfVec};
use der::{Any, Encode};
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_tsp::{MessageImprint, TimeStampResp, TspVersion, TstInfo};

use firmador::timestamp::{
    CancelFlag, TimestampAuthorityClient, TsaError, TsaErrorKind, TsaTransport,
};
use firmador::TsaConfig;

// id-ct-TSTInfo
const ID_CT_TST_INFO: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");

/// DER TimeStampResp with status granted and an unsigned token whose TSTInfo
/// carries the given genTime. Structure only; no signer, which the client
/// does not require.
fn granted_response(gen_time_unix: u64) -> Vec<u8> {
    let tst_info = TstInfo {
        version: TspVersion::V1,
        policy: ObjectIdentifier::new_unwrap("1.3.6.1.4.1.4146.2.2"),
        message_imprint: MessageImprint {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: ID_SHA_256,
                parameters: None,
            },
            hashed_message: OctetString::new([0u8; 32].as_slice()).unwrap(),
        },
        serial_number: Int::new(&[0x01]).unwrap(),
        gen_time: GeneralizedTime::from_unix_duration(Duration::from_secs(gen_time_unix))
            .unwrap(),
        accuracy: None,
        ordering: false,
        nonce: None,
        tsa: None,
        extensions: None,
    };
    let tst_der = tst_info.to_der().unwrap();

    let signed_data = SignedData {
        version: CmsVersion::V3,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_CT_TST_INFO,
            econtent: Some(Any::encode_from(&OctetString::new(tst_der).unwrap()).unwrap()),
        },
        certificates: None,
        crls: None,
        signer_infos: SignerInfos(SetOfVec::new()),
    };

    let token = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data).unwrap(),
    };

    let response = TimeStampResp {
        status: PkiStatusInfo {
            status: PkiStatus::Accepted,
            status_string: None,
            fail_info: None,
        },
        time_stamp_token: Some(token),
    };
    response.to_der().unwrap()
}

/// Fails every request with a fixed error kind, counting calls.
struct FailingTransport {
    kind: TsaErrorKind,
    calls: AtomicUsize,
}

impl FailingTransport {
    fn new(kind: TsaErrorKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
        })
    }
}

impl TsaTransport for FailingTransport {
    fn post(&self, _url: &str, _body: &[u8]) -> Result<Vec<u8>, TsaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TsaError::new(self.kind, "mock failure"))
    }
}

/// Fails (retryably) for URLs containing `fail_marker`, answers a granted
/// response otherwise.
struct PartialTransport {
    fail_marker: &'static str,
    calls: AtomicUsize,
}

impl PartialTransport {
    fn new(fail_marker: &'static str) -> Arc<Self> {
        Arc::new(Self {
            fail_marker,
            calls: AtomicUsize::new(0),
        })
    }
}

impl TsaTransport for PartialTransport {
    fn post(&self, url: &str, _body: &[u8]) -> Result<Vec<u8>, TsaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if url.contains(self.fail_marker) {
            Err(TsaError::new(TsaErrorKind::Timeout, "mock timeout"))
        } else {
            Ok(granted_response(1_756_464_000))
        }
    }
}

fn fast_config() -> TsaConfig {
    TsaConfig::default().with_backoff_base(Duration::ZERO)
}

#[test]
fn test_non_retryable_error_gets_one_attempt_per_server() {
    let transport = FailingTransport::new(TsaErrorKind::Http405);
    let client = TimestampAuthorityClient::with_transport(fast_config(), transport.clone());

    let result = client.get_timestamp_token(b"message", None);

    assert!(!result.success);
    assert!(result.token.is_none());
    assert_eq!(
        result.error.as_deref(),
        Some("All TSA servers failed. Please check your internet connection.")
    );
    // 5 servers, non-retryable failure skips the second attempt
    assert_eq!(transport.calls.load(Ordering::SeqCst), 5);
}

#[test]
fn test_retryable_error_exhausts_both_attempts_per_server() {
    let transport = FailingTransport::new(TsaErrorKind::Timeout);
    let client = TimestampAuthorityClient::with_transport(fast_config(), transport.clone());

    let result = client.get_timestamp_token(b"message", None);

    assert!(!result.success);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 10);
}

#[test]
fn test_fallback_to_second_server() {
    // First default server is freetsa; it times out twice, digicert answers
    let transport = PartialTransport::new("freetsa");
    let client = TimestampAuthorityClient::with_transport(fast_config(), transport.clone());

    let result = client.get_timestamp_token(b"message", None);

    assert!(result.success);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        result.server_used.as_deref(),
        Some("http://timestamp.digicert.com")
    );
    let token = result.token.expect("granted result carries a token");
    assert_eq!(token.server, "http://timestamp.digicert.com");
    let info = result.timestamp_info.expect("granted result carries info");
    assert!(info.ends_with("UTC"), "unexpected info format: {}", info);
}

#[test]
fn test_preferred_url_is_tried_first() {
    let transport = PartialTransport::new("never-matches");
    let client = TimestampAuthorityClient::with_transport(fast_config(), transport.clone());

    let result = client.get_timestamp_token(b"message", Some("http://tsa.example.com"));

    assert!(result.success);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.server_used.as_deref(), Some("http://tsa.example.com"));
}

#[test]
fn test_token_gen_time_is_decoded() {
    let transport = PartialTransport::new("never-matches");
    let client = TimestampAuthorityClient::with_transport(fast_config(), transport);

    let result = client.get_timestamp_token(b"message", None);

    let token = result.token.expect("token expected");
    // 2025-08-29 10:40:00 UTC
    assert_eq!(token.gen_time.timestamp(), 1_756_464_000);
    assert!(!token.der.is_empty());
}

#[test]
fn test_cancellation_before_first_attempt() {
    let transport = FailingTransport::new(TsaErrorKind::Timeout);
    let client = TimestampAuthorityClient::with_transport(fast_config(), transport.clone());

    let cancel = CancelFlag::new();
    cancel.cancel();
    let result = client.get_timestamp_token_cancellable(b"message", None, &cancel);

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Timestamp request was cancelled"));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_rejected_status_is_not_a_token() {
    struct RejectingTransport;
    impl TsaTransport for RejectingTransport {
        fn post(&self, _url: &str, _body: &[u8]) -> Result<Vec<u8>, TsaError> {
            let response = TimeStampResp {
                status: PkiStatusInfo {
                    status: PkiStatus::Rejection,
                    status_string: None,
                    fail_info: None,
                },
                time_stamp_token: None,
            };
            Ok(response.to_der().unwrap())
        }
    }

    let client =
        TimestampAuthorityClient::with_transport(fast_config(), Arc::new(RejectingTransport));
    let result = client.get_timestamp_token(b"message", None);
    assert!(!result.success);
}
