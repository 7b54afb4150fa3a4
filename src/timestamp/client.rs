//! TSA client with ordered fallback, retry and backoff.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use super::request::{self, ParsedTimestamp};
use super::{CancelFlag, TimestampResult, TimestampToken, TsaError, TsaErrorKind};
use crate::config::TsaConfig;

/// Transport used to POST a timestamp query and read the reply body.
///
/// Kept behind a trait so the fallback/retry logic can be exercised without a
/// network.
pub trait TsaTransport: Send + Sync {
    fn post(&self, url: &str, body: &[u8]) -> Result<Vec<u8>, TsaError>;
}

/// Blocking HTTP transport over a `ureq` agent.
pub struct HttpTransport {
    agent: ureq::Agent,
}

// Replies larger than this are not timestamp tokens.
const MAX_REPLY_BYTES: u64 = 1 << 20;

impl HttpTransport {
    /// Create a transport whose connect/read/write operations all share
    /// `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl TsaTransport for HttpTransport {
    fn post(&self, url: &str, body: &[u8]) -> Result<Vec<u8>, TsaError> {
        let response = self
            .agent
            .post(url)
            .set("Content-Type", "application/timestamp-query")
            .set("Accept", "application/timestamp-reply")
            .set("User-Agent", concat!("firmador/", env!("CARGO_PKG_VERSION")))
            .send_bytes(body);

        match response {
            Ok(reply) => {
                use std::io::Read;
                let mut buf = Vec::new();
                reply
                    .into_reader()
                    .take(MAX_REPLY_BYTES)
                    .read_to_end(&mut buf)
                    .map_err(|e| classify_io(&e))?;
                if buf.is_empty() {
                    return Err(TsaError::unknown("empty response from TSA server"));
                }
                Ok(buf)
            },
            Err(ureq::Error::Status(code, _)) => Err(TsaError::new(
                classify_status(code),
                format!("HTTP {}", code),
            )),
            Err(ureq::Error::Transport(transport)) => Err(classify_transport(&transport)),
        }
    }
}

fn classify_status(code: u16) -> TsaErrorKind {
    match code {
        405 => TsaErrorKind::Http405,
        400 => TsaErrorKind::Http400,
        401 | 403 => TsaErrorKind::AuthenticationError,
        _ => TsaErrorKind::UnknownError,
    }
}

fn classify_io(err: &std::io::Error) -> TsaError {
    let kind = match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => TsaErrorKind::Timeout,
        _ => TsaErrorKind::UnknownError,
    };
    TsaError::new(kind, err.to_string())
}

fn classify_transport(transport: &ureq::Transport) -> TsaError {
    let message = transport.to_string();
    let kind = match transport.kind() {
        ureq::ErrorKind::Dns => TsaErrorKind::DnsError,
        _ if message.contains("timed out") || message.contains("timeout") => TsaErrorKind::Timeout,
        _ if message.contains("SSL") || message.contains("TLS") || message.contains("certificate") => {
            TsaErrorKind::SslError
        },
        _ => TsaErrorKind::UnknownError,
    };
    TsaError::new(kind, message)
}

/// Client that obtains RFC3161 tokens despite unreliable public servers.
///
/// Servers are scanned strictly in order, each getting a bounded number of
/// attempts, so the `server_used` field of a success stays meaningful. No
/// state persists across calls beyond the immutable configuration.
pub struct TimestampAuthorityClient {
    config: TsaConfig,
    transport: Arc<dyn TsaTransport>,
}

impl TimestampAuthorityClient {
    /// Create a client with the given configuration and a blocking HTTP
    /// transport.
    pub fn new(config: TsaConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(config.timeout));
        Self { config, transport }
    }

    /// Create a client with a custom transport (used by tests).
    pub fn with_transport(config: TsaConfig, transport: Arc<dyn TsaTransport>) -> Self {
        Self { config, transport }
    }

    /// Obtain a timestamp token for `message`.
    ///
    /// `preferred_url`, when given, is tried before the default list.
    pub fn get_timestamp_token(
        &self,
        message: &[u8],
        preferred_url: Option<&str>,
    ) -> TimestampResult {
        self.get_timestamp_token_cancellable(message, preferred_url, &CancelFlag::new())
    }

    /// Like [`get_timestamp_token`](Self::get_timestamp_token) but honoring a
    /// cancellation flag between attempts and during backoff.
    pub fn get_timestamp_token_cancellable(
        &self,
        message: &[u8],
        preferred_url: Option<&str>,
        cancel: &CancelFlag,
    ) -> TimestampResult {
        let servers = self.build_server_list(preferred_url);
        debug!("Attempting to get timestamp from {} server(s)", servers.len());

        for url in &servers {
            for attempt in 1..=self.config.max_attempts {
                if cancel.is_cancelled() {
                    info!("Timestamp acquisition cancelled");
                    return TimestampResult::failure("Timestamp request was cancelled");
                }

                debug!(
                    "Trying server: {} (attempt {}/{})",
                    url, attempt, self.config.max_attempts
                );

                match self.request_timestamp(url, message) {
                    Ok(parsed) => {
                        let info = parsed.gen_time.format("%Y-%m-%d %H:%M:%S UTC").to_string();
                        info!("Successfully obtained timestamp from: {}", url);
                        return TimestampResult {
                            success: true,
                            token: Some(TimestampToken {
                                der: parsed.token_der,
                                gen_time: parsed.gen_time,
                                server: url.clone(),
                            }),
                            timestamp_info: Some(info),
                            server_used: Some(url.clone()),
                            error: None,
                        };
                    },
                    Err(err) => {
                        warn!("Attempt {} failed for {}: {}", attempt, url, err);
                        if !err.kind.is_retryable() {
                            break;
                        }
                        if attempt < self.config.max_attempts {
                            self.backoff(attempt, cancel);
                        }
                    },
                }
            }
        }

        error!(
            "All TSA servers failed after at most {} attempts",
            servers.len() as u32 * self.config.max_attempts
        );
        TimestampResult::failure("All TSA servers failed. Please check your internet connection.")
    }

    fn request_timestamp(&self, url: &str, message: &[u8]) -> Result<ParsedTimestamp, TsaError> {
        // Fresh digest and nonce per attempt
        let body = request::build_request(message)?;
        let reply = self.transport.post(url, &body)?;
        request::parse_response(&reply)
    }

    /// Progressive backoff: attempt N sleeps N x backoff_base, in short
    /// slices so cancellation is honored mid-sleep.
    fn backoff(&self, attempt: u32, cancel: &CancelFlag) {
        let total = self.config.backoff_base * attempt;
        let slice = Duration::from_millis(50);
        let mut slept = Duration::ZERO;
        while slept < total && !cancel.is_cancelled() {
            let step = slice.min(total - slept);
            std::thread::sleep(step);
            slept += step;
        }
    }

    /// Preferred URL first (when absent from the defaults), then the default
    /// list, de-duplicated preserving order.
    fn build_server_list(&self, preferred_url: Option<&str>) -> Vec<String> {
        let mut servers = Vec::with_capacity(self.config.servers.len() + 1);
        if let Some(url) = preferred_url {
            if !url.trim().is_empty() && !self.config.servers.iter().any(|s| s == url) {
                servers.push(url.to_string());
            }
        }
        servers.extend(self.config.servers.iter().cloned());

        let mut seen = Vec::new();
        servers.retain(|url| {
            if seen.contains(url) {
                false
            } else {
                seen.push(url.clone());
                true
            }
        });
        servers
    }

    /// Map a TSA URL to a short display label for the visible stamp.
    pub fn display_name(url: &str) -> &'static str {
        if url.contains("freetsa.org") {
            "FreeTSA"
        } else if url.contains("digicert.com") {
            "DigiCert"
        } else if url.contains("apple.com") {
            "Apple"
        } else if url.contains("sectigo.com") {
            "Sectigo"
        } else if url.contains("entrust.net") {
            "Entrust"
        } else {
            "Custom TSA"
        }
    }
}
