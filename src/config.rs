//! Configuration for timestamping and signing.

use std::time::Duration;

/// Default ordered list of public RFC3161 servers.
pub const DEFAULT_TSA_SERVERS: [&str; 5] = [
    "https://freetsa.org/tsr",
    "http://timestamp.digicert.com",
    "http://timestamp.apple.com/ts01",
    "http://timestamp.sectigo.com",
    "http://timestamp.entrust.net/TSS/RFC3161sha2TS",
];

/// Tunables for the TSA fallback client.
#[derive(Debug, Clone)]
pub struct TsaConfig {
    /// Ordered default server list, tried in sequence.
    pub servers: Vec<String>,

    /// Connect/read/write timeout per network call.
    pub timeout: Duration,

    /// Attempts per server before advancing to the next one.
    pub max_attempts: u32,

    /// Base backoff; the delay before retry N is `N * backoff_base`.
    pub backoff_base: Duration,
}

impl Default for TsaConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TsaConfig {
    /// Create a configuration with the stock server list and timings.
    pub fn new() -> Self {
        Self {
            servers: DEFAULT_TSA_SERVERS.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(10),
            max_attempts: 2,
            backoff_base: Duration::from_secs(1),
        }
    }

    /// Replace the server list.
    pub fn with_servers(mut self, servers: Vec<String>) -> Self {
        self.servers = servers;
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the attempts per server.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base backoff between retries.
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }
}

/// Tunables for signature output.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    /// Suffix inserted before the extension of the output file name.
    pub output_suffix: String,

    /// Estimated DER signature size; sizes the /Contents placeholder.
    pub estimated_signature_size: usize,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SigningConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self {
            output_suffix: "_signed".to_string(),
            estimated_signature_size: 8192,
        }
    }

    /// Set the output file suffix.
    pub fn with_output_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.output_suffix = suffix.into();
        self
    }

    /// Set the estimated signature size.
    pub fn with_estimated_signature_size(mut self, size: usize) -> Self {
        self.estimated_signature_size = size;
        self
    }
}
