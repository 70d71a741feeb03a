//! Configuration for webhook delivery

use crate::{Result, RetryPolicy, WebhookError};
use std::str::FromStr;
use std::time::Duration;

/// Maximum number of characters of a subscriber's response kept in the ledger.
pub const DEFAULT_RESPONSE_BODY_LIMIT: usize = 1000;

/// Default timeout for a single delivery attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for webhook delivery
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Hard timeout for one delivery attempt (request and response body)
    pub timeout: Duration,

    /// User-Agent header for outgoing requests
    pub user_agent: String,

    /// Retry policy applied to failed attempts
    pub retry_policy: RetryPolicy,

    /// Characters of the response body kept on the ledger row
    pub response_body_limit: usize,

    /// Whether to verify TLS certificates of subscriber endpoints
    pub verify_ssl: bool,

    /// Algorithm used to sign payloads
    pub signing_algorithm: SigningAlgorithm,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!("Portal-Webhooks/{}", env!("CARGO_PKG_VERSION")),
            retry_policy: RetryPolicy::default(),
            response_body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
            verify_ssl: true,
            signing_algorithm: SigningAlgorithm::HmacSha256,
        }
    }
}

impl WebhookConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for custom configuration
    pub fn builder() -> WebhookConfigBuilder {
        WebhookConfigBuilder::new()
    }

    /// Load configuration from `WEBHOOK_*` environment variables.
    ///
    /// A `.env` file in the working directory is read first if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Unset keys keep their defaults; malformed values are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "WEBHOOK_TIMEOUT_SECS")? {
            builder = builder.timeout_secs(secs);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "WEBHOOK_MAX_RETRIES")? {
            if attempts == 0 {
                return Err(WebhookError::Config(
                    "WEBHOOK_MAX_RETRIES must be at least 1".to_string(),
                ));
            }
            builder = builder.max_attempts(attempts);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "WEBHOOK_RETRY_BASE_MS")? {
            builder = builder.retry_base_delay(Duration::from_millis(ms));
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "WEBHOOK_MAX_LINEAGE_SECS")? {
            builder = builder.max_lineage(Duration::from_secs(secs));
        }
        if let Some(limit) = parse_var::<usize, _>(&lookup, "WEBHOOK_RESPONSE_BODY_LIMIT")? {
            builder = builder.response_body_limit(limit);
        }
        if let Some(verify) = parse_var::<bool, _>(&lookup, "WEBHOOK_VERIFY_SSL")? {
            builder = builder.verify_ssl(verify);
        }
        if let Some(agent) = lookup("WEBHOOK_USER_AGENT") {
            builder = builder.user_agent(agent);
        }
        if let Some(name) = lookup("WEBHOOK_SIGNING_ALGORITHM") {
            let algorithm = SigningAlgorithm::from_header_value(name.trim()).ok_or_else(|| {
                WebhookError::Config(format!("Unsupported signing algorithm: {}", name))
            })?;
            builder = builder.signing_algorithm(algorithm);
        }

        Ok(builder.build())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| WebhookError::Config(format!("Invalid value for {}: {:?}", key, raw))),
    }
}

/// Builder for WebhookConfig
#[derive(Debug, Clone, Default)]
pub struct WebhookConfigBuilder {
    config: WebhookConfig,
}

impl WebhookConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: WebhookConfig::default(),
        }
    }

    /// Set the delivery timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the timeout in seconds
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout = Duration::from_secs(secs);
        self
    }

    /// Set the User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Set the attempt ceiling
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry_policy.max_attempts = attempts;
        self
    }

    /// Set the unit of the exponential backoff
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_policy.base_delay = delay;
        self
    }

    /// Cap the cumulative backoff of one lineage
    pub fn max_lineage(mut self, cap: Duration) -> Self {
        self.config.retry_policy.max_lineage = Some(cap);
        self
    }

    /// Disable retries
    pub fn no_retries(mut self) -> Self {
        self.config.retry_policy = RetryPolicy::none();
        self
    }

    /// Set how many characters of the response body are stored
    pub fn response_body_limit(mut self, limit: usize) -> Self {
        self.config.response_body_limit = limit;
        self
    }

    /// Set TLS verification
    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.config.verify_ssl = verify;
        self
    }

    /// Set the signing algorithm
    pub fn signing_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.config.signing_algorithm = algorithm;
        self
    }

    /// Build the configuration
    pub fn build(self) -> WebhookConfig {
        self.config
    }
}

/// Supported signing algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningAlgorithm {
    /// HMAC-SHA256 (default)
    #[default]
    HmacSha256,

    /// HMAC-SHA512
    HmacSha512,
}

impl SigningAlgorithm {
    /// Get the algorithm tag used in the signature header
    pub fn header_value(&self) -> &'static str {
        match self {
            Self::HmacSha256 => "sha256",
            Self::HmacSha512 => "sha512",
        }
    }

    /// Parse an algorithm tag
    pub fn from_header_value(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "sha256" => Some(Self::HmacSha256),
            "sha512" => Some(Self::HmacSha512),
            _ => None,
        }
    }
}
