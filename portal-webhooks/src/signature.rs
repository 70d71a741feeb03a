//! Webhook signature generation and verification

use crate::config::SigningAlgorithm;
use crate::{Result, WebhookError, WebhookSecret};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Signs and verifies payload bytes with a subscription secret.
///
/// Signatures are rendered as `<algorithm>=<hex digest>`, e.g.
/// `sha256=3f1c...`, so receivers never have to guess the algorithm.
#[derive(Debug, Clone)]
pub struct WebhookSignature {
    secret: WebhookSecret,
    algorithm: SigningAlgorithm,
}

impl WebhookSignature {
    /// Create a HMAC-SHA256 signer for the given secret
    pub fn new(secret: WebhookSecret) -> Self {
        Self::with_algorithm(secret, SigningAlgorithm::default())
    }

    /// Create a signer using a specific algorithm
    pub fn with_algorithm(secret: WebhookSecret, algorithm: SigningAlgorithm) -> Self {
        Self { secret, algorithm }
    }

    /// The algorithm used by [`sign`](Self::sign)
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Sign the canonical payload bytes
    pub fn sign(&self, payload: &[u8]) -> String {
        let digest = self.compute(self.algorithm, payload);
        format!("{}={}", self.algorithm.header_value(), digest)
    }

    /// Verify a `<algorithm>=<hex>` signature against the payload bytes.
    ///
    /// Returns `Ok(false)` on a digest mismatch and an error when the
    /// signature itself is malformed.
    pub fn verify(&self, payload: &[u8], signature: &str) -> Result<bool> {
        let (tag, digest) = signature.split_once('=').ok_or_else(|| {
            WebhookError::SignatureInvalid("Missing algorithm prefix".to_string())
        })?;

        let algorithm = SigningAlgorithm::from_header_value(tag).ok_or_else(|| {
            WebhookError::SignatureInvalid(format!("Unsupported algorithm: {}", tag))
        })?;

        let expected = self.compute(algorithm, payload);

        // Constant-time comparison to prevent timing attacks
        Ok(constant_time_compare(digest, &expected))
    }

    fn compute(&self, algorithm: SigningAlgorithm, data: &[u8]) -> String {
        match algorithm {
            SigningAlgorithm::HmacSha256 => self.compute_hmac_sha256(data),
            SigningAlgorithm::HmacSha512 => self.compute_hmac_sha512(data),
        }
    }

    /// Compute HMAC-SHA256 signature
    fn compute_hmac_sha256(&self, data: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose().as_bytes())
            .expect("HMAC can take any size key");
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Compute HMAC-SHA512 signature
    fn compute_hmac_sha512(&self, data: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(self.secret.expose().as_bytes())
            .expect("HMAC can take any size key");
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Header names used on outgoing deliveries
pub mod headers {
    /// The signature header name
    pub const SIGNATURE: &str = "X-Webhook-Signature";

    /// Event name header
    pub const EVENT: &str = "X-Webhook-Event";

    /// Delivery identifier header
    pub const DELIVERY: &str = "X-Webhook-Delivery";
}
