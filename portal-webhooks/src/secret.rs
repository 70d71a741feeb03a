//! Subscription secrets and delivery identifiers

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix that marks a string as a webhook signing secret.
pub const SECRET_PREFIX: &str = "whsec_";

/// Number of random bytes behind every secret and delivery token.
pub const TOKEN_BYTES: usize = 24;

/// Number of leading characters revealed by [`WebhookSecret::masked`].
const MASK_VISIBLE_CHARS: usize = 12;

/// Opaque per-subscription signing key.
///
/// `Debug` and `Display` never print the key material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    /// Wrap an existing secret string
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The plaintext key. Only the signer and the creation response need it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First characters of the secret followed by `...`
    pub fn masked(&self) -> String {
        let visible: String = self.0.chars().take(MASK_VISIBLE_CHARS).collect();
        format!("{}...", visible)
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WebhookSecret({})", self.masked())
    }
}

impl fmt::Display for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Source of secrets and delivery identifiers.
pub trait SecretGenerator: Send + Sync {
    /// A fresh subscription secret
    fn new_secret(&self) -> WebhookSecret;

    /// A fresh delivery identifier, sent as `X-Webhook-Delivery`
    fn new_delivery_token(&self) -> String;
}

/// Generator backed by the thread-local CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSecretGenerator;

impl RandomSecretGenerator {
    fn random_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

impl SecretGenerator for RandomSecretGenerator {
    fn new_secret(&self) -> WebhookSecret {
        WebhookSecret(format!("{}{}", SECRET_PREFIX, Self::random_token()))
    }

    fn new_delivery_token(&self) -> String {
        Self::random_token()
    }
}
