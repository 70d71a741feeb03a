//! Error types for webhook operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during webhook operations
#[derive(Error, Debug)]
pub enum WebhookError {
    /// Request validation failed (bad URL, disallowed scheme, bad event set)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Subscription does not exist or is owned by another tenant
    #[error("Webhook not found: {0}")]
    SubscriptionNotFound(String),

    /// Delivery does not exist or is owned by another tenant
    #[error("Delivery not found: {0}")]
    DeliveryNotFound(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request exceeded the delivery timeout
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Payload serialization/deserialization failed
    #[error("Payload error: {0}")]
    Payload(String),

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// Signature missing from request
    #[error("Signature missing from request")]
    SignatureMissing,

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WebhookError {
    /// Whether this error is a transient delivery failure that the retry
    /// scheduler may act on.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_))
    }

    /// Whether this error should be reported to the caller as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionNotFound(_) | Self::DeliveryNotFound(_)
        )
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::Payload(err.to_string())
    }
}
