//! Subscriber-side verification of incoming webhooks

use crate::signature::headers;
use crate::{Result, WebhookError, WebhookPayload, WebhookSecret, WebhookSignature};
use std::collections::HashMap;

/// Verifies webhooks produced by this crate.
///
/// The signature covers the payload with its `signature` field removed, so
/// verification re-serializes the parsed body rather than hashing the raw
/// bytes.
#[derive(Debug, Clone)]
pub struct WebhookReceiver {
    signature: WebhookSignature,
}

impl WebhookReceiver {
    /// Create a new receiver with the subscription secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            signature: WebhookSignature::new(WebhookSecret::new(secret)),
        }
    }

    /// Verify a body against a `<algorithm>=<hex>` signature
    pub fn verify(&self, body: &[u8], signature: &str) -> Result<bool> {
        let payload = WebhookPayload::from_slice(body)?;
        self.signature.verify(&payload.canonical_bytes()?, signature)
    }

    /// Verify and parse an incoming webhook
    pub fn receive(&self, body: &[u8], signature: &str) -> Result<WebhookPayload> {
        let payload = WebhookPayload::from_slice(body)?;
        if !self.signature.verify(&payload.canonical_bytes()?, signature)? {
            return Err(WebhookError::SignatureInvalid(
                "Signature verification failed".to_string(),
            ));
        }
        Ok(payload)
    }

    /// Verify the signature carried in the `X-Webhook-Signature` header.
    /// Header names are matched case-insensitively.
    pub fn verify_from_headers(&self, body: &[u8], headers: &HashMap<String, String>) -> Result<bool> {
        let signature = signature_header(headers).ok_or(WebhookError::SignatureMissing)?;
        self.verify(body, signature)
    }

    /// Receive and parse a webhook from HTTP headers and body
    pub fn receive_from_request(
        &self,
        body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<WebhookPayload> {
        let signature = signature_header(headers).ok_or(WebhookError::SignatureMissing)?;
        self.receive(body, signature)
    }

    /// Create a handler for specific event types.
    ///
    /// The filter is an event name, `*` for everything, or a `prefix.*`
    /// pattern such as `entity.*`.
    pub fn handler<F>(&self, event_filter: &str, callback: F) -> WebhookHandler<F>
    where
        F: Fn(WebhookPayload) -> Result<()>,
    {
        WebhookHandler {
            receiver: self.clone(),
            event_filter: event_filter.to_string(),
            callback,
        }
    }
}

fn signature_header(headers: &HashMap<String, String>) -> Option<&str> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(headers::SIGNATURE))
        .map(|(_, value)| value.as_str())
}

/// A webhook handler that filters and processes specific events
pub struct WebhookHandler<F>
where
    F: Fn(WebhookPayload) -> Result<()>,
{
    receiver: WebhookReceiver,
    event_filter: String,
    callback: F,
}

impl<F> WebhookHandler<F>
where
    F: Fn(WebhookPayload) -> Result<()>,
{
    /// Handle an incoming webhook. Returns `Ok(false)` when the event does
    /// not match the filter.
    pub fn handle(&self, body: &[u8], signature: &str) -> Result<bool> {
        let webhook = self.receiver.receive(body, signature)?;

        if !self.matches_event(webhook.event.as_str()) {
            return Ok(false);
        }

        (self.callback)(webhook)?;
        Ok(true)
    }

    fn matches_event(&self, event: &str) -> bool {
        if self.event_filter == "*" {
            return true;
        }

        if let Some(prefix) = self.event_filter.strip_suffix(".*") {
            return event
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'));
        }

        self.event_filter == event
    }
}
