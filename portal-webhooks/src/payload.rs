//! Webhook payload envelope and delivery ledger records

use crate::{Result, WebhookError, WebhookEvent, WebhookSignature};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The signed JSON envelope POSTed to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// Event name
    pub event: WebhookEvent,

    /// ISO-8601 timestamp with millisecond precision
    pub timestamp: String,

    /// Tenant that produced the event
    pub tenant_id: String,

    /// Free-form event data
    pub data: serde_json::Value,

    /// `<algorithm>=<hex>` over every other field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Field-for-field view of a payload without its signature. This is the exact
/// byte sequence the signature covers.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalPayload<'a> {
    event: WebhookEvent,
    timestamp: &'a str,
    tenant_id: &'a str,
    data: &'a serde_json::Value,
}

impl WebhookPayload {
    /// Create an unsigned payload
    pub fn new(
        event: WebhookEvent,
        timestamp: DateTime<Utc>,
        tenant_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event,
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            tenant_id: tenant_id.into(),
            data,
            signature: None,
        }
    }

    /// Serialized form of every field except the signature
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let canonical = CanonicalPayload {
            event: self.event,
            timestamp: &self.timestamp,
            tenant_id: &self.tenant_id,
            data: &self.data,
        };
        Ok(serde_json::to_vec(&canonical)?)
    }

    /// Compute and attach the signature
    pub fn sign(mut self, signer: &WebhookSignature) -> Result<Self> {
        let bytes = self.canonical_bytes()?;
        self.signature = Some(signer.sign(&bytes));
        Ok(self)
    }

    /// Check the attached signature against the other fields
    pub fn verify(&self, signer: &WebhookSignature) -> Result<bool> {
        let signature = self
            .signature
            .as_deref()
            .ok_or(WebhookError::SignatureMissing)?;
        signer.verify(&self.canonical_bytes()?, signature)
    }

    /// Full wire body, signature included
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a wire body
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Status of a ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Attempt in flight or about to be
    Pending,

    /// Subscriber answered 2xx
    Success,

    /// Non-2xx, transport error or timeout
    Failed,
}

impl DeliveryStatus {
    /// Wire/database name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// One attempt of pushing one event occurrence to one subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    /// Delivery identifier, also sent as `X-Webhook-Delivery`
    pub id: String,

    /// Owning subscription
    pub subscription_id: String,

    /// Tenant owning the subscription
    pub tenant_id: String,

    /// Event delivered
    pub event: WebhookEvent,

    /// Signed payload sent on the wire
    pub payload: WebhookPayload,

    /// Current status
    pub status: DeliveryStatus,

    /// HTTP status code observed, if a response arrived
    pub status_code: Option<u16>,

    /// Response body (or transport error), truncated
    pub response_body: Option<String>,

    /// Attempt number within the lineage, starting at 1
    pub attempts: u32,

    /// Previous attempt of the same lineage
    pub retry_of: Option<String>,

    /// When the follow-up attempt is due; `None` once claimed or when terminal
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Set if and only if the status is `success`
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Delivery {
    /// Create a pending ledger row
    pub fn pending(
        id: impl Into<String>,
        subscription_id: impl Into<String>,
        payload: WebhookPayload,
        attempts: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            subscription_id: subscription_id.into(),
            tenant_id: payload.tenant_id.clone(),
            event: payload.event,
            payload,
            status: DeliveryStatus::Pending,
            status_code: None,
            response_body: None,
            attempts,
            retry_of: None,
            next_retry_at: None,
            created_at,
            delivered_at: None,
        }
    }

    /// Link this row to the attempt it retries
    pub fn with_retry_of(mut self, previous: impl Into<String>) -> Self {
        self.retry_of = Some(previous.into());
        self
    }

    /// Record a 2xx response
    pub fn mark_succeeded(
        &mut self,
        status_code: u16,
        response_body: Option<String>,
        body_limit: usize,
        at: DateTime<Utc>,
    ) {
        self.status = DeliveryStatus::Success;
        self.status_code = Some(status_code);
        self.response_body = response_body.map(|s| truncate_chars(&s, body_limit));
        self.next_retry_at = None;
        self.delivered_at = Some(at);
    }

    /// Record a failed attempt; `next_retry_at` is set when a retry will follow
    pub fn mark_failed(
        &mut self,
        status_code: Option<u16>,
        response_body: Option<String>,
        body_limit: usize,
        next_retry_at: Option<DateTime<Utc>>,
    ) {
        self.status = DeliveryStatus::Failed;
        self.status_code = status_code;
        self.response_body = response_body.map(|s| truncate_chars(&s, body_limit));
        self.next_retry_at = next_retry_at;
        self.delivered_at = None;
    }

    /// Whether the lineage ends at this row
    pub fn is_terminal(&self) -> bool {
        match self.status {
            DeliveryStatus::Success => true,
            DeliveryStatus::Failed => self.next_retry_at.is_none(),
            DeliveryStatus::Pending => false,
        }
    }

    /// Whether a follow-up attempt is scheduled and not yet claimed
    pub fn retry_scheduled(&self) -> bool {
        self.status == DeliveryStatus::Failed && self.next_retry_at.is_some()
    }
}

/// Outcome of delivering one event to one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    /// Subscription the event was sent to
    pub subscription_id: String,

    /// Ledger row of this attempt
    pub delivery_id: String,

    /// Whether the subscriber answered 2xx
    pub success: bool,

    /// HTTP status code, if a response arrived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    /// A failed result that never reached the network
    pub fn failed(
        subscription_id: impl Into<String>,
        delivery_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            delivery_id: delivery_id.into(),
            success: false,
            status_code: None,
            error: Some(error.into()),
        }
    }
}

/// Keep at most `max_chars` characters of `s`
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
