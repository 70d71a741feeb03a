//! Tenant webhook subscriptions

use crate::{WebhookEvent, WebhookSecret};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A tenant's registration of an HTTP endpoint for a set of events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Unique subscription ID
    pub id: String,

    /// Owning tenant
    pub tenant_id: String,

    /// Target URL for webhook delivery
    pub url: String,

    /// Signing secret, generated at creation and never changed
    #[serde(skip_serializing)]
    pub secret: WebhookSecret,

    /// Events this subscription receives
    pub events: BTreeSet<WebhookEvent>,

    /// Whether deliveries are made to this subscription
    pub is_active: bool,

    /// Description for tenant admins
    pub description: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Check if this subscription should receive an event
    pub fn is_subscribed_to(&self, event: WebhookEvent) -> bool {
        self.events.contains(&event)
    }

    /// Whether a dispatch of `event` should reach this subscription
    pub fn accepts(&self, event: WebhookEvent) -> bool {
        self.is_active && self.is_subscribed_to(event)
    }

    /// Masked secret suitable for display
    pub fn masked_secret(&self) -> String {
        self.secret.masked()
    }

    /// Secret-free projection returned by list/get/update
    pub fn view(&self) -> SubscriptionView {
        SubscriptionView {
            id: self.id.clone(),
            url: self.url.clone(),
            events: self.events.iter().copied().collect(),
            description: self.description.clone(),
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
            secret_masked: self.masked_secret(),
        }
    }
}

/// Request to register a subscription. Events are given by wire name and
/// validated on registration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubscription {
    /// Target URL
    pub url: String,

    /// Event names
    pub events: Vec<String>,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

impl NewSubscription {
    /// Create a registration request
    pub fn new<I, S>(url: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            url: url.into(),
            events: events.into_iter().map(Into::into).collect(),
            description: None,
        }
    }

    /// Set the description
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Partial update of a subscription. The secret cannot be changed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionUpdate {
    /// New target URL
    #[serde(default)]
    pub url: Option<String>,

    /// New event set, by wire name
    #[serde(default)]
    pub events: Option<Vec<String>>,

    /// New description
    #[serde(default)]
    pub description: Option<String>,

    /// Enable or disable deliveries
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl SubscriptionUpdate {
    /// Empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Replace the event set
    pub fn events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = Some(events.into_iter().map(Into::into).collect());
        self
    }

    /// Change the description
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Enable or disable
    pub fn active(mut self, active: bool) -> Self {
        self.is_active = Some(active);
        self
    }
}

/// Subscription as shown after creation: the secret is masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub id: String,
    pub url: String,
    pub events: Vec<WebhookEvent>,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub secret_masked: String,
}

/// Creation response: the only place the plaintext secret is surfaced.
#[derive(Debug, Clone)]
pub struct RegisteredSubscription {
    /// The stored subscription
    pub subscription: Subscription,
}

impl RegisteredSubscription {
    /// Plaintext secret, to be shown to the tenant exactly once
    pub fn secret(&self) -> &str {
        self.subscription.secret.expose()
    }

    /// Serializable creation response including the plaintext secret
    pub fn to_response(&self) -> serde_json::Value {
        let sub = &self.subscription;
        serde_json::json!({
            "id": sub.id,
            "url": sub.url,
            "events": sub.events,
            "description": sub.description,
            "secret": self.secret(),
            "isActive": sub.is_active,
            "createdAt": sub.created_at,
            "warning": "The secret will only be shown once. Store it securely for signature verification.",
        })
    }
}
