//! The closed set of events a tenant can subscribe to

use crate::WebhookError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Business events that can be pushed to tenant webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WebhookEvent {
    /// New entity submitted
    #[serde(rename = "entity.created")]
    EntityCreated,

    /// Entity approved
    #[serde(rename = "entity.approved")]
    EntityApproved,

    /// Entity rejected
    #[serde(rename = "entity.rejected")]
    EntityRejected,

    /// License expiring soon
    #[serde(rename = "license.expiring")]
    LicenseExpiring,

    /// User invited to tenant
    #[serde(rename = "user.invited")]
    UserInvited,
}

impl WebhookEvent {
    /// Every recognized event, in catalogue order.
    pub const ALL: [WebhookEvent; 5] = [
        WebhookEvent::EntityCreated,
        WebhookEvent::EntityApproved,
        WebhookEvent::EntityRejected,
        WebhookEvent::LicenseExpiring,
        WebhookEvent::UserInvited,
    ];

    /// Wire name, as sent in the `X-Webhook-Event` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityCreated => "entity.created",
            Self::EntityApproved => "entity.approved",
            Self::EntityRejected => "entity.rejected",
            Self::LicenseExpiring => "license.expiring",
            Self::UserInvited => "user.invited",
        }
    }

    /// Human-readable description shown to tenant admins.
    pub fn description(&self) -> &'static str {
        match self {
            Self::EntityCreated => "New entity submitted",
            Self::EntityApproved => "Entity approved",
            Self::EntityRejected => "Entity rejected",
            Self::LicenseExpiring => "License expiring soon",
            Self::UserInvited => "User invited to tenant",
        }
    }

    /// `(name, description)` pairs for the admin UI.
    pub fn catalogue() -> Vec<(&'static str, &'static str)> {
        Self::ALL
            .iter()
            .map(|e| (e.as_str(), e.description()))
            .collect()
    }

    /// Parse a wire name, returning `None` for anything outside the catalogue.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookEvent {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| WebhookError::Validation(format!("Invalid events: {}", s)))
    }
}
