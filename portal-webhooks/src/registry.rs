//! Tenant-scoped subscription registry

use crate::store::{DeliveryStore, SubscriptionStore};
use crate::validation::{parse_events, validate_url};
use crate::{
    Clock, NewSubscription, RegisteredSubscription, Result, SecretGenerator, Subscription,
    SubscriptionUpdate, WebhookError,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// CRUD over webhook subscriptions, always scoped to one tenant.
///
/// Lookups of another tenant's subscription report
/// [`WebhookError::SubscriptionNotFound`], exactly like a missing ID.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
    secrets: Arc<dyn SecretGenerator>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionRegistry {
    /// Create a registry over the given collaborators
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
        secrets: Arc<dyn SecretGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscriptions,
            deliveries,
            secrets,
            clock,
        }
    }

    /// Register a new, active subscription with a freshly generated secret
    pub async fn register(
        &self,
        tenant_id: &str,
        request: NewSubscription,
    ) -> Result<RegisteredSubscription> {
        let url = validate_url(&request.url)?;
        let events = parse_events(&request.events)?;
        let now = self.clock.now();

        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            url: url.to_string(),
            secret: self.secrets.new_secret(),
            events,
            is_active: true,
            description: request.description,
            created_at: now,
            updated_at: now,
        };

        self.subscriptions.insert(subscription.clone()).await?;

        info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription.id,
            url = %subscription.url,
            events = subscription.events.len(),
            "Webhook subscription registered"
        );

        Ok(RegisteredSubscription { subscription })
    }

    /// All subscriptions of a tenant, newest first
    pub async fn list(&self, tenant_id: &str) -> Result<Vec<Subscription>> {
        self.subscriptions.list_by_tenant(tenant_id).await
    }

    /// Get a subscription owned by the tenant
    pub async fn get(&self, id: &str, tenant_id: &str) -> Result<Subscription> {
        self.subscriptions
            .find(id, tenant_id)
            .await?
            .ok_or_else(|| WebhookError::SubscriptionNotFound(id.to_string()))
    }

    /// Apply a partial update. Fields left `None` are unchanged.
    pub async fn update(
        &self,
        id: &str,
        tenant_id: &str,
        changes: SubscriptionUpdate,
    ) -> Result<Subscription> {
        let mut subscription = self.get(id, tenant_id).await?;

        if let Some(url) = changes.url {
            subscription.url = validate_url(&url)?.to_string();
        }
        if let Some(events) = changes.events {
            subscription.events = parse_events(&events)?;
        }
        if let Some(description) = changes.description {
            subscription.description = Some(description);
        }
        if let Some(active) = changes.is_active {
            subscription.is_active = active;
        }
        subscription.updated_at = self.clock.now();

        if !self.subscriptions.update(&subscription).await? {
            return Err(WebhookError::SubscriptionNotFound(id.to_string()));
        }

        info!(
            tenant_id = %tenant_id,
            subscription_id = %id,
            is_active = subscription.is_active,
            "Webhook subscription updated"
        );

        Ok(subscription)
    }

    /// Delete a subscription and its delivery history
    pub async fn delete(&self, id: &str, tenant_id: &str) -> Result<()> {
        if !self.subscriptions.remove(id, tenant_id).await? {
            return Err(WebhookError::SubscriptionNotFound(id.to_string()));
        }
        let removed = self.deliveries.remove_for_subscription(id).await?;

        info!(
            tenant_id = %tenant_id,
            subscription_id = %id,
            deliveries_removed = removed,
            "Webhook subscription deleted"
        );
        Ok(())
    }
}
