//! In-memory stores

use super::{DeliveryStore, SubscriptionStore};
use crate::{Delivery, Result, Subscription, WebhookError, WebhookEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Subscription store backed by a `HashMap`
#[derive(Debug, Clone, Default)]
pub struct MemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
}

impl MemorySubscriptionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored subscriptions across all tenants
    pub async fn count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

fn newest_first(mut subscriptions: Vec<Subscription>) -> Vec<Subscription> {
    subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    subscriptions
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn insert(&self, subscription: Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&subscription.id) {
            return Err(WebhookError::Storage(format!(
                "Duplicate subscription id: {}",
                subscription.id
            )));
        }
        subscriptions.insert(subscription.id.clone(), subscription);
        Ok(())
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(newest_first(
            subscriptions
                .values()
                .filter(|s| s.tenant_id == tenant_id)
                .cloned()
                .collect(),
        ))
    }

    async fn find(&self, id: &str, tenant_id: &str) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .get(id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.read().await.get(id).cloned())
    }

    async fn find_active_for_event(
        &self,
        tenant_id: &str,
        event: WebhookEvent,
    ) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(newest_first(
            subscriptions
                .values()
                .filter(|s| s.tenant_id == tenant_id && s.accepts(event))
                .cloned()
                .collect(),
        ))
    }

    async fn update(&self, subscription: &Subscription) -> Result<bool> {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.get_mut(&subscription.id) {
            Some(existing) if existing.tenant_id == subscription.tenant_id => {
                *existing = subscription.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, id: &str, tenant_id: &str) -> Result<bool> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions
            .get(id)
            .is_some_and(|s| s.tenant_id == tenant_id)
        {
            subscriptions.remove(id);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// A ledger row with its insertion sequence, the tie-break for rows created
/// at the same instant
#[derive(Debug, Clone)]
struct StoredDelivery {
    seq: u64,
    delivery: Delivery,
}

#[derive(Debug, Default)]
struct Ledger {
    next_seq: u64,
    rows: HashMap<String, StoredDelivery>,
}

impl Ledger {
    fn insert(&mut self, delivery: &Delivery) -> Result<()> {
        if self.rows.contains_key(&delivery.id) {
            return Err(WebhookError::Storage(format!(
                "Duplicate delivery id: {}",
                delivery.id
            )));
        }
        self.next_seq += 1;
        self.rows.insert(
            delivery.id.clone(),
            StoredDelivery {
                seq: self.next_seq,
                delivery: delivery.clone(),
            },
        );
        Ok(())
    }

    /// Matching rows, oldest first
    fn sorted(&self, filter: impl Fn(&Delivery) -> bool) -> Vec<Delivery> {
        let mut rows: Vec<&StoredDelivery> =
            self.rows.values().filter(|r| filter(&r.delivery)).collect();
        rows.sort_by(|a, b| {
            a.delivery
                .created_at
                .cmp(&b.delivery.created_at)
                .then(a.seq.cmp(&b.seq))
        });
        rows.into_iter().map(|r| r.delivery.clone()).collect()
    }
}

/// Delivery ledger backed by a `HashMap`
#[derive(Debug, Clone, Default)]
pub struct MemoryDeliveryStore {
    ledger: Arc<RwLock<Ledger>>,
}

impl MemoryDeliveryStore {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row, oldest first
    pub async fn all(&self) -> Vec<Delivery> {
        self.ledger.read().await.sorted(|_| true)
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn create(&self, delivery: &Delivery) -> Result<()> {
        self.ledger.write().await.insert(delivery)
    }

    async fn update(&self, delivery: &Delivery) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        match ledger.rows.get_mut(&delivery.id) {
            Some(existing) => {
                existing.delivery = delivery.clone();
                Ok(())
            }
            None => Err(WebhookError::DeliveryNotFound(delivery.id.clone())),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Delivery>> {
        Ok(self
            .ledger
            .read()
            .await
            .rows
            .get(id)
            .map(|r| r.delivery.clone()))
    }

    async fn list_for_subscription(
        &self,
        subscription_id: &str,
        limit: usize,
    ) -> Result<Vec<Delivery>> {
        let mut rows = self
            .ledger
            .read()
            .await
            .sorted(|d| d.subscription_id == subscription_id);
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }

    async fn scheduled_retries(&self) -> Result<Vec<Delivery>> {
        let mut rows = self.ledger.read().await.sorted(|d| d.retry_scheduled());
        rows.sort_by_key(|d| d.next_retry_at);
        Ok(rows)
    }

    async fn claim_retry(&self, id: &str) -> Result<Option<Delivery>> {
        let mut ledger = self.ledger.write().await;
        match ledger.rows.get_mut(id) {
            Some(row) if row.delivery.retry_scheduled() => {
                let before = row.delivery.clone();
                row.delivery.next_retry_at = None;
                Ok(Some(before))
            }
            _ => Ok(None),
        }
    }

    async fn begin_retry(&self, previous_id: &str, next: &Delivery) -> Result<bool> {
        let mut ledger = self.ledger.write().await;
        if !ledger
            .rows
            .get(previous_id)
            .is_some_and(|r| r.delivery.retry_scheduled())
        {
            return Ok(false);
        }
        ledger.insert(next)?;
        if let Some(row) = ledger.rows.get_mut(previous_id) {
            row.delivery.next_retry_at = None;
        }
        Ok(true)
    }

    async fn remove_for_subscription(&self, subscription_id: &str) -> Result<usize> {
        let mut ledger = self.ledger.write().await;
        let before = ledger.rows.len();
        ledger
            .rows
            .retain(|_, r| r.delivery.subscription_id != subscription_id);
        Ok(before - ledger.rows.len())
    }
}
