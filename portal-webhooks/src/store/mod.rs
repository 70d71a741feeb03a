//! Persistence seams for subscriptions and the delivery ledger
//!
//! The engine only talks to storage through these traits. Implementations are
//! expected to be transactional per call; [`memory`] provides in-process
//! stores for tests and single-node deployments.

pub mod memory;

use crate::{Delivery, Result, Subscription, WebhookEvent};
use async_trait::async_trait;

pub use memory::{MemoryDeliveryStore, MemorySubscriptionStore};

/// Storage for webhook subscriptions.
///
/// Every tenant-facing lookup takes the tenant ID and must behave as if rows
/// of other tenants do not exist.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Persist a new subscription
    async fn insert(&self, subscription: Subscription) -> Result<()>;

    /// All subscriptions of a tenant, newest first
    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Subscription>>;

    /// Tenant-scoped lookup
    async fn find(&self, id: &str, tenant_id: &str) -> Result<Option<Subscription>>;

    /// Unscoped lookup, used only by the retry worker to reload a lineage's
    /// subscription
    async fn find_by_id(&self, id: &str) -> Result<Option<Subscription>>;

    /// Active subscriptions of a tenant that include `event`
    async fn find_active_for_event(
        &self,
        tenant_id: &str,
        event: WebhookEvent,
    ) -> Result<Vec<Subscription>>;

    /// Replace a stored subscription; returns `false` if it does not exist for
    /// that tenant
    async fn update(&self, subscription: &Subscription) -> Result<bool>;

    /// Remove a subscription; returns `false` if it does not exist for that
    /// tenant
    async fn remove(&self, id: &str, tenant_id: &str) -> Result<bool>;
}

/// Storage for the delivery ledger.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Persist a new ledger row
    async fn create(&self, delivery: &Delivery) -> Result<()>;

    /// Overwrite an existing ledger row
    async fn update(&self, delivery: &Delivery) -> Result<()>;

    /// Lookup by delivery ID
    async fn get(&self, id: &str) -> Result<Option<Delivery>>;

    /// Rows of one subscription, newest first, at most `limit`
    async fn list_for_subscription(
        &self,
        subscription_id: &str,
        limit: usize,
    ) -> Result<Vec<Delivery>>;

    /// Failed rows whose follow-up attempt has not been claimed yet
    async fn scheduled_retries(&self) -> Result<Vec<Delivery>>;

    /// Atomically clear `next_retry_at` on a row that still has one.
    ///
    /// Returns the row as it was before the claim, or `None` if there was no
    /// pending retry (already claimed, or never scheduled). At most one caller
    /// ever receives `Some` for a given row.
    async fn claim_retry(&self, id: &str) -> Result<Option<Delivery>>;

    /// Atomically claim the retry of `previous_id` and persist `next`, the
    /// pending row of the follow-up attempt.
    ///
    /// Returns `false`, writing nothing, if `previous_id` has no pending
    /// retry. On error neither row may have changed, so the retry stays
    /// scheduled.
    async fn begin_retry(&self, previous_id: &str, next: &Delivery) -> Result<bool>;

    /// Delete every row of a subscription, returning how many were removed
    async fn remove_for_subscription(&self, subscription_id: &str) -> Result<usize>;
}
