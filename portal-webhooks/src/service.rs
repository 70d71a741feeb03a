//! Tenant webhook service: registry, dispatch and delivery history behind one
//! handle.

use crate::scheduler::{RetryHandler, RetryQueue, RetryWorkerHandle, retry_queue};
use crate::store::{DeliveryStore, MemoryDeliveryStore, MemorySubscriptionStore, SubscriptionStore};
use crate::{
    Clock, Delivery, DeliveryExecutor, DispatchResult, Dispatcher, NewSubscription,
    RandomSecretGenerator, RegisteredSubscription, Result, SecretGenerator, Subscription,
    SubscriptionRegistry, SubscriptionUpdate, SystemClock, WebhookConfig, WebhookError,
    WebhookEvent,
};
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Number of ledger rows returned by [`TenantWebhookService::deliveries`]
/// when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Entry point for route handlers and application code.
///
/// Owns the retry worker; call [`shutdown`](Self::shutdown) before dropping
/// the service to stop it.
pub struct TenantWebhookService {
    registry: SubscriptionRegistry,
    dispatcher: Dispatcher,
    executor: Arc<DeliveryExecutor>,
    deliveries: Arc<dyn DeliveryStore>,
    clock: Arc<dyn Clock>,
    retries: RetryQueue,
    worker: Mutex<Option<RetryWorkerHandle>>,
}

impl TenantWebhookService {
    /// Service over in-memory stores. Must be called inside a Tokio runtime.
    pub fn new(config: WebhookConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Create a builder for custom collaborators
    pub fn builder() -> TenantWebhookServiceBuilder {
        TenantWebhookServiceBuilder::default()
    }

    /// Configuration in use
    pub fn config(&self) -> &WebhookConfig {
        self.executor.config()
    }

    /// Event names and descriptions tenants can subscribe to
    pub fn available_events(&self) -> Vec<(&'static str, &'static str)> {
        WebhookEvent::catalogue()
    }

    /// Register a subscription. The returned value carries the plaintext
    /// secret, which is not retrievable later.
    pub async fn register(
        &self,
        tenant_id: &str,
        request: NewSubscription,
    ) -> Result<RegisteredSubscription> {
        self.registry.register(tenant_id, request).await
    }

    /// All subscriptions of a tenant, newest first
    pub async fn list(&self, tenant_id: &str) -> Result<Vec<Subscription>> {
        self.registry.list(tenant_id).await
    }

    /// Tenant-scoped lookup
    pub async fn get(&self, id: &str, tenant_id: &str) -> Result<Subscription> {
        self.registry.get(id, tenant_id).await
    }

    /// Partial update
    pub async fn update(
        &self,
        id: &str,
        tenant_id: &str,
        changes: SubscriptionUpdate,
    ) -> Result<Subscription> {
        self.registry.update(id, tenant_id, changes).await
    }

    /// Delete a subscription and its delivery history
    pub async fn delete(&self, id: &str, tenant_id: &str) -> Result<()> {
        self.registry.delete(id, tenant_id).await
    }

    /// Dispatch an event by name. Unknown names and tenants without matching
    /// subscriptions yield an empty list.
    pub async fn dispatch(
        &self,
        tenant_id: &str,
        event: &str,
        data: serde_json::Value,
    ) -> Vec<DispatchResult> {
        self.dispatcher.dispatch(tenant_id, event, data).await
    }

    /// Dispatch a typed event
    pub async fn dispatch_event(
        &self,
        tenant_id: &str,
        event: WebhookEvent,
        data: serde_json::Value,
    ) -> Vec<DispatchResult> {
        self.dispatcher.dispatch_event(tenant_id, event, data).await
    }

    /// Dispatch a typed event, yielding results in completion order
    pub async fn dispatch_stream(
        &self,
        tenant_id: &str,
        event: WebhookEvent,
        data: serde_json::Value,
    ) -> BoxStream<'static, DispatchResult> {
        self.dispatcher.dispatch_stream(tenant_id, event, data).await
    }

    /// Send a synthetic event to one subscription
    pub async fn test(&self, subscription: &Subscription) -> DispatchResult {
        self.executor.send_test(subscription).await
    }

    /// Delivery history of a subscription, newest first
    pub async fn deliveries(
        &self,
        subscription_id: &str,
        tenant_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Delivery>> {
        let subscription = self.registry.get(subscription_id, tenant_id).await?;
        self.deliveries
            .list_for_subscription(&subscription.id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await
    }

    /// One ledger row, tenant-scoped
    pub async fn delivery(&self, delivery_id: &str, tenant_id: &str) -> Result<Delivery> {
        self.deliveries
            .get(delivery_id)
            .await?
            .filter(|d| d.tenant_id == tenant_id)
            .ok_or_else(|| WebhookError::DeliveryNotFound(delivery_id.to_string()))
    }

    /// Re-send the data of a recorded delivery as a new lineage
    pub async fn redeliver(&self, delivery_id: &str, tenant_id: &str) -> Result<DispatchResult> {
        let original = self.delivery(delivery_id, tenant_id).await?;
        let subscription = self
            .registry
            .get(&original.subscription_id, tenant_id)
            .await
            .map_err(|_| WebhookError::DeliveryNotFound(delivery_id.to_string()))?;

        info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription.id,
            delivery_id = %delivery_id,
            "Manual webhook redelivery"
        );

        Ok(self
            .executor
            .deliver_attempt(
                &subscription,
                original.event,
                original.payload.data,
                1,
                Some(original.id),
            )
            .await)
    }

    /// Re-enqueue every retry still scheduled on the ledger, e.g. after a
    /// restart. Overdue retries fire immediately.
    pub async fn recover_retries(&self) -> Result<usize> {
        if self.retries.is_closed() {
            return Err(WebhookError::Internal(
                "Retry worker is shut down".to_string(),
            ));
        }

        let scheduled = self.deliveries.scheduled_retries().await?;
        let now = self.clock.now();

        let mut recovered = 0;
        for delivery in scheduled {
            let Some(due) = delivery.next_retry_at else {
                continue;
            };
            let delay = (due - now).to_std().unwrap_or_default();
            self.retries.schedule(delivery.id.as_str(), delay)?;
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "Recovered scheduled webhook retries");
        }
        Ok(recovered)
    }

    /// Stop the retry worker. Retries not yet fired stay on the ledger and
    /// are picked up by [`recover_retries`](Self::recover_retries).
    pub async fn shutdown(&self) {
        match self.worker.lock().await.take() {
            Some(handle) => {
                handle.shutdown().await;
                info!("Webhook retry worker stopped");
            }
            None => warn!("Webhook service already shut down"),
        }
    }
}

/// Builder for [`TenantWebhookService`]. Unset collaborators default to
/// in-memory stores, the system clock and the random secret generator.
#[derive(Default)]
pub struct TenantWebhookServiceBuilder {
    config: WebhookConfig,
    subscriptions: Option<Arc<dyn SubscriptionStore>>,
    deliveries: Option<Arc<dyn DeliveryStore>>,
    secrets: Option<Arc<dyn SecretGenerator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl TenantWebhookServiceBuilder {
    /// Set the configuration
    pub fn config(mut self, config: WebhookConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the subscription store
    pub fn subscription_store(mut self, store: Arc<dyn SubscriptionStore>) -> Self {
        self.subscriptions = Some(store);
        self
    }

    /// Set the delivery ledger
    pub fn delivery_store(mut self, store: Arc<dyn DeliveryStore>) -> Self {
        self.deliveries = Some(store);
        self
    }

    /// Set the secret and delivery ID source
    pub fn secret_generator(mut self, secrets: Arc<dyn SecretGenerator>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Set the clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Wire the components and start the retry worker. Must be called inside
    /// a Tokio runtime.
    pub fn build(self) -> Result<TenantWebhookService> {
        let subscriptions = self
            .subscriptions
            .unwrap_or_else(|| Arc::new(MemorySubscriptionStore::new()));
        let deliveries = self
            .deliveries
            .unwrap_or_else(|| Arc::new(MemoryDeliveryStore::new()));
        let secrets = self
            .secrets
            .unwrap_or_else(|| Arc::new(RandomSecretGenerator));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let (retries, worker) = retry_queue();
        let executor = Arc::new(DeliveryExecutor::new(
            self.config,
            subscriptions.clone(),
            deliveries.clone(),
            secrets.clone(),
            clock.clone(),
            retries.clone(),
        )?);
        let handler: Arc<dyn RetryHandler> = executor.clone();
        let worker = worker.spawn(handler);

        Ok(TenantWebhookService {
            registry: SubscriptionRegistry::new(
                subscriptions.clone(),
                deliveries.clone(),
                secrets,
                clock.clone(),
            ),
            dispatcher: Dispatcher::new(subscriptions, executor.clone()),
            executor,
            deliveries,
            clock,
            retries,
            worker: Mutex::new(Some(worker)),
        })
    }
}
