//! Event fan-out to matching subscriptions

use crate::store::SubscriptionStore;
use crate::{DeliveryExecutor, DispatchResult, Subscription, WebhookEvent};
use futures::stream::{self, BoxStream, FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{debug, error};

/// Fans a tenant event out to every active subscription that wants it.
///
/// Every delivery runs on its own task, so a slow or unreachable endpoint
/// never holds up the others. Results arrive in completion order.
#[derive(Clone)]
pub struct Dispatcher {
    subscriptions: Arc<dyn SubscriptionStore>,
    executor: Arc<DeliveryExecutor>,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>, executor: Arc<DeliveryExecutor>) -> Self {
        Self {
            subscriptions,
            executor,
        }
    }

    /// Dispatch by event name. Names outside the known set match nothing.
    pub async fn dispatch(
        &self,
        tenant_id: &str,
        event: &str,
        data: serde_json::Value,
    ) -> Vec<DispatchResult> {
        match WebhookEvent::parse(event) {
            Some(event) => self.dispatch_event(tenant_id, event, data).await,
            None => {
                debug!(tenant_id = %tenant_id, event = %event, "Unknown event, nothing to dispatch");
                Vec::new()
            }
        }
    }

    /// Dispatch a typed event and wait for every first attempt to resolve
    pub async fn dispatch_event(
        &self,
        tenant_id: &str,
        event: WebhookEvent,
        data: serde_json::Value,
    ) -> Vec<DispatchResult> {
        self.dispatch_stream(tenant_id, event, data)
            .await
            .collect()
            .await
    }

    /// Start all deliveries and yield each result as soon as it is known.
    ///
    /// Deliveries are already running when this returns; dropping the stream
    /// does not cancel them.
    pub async fn dispatch_stream(
        &self,
        tenant_id: &str,
        event: WebhookEvent,
        data: serde_json::Value,
    ) -> BoxStream<'static, DispatchResult> {
        let targets = self.matching(tenant_id, event).await;
        if targets.is_empty() {
            debug!(tenant_id = %tenant_id, event = %event, "No subscribers for event");
            return stream::empty().boxed();
        }

        debug!(
            tenant_id = %tenant_id,
            event = %event,
            subscriptions = targets.len(),
            "Dispatching webhook event"
        );

        let tasks: FuturesUnordered<_> = targets
            .into_iter()
            .map(|subscription| {
                let executor = self.executor.clone();
                let data = data.clone();
                let subscription_id = subscription.id.clone();
                let handle =
                    tokio::spawn(async move { executor.deliver(&subscription, event, data).await });

                async move {
                    handle.await.unwrap_or_else(|e| {
                        error!(subscription_id = %subscription_id, error = %e, "Delivery task failed");
                        DispatchResult::failed(
                            subscription_id,
                            String::new(),
                            format!("Delivery task failed: {}", e),
                        )
                    })
                }
            })
            .collect();

        tasks.boxed()
    }

    /// Active subscriptions of the tenant for `event`. A lookup failure is
    /// logged and treated as no match.
    async fn matching(&self, tenant_id: &str, event: WebhookEvent) -> Vec<Subscription> {
        match self
            .subscriptions
            .find_active_for_event(tenant_id, event)
            .await
        {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!(tenant_id = %tenant_id, event = %event, error = %e, "Subscription lookup failed");
                Vec::new()
            }
        }
    }
}
