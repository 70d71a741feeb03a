//! Delivery executor: one signed POST per attempt, with retries scheduled on
//! the ledger and the retry queue.

use crate::scheduler::{RetryHandler, RetryQueue};
use crate::signature::headers;
use crate::store::{DeliveryStore, SubscriptionStore};
use crate::{
    Clock, Delivery, DispatchResult, Result, SecretGenerator, Subscription, WebhookConfig,
    WebhookError, WebhookEvent, WebhookPayload, WebhookSignature,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Event used by [`DeliveryExecutor::send_test`].
pub const TEST_EVENT: WebhookEvent = WebhookEvent::EntityCreated;

/// What came back from one HTTP attempt
enum AttemptOutcome {
    Response { status: u16, body: Option<String> },
    Transport(WebhookError),
}

/// Executes delivery attempts and owns the retry state machine.
///
/// Each attempt writes its own ledger row: created `pending`, then updated to
/// `success` or `failed`. A failed row below the attempt ceiling keeps
/// `next_retry_at` until the retry worker claims it.
#[derive(Clone)]
pub struct DeliveryExecutor {
    config: WebhookConfig,
    http_client: Client,
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
    secrets: Arc<dyn SecretGenerator>,
    clock: Arc<dyn Clock>,
    retries: RetryQueue,
}

impl DeliveryExecutor {
    /// Create an executor. Fails if the HTTP client cannot be built.
    pub fn new(
        config: WebhookConfig,
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
        secrets: Arc<dyn SecretGenerator>,
        clock: Arc<dyn Clock>,
        retries: RetryQueue,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            subscriptions,
            deliveries,
            secrets,
            clock,
            retries,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Deliver an event to one subscription as the first attempt of a new
    /// lineage
    pub async fn deliver(
        &self,
        subscription: &Subscription,
        event: WebhookEvent,
        data: serde_json::Value,
    ) -> DispatchResult {
        self.deliver_attempt(subscription, event, data, 1, None)
            .await
    }

    /// Send a synthetic event through the normal delivery path
    pub async fn send_test(&self, subscription: &Subscription) -> DispatchResult {
        let data = serde_json::json!({
            "test": true,
            "message": "This is a test webhook delivery",
            "timestamp": self.clock.now(),
        });
        self.deliver(subscription, TEST_EVENT, data).await
    }

    /// Run attempt number `attempt`.
    ///
    /// Never returns an error: every failure is recorded on the ledger row
    /// and reported in the [`DispatchResult`].
    pub async fn deliver_attempt(
        &self,
        subscription: &Subscription,
        event: WebhookEvent,
        data: serde_json::Value,
        attempt: u32,
        retry_of: Option<String>,
    ) -> DispatchResult {
        let delivery_id = self.secrets.new_delivery_token();

        let delivery = match self.pending_row(
            &delivery_id,
            subscription,
            event,
            data,
            attempt,
            retry_of,
        ) {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(subscription_id = %subscription.id, error = %e, "Failed to sign webhook payload");
                return DispatchResult::failed(&subscription.id, delivery_id, e.to_string());
            }
        };

        if let Err(e) = self.deliveries.create(&delivery).await {
            error!(
                subscription_id = %subscription.id,
                delivery_id = %delivery_id,
                error = %e,
                "Failed to record webhook delivery"
            );
            return DispatchResult::failed(&subscription.id, delivery_id, e.to_string());
        }

        self.execute(subscription, delivery).await
    }

    /// Sign the payload and build the `pending` ledger row of one attempt
    fn pending_row(
        &self,
        delivery_id: &str,
        subscription: &Subscription,
        event: WebhookEvent,
        data: serde_json::Value,
        attempt: u32,
        retry_of: Option<String>,
    ) -> Result<Delivery> {
        let signer = WebhookSignature::with_algorithm(
            subscription.secret.clone(),
            self.config.signing_algorithm,
        );
        let payload = WebhookPayload::new(
            event,
            self.clock.now(),
            subscription.tenant_id.as_str(),
            data,
        )
        .sign(&signer)?;

        let delivery = Delivery::pending(
            delivery_id,
            subscription.id.as_str(),
            payload,
            attempt,
            self.clock.now(),
        );
        Ok(match retry_of {
            Some(previous) => delivery.with_retry_of(previous),
            None => delivery,
        })
    }

    /// Send a persisted `pending` row and record the outcome
    async fn execute(&self, subscription: &Subscription, delivery: Delivery) -> DispatchResult {
        debug!(
            tenant_id = %subscription.tenant_id,
            subscription_id = %subscription.id,
            delivery_id = %delivery.id,
            event = %delivery.event,
            attempt = delivery.attempts,
            "Webhook delivery attempt"
        );

        let outcome = self.send(&subscription.url, &delivery).await;
        self.record_outcome(subscription, delivery, outcome).await
    }

    /// POST the payload, bounded by the configured timeout
    async fn send(&self, url: &str, delivery: &Delivery) -> AttemptOutcome {
        let body = match delivery.payload.to_bytes() {
            Ok(body) => body,
            Err(e) => return AttemptOutcome::Transport(e),
        };
        let signature = delivery.payload.signature.clone().unwrap_or_default();

        let request = self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(headers::SIGNATURE, signature)
            .header(headers::EVENT, delivery.event.as_str())
            .header(headers::DELIVERY, &delivery.id)
            .body(body);

        let exchange = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await.ok();
            Ok::<_, reqwest::Error>((status, body))
        };

        match tokio::time::timeout(self.config.timeout, exchange).await {
            Ok(Ok((status, body))) => AttemptOutcome::Response { status, body },
            Ok(Err(e)) => AttemptOutcome::Transport(WebhookError::Http(e)),
            Err(_) => AttemptOutcome::Transport(WebhookError::Timeout(self.config.timeout)),
        }
    }

    /// Persist the outcome, then decide on a retry. The ledger update always
    /// happens before the retry is queued.
    async fn record_outcome(
        &self,
        subscription: &Subscription,
        mut delivery: Delivery,
        outcome: AttemptOutcome,
    ) -> DispatchResult {
        let limit = self.config.response_body_limit;
        let attempt = delivery.attempts;

        let (status_code, error) = match outcome {
            AttemptOutcome::Response { status, body } if (200..300).contains(&status) => {
                delivery.mark_succeeded(status, body, limit, self.clock.now());
                (Some(status), None)
            }
            AttemptOutcome::Response { status, body } => {
                let next = self.next_retry_at(attempt);
                delivery.mark_failed(Some(status), body, limit, next);
                (Some(status), Some(format!("HTTP {}", status)))
            }
            AttemptOutcome::Transport(e) => {
                let message = e.to_string();
                let next = self.next_retry_at(attempt);
                delivery.mark_failed(None, Some(message.clone()), limit, next);
                (None, Some(message))
            }
        };

        let result = DispatchResult {
            subscription_id: subscription.id.clone(),
            delivery_id: delivery.id.clone(),
            success: error.is_none(),
            status_code,
            error,
        };

        if let Err(e) = self.deliveries.update(&delivery).await {
            // Without a persisted next_retry_at the retry could never be
            // claimed, so none is queued.
            error!(
                delivery_id = %delivery.id,
                error = %e,
                "Failed to record webhook delivery outcome"
            );
            return result;
        }

        if result.success {
            info!(
                tenant_id = %subscription.tenant_id,
                subscription_id = %subscription.id,
                delivery_id = %delivery.id,
                event = %delivery.event,
                attempt,
                status_code = ?status_code,
                "Webhook delivered"
            );
            return result;
        }

        if delivery.retry_scheduled() {
            let delay = self.config.retry_policy.delay_for_attempt(attempt);
            warn!(
                subscription_id = %subscription.id,
                delivery_id = %delivery.id,
                attempt,
                status_code = ?status_code,
                error = ?result.error,
                retry_in = ?delay,
                "Webhook delivery failed, retry scheduled"
            );
            if let Err(e) = self.retries.schedule(delivery.id.as_str(), delay) {
                warn!(
                    delivery_id = %delivery.id,
                    error = %e,
                    "Retry left on the ledger for recovery"
                );
            }
        } else {
            error!(
                tenant_id = %subscription.tenant_id,
                subscription_id = %subscription.id,
                delivery_id = %delivery.id,
                event = %delivery.event,
                attempt,
                status_code = ?status_code,
                error = ?result.error,
                "Webhook delivery failed permanently"
            );
        }

        result
    }

    fn next_retry_at(&self, attempt: u32) -> Option<DateTime<Utc>> {
        let policy = &self.config.retry_policy;
        if !policy.should_retry(attempt) {
            return None;
        }
        let delay = chrono::Duration::from_std(policy.delay_for_attempt(attempt))
            .unwrap_or(chrono::Duration::MAX);
        Some(
            self.clock
                .now()
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// Claim the scheduled retry of `delivery_id` and run the next attempt.
    ///
    /// Returns `None` when there is nothing to do: the retry was already
    /// claimed, or the subscription has been deleted since. The claim and the
    /// next attempt's `pending` row are written in one store call, so on error
    /// the retry is still scheduled on the ledger.
    pub async fn retry(&self, delivery_id: &str) -> Result<Option<DispatchResult>> {
        let Some(previous) = self
            .deliveries
            .get(delivery_id)
            .await?
            .filter(|d| d.retry_scheduled())
        else {
            debug!(delivery_id = %delivery_id, "No retry pending");
            return Ok(None);
        };

        let Some(subscription) = self
            .subscriptions
            .find_by_id(&previous.subscription_id)
            .await?
        else {
            self.deliveries.claim_retry(delivery_id).await?;
            info!(
                delivery_id = %delivery_id,
                subscription_id = %previous.subscription_id,
                "Subscription removed, dropping retry"
            );
            return Ok(None);
        };

        let next = self.pending_row(
            &self.secrets.new_delivery_token(),
            &subscription,
            previous.event,
            previous.payload.data,
            previous.attempts + 1,
            Some(previous.id),
        )?;

        if !self.deliveries.begin_retry(delivery_id, &next).await? {
            debug!(delivery_id = %delivery_id, "Retry already claimed");
            return Ok(None);
        }

        Ok(Some(self.execute(&subscription, next).await))
    }
}

#[async_trait]
impl RetryHandler for DeliveryExecutor {
    async fn run_retry(&self, delivery_id: String) {
        if let Err(e) = self.retry(&delivery_id).await {
            error!(
                delivery_id = %delivery_id,
                error = %e,
                "Webhook retry failed, left on the ledger for recovery"
            );
        }
    }
}
