//! Shared fixtures for integration tests.

#![allow(dead_code)]

use portal_webhooks::store::{MemoryDeliveryStore, MemorySubscriptionStore};
use portal_webhooks::{
    Clock, Delivery, SecretGenerator, TenantWebhookService, WebhookConfig, WebhookSecret,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Per-attempt timeout used by tests
pub const TEST_TIMEOUT: Duration = Duration::from_millis(300);

/// Backoff unit used by tests: retries after 20ms, 40ms, ...
pub const TEST_BASE_DELAY: Duration = Duration::from_millis(10);

/// Secret handed to every subscription registered through [`Harness`]
pub const FIXED_SECRET: &str = "whsec_integration_fixed_secret";

/// Install a test log subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("portal_webhooks=debug")),
        )
        .with_test_writer()
        .try_init();
}

static NEXT_DELIVERY: AtomicUsize = AtomicUsize::new(1);

/// Fixed secret and sequential delivery IDs, unique across the test binary
#[derive(Debug, Default)]
pub struct FixedSecrets;

impl SecretGenerator for FixedSecrets {
    fn new_secret(&self) -> WebhookSecret {
        WebhookSecret::new(FIXED_SECRET)
    }

    fn new_delivery_token(&self) -> String {
        format!("dlv_{:06}", NEXT_DELIVERY.fetch_add(1, Ordering::SeqCst))
    }
}

pub fn test_config() -> WebhookConfig {
    WebhookConfig::builder()
        .timeout(TEST_TIMEOUT)
        .retry_base_delay(TEST_BASE_DELAY)
        .build()
}

/// A service plus direct handles on its stores
pub struct Harness {
    pub service: TenantWebhookService,
    pub subscriptions: Arc<MemorySubscriptionStore>,
    pub ledger: Arc<MemoryDeliveryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: WebhookConfig) -> Self {
        Self::build(config, None, Default::default(), Default::default())
    }

    pub fn with_clock(config: WebhookConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, Some(clock), Default::default(), Default::default())
    }

    /// A fresh service over the stores of `previous`, as after a restart
    pub fn restarted(config: WebhookConfig, previous: &Harness) -> Self {
        Self::build(
            config,
            None,
            previous.subscriptions.clone(),
            previous.ledger.clone(),
        )
    }

    fn build(
        config: WebhookConfig,
        clock: Option<Arc<dyn Clock>>,
        subscriptions: Arc<MemorySubscriptionStore>,
        ledger: Arc<MemoryDeliveryStore>,
    ) -> Self {
        init_tracing();
        let mut builder = TenantWebhookService::builder()
            .config(config)
            .subscription_store(subscriptions.clone())
            .delivery_store(ledger.clone())
            .secret_generator(Arc::new(FixedSecrets));
        if let Some(clock) = clock {
            builder = builder.clock(clock);
        }
        Self {
            service: builder.build().expect("service builds"),
            subscriptions,
            ledger,
        }
    }

    /// Ledger rows of one subscription, oldest attempt first
    pub async fn rows_for(&self, subscription_id: &str) -> Vec<Delivery> {
        self.ledger
            .all()
            .await
            .into_iter()
            .filter(|d| d.subscription_id == subscription_id)
            .collect()
    }

    /// Poll until `count` rows exist for the subscription and the newest one is
    /// terminal, or give up after `max_wait`
    pub async fn wait_for_terminal(
        &self,
        subscription_id: &str,
        count: usize,
        max_wait: Duration,
    ) -> Vec<Delivery> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let rows = self.rows_for(subscription_id).await;
            if rows.len() >= count && rows.last().is_some_and(|d| d.is_terminal()) {
                return rows;
            }
            if tokio::time::Instant::now() >= deadline {
                return rows;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
