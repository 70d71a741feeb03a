//! Tenant webhook dispatch and delivery retries
//!
//! Tenants register HTTPS endpoints for a closed set of domain events. When an
//! event occurs the service signs a JSON payload with each subscription's
//! secret, POSTs it to every matching endpoint concurrently, and records every
//! attempt in a delivery ledger. Failed attempts are retried with exponential
//! backoff up to a fixed ceiling.
//!
//! # Features
//!
//! - **Subscriptions**: tenant-scoped registry with generated `whsec_` secrets
//! - **Signing**: HMAC-SHA256 (or SHA-512) signatures in `sha256=<hex>` form
//! - **Dispatch**: independent, concurrent delivery per subscription
//! - **Retries**: delayed queue drained by a background worker, durable on the
//!   ledger via `next_retry_at`
//! - **Receiving**: verification helpers for subscriber endpoints
//!
//! # Example: Dispatching Events
//!
//! ```rust,no_run
//! use portal_webhooks::{NewSubscription, TenantWebhookService, WebhookConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = TenantWebhookService::new(WebhookConfig::from_env()?)?;
//!
//!     let registered = service
//!         .register(
//!             "tenant-42",
//!             NewSubscription::new("https://erp.example.com/hooks", ["entity.approved"]),
//!         )
//!         .await?;
//!     println!("secret: {}", registered.secret());
//!
//!     let results = service
//!         .dispatch(
//!             "tenant-42",
//!             "entity.approved",
//!             serde_json::json!({ "entityId": "ent_123" }),
//!         )
//!         .await;
//!     assert_eq!(results.len(), 1);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Receiving Webhooks
//!
//! ```rust,no_run
//! use portal_webhooks::WebhookReceiver;
//! use std::collections::HashMap;
//!
//! let receiver = WebhookReceiver::new("whsec_...");
//!
//! let body = br#"{"event":"entity.approved","timestamp":"2024-01-01T00:00:00.000Z","tenantId":"t","data":{}}"#;
//! let mut headers = HashMap::new();
//! headers.insert("X-Webhook-Signature".to_string(), "sha256=...".to_string());
//!
//! let payload = receiver.receive_from_request(body, &headers);
//! ```

mod clock;
mod config;
mod dispatcher;
mod error;
mod event;
mod executor;
mod payload;
mod receiver;
mod registry;
mod retry;
mod secret;
mod signature;
mod subscription;
mod validation;

pub mod scheduler;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SigningAlgorithm, WebhookConfig, WebhookConfigBuilder};
pub use dispatcher::Dispatcher;
pub use error::WebhookError;
pub use event::WebhookEvent;
pub use executor::{DeliveryExecutor, TEST_EVENT};
pub use payload::{Delivery, DeliveryStatus, DispatchResult, WebhookPayload};
pub use receiver::{WebhookHandler, WebhookReceiver};
pub use registry::SubscriptionRegistry;
pub use retry::RetryPolicy;
pub use secret::{RandomSecretGenerator, SECRET_PREFIX, SecretGenerator, WebhookSecret};
pub use service::{TenantWebhookService, TenantWebhookServiceBuilder};
pub use signature::{WebhookSignature, headers};
pub use subscription::{
    NewSubscription, RegisteredSubscription, Subscription, SubscriptionUpdate, SubscriptionView,
};
pub use validation::{parse_events, validate_url};

/// Result type for webhook operations
pub type Result<T> = std::result::Result<T, WebhookError>;

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        DispatchResult, NewSubscription, RegisteredSubscription, Subscription, SubscriptionUpdate,
        TenantWebhookService, WebhookConfig, WebhookError, WebhookEvent, WebhookPayload,
        WebhookReceiver, WebhookSignature,
    };
}
