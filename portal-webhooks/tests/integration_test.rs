//! End-to-end tests against mock subscriber endpoints.

mod common;

use chrono::{TimeZone, Utc};
use common::{FIXED_SECRET, Harness, TEST_TIMEOUT, test_config};
use futures::StreamExt;
use portal_webhooks::store::DeliveryStore;
use portal_webhooks::*;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn header_value<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|v| v.to_str().ok())
}

async fn received(server: &MockServer) -> Vec<Request> {
    server.received_requests().await.unwrap_or_default()
}

async fn register(
    harness: &Harness,
    tenant: &str,
    url: String,
    events: &[&str],
) -> Subscription {
    harness
        .service
        .register(tenant, NewSubscription::new(url, events.iter().copied()))
        .await
        .unwrap()
        .subscription
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_dispatch_only_reaches_subscribed_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("Content-Type", "application/json"))
        .and(header("X-Webhook-Event", "entity.approved"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let fixed = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let harness = Harness::with_clock(test_config(), Arc::new(ManualClock::new(fixed)));
    let sub = register(
        &harness,
        "tenant-a",
        format!("{}/hook", server.uri()),
        &["entity.approved"],
    )
    .await;

    let results = harness
        .service
        .dispatch("tenant-a", "entity.created", json!({"entityId": "e-1"}))
        .await;
    assert!(results.is_empty());
    assert!(received(&server).await.is_empty());

    let data = json!({"entityId": "e-1", "approvedBy": "u-7"});
    let results = harness
        .service
        .dispatch("tenant-a", "entity.approved", data.clone())
        .await;
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].subscription_id, sub.id);
    assert_eq!(results[0].status_code, Some(200));

    let requests = received(&server).await;
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    // Signature is reproducible from the fixed secret, clock and data
    let signer = WebhookSignature::new(WebhookSecret::new(FIXED_SECRET));
    let expected = WebhookPayload::new(WebhookEvent::EntityApproved, fixed, "tenant-a", data)
        .sign(&signer)
        .unwrap();
    let signature = header_value(request, "X-Webhook-Signature").unwrap();
    assert_eq!(Some(signature), expected.signature.as_deref());
    assert!(signature.starts_with("sha256="));

    assert_eq!(
        header_value(request, "X-Webhook-Delivery"),
        Some(results[0].delivery_id.as_str())
    );

    let body = WebhookPayload::from_slice(&request.body).unwrap();
    assert_eq!(body, expected);
    assert_eq!(body.timestamp, "2024-05-01T12:00:00.000Z");
}

#[tokio::test]
async fn test_subscriber_can_verify_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let harness = Harness::new();
    register(&harness, "tenant-a", server.uri(), &["license.expiring"]).await;
    harness
        .service
        .dispatch_event(
            "tenant-a",
            WebhookEvent::LicenseExpiring,
            json!({"licenseNo": "L-99", "daysLeft": 14}),
        )
        .await;

    let request = received(&server).await.remove(0);
    let receiver = WebhookReceiver::new(FIXED_SECRET);
    let signature = header_value(&request, "X-Webhook-Signature").unwrap();

    let payload = receiver.receive(&request.body, signature).unwrap();
    assert_eq!(payload.event, WebhookEvent::LicenseExpiring);
    assert_eq!(payload.data["licenseNo"], "L-99");
    assert!(payload.verify(&WebhookSignature::new(WebhookSecret::new(FIXED_SECRET))).unwrap());

    assert!(!WebhookReceiver::new("whsec_wrong").verify(&request.body, signature).unwrap());
}

#[tokio::test]
async fn test_disabled_subscription_receives_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let sub = register(&harness, "tenant-a", server.uri(), &["entity.rejected"]).await;
    harness
        .service
        .update(&sub.id, "tenant-a", SubscriptionUpdate::new().active(false))
        .await
        .unwrap();

    let results = harness
        .service
        .dispatch("tenant-a", "entity.rejected", json!({}))
        .await;
    assert!(results.is_empty());
    assert!(harness.ledger.all().await.is_empty());
}

#[tokio::test]
async fn test_no_subscribers_is_silent_noop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new();
    register(&harness, "tenant-a", server.uri(), &["user.invited"]).await;

    // Another tenant's event never reaches tenant-a's endpoint
    let results = harness
        .service
        .dispatch("tenant-b", "user.invited", json!({"email": "x@example.test"}))
        .await;
    assert!(results.is_empty());

    // Unknown event names are a no-op rather than an error
    let results = harness
        .service
        .dispatch("tenant-a", "invoice.paid", json!({}))
        .await;
    assert!(results.is_empty());
    assert!(received(&server).await.is_empty());
}

#[tokio::test]
async fn test_dispatch_to_many_subscriptions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let mut ids = Vec::new();
    for i in 0..3 {
        let sub = register(
            &harness,
            "tenant-a",
            format!("{}/hook/{}", server.uri(), i),
            &["entity.created", "entity.approved"],
        )
        .await;
        ids.push(sub.id);
    }

    let results = harness
        .service
        .dispatch("tenant-a", "entity.created", json!({"entityId": "e-3"}))
        .await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.success));

    let mut delivered: Vec<String> = results.into_iter().map(|r| r.subscription_id).collect();
    delivered.sort();
    ids.sort();
    assert_eq!(delivered, ids);
}

#[tokio::test]
async fn test_slow_endpoint_does_not_delay_others() {
    let hanging = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&hanging)
        .await;
    let fast = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&fast)
        .await;

    let harness = Harness::with_config(
        WebhookConfig::builder()
            .timeout(TEST_TIMEOUT)
            .no_retries()
            .build(),
    );
    let x = register(&harness, "tenant-a", hanging.uri(), &["entity.approved"]).await;
    let y = register(&harness, "tenant-a", fast.uri(), &["entity.approved"]).await;

    let started = Instant::now();
    let mut results = harness
        .service
        .dispatch_stream("tenant-a", WebhookEvent::EntityApproved, json!({}))
        .await;

    let first = results.next().await.unwrap();
    assert_eq!(first.subscription_id, y.id);
    assert!(first.success);
    assert!(started.elapsed() < TEST_TIMEOUT);

    let second = results.next().await.unwrap();
    assert_eq!(second.subscription_id, x.id);
    assert!(!second.success);
    assert!(second.status_code.is_none());
    assert!(second.error.unwrap().contains("timed out"));
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn test_retry_ceiling_for_failing_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let sub = register(&harness, "tenant-a", server.uri(), &["entity.created"]).await;

    let results = harness
        .service
        .dispatch("tenant-a", "entity.created", json!({"entityId": "e-9"}))
        .await;
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].status_code, Some(500));

    let rows = harness
        .wait_for_terminal(&sub.id, 3, Duration::from_secs(5))
        .await;

    // Give a would-be fourth attempt time to show up
    tokio::time::sleep(Duration::from_millis(300)).await;
    let rows_after = harness.rows_for(&sub.id).await;
    assert_eq!(rows_after.len(), 3);

    let attempts: Vec<u32> = rows.iter().map(|d| d.attempts).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(rows.iter().all(|d| d.status == DeliveryStatus::Failed));
    assert!(rows.iter().all(|d| d.status_code == Some(500)));
    assert!(rows.iter().all(|d| d.delivered_at.is_none()));
    assert_eq!(rows[2].response_body.as_deref(), Some("internal error"));
    assert!(rows[2].is_terminal());

    // Each attempt links to the one before it
    assert!(rows[0].retry_of.is_none());
    assert_eq!(rows[1].retry_of.as_deref(), Some(rows[0].id.as_str()));
    assert_eq!(rows[2].retry_of.as_deref(), Some(rows[1].id.as_str()));

    assert_eq!(received(&server).await.len(), 3);
}

#[tokio::test]
async fn test_success_on_second_attempt_stops_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("received"))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let sub = register(&harness, "tenant-a", server.uri(), &["user.invited"]).await;

    harness
        .service
        .dispatch("tenant-a", "user.invited", json!({"email": "new@example.test"}))
        .await;

    let rows = harness
        .wait_for_terminal(&sub.id, 2, Duration::from_secs(5))
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.rows_for(&sub.id).await.len(), 2);

    assert_eq!(rows[0].status, DeliveryStatus::Failed);
    assert_eq!(rows[0].status_code, Some(503));
    assert!(rows[0].next_retry_at.is_none());

    assert_eq!(rows[1].attempts, 2);
    assert_eq!(rows[1].status, DeliveryStatus::Success);
    assert_eq!(rows[1].response_body.as_deref(), Some("received"));
    assert!(rows[1].delivered_at.is_some());

    // Same event data on every attempt, each with its own delivery ID
    let requests = received(&server).await;
    assert_eq!(requests.len(), 2);
    let bodies: Vec<WebhookPayload> = requests
        .iter()
        .map(|r| WebhookPayload::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(bodies[0].data, bodies[1].data);
    assert_ne!(
        header_value(&requests[0], "X-Webhook-Delivery"),
        header_value(&requests[1], "X-Webhook-Delivery")
    );
}

#[tokio::test]
async fn test_backoff_spacing_increases() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = Harness::with_config(
        WebhookConfig::builder()
            .timeout(TEST_TIMEOUT)
            .retry_base_delay(Duration::from_millis(50))
            .build(),
    );
    let sub = register(&harness, "tenant-a", server.uri(), &["entity.created"]).await;

    harness
        .service
        .dispatch("tenant-a", "entity.created", json!({}))
        .await;
    let rows = harness
        .wait_for_terminal(&sub.id, 3, Duration::from_secs(5))
        .await;
    assert_eq!(rows.len(), 3);

    // 100ms after attempt 1, 200ms after attempt 2
    let first_gap = rows[1].created_at - rows[0].created_at;
    let second_gap = rows[2].created_at - rows[1].created_at;
    assert!(first_gap >= chrono::Duration::milliseconds(100));
    assert!(second_gap >= chrono::Duration::milliseconds(200));
    assert!(second_gap > first_gap);
}

#[tokio::test]
async fn test_deleted_subscription_drops_pending_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = Harness::with_config(
        WebhookConfig::builder()
            .timeout(TEST_TIMEOUT)
            .retry_base_delay(Duration::from_millis(100))
            .build(),
    );
    let sub = register(&harness, "tenant-a", server.uri(), &["entity.created"]).await;

    harness
        .service
        .dispatch("tenant-a", "entity.created", json!({}))
        .await;
    harness.service.delete(&sub.id, "tenant-a").await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(received(&server).await.len(), 1);
    assert!(harness.rows_for(&sub.id).await.is_empty());
}

#[tokio::test]
async fn test_recover_retries_after_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = WebhookConfig::builder()
        .timeout(TEST_TIMEOUT)
        .retry_base_delay(Duration::from_millis(250))
        .build();

    let before = Harness::with_config(config.clone());
    let sub = register(&before, "tenant-a", server.uri(), &["entity.approved"]).await;
    before
        .service
        .dispatch("tenant-a", "entity.approved", json!({"entityId": "e-5"}))
        .await;
    // Stop before the 500ms retry fires
    before.service.shutdown().await;

    // A stopped service refuses recovery and leaves the ledger untouched
    let err = before.service.recover_retries().await.unwrap_err();
    assert!(matches!(err, WebhookError::Internal(_)));

    let scheduled = before.ledger.scheduled_retries().await.unwrap();
    assert_eq!(scheduled.len(), 1);

    let after = Harness::restarted(config, &before);
    assert_eq!(after.service.recover_retries().await.unwrap(), 1);
    // Recovering twice must still produce a single attempt
    assert_eq!(after.service.recover_retries().await.unwrap(), 1);

    let rows = after
        .wait_for_terminal(&sub.id, 2, Duration::from_secs(5))
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(after.rows_for(&sub.id).await.len(), 2);
    assert_eq!(rows[1].attempts, 2);
    assert_eq!(rows[1].status, DeliveryStatus::Success);
    assert_eq!(rows[1].retry_of.as_deref(), Some(scheduled[0].id.as_str()));
    assert_eq!(received(&server).await.len(), 2);

    after.service.shutdown().await;
}

// =============================================================================
// Registry, history and helpers
// =============================================================================

#[tokio::test]
async fn test_tenant_isolation_across_operations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let sub = register(&harness, "tenant-a", server.uri(), &["entity.created"]).await;
    let results = harness
        .service
        .dispatch("tenant-a", "entity.created", json!({}))
        .await;
    let delivery_id = &results[0].delivery_id;

    assert!(harness.service.get(&sub.id, "tenant-b").await.unwrap_err().is_not_found());
    assert!(harness.service.list("tenant-b").await.unwrap().is_empty());
    assert!(
        harness
            .service
            .deliveries(&sub.id, "tenant-b", None)
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(matches!(
        harness.service.redeliver(delivery_id, "tenant-b").await,
        Err(WebhookError::DeliveryNotFound(_))
    ));
    assert!(harness.service.delivery(delivery_id, "tenant-a").await.is_ok());
}

#[tokio::test]
async fn test_registration_reveals_secret_once() {
    let harness = Harness::new();
    let registered = harness
        .service
        .register(
            "tenant-a",
            NewSubscription::new("https://example.test/hook", ["entity.approved"])
                .description("ERP"),
        )
        .await
        .unwrap();

    assert_eq!(registered.secret(), FIXED_SECRET);
    assert_eq!(registered.to_response()["secret"], FIXED_SECRET);

    let listed = harness.service.list("tenant-a").await.unwrap();
    let view = serde_json::to_value(listed[0].view()).unwrap();
    assert_eq!(view["secretMasked"], "whsec_integr...");
    assert!(!serde_json::to_string(&listed[0]).unwrap().contains(FIXED_SECRET));
}

#[tokio::test]
async fn test_delivery_history_newest_first() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let sub = register(&harness, "tenant-a", server.uri(), &["entity.created"]).await;
    let mut ids = Vec::new();
    for n in 0..4 {
        let results = harness
            .service
            .dispatch("tenant-a", "entity.created", json!({"n": n}))
            .await;
        ids.push(results[0].delivery_id.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let history = harness
        .service
        .deliveries(&sub.id, "tenant-a", Some(2))
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, ids[3]);
    assert_eq!(history[1].id, ids[2]);

    let all = harness
        .service
        .deliveries(&sub.id, "tenant-a", None)
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn test_history_order_under_fixed_clock() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let fixed = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let harness = Harness::with_clock(test_config(), Arc::new(ManualClock::new(fixed)));
    let sub = register(&harness, "tenant-a", server.uri(), &["entity.created"]).await;

    let mut ids = Vec::new();
    for n in 0..6 {
        let results = harness
            .service
            .dispatch("tenant-a", "entity.created", json!({"n": n}))
            .await;
        ids.push(results[0].delivery_id.clone());
    }
    ids.reverse();

    let history: Vec<String> = harness
        .service
        .deliveries(&sub.id, "tenant-a", None)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(history, ids);
}

#[tokio::test]
async fn test_connectivity_test_helper() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("X-Webhook-Event", "entity.created"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    // Test deliveries do not depend on the subscribed events
    let sub = register(&harness, "tenant-a", server.uri(), &["user.invited"]).await;

    let result = harness.service.test(&sub).await;
    assert!(result.success);

    let request = received(&server).await.remove(0);
    let payload = WebhookPayload::from_slice(&request.body).unwrap();
    assert_eq!(payload.event, TEST_EVENT);
    assert_eq!(payload.data["test"], true);
    assert_eq!(payload.tenant_id, "tenant-a");

    let row = harness
        .service
        .delivery(&result.delivery_id, "tenant-a")
        .await
        .unwrap();
    assert_eq!(row.status, DeliveryStatus::Success);
}

#[tokio::test]
async fn test_manual_redelivery_starts_new_lineage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = Harness::with_config(
        WebhookConfig::builder()
            .timeout(TEST_TIMEOUT)
            .no_retries()
            .build(),
    );
    let sub = register(&harness, "tenant-a", server.uri(), &["entity.rejected"]).await;

    let original = harness
        .service
        .dispatch("tenant-a", "entity.rejected", json!({"reason": "expired"}))
        .await
        .remove(0);
    assert!(!original.success);

    let redelivered = harness
        .service
        .redeliver(&original.delivery_id, "tenant-a")
        .await
        .unwrap();
    assert!(redelivered.success);
    assert_ne!(redelivered.delivery_id, original.delivery_id);

    let row = harness
        .service
        .delivery(&redelivered.delivery_id, "tenant-a")
        .await
        .unwrap();
    assert_eq!(row.attempts, 1);
    assert_eq!(row.retry_of.as_deref(), Some(original.delivery_id.as_str()));
    assert_eq!(row.payload.data, json!({"reason": "expired"}));
    assert_eq!(harness.rows_for(&sub.id).await.len(), 2);

    assert!(matches!(
        harness.service.redeliver("dlv_missing", "tenant-a").await,
        Err(WebhookError::DeliveryNotFound(_))
    ));
}

#[tokio::test]
async fn test_event_catalogue() {
    let harness = Harness::new();
    let events = harness.service.available_events();
    assert_eq!(events.len(), 5);
    assert!(events.contains(&("entity.approved", "Entity approved")));
}
