mod common;

use common::*;
use revenue_service::models::SkipReason;
use revenue_service::services::providers::{ProviderError, RevenueProvider};
use revenue_service::services::{StaticSecrets, StripeAdapter};
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter(server: &MockServer, page_size: u32) -> StripeAdapter {
    StripeAdapter::new(
        reqwest::Client::new(),
        stripe_config(&server.uri(), page_size),
        Arc::new(test_secrets()),
    )
}

async fn mount_subscriptions(server: &MockServer, data: Vec<serde_json::Value>) {
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions"))
        .and(query_param("status", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stripe_list(data, false)))
        .mount(server)
        .await;
}

async fn mount_payments(server: &MockServer, data: Vec<serde_json::Value>) {
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stripe_list(data, false)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn mrr_counts_relevant_subscriptions_only() {
    let server = MockServer::start().await;
    mount_subscriptions(
        &server,
        vec![
            stripe_subscription("sub_1", "active", serde_json::json!([stripe_item(1000, "month", 1, 1)])),
            stripe_subscription("sub_2", "active", serde_json::json!([stripe_item(12000, "year", 1, 2)])),
            stripe_subscription("sub_3", "canceled", serde_json::json!([stripe_item(5000, "month", 1, 1)])),
        ],
    )
    .await;
    mount_payments(&server, vec![]).await;

    let metrics = adapter(&server, 100)
        .aggregate(&run_at(fixed_now()))
        .await
        .expect("aggregation succeeds");

    assert_eq!(metrics.mrr.to_display_string(), "30.00");
    assert_eq!(metrics.coverage.subscriptions_contributing, 2);
    assert_eq!(metrics.coverage.skipped(SkipReason::InactiveStatus), 1);
    assert_eq!(metrics.subscription_pages.items_seen, 3);
}

#[tokio::test]
async fn revenue_windows_from_payment_intents() {
    let server = MockServer::start().await;
    mount_subscriptions(&server, vec![]).await;

    let month_start = at("2024-03-01T00:00:00Z");
    mount_payments(
        &server,
        vec![
            stripe_payment("pi_1", "succeeded", 500, month_start - chrono::Duration::seconds(1)),
            stripe_payment("pi_2", "succeeded", 700, month_start + chrono::Duration::seconds(60)),
            stripe_payment("pi_3", "requires_payment_method", 300, month_start + chrono::Duration::seconds(90)),
        ],
    )
    .await;

    let metrics = adapter(&server, 100)
        .aggregate(&run_at(fixed_now()))
        .await
        .unwrap();

    assert_eq!(metrics.revenue_all_time.cents(), 1200);
    assert_eq!(metrics.revenue_month_to_date.cents(), 700);
    assert_eq!(metrics.coverage.payments_admitted, 2);
    assert_eq!(metrics.coverage.skipped(SkipReason::NotSucceeded), 1);
    assert_eq!(metrics.payment_sample.len(), 3);
}

#[tokio::test]
async fn follows_last_item_cursor_across_pages() {
    let server = MockServer::start().await;

    // More specific mock first so it wins for the second page.
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions"))
        .and(query_param("starting_after", "sub_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stripe_list(
            vec![stripe_subscription("sub_3", "trialing", serde_json::json!([stripe_item(500, "month", 1, 1)]))],
            false,
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stripe_list(
            vec![
                stripe_subscription("sub_1", "active", serde_json::json!([stripe_item(1000, "month", 1, 1)])),
                stripe_subscription("sub_2", "past_due", serde_json::json!([stripe_item(2000, "month", 1, 1)])),
            ],
            true,
        )))
        .mount(&server)
        .await;
    mount_payments(&server, vec![]).await;

    let metrics = adapter(&server, 2)
        .aggregate(&run_at(fixed_now()))
        .await
        .unwrap();

    assert_eq!(metrics.mrr.cents(), 3500);
    assert_eq!(metrics.subscription_pages.pages, 2);
    assert_eq!(metrics.subscription_pages.items_seen, 3);
    assert_eq!(metrics.subscription_sample.len(), 3);
}

#[tokio::test]
async fn sends_secret_key_as_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions"))
        .and(header("authorization", format!("Bearer {}", STRIPE_KEY).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(stripe_list(vec![], false)))
        .expect(1)
        .mount(&server)
        .await;
    mount_payments(&server, vec![]).await;

    adapter(&server, 100)
        .aggregate(&run_at(fixed_now()))
        .await
        .unwrap();
}

#[tokio::test]
async fn failing_second_page_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions"))
        .and(query_param("starting_after", "sub_1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stripe_list(
            vec![stripe_subscription("sub_1", "active", serde_json::json!([stripe_item(1000, "month", 1, 1)]))],
            true,
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stripe_list(vec![], false)))
        .expect(0)
        .mount(&server)
        .await;

    let err = adapter(&server, 1)
        .aggregate(&run_at(fixed_now()))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Api { status: 500, .. }), "got {err:?}");
}

#[tokio::test]
async fn rejected_key_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = adapter(&server, 100)
        .aggregate(&run_at(fixed_now()))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Unauthorized(_)));
}

#[tokio::test]
async fn missing_secret_fails_before_any_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let adapter = StripeAdapter::new(
        reqwest::Client::new(),
        stripe_config(&server.uri(), 100),
        Arc::new(StaticSecrets::new()),
    );
    let err = adapter.aggregate(&run_at(fixed_now())).await.unwrap_err();

    assert!(matches!(err, ProviderError::MissingCredential(_)));
}

#[tokio::test]
async fn malformed_records_are_skipped_not_fatal() {
    let server = MockServer::start().await;
    mount_subscriptions(
        &server,
        vec![
            serde_json::json!({ "id": "sub_bad", "status": "active" }),
            stripe_subscription("sub_ok", "active", serde_json::json!([stripe_item(900, "month", 1, 1)])),
            stripe_subscription("sub_weekly", "active", serde_json::json!([stripe_item(100, "week", 1, 1)])),
        ],
    )
    .await;
    mount_payments(&server, vec![serde_json::json!({ "id": "pi_bad" })]).await;

    let metrics = adapter(&server, 100)
        .aggregate(&run_at(fixed_now()))
        .await
        .unwrap();

    assert_eq!(metrics.mrr.cents(), 900);
    assert_eq!(metrics.coverage.skipped(SkipReason::MalformedRecord), 2);
    assert_eq!(metrics.coverage.skipped(SkipReason::NonNormalizableInterval), 1);
}
