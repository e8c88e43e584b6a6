mod common;

use common::*;
use revenue_service::services::providers::ProviderError;
use revenue_service::services::{
    AggregationError, PayPalAdapter, SnapshotAssembler, StripeAdapter,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_stripe_book(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stripe_list(
            vec![
                stripe_subscription("sub_1", "active", json!([stripe_item(1000, "month", 1, 1)])),
                stripe_subscription("sub_2", "active", json!([stripe_item(12000, "year", 1, 2)])),
            ],
            false,
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stripe_list(
            vec![stripe_payment("pi_1", "succeeded", 700, at("2024-03-02T00:00:00Z"))],
            false,
        )))
        .mount(server)
        .await;
}

async fn mount_paypal_book(server: &MockServer) {
    mount_paypal_token(server).await;
    Mock::given(method("GET"))
        .and(path("/v1/billing/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subscriptions": [{ "id": "I-1", "status": "ACTIVE" }],
            "total_pages": 1
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/billing/subscriptions/I-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(paypal_subscription_detail("I-1", "P-1", "1")),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/billing/plans/P-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(paypal_plan("MONTH", 1, "12.50")))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/reporting/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(paypal_report(vec![])))
        .mount(server)
        .await;
}

fn assembler(stripe: &MockServer, paypal: &MockServer, deadline: Duration) -> SnapshotAssembler {
    let http = reqwest::Client::new();
    let secrets = Arc::new(test_secrets());
    SnapshotAssembler::new(
        Arc::new(StripeAdapter::new(
            http.clone(),
            stripe_config(&stripe.uri(), 100),
            secrets.clone(),
        )),
        Arc::new(PayPalAdapter::new(http, paypal_config(&paypal.uri()), secrets)),
        deadline,
    )
}

#[tokio::test]
async fn snapshot_merges_both_providers() {
    let stripe = MockServer::start().await;
    let paypal = MockServer::start().await;
    mount_stripe_book(&stripe).await;
    mount_paypal_book(&paypal).await;

    let snapshot = assembler(&stripe, &paypal, Duration::from_secs(10))
        .build_at(fixed_now(), None, CancellationToken::new())
        .await
        .expect("snapshot builds");

    assert_eq!(snapshot.month_start, at("2024-03-01T00:00:00Z"));
    assert_eq!(snapshot.stripe.mrr.cents(), 3000);
    assert_eq!(snapshot.paypal.mrr.cents(), 1250);
    assert_eq!(snapshot.total_mrr.to_display_string(), "42.50");
    assert_eq!(snapshot.stripe.revenue_month_to_date.cents(), 700);
}

#[tokio::test]
async fn snapshot_is_idempotent_for_a_fixed_clock() {
    let stripe = MockServer::start().await;
    let paypal = MockServer::start().await;
    mount_stripe_book(&stripe).await;
    mount_paypal_book(&paypal).await;
    let assembler = assembler(&stripe, &paypal, Duration::from_secs(10));

    let first = assembler
        .build_at(fixed_now(), None, CancellationToken::new())
        .await
        .unwrap();
    let second = assembler
        .build_at(fixed_now(), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn one_failing_provider_means_no_snapshot() {
    let stripe = MockServer::start().await;
    let paypal = MockServer::start().await;
    mount_stripe_book(&stripe).await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&paypal)
        .await;

    let err = assembler(&stripe, &paypal, Duration::from_secs(10))
        .build_at(fixed_now(), None, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AggregationError::Provider {
            source: ProviderError::Api { status: 500, .. },
            ..
        }
    ));
}

#[tokio::test]
async fn slow_provider_exceeds_deadline() {
    let stripe = MockServer::start().await;
    let paypal = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(stripe_list(vec![], false))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&stripe)
        .await;
    mount_paypal_book(&paypal).await;

    let err = assembler(&stripe, &paypal, Duration::from_secs(10))
        .build_at(fixed_now(), Some(Duration::from_millis(300)), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AggregationError::DeadlineExceeded(_)));
}

#[tokio::test]
async fn http_snapshot_reports_formatted_totals() {
    let stripe = MockServer::start().await;
    let paypal = MockServer::start().await;
    mount_stripe_book(&stripe).await;
    mount_paypal_book(&paypal).await;
    let app = TestApp::spawn(&stripe.uri(), &paypal.uri()).await;

    let response = app.get_snapshot("").await;
    assert_eq!(response.status().as_u16(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["total_mrr_usd"], "42.50");
    assert_eq!(body["providers"]["stripe"]["mrr_usd"], "30.00");
    assert_eq!(body["providers"]["paypal"]["mrr_usd"], "12.50");
    assert_eq!(body["providers"]["stripe"]["all_time_revenue_usd"], "7.00");
    assert_eq!(
        body["providers"]["stripe"]["subscriptions_sample"]
            .as_array()
            .map(Vec::len),
        Some(2)
    );
    assert_eq!(
        body["providers"]["paypal"]["coverage"]["subscriptions_contributing"],
        1
    );
    assert!(body["month_start"].as_str().unwrap().ends_with("-01T00:00:00Z"));
}

#[tokio::test]
async fn http_snapshot_maps_upstream_failure_to_bad_gateway() {
    let stripe = MockServer::start().await;
    let paypal = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&stripe)
        .await;
    mount_empty_paypal(&paypal).await;
    let app = TestApp::spawn(&stripe.uri(), &paypal.uri()).await;

    let response = app.get_snapshot("").await;
    assert_eq!(response.status().as_u16(), 502);

    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn http_snapshot_honors_timeout_query() {
    let stripe = MockServer::start().await;
    let paypal = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(stripe_list(vec![], false))
                .set_delay(Duration::from_secs(4)),
        )
        .mount(&stripe)
        .await;
    mount_empty_paypal(&paypal).await;
    let app = TestApp::spawn(&stripe.uri(), &paypal.uri()).await;

    let response = app.get_snapshot("?timeout_secs=1").await;
    assert_eq!(response.status().as_u16(), 504);
}

#[tokio::test]
async fn http_snapshot_passes_through_provider_rate_limit() {
    let stripe = MockServer::start().await;
    let paypal = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&stripe)
        .await;
    mount_empty_paypal(&paypal).await;
    let app = TestApp::spawn(&stripe.uri(), &paypal.uri()).await;

    let response = app.get_snapshot("").await;
    assert_eq!(response.status().as_u16(), 429);
    assert_eq!(
        response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok()),
        Some("30")
    );
}
