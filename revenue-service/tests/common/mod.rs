#![allow(dead_code)]

use chrono::{DateTime, Utc};
use revenue_service::config::{HttpClientConfig, RevenueConfig, SnapshotConfig};
use revenue_service::services::providers::RunContext;
use revenue_service::services::secrets::{
    PAYPAL_CLIENT_ID, PAYPAL_CLIENT_SECRET, STRIPE_SECRET_KEY,
};
use revenue_service::services::{PayPalConfig, StaticSecrets, StripeConfig};
use revenue_service::Application;
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const STRIPE_KEY: &str = "sk_test_revenue";
pub const PAYPAL_TOKEN: &str = "A21AA-test-token";

pub struct TestApp {
    pub address: String,
    pub port: u16,
}

impl TestApp {
    pub async fn spawn(stripe_base_url: &str, paypal_base_url: &str) -> Self {
        Self::spawn_with(test_config(stripe_base_url, paypal_base_url, Utc::now())).await
    }

    pub async fn spawn_with(config: RevenueConfig) -> Self {
        let app = Application::build(config, Arc::new(test_secrets()))
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp { address, port }
    }

    pub async fn get_snapshot(&self, query: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("{}/snapshot{}", self.address, query))
            .send()
            .await
            .expect("Failed to execute request")
    }
}

pub fn test_secrets() -> StaticSecrets {
    StaticSecrets::new()
        .with(STRIPE_SECRET_KEY, STRIPE_KEY)
        .with(PAYPAL_CLIENT_ID, "client-id")
        .with(PAYPAL_CLIENT_SECRET, "client-secret")
}

/// Config pointed at mock servers, with PayPal history starting in the
/// month of `now` and pacing disabled.
pub fn test_config(stripe_base_url: &str, paypal_base_url: &str, now: DateTime<Utc>) -> RevenueConfig {
    RevenueConfig {
        common: CoreConfig {
            port: 0,
            ..CoreConfig::default()
        },
        stripe: stripe_config(stripe_base_url, 100),
        paypal: PayPalConfig {
            history_start: Some(revenue_service::services::revenue_window::month_start_utc(now)),
            ..paypal_config(paypal_base_url)
        },
        snapshot: SnapshotConfig {
            deadline_secs: 10,
            max_deadline_secs: 20,
        },
        http_client: HttpClientConfig { timeout_secs: 10 },
    }
}

pub fn stripe_config(base_url: &str, page_size: u32) -> StripeConfig {
    StripeConfig {
        api_base_url: base_url.to_string(),
        page_size,
    }
}

pub fn paypal_config(base_url: &str) -> PayPalConfig {
    PayPalConfig {
        api_base_url: base_url.to_string(),
        page_size: 10,
        report_page_size: 100,
        history_start: Some(at("2024-02-01T00:00:00Z")),
        history_months: 36,
        fanout_concurrency: 4,
        requests_per_second: 0,
    }
}

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

/// Fixed clock used by adapter tests: mid-March 2024.
pub fn fixed_now() -> DateTime<Utc> {
    at("2024-03-15T12:00:00Z")
}

pub fn run_at(now: DateTime<Utc>) -> RunContext {
    RunContext::new(now, CancellationToken::new())
}

pub fn stripe_subscription(id: &str, status: &str, items: Value) -> Value {
    json!({
        "id": id,
        "object": "subscription",
        "status": status,
        "customer": { "id": format!("cus_{id}"), "email": format!("{id}@example.com") },
        "items": { "object": "list", "data": items }
    })
}

pub fn stripe_item(unit_amount: i64, interval: &str, interval_count: u32, quantity: u64) -> Value {
    json!({
        "quantity": quantity,
        "price": {
            "unit_amount": unit_amount,
            "currency": "usd",
            "recurring": { "interval": interval, "interval_count": interval_count }
        }
    })
}

pub fn stripe_payment(id: &str, status: &str, amount_received: i64, created: DateTime<Utc>) -> Value {
    json!({
        "id": id,
        "object": "payment_intent",
        "status": status,
        "amount_received": amount_received,
        "currency": "usd",
        "created": created.timestamp()
    })
}

pub fn stripe_list(data: Vec<Value>, has_more: bool) -> Value {
    json!({ "object": "list", "data": data, "has_more": has_more })
}

pub fn paypal_plan(unit: &str, count: u32, value: &str) -> Value {
    json!({
        "id": "P-PLAN",
        "status": "ACTIVE",
        "billing_cycles": [
            {
                "tenure_type": "REGULAR",
                "sequence": 1,
                "frequency": { "interval_unit": unit, "interval_count": count },
                "pricing_scheme": { "fixed_price": { "value": value, "currency_code": "USD" } }
            }
        ]
    })
}

pub fn paypal_subscription_detail(id: &str, plan_id: &str, quantity: &str) -> Value {
    json!({
        "id": id,
        "status": "ACTIVE",
        "plan_id": plan_id,
        "quantity": quantity,
        "subscriber": { "email_address": format!("{id}@example.com") }
    })
}

pub fn paypal_transaction(id: &str, status: &str, value: &str, date: &str) -> Value {
    json!({
        "transaction_info": {
            "transaction_id": id,
            "transaction_status": status,
            "transaction_amount": { "currency_code": "USD", "value": value },
            "transaction_initiation_date": date
        }
    })
}

pub fn paypal_report(details: Vec<Value>) -> Value {
    json!({ "transaction_details": details, "page": 1, "total_pages": 1 })
}

pub async fn mount_paypal_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": PAYPAL_TOKEN,
            "token_type": "Bearer",
            "expires_in": 32400
        })))
        .mount(server)
        .await;
}

/// Empty listings for every Stripe endpoint.
pub async fn mount_empty_stripe(server: &MockServer) {
    for endpoint in ["/v1/subscriptions", "/v1/payment_intents"] {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(stripe_list(vec![], false)))
            .mount(server)
            .await;
    }
}

/// Token plus empty listings for every PayPal endpoint.
pub async fn mount_empty_paypal(server: &MockServer) {
    mount_paypal_token(server).await;
    Mock::given(method("GET"))
        .and(path("/v1/billing/subscriptions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "subscriptions": [], "total_items": 0, "total_pages": 0 })),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/reporting/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(paypal_report(vec![])))
        .mount(server)
        .await;
}
