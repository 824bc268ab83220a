use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use orderping_core::{
    phone::PhoneNormalizer,
    template::{Locale, MessageTemplates},
};
use orderping_storage::{DeliveryLedger, RateLimiter, Store};
use orderping_util::AppConfig;
use orderping_whatsapp::{AdminApiClient, CloudApiClient};

use crate::{health, telemetry, webhook};

/// Shared handler state. Everything inside is cheap to clone; the store and
/// the HTTP clients multiplex over their own connections.
#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    store: Store,
    ledger: DeliveryLedger,
    global_limiter: RateLimiter,
    webhook_limiter: RateLimiter,
    messaging_limiter: RateLimiter,
    phones: PhoneNormalizer,
    templates: MessageTemplates,
    webhook_secret: Arc<[u8]>,
    dispatcher: CloudApiClient,
    admin: Option<AdminApiClient>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        store: Store,
        config: &AppConfig,
        dispatcher: CloudApiClient,
        admin: Option<AdminApiClient>,
    ) -> Self {
        let clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> = Arc::new(Utc::now);
        let ledger = DeliveryLedger::new(store.clone(), config.ledger_ttl);
        Self {
            metrics,
            ledger,
            global_limiter: RateLimiter::new(
                store.clone(),
                "global",
                config.global_rate_limit.max_requests,
                config.global_rate_limit.window,
            ),
            webhook_limiter: RateLimiter::new(
                store.clone(),
                "webhook",
                config.webhook_rate_limit.max_requests,
                config.webhook_rate_limit.window,
            ),
            messaging_limiter: RateLimiter::new(
                store.clone(),
                "whatsapp",
                config.messaging_rate_limit.max_requests,
                config.messaging_rate_limit.window,
            ),
            store,
            phones: PhoneNormalizer::new(config.default_country_code.clone()),
            templates: MessageTemplates::new(Locale::default()),
            webhook_secret: Arc::from(config.webhook_shared_secret.as_bytes().to_vec()),
            dispatcher,
            admin,
            clock,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn ledger(&self) -> &DeliveryLedger {
        &self.ledger
    }

    pub fn global_limiter(&self) -> &RateLimiter {
        &self.global_limiter
    }

    pub fn webhook_limiter(&self) -> &RateLimiter {
        &self.webhook_limiter
    }

    pub fn messaging_limiter(&self) -> &RateLimiter {
        &self.messaging_limiter
    }

    pub fn phones(&self) -> &PhoneNormalizer {
        &self.phones
    }

    pub fn templates(&self) -> &MessageTemplates {
        &self.templates
    }

    pub fn webhook_secret(&self) -> Arc<[u8]> {
        self.webhook_secret.clone()
    }

    pub fn dispatcher(&self) -> &CloudApiClient {
        &self.dispatcher
    }

    pub fn admin(&self) -> Option<&AdminApiClient> {
        self.admin.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/health", get(health::health))
        .route("/metrics", get(metrics))
        .route("/webhooks/orders-create", post(webhook::orders_create))
        .route(
            "/webhooks/fulfillments-create",
            post(webhook::fulfillments_create),
        )
        .route("/webhooks/orders-cancelled", post(webhook::orders_cancelled))
        .route("/webhooks/payment-failed", post(webhook::payment_failed))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use reqwest::Client;
    use tower::ServiceExt;
    use url::Url;

    use orderping_util::{Environment, RateLimitSettings};
    use std::time::Duration;

    pub(crate) fn test_config() -> AppConfig {
        AppConfig {
            bind_addr: "127.0.0.1:0".parse().expect("addr"),
            environment: Environment::Test,
            webhook_shared_secret: "test-secret".to_string(),
            redis_url: String::new(),
            whatsapp_phone_number_id: Some("1234567890".to_string()),
            whatsapp_access_token: Some("token".to_string()),
            whatsapp_api_base: "https://graph.facebook.com/v17.0/".to_string(),
            shopify_admin_token: None,
            shopify_api_version: "2024-01".to_string(),
            default_country_code: "254".to_string(),
            global_rate_limit: RateLimitSettings {
                max_requests: 300,
                window: Duration::from_secs(60),
            },
            webhook_rate_limit: RateLimitSettings {
                max_requests: 50,
                window: Duration::from_secs(60),
            },
            messaging_rate_limit: RateLimitSettings {
                max_requests: 30,
                window: Duration::from_secs(60),
            },
            ledger_ttl: Duration::from_secs(86_400),
            http_timeout: Duration::from_secs(10),
        }
    }

    fn setup_state() -> AppState {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let config = test_config();
        let base = Url::parse(&config.whatsapp_api_base).expect("url");
        let dispatcher =
            CloudApiClient::new(base, None, Client::builder().build().expect("client"));
        AppState::new(metrics, Store::in_memory(), &config, dispatcher, None)
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = app_router(setup_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let app = app_router(setup_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }
}
