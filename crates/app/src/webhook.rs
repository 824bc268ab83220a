use std::{sync::Arc, time::Instant};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use metrics::{counter, histogram};
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use orderping_core::{
    parser::PayloadParser,
    types::{NotificationStatus, OrderNotificationContext, WebhookTopic},
};
use orderping_storage::RateDecision;
use orderping_whatsapp::DispatchError;

use crate::problem::ProblemResponse;
use crate::router::AppState;

const HEADER_SIGNATURE: &str = "X-Signature";
const HEADER_TOPIC: &str = "X-Topic";
const HEADER_SHOP_DOMAIN: &str = "X-Shop-Domain";
const HEADER_DELIVERY_ID: &str = "X-Delivery-Id";
const HEADER_FORWARDED_FOR: &str = "X-Forwarded-For";

pub async fn orders_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, WebhookTopic::OrdersCreate, headers, body).await
}

pub async fn fulfillments_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, WebhookTopic::FulfillmentsCreate, headers, body).await
}

pub async fn orders_cancelled(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, WebhookTopic::OrdersCancelled, headers, body).await
}

pub async fn payment_failed(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, WebhookTopic::PaymentFailed, headers, body).await
}

async fn handle(
    state: AppState,
    route_topic: WebhookTopic,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let result = process(&state, route_topic, &headers, &body).await;
    histogram!("webhook_ack_latency_seconds", "topic" => route_topic.metric_label())
        .record(start.elapsed().as_secs_f64());
    match result {
        Ok(response) => response,
        Err(problem) => problem.into_response(),
    }
}

/// Full ingress pipeline for one delivery.
///
/// Authentication fails closed; everything after the signature check is
/// designed to acknowledge: rate-limit store outages fail open, and a
/// notification failure is recorded in the ledger but still answered 200 so
/// the platform does not retry a payload we already accepted.
async fn process(
    state: &AppState,
    route_topic: WebhookTopic,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, ProblemResponse> {
    let signature = required_header(headers, HEADER_SIGNATURE)?;
    let topic_raw = required_header(headers, HEADER_TOPIC)?;
    let shop_domain = required_header(headers, HEADER_SHOP_DOMAIN)?;

    let secret = state.webhook_secret();
    verify_signature(&secret, body, signature).map_err(|detail| {
        counter!("webhook_invalid_signature_total").increment(1);
        warn!(stage = "ingress", shop_domain, "rejected webhook: {detail}");
        ProblemResponse::new(StatusCode::UNAUTHORIZED, "invalid_signature", detail)
    })?;

    let topic = WebhookTopic::from_header(topic_raw).ok_or_else(|| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "unknown_topic",
            format!("unsupported topic {topic_raw}"),
        )
    })?;
    if topic != route_topic {
        return Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "topic_mismatch",
            format!(
                "topic header {topic} does not match the {route_topic} endpoint"
            ),
        ));
    }

    counter!("webhook_ingress_total", "topic" => topic.metric_label()).increment(1);

    check_limiter(state.global_limiter(), &client_ip(headers)).await?;
    check_limiter(state.webhook_limiter(), shop_domain).await?;

    if let Some(delivery_id) = optional_header(headers, HEADER_DELIVERY_ID) {
        match state.ledger().mark_delivery(delivery_id).await {
            Ok(true) => {}
            Ok(false) => {
                info!(stage = "ingress", shop_domain, delivery_id, "duplicate delivery skipped");
                return Ok(ack(json!({ "status": "ok", "duplicate": true })));
            }
            // Dedupe is best effort; a store outage must not drop deliveries.
            Err(err) => {
                warn!(stage = "ingress", error = %err, "delivery dedupe unavailable, continuing");
            }
        }
    }

    let payload: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => {
            record_webhook_error(state).await;
            return Err(ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "invalid_json",
                format!("failed to parse payload: {err}"),
            ));
        }
    };

    let context = match PayloadParser::parse(topic, &payload) {
        Ok(context) => context,
        Err(err) => {
            record_webhook_error(state).await;
            return Err(ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "invalid_payload",
                err.to_string(),
            ));
        }
    };

    let order_id = context.order_id;
    // axum drops this handler future when the client disconnects. The
    // dispatch and its ledger write run on a detached task so a message
    // that already reached the provider is still recorded.
    let task_state = state.clone();
    let shop = shop_domain.to_string();
    let outcome_label = tokio::spawn(async move {
        let outcome = notify(&task_state, topic, &shop, context).await;
        counter!("notifications_total", "outcome" => outcome.as_str()).increment(1);
        info!(
            stage = "notify",
            shop_domain = %shop,
            order_id,
            topic = %topic,
            outcome = outcome.as_str(),
            "webhook processed"
        );

        let label = outcome.as_str();
        if let Err(err) = task_state
            .ledger()
            .record(order_id, outcome, task_state.now())
            .await
        {
            warn!(stage = "ledger", order_id, error = %err, "failed to record notification outcome");
        }
        label
    })
    .await
    .map_err(|err| {
        warn!(stage = "notify", order_id, error = %err, "notification task failed");
        ProblemResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "notification task failed",
        )
    })?;

    Ok(ack(json!({
        "status": "ok",
        "order_id": order_id,
        "notification": outcome_label,
    })))
}

/// Runs the notification leg. Never surfaces an error to the webhook
/// response; every exit maps to a ledger outcome.
async fn notify(
    state: &AppState,
    topic: WebhookTopic,
    shop_domain: &str,
    mut context: OrderNotificationContext,
) -> NotificationStatus {
    if context.customer_phone.is_none() {
        if let Some(admin) = state.admin() {
            match admin.fetch_order(shop_domain, context.order_id).await {
                Ok(order) => {
                    if let Some(customer) = order.customer {
                        context.customer_phone = customer.phone;
                        if context.customer_email.is_none() {
                            context.customer_email = customer.email;
                        }
                        if context.customer_name.is_none() {
                            context.customer_name = customer.first_name;
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        stage = "notify",
                        shop_domain,
                        order_id = context.order_id,
                        error = %err,
                        "order enrichment failed"
                    );
                    return NotificationStatus::Failed {
                        reason: format!("enrichment_failed: {err}"),
                    };
                }
            }
        }
    }

    let Some(raw_phone) = context.customer_phone.clone() else {
        return NotificationStatus::Skipped {
            reason: "no_valid_phone".to_string(),
        };
    };

    let phone = match state.phones().normalize(&raw_phone) {
        Ok(phone) => phone,
        Err(err) => {
            info!(
                stage = "notify",
                order_id = context.order_id,
                error = %err,
                "customer phone rejected"
            );
            return NotificationStatus::Skipped {
                reason: "no_valid_phone".to_string(),
            };
        }
    };

    match state.messaging_limiter().check(&phone).await {
        Ok(decision) if !decision.allowed => {
            counter!("webhook_rate_limited_total", "scope" => state.messaging_limiter().scope())
                .increment(1);
            return NotificationStatus::Skipped {
                reason: "recipient_rate_limited".to_string(),
            };
        }
        Ok(_) => {}
        Err(err) => {
            warn!(stage = "notify", error = %err, "messaging limiter unavailable, failing open");
        }
    }

    let message = state.templates().render(topic, &context);
    match state.dispatcher().send_text(&phone, &message).await {
        Ok(message_id) => NotificationStatus::Sent { message_id },
        Err(err) => {
            warn!(
                stage = "notify",
                order_id = context.order_id,
                error = %err,
                "message dispatch failed"
            );
            NotificationStatus::Failed {
                reason: dispatch_reason(&err),
            }
        }
    }
}

fn dispatch_reason(err: &DispatchError) -> String {
    match err {
        DispatchError::Misconfigured => "not_configured".to_string(),
        DispatchError::ProviderRejected { status, detail } => {
            format!("provider_rejected: {}: {detail}", status.as_u16())
        }
        other => format!("dispatch_error: {other}"),
    }
}

/// Counts one request against a limiter and turns a denial into a 429 with
/// `Retry-After` and the `X-RateLimit-*` headers. Store failures log and
/// fail open.
async fn check_limiter(
    limiter: &orderping_storage::RateLimiter,
    identifier: &str,
) -> Result<(), ProblemResponse> {
    match limiter.check(identifier).await {
        Ok(decision) if !decision.allowed => {
            counter!("webhook_rate_limited_total", "scope" => limiter.scope()).increment(1);
            warn!(
                stage = "ingress",
                scope = limiter.scope(),
                identifier,
                "rate limit exceeded"
            );
            Err(rate_limited(decision))
        }
        Ok(_) => Ok(()),
        Err(err) => {
            warn!(
                stage = "ingress",
                scope = limiter.scope(),
                error = %err,
                "rate limiter unavailable, failing open"
            );
            Ok(())
        }
    }
}

fn rate_limited(decision: RateDecision) -> ProblemResponse {
    let reset_secs = decision.reset_after.as_secs().max(1);
    ProblemResponse::new(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limited",
        "too many requests in the current window",
    )
    .with_header(HeaderName::from_static("retry-after"), reset_secs)
    .with_header(HeaderName::from_static("x-ratelimit-limit"), decision.limit)
    .with_header(
        HeaderName::from_static("x-ratelimit-remaining"),
        decision.remaining,
    )
    .with_header(HeaderName::from_static("x-ratelimit-reset"), reset_secs)
}

async fn record_webhook_error(state: &AppState) {
    if let Err(err) = state.ledger().record_webhook_error().await {
        warn!(stage = "ingress", error = %err, "failed to count webhook error");
    }
}

fn ack(body: Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ProblemResponse> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::UNAUTHORIZED,
                "missing_header",
                format!("missing header {name}"),
            )
        })
}

fn optional_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// First hop of `X-Forwarded-For`, or a fixed sentinel so direct connections
/// still share one global window.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get(HEADER_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn verify_signature(secret: &Arc<[u8]>, body: &[u8], provided: &str) -> Result<(), String> {
    let provided_bytes = BASE64
        .decode(provided)
        .map_err(|_| "signature is not valid base64".to_string())?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|_| "failed to initialize signature verifier".to_string())?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    if expected.ct_eq(provided_bytes.as_slice()).into() {
        Ok(())
    } else {
        Err("signature mismatch".to_string())
    }
}
