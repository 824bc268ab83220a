use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use crate::types::{OrderNotificationContext, WebhookTopic};

/// Errors that can occur while parsing an inbound webhook payload.
///
/// These are permanent failures for the delivery: the platform redelivers the
/// same bytes, so the caller must not treat them as retryable.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("failed to parse payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Deterministic parser turning raw platform payloads into an
/// [`OrderNotificationContext`]. Untyped JSON never escapes this boundary.
pub struct PayloadParser;

impl PayloadParser {
    /// Parses a payload according to its webhook topic.
    pub fn parse(
        topic: WebhookTopic,
        payload: &Value,
    ) -> Result<OrderNotificationContext, ParseError> {
        match topic {
            WebhookTopic::OrdersCreate
            | WebhookTopic::OrdersCancelled
            | WebhookTopic::PaymentFailed => Self::parse_order(payload),
            WebhookTopic::FulfillmentsCreate => Self::parse_fulfillment(payload),
        }
    }

    fn parse_order(payload: &Value) -> Result<OrderNotificationContext, ParseError> {
        let order: OrderPayload = serde_json::from_value(payload.clone())?;
        let order_id = order.id.ok_or(ParseError::MissingField("id"))?;
        let order_number = order
            .order_number
            .ok_or(ParseError::MissingField("order_number"))?;

        let customer = order.customer.unwrap_or_default();
        Ok(OrderNotificationContext {
            order_id,
            order_number,
            total_price: order.total_price,
            customer_name: customer.first_name,
            customer_email: customer.email,
            customer_phone: customer.phone,
            order_url: order.order_status_url,
            ..OrderNotificationContext::default()
        })
    }

    fn parse_fulfillment(payload: &Value) -> Result<OrderNotificationContext, ParseError> {
        let fulfillment: FulfillmentPayload = serde_json::from_value(payload.clone())?;
        let order_id = fulfillment
            .order_id
            .ok_or(ParseError::MissingField("order_id"))?;

        let embedded = fulfillment.order.unwrap_or_default();
        let customer = embedded.customer.unwrap_or_default();
        // The platform omits the order number from fulfillment payloads unless
        // the order block is embedded; fall back to the order id for display.
        let order_number = embedded
            .order_number
            .unwrap_or_else(|| order_id.to_string());

        Ok(OrderNotificationContext {
            order_id,
            order_number,
            customer_name: customer.first_name,
            customer_email: customer.email,
            customer_phone: customer.phone,
            tracking_number: fulfillment.tracking_number,
            tracking_url: fulfillment.tracking_url,
            carrier_name: fulfillment.tracking_company,
            estimated_delivery: fulfillment.estimated_delivery_at,
            ..OrderNotificationContext::default()
        })
    }
}

/// Accepts both `"1001"` and `1001`; the platform is inconsistent across
/// API versions.
fn de_opt_number_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(value) => value,
        Raw::Number(value) => value.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct OrderPayload {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_number_string")]
    order_number: Option<String>,
    #[serde(default)]
    total_price: Option<String>,
    #[serde(default)]
    order_status_url: Option<String>,
    #[serde(default)]
    customer: Option<CustomerPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct CustomerPayload {
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FulfillmentPayload {
    #[serde(default)]
    order_id: Option<i64>,
    #[serde(default)]
    tracking_number: Option<String>,
    #[serde(default)]
    tracking_url: Option<String>,
    #[serde(default)]
    tracking_company: Option<String>,
    #[serde(default)]
    estimated_delivery_at: Option<String>,
    #[serde(default)]
    order: Option<EmbeddedOrderPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddedOrderPayload {
    #[serde(default, deserialize_with = "de_opt_number_string")]
    order_number: Option<String>,
    #[serde(default)]
    customer: Option<CustomerPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_order_created_payload() {
        let payload = json!({
            "id": 820982911946154508u64,
            "order_number": 1001,
            "total_price": "99.99",
            "order_status_url": "https://shop.example/orders/abc",
            "customer": {
                "phone": "+254712345678",
                "email": "jane@example.com",
                "first_name": "Jane"
            }
        });

        let context =
            PayloadParser::parse(WebhookTopic::OrdersCreate, &payload).expect("parse order");
        assert_eq!(context.order_number, "1001");
        assert_eq!(context.total_price.as_deref(), Some("99.99"));
        assert_eq!(context.customer_phone.as_deref(), Some("+254712345678"));
        assert_eq!(context.customer_name.as_deref(), Some("Jane"));
    }

    #[test]
    fn order_number_accepts_string_form() {
        let payload = json!({ "id": 1, "order_number": "1001" });
        let context =
            PayloadParser::parse(WebhookTopic::OrdersCancelled, &payload).expect("parse order");
        assert_eq!(context.order_number, "1001");
    }

    #[test]
    fn rejects_order_without_id() {
        let payload = json!({ "order_number": 1001 });
        let err = PayloadParser::parse(WebhookTopic::OrdersCreate, &payload)
            .expect_err("missing id should fail");
        assert!(matches!(err, ParseError::MissingField("id")));
    }

    #[test]
    fn rejects_order_without_number() {
        let payload = json!({ "id": 7 });
        let err = PayloadParser::parse(WebhookTopic::PaymentFailed, &payload)
            .expect_err("missing order_number should fail");
        assert!(matches!(err, ParseError::MissingField("order_number")));
    }

    #[test]
    fn parses_fulfillment_with_embedded_order() {
        let payload = json!({
            "order_id": 42,
            "tracking_number": "TRACK-9",
            "tracking_company": "DHL",
            "tracking_url": "https://track.example/TRACK-9",
            "order": {
                "order_number": 1002,
                "customer": { "phone": "0712345678" }
            }
        });

        let context = PayloadParser::parse(WebhookTopic::FulfillmentsCreate, &payload)
            .expect("parse fulfillment");
        assert_eq!(context.order_id, 42);
        assert_eq!(context.order_number, "1002");
        assert_eq!(context.tracking_number.as_deref(), Some("TRACK-9"));
        assert_eq!(context.carrier_name.as_deref(), Some("DHL"));
        assert_eq!(context.customer_phone.as_deref(), Some("0712345678"));
    }

    #[test]
    fn fulfillment_falls_back_to_order_id_for_number() {
        let payload = json!({ "order_id": 42 });
        let context = PayloadParser::parse(WebhookTopic::FulfillmentsCreate, &payload)
            .expect("parse fulfillment");
        assert_eq!(context.order_number, "42");
        assert!(context.customer_phone.is_none());
    }

    #[test]
    fn rejects_fulfillment_without_order_id() {
        let payload = json!({ "tracking_number": "TRACK-9" });
        let err = PayloadParser::parse(WebhookTopic::FulfillmentsCreate, &payload)
            .expect_err("missing order_id should fail");
        assert!(matches!(err, ParseError::MissingField("order_id")));
    }
}
