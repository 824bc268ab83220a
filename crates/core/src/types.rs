use std::fmt;

use serde::{Deserialize, Serialize};

/// Webhook topics the service subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookTopic {
    OrdersCreate,
    FulfillmentsCreate,
    OrdersCancelled,
    PaymentFailed,
}

impl WebhookTopic {
    /// Parses the value carried in the `X-Topic` header.
    pub fn from_header(value: &str) -> Option<Self> {
        match value {
            "orders/create" => Some(Self::OrdersCreate),
            "fulfillments/create" => Some(Self::FulfillmentsCreate),
            "orders/cancelled" => Some(Self::OrdersCancelled),
            "orders/payment_failed" => Some(Self::PaymentFailed),
            _ => None,
        }
    }

    /// Returns the canonical topic string as delivered by the platform.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OrdersCreate => "orders/create",
            Self::FulfillmentsCreate => "fulfillments/create",
            Self::OrdersCancelled => "orders/cancelled",
            Self::PaymentFailed => "orders/payment_failed",
        }
    }

    /// Label used for metrics; avoids `/` in label values.
    pub fn metric_label(self) -> &'static str {
        match self {
            Self::OrdersCreate => "orders_create",
            Self::FulfillmentsCreate => "fulfillments_create",
            Self::OrdersCancelled => "orders_cancelled",
            Self::PaymentFailed => "payment_failed",
        }
    }
}

impl fmt::Display for WebhookTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the notification pipeline needs about one order, derived from a
/// single webhook payload and optionally enriched from the admin API.
///
/// Owned by one handler invocation; never shared across requests.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderNotificationContext {
    pub order_id: i64,
    pub order_number: String,
    pub total_price: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub order_url: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub carrier_name: Option<String>,
    pub estimated_delivery: Option<String>,
}

/// Outcome of one notification attempt, persisted in the delivery ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent { message_id: String },
    Failed { reason: String },
    Skipped { reason: String },
}

impl NotificationStatus {
    /// Short label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_round_trips_through_header_value() {
        for topic in [
            WebhookTopic::OrdersCreate,
            WebhookTopic::FulfillmentsCreate,
            WebhookTopic::OrdersCancelled,
            WebhookTopic::PaymentFailed,
        ] {
            assert_eq!(WebhookTopic::from_header(topic.as_str()), Some(topic));
        }
        assert_eq!(WebhookTopic::from_header("orders/updated"), None);
    }

    #[test]
    fn status_serializes_with_tag() {
        let status = NotificationStatus::Skipped {
            reason: "no_valid_phone".to_string(),
        };
        let json = serde_json::to_value(&status).expect("serialize");
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "no_valid_phone");
    }
}
