use crate::types::{OrderNotificationContext, WebhookTopic};

/// Message language. Only English templates ship today; the variant exists so
/// adding a language is a data change, not an API change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
}

/// Renders notification text per webhook topic.
///
/// Rendering is pure and never fails: optional context fields degrade the
/// message by omitting their section, never by leaving a dangling label or an
/// empty line pair. The caller guarantees the order number is present.
#[derive(Debug, Clone, Default)]
pub struct MessageTemplates {
    locale: Locale,
}

impl MessageTemplates {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    pub fn render(&self, topic: WebhookTopic, context: &OrderNotificationContext) -> String {
        match self.locale {
            Locale::En => match topic {
                WebhookTopic::OrdersCreate => render_order_created(context),
                WebhookTopic::FulfillmentsCreate => render_fulfillment_created(context),
                WebhookTopic::OrdersCancelled => render_order_cancelled(context),
                WebhookTopic::PaymentFailed => render_payment_failed(context),
            },
        }
    }
}

fn render_order_created(context: &OrderNotificationContext) -> String {
    let greeting = match &context.customer_name {
        Some(name) => format!("Hello {name}!"),
        None => "Hello!".to_string(),
    };

    let mut details = Vec::new();
    if let Some(total) = &context.total_price {
        details.push(format!("• Amount: ${total}"));
    }
    if let Some(email) = &context.customer_email {
        details.push(format!("• Confirmation sent to: {email}"));
    }
    details.push("• Status: Order received and being processed".to_string());

    let mut message = format!(
        "{greeting}\n\nThank you for your order #{}! 🛍️\n\nOrder Details:\n{}",
        context.order_number,
        details.join("\n"),
    );
    if let Some(url) = &context.order_url {
        message.push_str(&format!("\nTrack your order: {url}"));
    }
    message.push_str(
        "\n\nWe'll keep you updated on your order status. Thank you for shopping with us! 🙏",
    );
    message
}

fn render_fulfillment_created(context: &OrderNotificationContext) -> String {
    let mut details = Vec::new();
    if let Some(tracking) = &context.tracking_number {
        details.push(format!("• Tracking Number: {tracking}"));
    }
    if let Some(carrier) = &context.carrier_name {
        details.push(format!("• Carrier: {carrier}"));
    }
    if let Some(delivery) = &context.estimated_delivery {
        details.push(format!("• Estimated Delivery: {delivery}"));
    }
    if let Some(url) = &context.tracking_url {
        details.push(format!("• Track your package: {url}"));
    }

    let mut message = format!(
        "Great news! 📦\n\nYour order #{} has been shipped!",
        context.order_number,
    );
    if !details.is_empty() {
        message.push_str(&format!("\n\nShipping Details:\n{}", details.join("\n")));
    }
    message.push_str(
        "\n\nWe hope you enjoy your purchase! If you have any questions, \
         please don't hesitate to contact us.",
    );
    message
}

fn render_order_cancelled(context: &OrderNotificationContext) -> String {
    format!(
        "Order Update ❗\n\nYour order #{} has been cancelled.\n\n\
         If you didn't request this cancellation or have any questions, \
         please contact our support team immediately.\n\n\
         We apologize for any inconvenience.",
        context.order_number,
    )
}

fn render_payment_failed(context: &OrderNotificationContext) -> String {
    let mut message = format!(
        "Payment Alert ⚠️\n\nWe couldn't process the payment for your order #{}.\n\n\
         Please update your payment information or contact our support team for assistance.",
        context.order_number,
    );
    if let Some(total) = &context.total_price {
        message.push_str(&format!("\n\nAmount due: ${total}"));
    }
    if let Some(url) = &context.order_url {
        message.push_str(&format!("\nUpdate payment: {url}"));
    }
    message.push_str("\n\nYour order will be held for 24 hours before being cancelled.");
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_context() -> OrderNotificationContext {
        OrderNotificationContext {
            order_id: 1,
            order_number: "1001".to_string(),
            total_price: Some("99.99".to_string()),
            customer_name: Some("Jane".to_string()),
            customer_email: Some("jane@example.com".to_string()),
            customer_phone: Some("+254712345678".to_string()),
            order_url: Some("https://shop.example/orders/abc".to_string()),
            tracking_number: Some("TRACK-9".to_string()),
            tracking_url: Some("https://track.example/TRACK-9".to_string()),
            carrier_name: Some("DHL".to_string()),
            estimated_delivery: Some("2026-09-01".to_string()),
        }
    }

    fn bare_context() -> OrderNotificationContext {
        OrderNotificationContext {
            order_id: 1,
            order_number: "1001".to_string(),
            ..OrderNotificationContext::default()
        }
    }

    const ALL_TOPICS: [WebhookTopic; 4] = [
        WebhookTopic::OrdersCreate,
        WebhookTopic::FulfillmentsCreate,
        WebhookTopic::OrdersCancelled,
        WebhookTopic::PaymentFailed,
    ];

    /// A label line (ending in ':') must always be followed by content, and the
    /// message never contains two consecutive blank lines.
    fn assert_well_formed(message: &str) {
        assert!(!message.contains("\n\n\n"), "doubled blank line: {message:?}");
        let lines: Vec<&str> = message.lines().collect();
        for (index, line) in lines.iter().enumerate() {
            if line.trim_end().ends_with(':') {
                let next = lines.get(index + 1).copied().unwrap_or("");
                assert!(!next.trim().is_empty(), "dangling label {line:?}");
            }
        }
        assert!(!lines.last().unwrap_or(&"").trim().is_empty());
    }

    #[test]
    fn full_context_renders_every_section() {
        let templates = MessageTemplates::default();
        let message = templates.render(WebhookTopic::OrdersCreate, &full_context());
        assert!(message.contains("Hello Jane!"));
        assert!(message.contains("order #1001"));
        assert!(message.contains("• Amount: $99.99"));
        assert!(message.contains("• Confirmation sent to: jane@example.com"));
        assert!(message.contains("Track your order: https://shop.example/orders/abc"));
        assert_well_formed(&message);
    }

    #[test]
    fn bare_context_omits_optional_sections() {
        let templates = MessageTemplates::default();
        let message = templates.render(WebhookTopic::OrdersCreate, &bare_context());
        assert!(message.contains("Hello!"));
        assert!(!message.contains("Amount"));
        assert!(!message.contains("Confirmation sent to"));
        assert!(!message.contains("Track your order"));
        assert_well_formed(&message);
    }

    #[test]
    fn fulfillment_drops_shipping_block_when_empty() {
        let templates = MessageTemplates::default();
        let message = templates.render(WebhookTopic::FulfillmentsCreate, &bare_context());
        assert!(message.contains("has been shipped"));
        assert!(!message.contains("Shipping Details"));
        assert_well_formed(&message);
    }

    #[test]
    fn fulfillment_lists_available_tracking_fields() {
        let templates = MessageTemplates::default();
        let mut context = bare_context();
        context.tracking_number = Some("TRACK-9".to_string());
        let message = templates.render(WebhookTopic::FulfillmentsCreate, &context);
        assert!(message.contains("Shipping Details:\n• Tracking Number: TRACK-9"));
        assert!(!message.contains("Carrier"));
        assert_well_formed(&message);
    }

    #[test]
    fn payment_failed_includes_amount_when_known() {
        let templates = MessageTemplates::default();
        let message = templates.render(WebhookTopic::PaymentFailed, &full_context());
        assert!(message.contains("Amount due: $99.99"));
        assert!(message.contains("Update payment: https://shop.example/orders/abc"));
        assert_well_formed(&message);
    }

    #[test]
    fn every_topic_is_well_formed_for_all_optional_combinations() {
        let templates = MessageTemplates::default();
        // Toggle each optional field independently.
        for mask in 0..32u8 {
            let mut context = bare_context();
            if mask & 1 != 0 {
                context.total_price = Some("10.00".to_string());
            }
            if mask & 2 != 0 {
                context.customer_email = Some("a@b.c".to_string());
            }
            if mask & 4 != 0 {
                context.order_url = Some("https://x.example".to_string());
            }
            if mask & 8 != 0 {
                context.tracking_number = Some("T".to_string());
            }
            if mask & 16 != 0 {
                context.tracking_url = Some("https://t.example".to_string());
            }
            for topic in ALL_TOPICS {
                let message = templates.render(topic, &context);
                assert!(message.contains("1001"));
                assert_well_formed(&message);
            }
        }
    }
}
