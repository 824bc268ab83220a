use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use url::Url;

/// Client for the platform admin API, used to enrich webhook payloads that
/// arrive without customer contact details.
#[derive(Clone)]
pub struct AdminApiClient {
    http: Client,
    access_token: String,
    api_version: String,
    base_override: Option<Url>,
}

impl AdminApiClient {
    pub fn new(access_token: impl Into<String>, api_version: impl Into<String>, http: Client) -> Self {
        Self {
            http,
            access_token: access_token.into(),
            api_version: api_version.into(),
            base_override: None,
        }
    }

    /// Routes all requests to a fixed base instead of `https://{shop}`.
    /// Used by tests and local proxies.
    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base_override = Some(base);
        self
    }

    /// Fetches one order by id from the shop's admin API.
    pub async fn fetch_order(
        &self,
        shop_domain: &str,
        order_id: i64,
    ) -> Result<AdminOrder, AdminError> {
        let path = format!("admin/api/{}/orders/{order_id}.json", self.api_version);
        let url = match &self.base_override {
            Some(base) => base.join(&path)?,
            None => Url::parse(&format!("https://{shop_domain}/"))?.join(&path)?,
        };

        let response = self
            .http
            .get(url)
            .header("X-Shopify-Access-Token", &self.access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unavailable>"));
            return Err(AdminError::Status { status, body });
        }

        let envelope: OrderEnvelope = response.json().await?;
        envelope.order.ok_or(AdminError::MissingOrder)
    }
}

/// Subset of the admin order resource the notification pipeline needs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AdminOrder {
    #[serde(default, deserialize_with = "de_opt_number_string")]
    pub order_number: Option<String>,
    #[serde(default)]
    pub customer: Option<AdminCustomer>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AdminCustomer {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    order: Option<AdminOrder>,
}

/// Errors produced by the admin client.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("admin response missing order body")]
    MissingOrder,
}

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

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(base_url: &Url) -> AdminApiClient {
        AdminApiClient::new("shpat_test", "2024-01", Client::builder().build().expect("client"))
            .with_base_url(base_url.clone())
    }

    #[tokio::test]
    async fn fetch_order_parses_customer_details() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.base_url()).expect("url");
        let client = client(&base);

        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/admin/api/2024-01/orders/42.json")
                    .header("X-Shopify-Access-Token", "shpat_test");
                then.status(200).json_body(json!({
                    "order": {
                        "order_number": 1001,
                        "customer": {
                            "phone": "+254712345678",
                            "email": "jane@example.com",
                            "first_name": "Jane"
                        }
                    }
                }));
            })
            .await;

        let order = client.fetch_order("shop.example", 42).await.expect("fetch");
        mock.assert_async().await;
        assert_eq!(order.order_number.as_deref(), Some("1001"));
        let customer = order.customer.expect("customer");
        assert_eq!(customer.phone.as_deref(), Some("+254712345678"));
        assert_eq!(customer.first_name.as_deref(), Some("Jane"));
    }

    #[tokio::test]
    async fn error_status_returns_body() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.base_url()).expect("url");
        let client = client(&base);

        server
            .mock_async(|when, then| {
                when.method(GET).path("/admin/api/2024-01/orders/42.json");
                then.status(404).body("Not Found");
            })
            .await;

        let err = client
            .fetch_order("shop.example", 42)
            .await
            .expect_err("should error");
        match err {
            AdminError::Status { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "Not Found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_order_body_is_an_error() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.base_url()).expect("url");
        let client = client(&base);

        server
            .mock_async(|when, then| {
                when.method(GET).path("/admin/api/2024-01/orders/42.json");
                then.status(200).json_body(json!({}));
            })
            .await;

        let err = client
            .fetch_order("shop.example", 42)
            .await
            .expect_err("should error");
        assert!(matches!(err, AdminError::MissingOrder));
    }
}
