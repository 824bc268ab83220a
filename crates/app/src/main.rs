mod health;
mod problem;
mod router;
mod telemetry;
mod webhook;

use std::net::SocketAddr;

use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use orderping_storage::Store;
use orderping_util::{load_env_file, AppConfig};
use orderping_whatsapp::{AdminApiClient, CloudApiClient, CloudApiCredentials};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let store = Store::connect(&config.redis_url).await?;
    store.ping().await?;

    let http = Client::builder().timeout(config.http_timeout).build()?;

    let credentials = match (
        config.whatsapp_phone_number_id.clone(),
        config.whatsapp_access_token.clone(),
    ) {
        (Some(phone_number_id), Some(access_token)) => Some(CloudApiCredentials {
            phone_number_id,
            access_token,
        }),
        _ => {
            warn!(
                stage = "app",
                "whatsapp credentials not configured, notifications will be recorded as failed"
            );
            None
        }
    };
    let api_base = Url::parse(&config.whatsapp_api_base)?;
    let dispatcher = CloudApiClient::new(api_base, credentials, http.clone());

    let admin = config
        .shopify_admin_token
        .as_deref()
        .map(|token| AdminApiClient::new(token, config.shopify_api_version.clone(), http));
    if admin.is_none() {
        info!(stage = "app", "admin token not configured, order enrichment disabled");
    }

    let state = router::AppState::new(metrics, store, &config, dispatcher, admin);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
