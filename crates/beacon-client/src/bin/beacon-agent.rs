//! # Beacon Agent
//!
//! Connects to a Beacon server and logs the events it receives.
//!
//! ```bash
//! SERVER_URL=http://localhost:8080 CLIENT_ID=agent-1 beacon-agent
//! ```

use anyhow::{Context, Result};
use beacon_client::{ClientConfig, SseClient};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_agent=info,beacon_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env();
    info!("Connecting to {}", config.server_url);

    let client = SseClient::new(config);

    client.add_event_handler("connected", |data: &[u8]| {
        let payload: Value = serde_json::from_slice(data).context("Invalid connected payload")?;
        info!(payload = %payload, "Connected to server");
        Ok(())
    });

    client.add_event_handler("request", |data: &[u8]| {
        let payload: Value = serde_json::from_slice(data).context("Invalid request payload")?;
        info!(payload = %payload, "Received request");
        Ok(())
    });

    let signal_client = client.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            signal_client.close();
        }
    });

    client.run().await?;
    client.shutdown().await;
    Ok(())
}
