//! API Server for Conductor
//!
//! Serves the run control plane over REST and streams run events to
//! WebSocket observers.

mod agents;
mod config;
mod hub;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_runner::{AgentRegistry, AnthropicClient, AnthropicConfig, EventBridge};
use conductor_core::run::{FileRunStore, MemoryStore, Storage};
use conductor_core::EventBus;

use crate::config::ServerConfig;
use crate::hub::{Hub, HubConfig};
use crate::state::AppState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "api_server=debug,agent_runner=debug,conductor_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().context("Invalid configuration")?;
    tracing::info!("Loaded configuration: {:?}", config);

    let storage: Arc<dyn Storage> = match &config.data_dir {
        Some(dir) => {
            tracing::info!("Using data directory: {:?}", dir);
            Arc::new(
                FileRunStore::open(dir)
                    .await
                    .context("Failed to open run store")?,
            )
        }
        None => {
            tracing::info!("No data directory configured, runs are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let bus = EventBus::new();
    let bridge = Arc::new(EventBridge::new(Arc::clone(&storage)));
    let bridge_handle = bridge.spawn(&bus);

    let (hub, hub_handle) = Hub::spawn(HubConfig::default());
    hub.forward_from(storage.as_ref());

    if config.anthropic_api_key.is_none() {
        tracing::warn!("ANTHROPIC_API_KEY is not set; model calls will be rejected");
    }
    let llm = AnthropicClient::new(
        AnthropicConfig::new(config.anthropic_api_key.clone().unwrap_or_default())
            .with_base_url(config.anthropic_base_url.clone()),
    );

    let mut registry = AgentRegistry::new(Arc::new(llm), bus.clone());
    agents::register_defaults(&mut registry, &config);

    let app_state = AppState::new(Arc::clone(&storage), Arc::new(registry), hub.clone());

    let app = routes::router(app_state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http_addr))?;
    tracing::info!("REST API and WebSocket listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down");
    if !app_state.orchestrator().shutdown(SHUTDOWN_GRACE).await {
        tracing::warn!("Some runs did not finish before shutdown");
    }
    bus.close();
    let _ = bridge_handle.await;
    hub.shutdown().await;
    let _ = hub_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
