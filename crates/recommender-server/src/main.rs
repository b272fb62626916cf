//! Node-pool recommender service
//!
//! Serves cost-minimizing node-pool recommendations over HTTP and keeps the
//! cached instance-type catalogs fresh in the background.

use anyhow::{Context, Result};
use recommender_core::{
    catalog::{CatalogRegistry, HttpProviderApi, ProviderApi, StaticProviderApi},
    engine::Engine,
    health::HealthRegistry,
    observability::RecommenderMetrics,
    pricing::{PrometheusSpotMetrics, SpotPriceMetrics},
};
use recommender_server::{
    api,
    config::{CatalogBackend, ServerConfig},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting nodepool recommender");

    let config = ServerConfig::load()?;
    info!(
        port = config.listen_port,
        base_path = %config.base_path,
        backend = ?config.catalog_backend,
        "Recommender configured"
    );

    let provider_api = provider_api(&config).await?;
    let spot_metrics = spot_metrics(&config)?;
    let has_metrics_backend = spot_metrics.is_some();

    let registry = Arc::new(CatalogRegistry::new(
        provider_api,
        spot_metrics,
        config.registry_config(),
    ));

    let health_registry = HealthRegistry::new();
    let engine = Arc::new(Engine::new(
        registry,
        health_registry.clone(),
        config.engine_config(),
    ));
    engine.register_components().await;
    engine
        .logger()
        .log_startup(SERVICE_VERSION, &config.providers, has_metrics_backend);

    let refresher = (config.catalog_refresh_secs > 0).then(|| {
        tokio::spawn(refresh_catalogs(
            Arc::clone(&engine),
            Duration::from_secs(config.catalog_refresh_secs),
        ))
    });

    let app_state = Arc::new(api::AppState::new(
        Arc::clone(&engine),
        health_registry.clone(),
        RecommenderMetrics::new(),
        config.auth_token.clone(),
    ));
    let router = api::create_router(app_state, &config.base_path, config.cors_allow_all);

    health_registry.set_ready(true).await;

    api::serve(config.listen_port, router, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for shutdown signal");
        }
    })
    .await?;

    if let Some(refresher) = refresher {
        refresher.abort();
    }
    engine.logger().log_shutdown("SIGINT received");
    info!("Shutting down");

    Ok(())
}

async fn provider_api(config: &ServerConfig) -> Result<Arc<dyn ProviderApi>> {
    match config.catalog_backend {
        CatalogBackend::File => {
            let path = config
                .catalog_file
                .as_ref()
                .context("catalog_file is not set")?;
            let api = StaticProviderApi::from_file(path).await?;
            info!(path = ?path, providers = ?api.provider_names(), "Loaded catalog file");
            Ok(Arc::new(api))
        }
        CatalogBackend::Http => {
            let url = config
                .productinfo_url
                .as_deref()
                .context("productinfo_url is not set")?;
            let timeout = Duration::from_secs(config.request_timeout_secs);
            Ok(Arc::new(HttpProviderApi::new(url, timeout)?))
        }
    }
}

fn spot_metrics(config: &ServerConfig) -> Result<Option<Arc<dyn SpotPriceMetrics>>> {
    match config.prometheus_url.as_deref() {
        Some(url) => {
            info!(url = %url, "Spot prices are averaged from Prometheus");
            Ok(Some(Arc::new(PrometheusSpotMetrics::new(url)?)))
        }
        None => {
            warn!("Prometheus address is not set, spot prices come from the spot price history API only");
            Ok(None)
        }
    }
}

/// Periodically re-fetch every cached catalog snapshot
async fn refresh_catalogs(engine: Arc<Engine>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let outcomes = engine.refresh_catalogs().await;
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        debug!(
            refreshed = outcomes.len() - failed,
            failed,
            "Catalog refresh finished"
        );
    }
}
