//! Reef Gateway - front door of the reef object store
//!
//! Authenticates requests, routes metadata operations to the shard a
//! consistent-hash ring names, and streams object bodies between clients
//! and storage nodes.

mod auth;
mod buckets;
mod conditional;
mod headers;
mod listing;
mod metrics;
mod objects;
mod pipeline;
mod probes;
mod response;
mod throttle;
mod upload;

use anyhow::Result;
use auth::{AuthAgent, StaticAuthAgent};
use axum::{
    middleware,
    routing::{get, options, put},
    Router,
};
use clap::Parser;
use metrics::Metrics;
use pipeline::AppState;
use probes::TracingProbes;
use reef_client::{HttpSharkChooser, SharkChooser, ShardPool, SharkClient, StaticChooser};
use reef_common::{GatewayConfig, Shark};
use reef_ring::{HttpPlacementSource, PlacementSource, Ring};
use std::sync::Arc;
use throttle::Throttle;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "reef-gateway")]
#[command(about = "Reef object store HTTP gateway")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/reef/gateway.toml")]
    config: String,

    /// Storage-node inventory service endpoint; when unset, a static
    /// chooser over --static-shark entries is used
    #[arg(long)]
    chooser_endpoint: Option<String>,

    /// Static storage node (datacenter:storage_id), repeatable; used
    /// only without --chooser-endpoint
    #[arg(long = "static-shark")]
    static_sharks: Vec<String>,

    /// Disable authentication (for development)
    #[arg(long, default_value_t = false)]
    no_auth: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting reef gateway");

    let config = match GatewayConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            info!("config {} not loadable ({e}); using defaults", args.config);
            GatewayConfig::default()
        }
    };

    // Placement is load-bearing: without a ring nothing can be routed,
    // so a failed bootstrap is fatal.
    let placement: Arc<dyn PlacementSource> =
        Arc::new(HttpPlacementSource::new(&config.ring.placement_url)?);
    let ring = Arc::new(Ring::bootstrap(placement.as_ref()).await?);

    let snapshot = ring.snapshot();
    let shards = Arc::new(ShardPool::new(
        snapshot.pnodes().map(str::to_string).collect::<Vec<_>>(),
    )?);

    let sharks = SharkClient::new(&config.storage)?;

    let chooser: Arc<dyn SharkChooser> = match &args.chooser_endpoint {
        Some(endpoint) => Arc::new(HttpSharkChooser::new(endpoint)?),
        None => {
            let nodes = args
                .static_sharks
                .iter()
                .filter_map(|entry| {
                    entry.split_once(':').map(|(dc, id)| Shark {
                        datacenter: dc.to_string(),
                        storage_id: id.to_string(),
                    })
                })
                .collect::<Vec<_>>();
            info!(nodes = nodes.len(), "using static storage inventory");
            Arc::new(StaticChooser::new(nodes))
        }
    };

    let auth: Arc<dyn AuthAgent> = Arc::new(StaticAuthAgent::new(args.no_auth));
    if args.no_auth {
        info!("Authentication is DISABLED (development mode)");
    }

    let metrics = Arc::new(Metrics::new());
    let probes = Arc::new(TracingProbes::new(metrics.clone()));
    let throttle = Arc::new(Throttle::new(&config.throttle, probes.clone()));

    let state = Arc::new(AppState {
        config: config.clone(),
        ring: ring.clone(),
        shards,
        sharks,
        chooser,
        auth,
        probes,
        metrics: metrics.clone(),
    });

    // Background ring refresh; never blocks requests and keeps the old
    // snapshot if a poll fails.
    tokio::spawn(
        ring.clone()
            .refresh_loop(placement, config.ring.poll_interval()),
    );

    let app = Router::new()
        .route(
            "/{login}/buckets",
            options(buckets::options_buckets).get(buckets::list_buckets),
        )
        .route(
            "/{login}/buckets/{bucket}",
            put(buckets::create_bucket)
                .head(buckets::head_bucket)
                .delete(buckets::delete_bucket),
        )
        .route(
            "/{login}/buckets/{bucket}/objects",
            get(objects::list_objects),
        )
        .route(
            "/{login}/buckets/{bucket}/objects/{object}",
            put(objects::create_object)
                .get(objects::get_object)
                .head(objects::head_object)
                .delete(objects::delete_object),
        )
        .route(
            "/{login}/buckets/{bucket}/objects/{object}/metadata",
            put(objects::update_object_metadata),
        )
        // Object sizes are enforced by the upload check stream, not the
        // extractor-level cap.
        .layer(axum::extract::DefaultBodyLimit::disable())
        .layer(middleware::from_fn_with_state(
            metrics.clone(),
            metrics::metrics_layer,
        ))
        .layer(middleware::from_fn_with_state(
            throttle.clone(),
            throttle::throttle_layer,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let metrics_app = Router::new()
        .route("/metrics", get(metrics::serve_metrics))
        .with_state(metrics);

    let metrics_listener = TcpListener::bind(config.network.metrics_listen).await?;
    info!("metrics listening on {}", config.network.metrics_listen);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            tracing::error!(error = %e, "metrics listener failed");
        }
    });

    let listener = TcpListener::bind(config.network.listen).await?;
    info!("gateway listening on {}", config.network.listen);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    info!("gateway shut down gracefully");
    Ok(())
}
