//! Server initialization and main run loop
//!
//! Contains the main `run()` function that wires the store, the gateway,
//! and the HTTP surface together.

use super::config::{AppConfig, SurfaceMode};
use super::loader::load_config;
use crate::cli::ServeArgs;
use crate::middleware::rate_limit::RateLimitLayer;
use anyhow::{Context, Result};
use axum::{Extension, Router};
use plaza_core::{
    CanvasSpec, CanvasStore, CooldownGate, KeySchema, MemoryDirectory, MemoryStore,
    PlacementGateway, RateLimitConfig, RateLimiter, RedisDirectory, RedisStore, Throttle,
    WriterDirectory,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Shared server state handed to handlers via `Extension`.
#[derive(Clone)]
pub struct ServerContext {
    /// When this process started, for uptime reporting.
    pub started: Instant,
    /// Which surface accepts writes.
    pub mode: SurfaceMode,
    /// How long a session-mode socket may stay unauthenticated.
    pub auth_timeout: Duration,
}

/// Run the server
pub async fn run(args: ServeArgs) -> Result<()> {
    info!("Starting Plaza v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config().context("Failed to load configuration")?;
    apply_overrides(&mut config, &args);
    config.validate()?;
    info!("Configuration loaded");

    let spec = CanvasSpec::new(
        config.canvas.width,
        config.canvas.height,
        config.canvas.color_count,
    )?;
    let keys = KeySchema::new(&config.redis.key_prefix);

    let (store, directory) = build_backends(&config, spec, keys).await?;

    let store_timeout = config.resilience.store_timeout();
    let throttle = build_throttle(&config, store.clone(), store_timeout);

    let gateway = Arc::new(
        PlacementGateway::new(spec, store.clone(), directory, throttle)
            .with_write_strategy(config.write_strategy())
            .with_store_timeout(store_timeout)
            .with_breaker_config(config.resilience.breaker_config()),
    );

    let hub = crate::websocket::BroadcastHub::start(gateway.subscribe());

    let context = ServerContext {
        started: Instant::now(),
        mode: config.surface_mode(),
        auth_timeout: Duration::from_secs(config.broadcast.auth_timeout_seconds),
    };

    let rate_limit_layer = RateLimitLayer::new(store, &config.rest_limit, store_timeout);

    // Build the main router with all endpoints
    let app = Router::new()
        .merge(crate::api::health_routes())
        .merge(crate::api::canvas_routes())
        .merge(crate::api::pixel_routes())
        .merge(crate::websocket::websocket_routes())
        // Layers (applied to all routes)
        .layer(Extension(gateway))
        .layer(Extension(hub))
        .layer(Extension(context))
        .layer(rate_limit_layer)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    info!(
        %addr,
        store = %config.store,
        mode = %config.mode,
        write_strategy = %config.write_strategy,
        "Plaza listening"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    // ConnectInfo keeps the peer address available for rate-limit keying.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;

    info!("Plaza shutdown complete");
    Ok(())
}

/// CLI flags win over files and environment.
fn apply_overrides(config: &mut AppConfig, args: &ServeArgs) {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(url) = &args.redis_url {
        config.redis.url = url.clone();
    }
    if let Some(mode) = &args.mode {
        config.mode = mode.clone();
    }
}

/// Construct the canvas store and writer directory for the configured backend.
async fn build_backends(
    config: &AppConfig,
    spec: CanvasSpec,
    keys: KeySchema,
) -> Result<(Arc<dyn CanvasStore>, Arc<dyn WriterDirectory>)> {
    match config.store.as_str() {
        "memory" => {
            warn!("Using in-memory store: state is lost on restart and not shared");
            let store = MemoryStore::with_capacity(spec, config.broadcast.capacity);
            Ok((Arc::new(store), Arc::new(MemoryDirectory::new())))
        }
        _ => {
            let store = RedisStore::connect(
                &config.redis.url,
                keys.clone(),
                spec,
                config.broadcast.capacity,
            )
            .await
            .context("Failed to connect to Redis")?;
            let directory = RedisDirectory::new(&config.redis.url, keys)
                .context("Failed to open writer directory")?;
            Ok((Arc::new(store), Arc::new(directory)))
        }
    }
}

/// Construct the configured write throttle.
fn build_throttle(
    config: &AppConfig,
    store: Arc<dyn CanvasStore>,
    store_timeout: Duration,
) -> Throttle {
    let settings = &config.throttle;
    match settings.strategy.as_str() {
        "window" => Throttle::Window(RateLimiter::new(
            store,
            "pixel",
            RateLimitConfig::new(settings.limit, Duration::from_secs(settings.window_seconds))
                .with_fail_open(settings.fail_open)
                .with_store_timeout(store_timeout),
        )),
        _ => Throttle::Cooldown(
            CooldownGate::new(store, Duration::from_secs(settings.cooldown_seconds))
                .with_fail_open(settings.fail_open)
                .with_store_timeout(store_timeout),
        ),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
