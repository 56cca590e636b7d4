use crate::config::Config;
use crate::error::ConfigError;
use crate::handlers::{
    add_tokens, check_rate_limit, create_bucket, delete_bucket, delete_link, get_bucket, get_link,
    health_check, list_buckets, list_links, redirect, reset_bucket, shorten, sweep_buckets,
    AppState, SharedState,
};
use crate::middleware::{logging_middleware, rate_limit_middleware};
use crate::sweeper::spawn_sweeper;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the router over `state`.
pub fn create_app(state: SharedState, enable_tracing: bool) -> Router {
    let throttled = Router::new()
        .route("/shorten", post(shorten))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    let app = Router::new()
        // Rate limiting endpoints
        .route("/rate-limit", get(list_buckets))
        .route("/rate-limit/sweep", post(sweep_buckets))
        .route(
            "/rate-limit/:key",
            get(get_bucket).post(create_bucket).delete(delete_bucket),
        )
        .route("/rate-limit/:key/check", post(check_rate_limit))
        .route("/rate-limit/:key/tokens", post(add_tokens))
        .route("/rate-limit/:key/reset", post(reset_bucket))
        // Shortener endpoints
        .merge(throttled)
        .route("/s/:code", get(redirect))
        .route("/links", get(list_links))
        .route("/links/:code", get(get_link).delete(delete_link))
        // Health endpoint
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        );

    if enable_tracing {
        app.layer(TraceLayer::new_for_http())
    } else {
        app
    }
}

pub struct Server {
    config: Config,
    state: SharedState,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let state = Arc::new(AppState::from_config(&config)?);
        Ok(Self { config, state })
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = spawn_sweeper(
            self.state.registry.clone(),
            self.config.cleanup_interval(),
            self.config.stale_bucket_max_age(),
            shutdown_rx,
        );

        let app = create_app(self.state(), self.config.enable_tracing);

        tracing::info!("Gatekeeper server starting on {}", self.config.bind_addr);
        tracing::info!("Health check available at /health");

        // Run server with graceful shutdown
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        let _ = shutdown_tx.send(true);
        sweeper.await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
