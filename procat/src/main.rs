//! # Procat Server Entry Point
//!
//! Drives the application lifecycle:
//!
//! 1. **Initialization**: parses flags, sets up tracing.
//! 2. **Wiring**: builds the session manager, loader, and catalog façade.
//! 3. **Serving**: binds the listener and serves the router; the hyper
//!    auto builder behind `axum::serve` accepts HTTP/1.1 and HTTP/2
//!    cleartext, so gRPC clients work without TLS.
//! 4. **Shutdown**: on ctrl-c, drains the server, then closes the session
//!    manager so the cleanup task exits and pooled connections drop.

mod api;
mod cli;
mod grpc;
mod routes;
mod service;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use procat_core::loader::Loader;
use procat_core::session::{SessionConfig, SessionManager};

use api::types::SERVICE_NAME;
use cli::Cli;
use service::CatalogService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let sessions = SessionManager::new(SessionConfig {
        ttl: Duration::from_secs(args.session_ttl_secs),
        ..Default::default()
    });
    let loader = Loader::new().buf_bin(args.buf_bin).git_bin(args.git_bin);
    let service = Arc::new(CatalogService::new(sessions, loader));

    let app = routes::router(Arc::clone(&service));
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("catalog server listening on http://{addr}");
    info!("API available at http://{addr}/{SERVICE_NAME}/*");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    service.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
    }
}
