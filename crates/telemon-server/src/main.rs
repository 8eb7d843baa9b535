use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use telemon_common::crypto::Decryptor;
use telemon_common::hash::HashKey;
use telemon_storage::Storage;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as TonicServer;
use tracing_subscriber::EnvFilter;

use telemon_server::config::{Cli, ServerConfig};
use telemon_server::service::MetricsService;
use telemon_server::state::AppState;
use telemon_server::{app, grpc};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::resolve(Cli::parse())?;
    run_server(config).await
}

async fn run_server(config: ServerConfig) -> Result<()> {
    tracing::info!(
        address = %config.address,
        grpc = ?config.grpc_address(),
        db = ?config.redacted_dsn(),
        file = %config.file_storage_path,
        store_interval = config.store_interval,
        restore = config.restore,
        "telemon-server starting"
    );

    let storage = Storage::open(&config.storage_config()).await?;
    let service = MetricsService::new(storage.clone());

    let mut state = AppState::new(service.clone());
    state.hash_key = config.hash_secret().map(HashKey::new);
    state.trusted_subnet = config.subnet()?;
    if let Some(path) = &config.crypto_key {
        let decryptor = Decryptor::load(path)
            .with_context(|| format!("cannot load private key {}", path.display()))?;
        state.decryptor = Some(Arc::new(decryptor));
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("cannot bind {}", config.address))?;
    let http_addr = listener.local_addr()?;
    let router = app::build_http_app(state.clone());
    let http_shutdown = shutdown.clone();
    let http_task: JoinHandle<()> = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(http_shutdown.clone().cancelled_owned())
        .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "HTTP server error");
        }
        http_shutdown.cancel();
    });

    let mut tasks = vec![http_task];
    if let Some(addr) = config.grpc_address() {
        let grpc_addr = tokio::net::lookup_host(addr)
            .await
            .with_context(|| format!("cannot resolve {addr}"))?
            .next()
            .with_context(|| format!("no address for {addr}"))?;
        let grpc_service = grpc::server(grpc::MetricsGrpc::new(service, state.trusted_subnet));
        let grpc_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let result = TonicServer::builder()
                .add_service(grpc_service)
                .serve_with_shutdown(grpc_addr, grpc_shutdown.clone().cancelled_owned())
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "gRPC server error");
            }
            grpc_shutdown.cancel();
        }));
        tracing::info!(grpc = %grpc_addr, "gRPC listener started");
    }

    tracing::info!(http = %http_addr, "Server started");
    shutdown.cancelled().await;
    tracing::info!("Shutting down gracefully");

    let drain = join_servers(tasks);
    if tokio::time::timeout(config.shutdown_timeout(), drain).await.is_err() {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout,
            "In-flight requests did not finish before the shutdown timeout"
        );
    }

    if let Err(e) = storage.repository.close().await {
        tracing::error!(error = %e, "Failed to close storage");
    }
    tracing::info!("Server stopped");
    Ok(())
}

async fn join_servers(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Server task panicked");
        }
    }
}

/// Cancels `token` on Ctrl-C or SIGTERM.
async fn watch_signals(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = token.cancelled() => return,
    }
    token.cancel();
}
