use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use telemon_collector::cpu::CpuCollector;
use telemon_collector::memory::MemoryCollector;
use telemon_collector::runtime::RuntimeCollector;
use telemon_collector::Collector;
use telemon_common::crypto::Encryptor;
use telemon_common::hash::HashKey;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use telemon_agent::config::{AgentConfig, Cli};
use telemon_agent::sender::BatchSender;
use telemon_agent::store::MetricStore;
use telemon_agent::transport::{GrpcTransport, HttpTransport, Transport};
use telemon_agent::{netaddr, poller};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::resolve(Cli::parse())?;
    run_agent(config).await
}

async fn build_transport(config: &AgentConfig) -> Result<Arc<dyn Transport>> {
    let target = config.grpc_address().unwrap_or(&config.address);
    let real_ip = netaddr::preferred_ip(target).await.map(|ip| ip.to_string());
    tracing::info!(real_ip = ?real_ip, "Outbound address");

    if let Some(addr) = config.grpc_address() {
        let ignored = config.ignored_by_grpc();
        if !ignored.is_empty() {
            tracing::warn!(
                settings = ?ignored,
                "gRPC driver selected, body signing and encryption are disabled"
            );
        }
        let transport = GrpcTransport::new(addr, config.request_timeout())?.with_real_ip(real_ip)?;
        return Ok(Arc::new(transport));
    }

    let encryptor = match &config.crypto_key {
        Some(path) => Some(
            Encryptor::load(path)
                .with_context(|| format!("cannot load public key {}", path.display()))?,
        ),
        None => None,
    };
    let transport = HttpTransport::new(&config.address, config.request_timeout())?
        .with_real_ip(real_ip)
        .with_hash_key(config.hash_secret().map(HashKey::new))
        .with_encryptor(encryptor);
    Ok(Arc::new(transport))
}

async fn run_agent(config: AgentConfig) -> Result<()> {
    tracing::info!(
        address = %config.address,
        grpc = ?config.grpc_address(),
        poll_secs = config.poll_interval,
        report_secs = config.report_interval,
        signed = config.hash_secret().is_some(),
        encrypted = config.crypto_key.is_some(),
        "telemon-agent starting"
    );

    let transport = build_transport(&config).await?;
    let store = Arc::new(MetricStore::new());
    let cancel = CancellationToken::new();

    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(RuntimeCollector::new()?),
        Box::new(MemoryCollector::new()),
        Box::new(CpuCollector::new()),
    ];

    let (err_tx, err_rx) = mpsc::channel(64);
    let mut tasks = Vec::with_capacity(collectors.len() + 1);
    for collector in collectors {
        tasks.push(poller::spawn(
            collector,
            store.clone(),
            config.poll_interval(),
            err_tx.clone(),
            cancel.clone(),
        ));
    }
    drop(err_tx);
    let error_log = tokio::spawn(poller::log_errors(err_rx));

    let sender = BatchSender::new(store, transport, config.retry_delays());
    tasks.push(sender.spawn(config.report_interval(), cancel.clone()));

    wait_for_signal().await;
    tracing::info!("Shutting down gracefully");
    cancel.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Agent task panicked");
        }
    }
    if let Err(e) = error_log.await {
        tracing::error!(error = %e, "Error logger panicked");
    }
    tracing::info!("Agent stopped");
    Ok(())
}

async fn wait_for_signal() {
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
    }
}
