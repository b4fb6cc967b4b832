//! Pingora reverse proxy with cookie-based session affinity.
//!
//! Loads the backend pool and affinity cookie settings from a TOML file,
//! then serves HTTP through Pingora with a side health server for probes.
//! Sending SIGHUP re-reads the `[[backends]]` section of the config file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pingora_core::server::Server;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sticky_proxy::config::{reload_backends, ProxyConfig};
use sticky_proxy::health::start_health_server;
use sticky_proxy::proxy::{HealthTracker, LoadBalancer, StickyGateway};
use sticky_proxy::store::BackendPool;

#[derive(Debug, Parser)]
#[command(name = "pingora-sticky-proxy", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "STICKY_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the proxy listen address.
    #[arg(long)]
    listen: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ProxyConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProxyConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    let backends = config.backends()?;
    if backends.is_empty() {
        tracing::warn!("no backends configured; requests will fail with 503");
    }
    let pool = Arc::new(BackendPool::from_backends(backends));
    let sticky = config.sticky_session()?;
    let health = Arc::new(HealthTracker::new(config.failure_threshold));
    let balancer = LoadBalancer::new(Arc::clone(&health));

    tracing::info!(
        listen = %config.listen,
        cookie = sticky.cookie_name(),
        backends = pool.len(),
        "pingora-sticky-proxy starting"
    );

    let health_addr = config.health_listen;
    let health_pool = Arc::clone(&pool);
    let reload_path = cli.config.clone();
    std::thread::Builder::new()
        .name("health".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!(error = %e, "failed to start health runtime");
                    return;
                }
            };
            let served = runtime.block_on(async move {
                if let Some(path) = reload_path {
                    tokio::spawn(watch_reload(path, Arc::clone(&health_pool), health));
                }
                start_health_server(health_addr, health_pool).await
            });
            if let Err(e) = served {
                tracing::error!(error = %e, "health server stopped");
            }
        })
        .context("spawning health server thread")?;

    let mut server =
        Server::new(None).map_err(|e| anyhow::anyhow!("failed to create server: {}", e))?;
    server.bootstrap();

    let gateway = StickyGateway::new(pool, sticky, balancer);
    let mut proxy = pingora_proxy::http_proxy_service(&server.configuration, gateway);
    proxy.add_tcp(&config.listen);
    server.add_service(proxy);

    server.run_forever()
}

/// Reloads the backend pool from the config file on every SIGHUP.
async fn watch_reload(path: PathBuf, pool: Arc<BackendPool>, health: Arc<HealthTracker>) {
    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(hangups) => hangups,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGHUP handler");
            return;
        }
    };

    while hangups.recv().await.is_some() {
        let path = path.clone();
        let pool = Arc::clone(&pool);
        let health = Arc::clone(&health);
        let reloaded =
            tokio::task::spawn_blocking(move || reload_backends(&path, &pool, &health)).await;
        match reloaded {
            Ok(Ok(version)) => tracing::info!(version, "backends reloaded"),
            Ok(Err(e)) => tracing::warn!(error = %e, "backend reload failed, keeping pool"),
            Err(e) => tracing::error!(error = %e, "backend reload task panicked"),
        }
    }
}
