//! netdash -- a small network diagnostics service.
//!
//! Two diagnostics are exposed over HTTP and the command line: cached DNS
//! lookups against a chosen name server, and live `ping` runs streamed
//! reply by reply.

pub mod api;
pub mod config;
pub mod dns;
pub mod probes;
pub mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::NetdashConfig;

/// Start the netdash daemon: settings store, resolver, probe launcher and
/// the API server.
pub async fn serve(
    config: NetdashConfig,
    config_path: PathBuf,
    extra_dns_servers: &[String],
) -> Result<()> {
    let bind = config.server.bind.clone();
    let launcher = probes::ProbeLauncher::new(
        config.ping.program.clone(),
        Some(config.ping.default_count),
    );

    // 1. Saved settings, plus any servers given on the command line
    let settings = Arc::new(settings::SettingsStore::new(config, config_path));
    if !extra_dns_servers.is_empty() {
        let added = settings
            .merge_dns_servers(extra_dns_servers)
            .await
            .context("failed to save command-line name servers")?;
        tracing::info!(added, "merged command-line name servers");
    }

    // 2. Resolver, with a background sweep of expired cache entries
    let resolver = Arc::new(dns::Resolver::from_system());
    let sweeper = resolver.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(dns::CACHE_TTL);
        loop {
            tick.tick().await;
            let purged = sweeper.cache().purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "purged expired dns cache entries");
            }
        }
    });

    // 3. API server
    let state = api::state::AppState {
        resolver,
        launcher: Arc::new(launcher),
        lookup: Arc::new(probes::SystemLookup),
        settings,
    };
    let app = api::router(state);

    let addr: std::net::SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", bind))?;
    tracing::info!(%addr, "netdash listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("netdash stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
