pub(crate) mod cli;

mod balancer;
mod config;
mod control;
mod handler;
mod middleware;
mod reconciler;
mod routing;
mod server;
mod settings;
mod source;
mod tls;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cli::Args;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use balancer::{HttpForwarder, PoolManager};
use control::ControlApi;
use handler::{EntryHandler, SharedHandler};
use middleware::{builtin, MiddlewareManager, Registry};
use reconciler::Reconciler;
use server::{listener::SHUTDOWN_GRACE, Server};
use settings::Settings;
use source::{file::Bootstrap, ConfigStore, Layout};
use tls::CertificateStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load(Args::parse()).context("Invalid settings")?;
    info!(?settings, "Starting gantry");

    let mut registry = Registry::default();
    builtin::register_all(&mut registry);
    info!(middlewares = ?registry.names(), "Middleware registry ready");

    let pools = PoolManager::new(Arc::new(HttpForwarder::new()));
    let middleware = MiddlewareManager::new(Arc::new(registry));
    let certificates = Arc::new(CertificateStore::default());

    let entry: SharedHandler = Arc::new(EntryHandler::new(
        middleware.clone(),
        Arc::new(pools.clone()),
    ));
    let server = Arc::new(Server::new(
        settings.http,
        settings.https,
        entry,
        certificates.clone(),
    ));

    let (actions, queue) = source::channel(settings.queue_capacity);
    let reconciler = Reconciler::new(
        pools.clone(),
        middleware.clone(),
        certificates,
        server.clone(),
        settings.password.clone(),
    );
    let reconciler = tokio::spawn(reconciler.run(queue));

    server
        .listen_and_serve_http()
        .await
        .context("Failed to start HTTP listener")?;

    let store = Arc::new(ConfigStore::new(Layout::new(&settings.prefix), actions));

    if let Some(path) = &settings.bootstrap {
        let bootstrap = Bootstrap::read(path)
            .await
            .with_context(|| format!("Failed to load {}", path.display()))?;
        bootstrap
            .apply(&store)
            .await
            .context("Failed to apply bootstrap configuration")?;
    }

    let control = match settings.control {
        Some(addr) => {
            let api: SharedHandler = Arc::new(ControlApi::new(
                store.clone(),
                pools.clone(),
                middleware.clone(),
            ));
            let handle = server::listener::spawn(addr, api, None)
                .await
                .context("Failed to start control API")?;
            Some(handle)
        }
        None => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    if let Some(control) = control {
        control.shutdown().await;
    }

    // Closing the queue lets the reconciler finish what is already queued.
    drop(store);
    match tokio::time::timeout(SHUTDOWN_GRACE, reconciler).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(%err, "Reconciler task failed"),
        Err(_) => warn!("Reconciler did not finish in time"),
    }

    server.shutdown().await;

    Ok(())
}
