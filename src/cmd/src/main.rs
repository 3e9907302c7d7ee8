use clap::Parser;
use proxy::plugin::PluginRegistry;
use proxy::proxy::Proxy;
use proxy::server::config::ProxyArgs;

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ProxyArgs::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(listen = %args.listen_addr(), upstream = %args.upstream_addr(), "starting mysql proxy");

    let plugins = Arc::new(PluginRegistry::discover(args.plugin_dir.as_deref()));
    let proxy = Arc::new(Proxy::new(Arc::new(args.clone()), plugins));

    let listener = TcpListener::bind(args.listen_addr()).await?;
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_signal() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let proxy = Arc::clone(&proxy);
                        sessions.spawn(async move {
                            if let Err(e) = proxy.serve_tcp(stream).await {
                                warn!(%addr, "session failed: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        }
    }

    info!(in_flight = sessions.len(), "accept loop stopped, draining sessions");
    while sessions.join_next().await.is_some() {}
    info!("all sessions drained");
    Ok(())
}
