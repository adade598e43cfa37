use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use relaycache::cache::ConnectionCache;
use relaycache::config::Config;
use relaycache::proxy::{admin, server, ProxyState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("relaycache starting");

    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let root_cancel = shutdown_token();

    let client = reqwest::Client::builder()
        .timeout(config.upstream_timeout)
        .build()?;
    let cache = ConnectionCache::new(client, root_cancel.child_token());

    let proxy_addr = config.proxy_addr;
    let admin_addr = config.admin_addr;
    let state = Arc::new(ProxyState { cache, config });

    let proxy_listener = TcpListener::bind(proxy_addr).await?;
    let admin_listener = TcpListener::bind(admin_addr).await?;
    tracing::info!(%proxy_addr, %admin_addr, "listening");

    let proxy_router = server::router(state.clone());
    let admin_router = admin::router(state.clone());

    let proxy_cancel = root_cancel.clone();
    let proxy_server = async move {
        axum::serve(proxy_listener, proxy_router)
            .with_graceful_shutdown(proxy_cancel.cancelled_owned())
            .await
    };

    let admin_cancel = root_cancel.clone();
    let admin_server = async move {
        axum::serve(admin_listener, admin_router)
            .with_graceful_shutdown(admin_cancel.cancelled_owned())
            .await
    };

    let (proxy_result, admin_result) = tokio::join!(proxy_server, admin_server);
    proxy_result?;
    admin_result?;

    tracing::info!("servers stopped, closing streams");
    for err in state.cache.close_all().await {
        tracing::warn!("stream close error during shutdown: {err}");
    }

    tracing::info!("relaycache finished");
    Ok(())
}

/// A token cancelled on `SIGINT`/`SIGTERM` (or Ctrl-C on non-unix
/// platforms), mirroring the original's signal-driven shutdown context.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let waiter = token.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        waiter.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
