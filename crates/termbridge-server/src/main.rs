//! termbridge-server: interactive PTY sessions over WebSocket.
//!
//! Each client event is routed to the session registry; terminal output,
//! status and completion events are streamed back on the same socket.

mod cli;
mod connection;
mod dispatch;
mod protocol;
mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use termbridge_config::{TermbridgeConfig, DEBUG_ENV_VAR};
use termbridge_pty::SessionRegistry;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::connection::handle_connection;
use crate::dispatch::Dispatcher;

#[tokio::main]
async fn main() {
    let args = cli::parse();

    let (mut config, load_error) = match termbridge_config::load_config(args.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => {
            let mut config = TermbridgeConfig::default();
            termbridge_config::apply_env_overrides(&mut config, |key| std::env::var(key).ok());
            (config, Some(e))
        }
    };
    args.apply(&mut config);
    init_logging(&config);

    tracing::info!("termbridge v{} starting...", env!("CARGO_PKG_VERSION"));
    if let Some(e) = load_error {
        tracing::warn!("Config load failed, using defaults: {e}");
    }
    if config.logging.debug {
        tracing::debug!("{DEBUG_ENV_VAR} set, verbose terminal logging enabled");
    }

    let addr = config.server.bind_addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("termbridge listening on ws://{addr}");

    let shutdown_budget = config.escalation.cleanup_grace()
        + config.escalation.reap_timeout()
        + config.terminal.flush_grace()
        + Duration::from_secs(1);
    let registry = Arc::new(SessionRegistry::new(config));
    let cancel = CancellationToken::new();

    let accept = tokio::spawn(accept_loop(
        listener,
        Dispatcher::new(Arc::clone(&registry)),
        cancel.clone(),
    ));

    shutdown::wait_for_shutdown_signal().await;
    cancel.cancel();
    let _ = accept.await;

    match tokio::time::timeout(shutdown_budget, registry.shutdown()).await {
        Ok(()) => tracing::info!("shutdown complete"),
        Err(_) => tracing::warn!("shutdown timed out after {shutdown_budget:?}"),
    }
}

fn init_logging(config: &TermbridgeConfig) {
    let directive = config.logging.directive();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn accept_loop(listener: TcpListener, dispatcher: Dispatcher, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let dispatcher = dispatcher.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        match accept_async(stream).await {
                            Ok(ws) => handle_connection(ws, addr, dispatcher, cancel).await,
                            Err(e) => {
                                tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            },
        }
    }
    tracing::debug!("accept loop stopped");
}
