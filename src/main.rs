#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # mcp-browser
//!
//! MCP (Model Context Protocol) server that exposes browser automation and
//! generic HTTP request tools over WebSocket. An AI agent host connects to
//! `ws://<host>:8080`, negotiates MCP, and drives a Chromium instance that
//! is launched lazily on the first browser tool call.
//!
//! Every connection gets its own session: its own transport adapter, its
//! own protocol loop, and its own automation contexts (browser, HTTP
//! client, screenshot registry). Nothing is shared between connections, so
//! one client's dead browser or malformed traffic never affects another's.
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap, accept loop, graceful shutdown
//! config.rs        — TOML + env-var configuration
//! transport.rs     — WebSocket transport adapter + inbound event channel
//! mcp.rs           — MCP JSON-RPC session loop and method handlers
//! context.rs       — per-connection automation contexts (state machine),
//!                    screenshot artifact registry
//! browser.rs       — Chromium session over CDP (chromiumoxide)
//! http.rs          — reqwest-backed HTTP request context
//! tools/
//!   mod.rs         — tool catalog, validation, dispatch
//!   browser.rs     — browser tool handlers
//!   api.rs         — HTTP request tool handler
//! ```

mod browser;
mod config;
mod context;
mod http;
mod mcp;
mod tools;
mod transport;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use config::Config;
use context::ToolContext;
use transport::WsTransport;

/// MCP server exposing browser automation tools over WebSocket.
#[derive(Parser)]
#[command(name = "mcp-browser", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Arc::new(Config::load(cli.config.as_deref()));

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("mcp-browser v{} starting", env!("CARGO_PKG_VERSION"));

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .expect("Failed to bind");
    info!(
        "WebSocket MCP server listening on ws://{}",
        config.server.listen
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut connections: JoinSet<()> = JoinSet::new();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        config.clone(),
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => warn!("Accept failed: {e}"),
            },
            _ = &mut shutdown => break,
        }
    }

    // Stop accepting, then give in-flight connections a bounded window to
    // close their browsers before the process force-exits.
    info!("Shutting down...");
    drop(listener);
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_millis(config.server.shutdown_grace_ms);
    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        error!("Forced shutdown after {}ms grace period", grace.as_millis());
        std::process::exit(1);
    }

    info!("Goodbye");
}

/// One connection: WebSocket handshake, then a full MCP session. Handshake
/// failure drops the TCP connection without retaining any state.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<Config>,
    shutdown: watch::Receiver<bool>,
) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("WebSocket handshake with {peer} failed: {e}");
            return;
        }
    };

    let conn_id = uuid::Uuid::new_v4().to_string();
    info!("Client connected: {conn_id} ({peer})");

    let (transport, events) = WsTransport::new(socket);
    let ctx = ToolContext::new(config);
    mcp::run_session(&conn_id, transport, events, ctx, shutdown).await;
}

/// Resolves when a termination signal is received. On Unix this is SIGINT
/// or SIGTERM; elsewhere Ctrl-C only.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to register SIGTERM");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("Received SIGINT");
    }
}
