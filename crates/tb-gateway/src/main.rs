use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use tb_core::config::{BridgeConfig, SHUTDOWN_WINDOW_MS};
use tb_tools::{DescriptorTable, ToolDescriptor};

mod app;
mod http;
mod session;
mod turn;
mod ws;

/// Command-line entry point for the bridge gateway process (§10).
#[derive(Debug, Parser)]
#[command(name = "tb-gateway")]
struct Args {
    /// Path to a TOML config file. Falls back to `BRIDGE_CONFIG` env, then
    /// built-in defaults (§10 "Configuration sourcing").
    #[arg(long, env = "BRIDGE_CONFIG")]
    config: Option<String>,

    /// Path to a JSON file holding a pre-built tool descriptor table, as
    /// produced by an external OpenAPI compiler (§6). Omit to run with no
    /// tools available.
    #[arg(long, env = "BRIDGE_TOOLS_FILE")]
    tools_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tb_gateway=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = BridgeConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({}), using defaults", e);
        BridgeConfig::default()
    });

    let descriptors = load_descriptors(args.tools_file.as_deref());

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let session_timeout = Duration::from_secs(config.session.session_timeout_secs);

    let state = Arc::new(app::AppState::new(config, descriptors));
    spawn_idle_reaper(state.clone(), session_timeout);

    let shutdown_state = state.clone();
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("bridge gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown_state))
        .await?;

    Ok(())
}

fn load_descriptors(path: Option<&str>) -> DescriptorTable {
    let Some(path) = path else {
        return DescriptorTable::new(Vec::new());
    };
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<Vec<ToolDescriptor>>(&raw) {
            Ok(descriptors) => {
                info!(count = descriptors.len(), "loaded tool descriptors");
                DescriptorTable::new(descriptors)
            }
            Err(e) => {
                warn!("failed to parse tool descriptor file ({}), starting with no tools", e);
                DescriptorTable::new(Vec::new())
            }
        },
        Err(e) => {
            warn!("failed to read tool descriptor file ({}), starting with no tools", e);
            DescriptorTable::new(Vec::new())
        }
    }
}

/// Periodically evicts sessions idle past `session_timeout_secs` (§5).
fn spawn_idle_reaper(state: Arc<app::AppState>, timeout: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            state.sessions.reap_idle(timeout).await;
        }
    });
}

/// Waits for the shutdown signal, then cancels every open session and gives
/// their connection tasks up to `SHUTDOWN_WINDOW_MS` to notice and exit
/// before handing control back to `axum::serve` (§10 "cancel in-flight
/// turns within the shutdown window, exit").
async fn shutdown_signal(state: Arc<app::AppState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(sessions = state.sessions.len(), "shutdown signal received, cancelling in-flight sessions");
    state.sessions.cancel_all();

    let window = Duration::from_millis(SHUTDOWN_WINDOW_MS);
    tokio::select! {
        _ = tokio::time::sleep(window) => {
            warn!("shutdown window elapsed, {} session(s) still open", state.sessions.len());
        }
        _ = wait_for_drain(&state) => {
            info!("all sessions drained before the shutdown window elapsed");
        }
    }
}

/// Polls the session table until it's empty. Bounded by the `select!` in
/// `shutdown_signal`, never awaited on its own.
async fn wait_for_drain(state: &app::AppState) {
    while state.sessions.len() > 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
