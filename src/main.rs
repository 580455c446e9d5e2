mod command;
mod config;
mod console;
mod session;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use command::CommandRouter;
use config::ServerConfig;
use console::Console;
use session::{LivenessSweeper, SessionHandler, SessionRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ServerConfig::parse();

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!("listening for agents on {}", config.listen);

    let running = Arc::new(AtomicBool::new(true));
    let registry = Arc::new(SessionRegistry::new());

    tokio::spawn(accept_loop(
        listener,
        registry.clone(),
        running.clone(),
        config.download_dir.clone(),
    ));
    tokio::spawn(LivenessSweeper::new(registry.clone(), running.clone()).run());

    let router = CommandRouter::new(
        registry.clone(),
        Duration::from_millis(config.response_window_ms),
    );
    Console::new(router, registry.clone()).run().await?;

    info!("shutting down");
    running.store(false, Ordering::SeqCst);
    registry.shutdown_all().await;
    Ok(())
}

/// Accept agent connections and spawn one handler per session.
///
/// Steady-state accept errors are logged and the loop keeps accepting.
async fn accept_loop(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    running: Arc<AtomicBool>,
    download_dir: PathBuf,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let (session, command_rx) = registry.register(stream, addr).await;
                info!("client {} connected from {}", session.id, addr);

                let handler = SessionHandler::new(
                    session,
                    command_rx,
                    running.clone(),
                    download_dir.clone(),
                );
                tokio::spawn(handler.run());
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}
