mod game;
mod protocol;
mod server;
mod session;
mod shutdown;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::shutdown::{SHUTDOWN_GRACE, Shutdown, Signals};

/// Number guessing game over TCP.
#[derive(Parser, Debug)]
#[command(name = "guess-server", version, about)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    addr: String,

    /// Drop clients that send nothing for this many seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    idle_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guess_server=info".into()),
        )
        .init();

    let args = Args::parse();

    let listener = TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("failed to listen on {}", args.addr))?;

    let state = state::ServerState::default();
    let shutdown = Shutdown::new(state.clone());

    let signals = Signals::new().context("failed to install signal handlers")?;
    tokio::spawn(shutdown::listen(signals, shutdown.clone()));

    let idle_timeout = args.idle_timeout.map(Duration::from_secs);

    server::run(listener, state, shutdown.clone(), idle_timeout).await?;

    // No-op when a signal got us here; covers the acceptor failing on its own.
    shutdown.trigger();
    shutdown.wait(SHUTDOWN_GRACE).await;

    Ok(())
}
