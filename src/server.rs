use anyhow::Result;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{Instrument, error, info, info_span, warn};

use crate::game::GameRules;
use crate::session::{Outcome, Session};
use crate::shutdown::Shutdown;
use crate::state::{Registration, ServerState};

/// Accepts connections until shutdown is requested or accept fails. The
/// listener is closed when this returns.
pub async fn run(
    listener: TcpListener,
    state: ServerState,
    shutdown: Shutdown,
    idle_timeout: Option<Duration>,
) -> Result<()> {
    info!("listening on {}", listener.local_addr()?);

    loop {
        let (socket, peer) = tokio::select! {
            _ = shutdown.stopped() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    error!("accept failed: {err}");
                    break;
                }
            },
        };

        let registration = state.register(peer, shutdown.session_token());
        let span = info_span!("conn", id = %registration.id(), %peer);

        shutdown
            .tracker()
            .spawn(handle(registration, socket, idle_timeout).instrument(span));
    }

    info!("no longer accepting connections");

    Ok(())
}

async fn handle(registration: Registration, socket: TcpStream, idle_timeout: Option<Duration>) {
    info!("new connection");

    let session = Session::new(socket, GameRules::default()).idle_timeout(idle_timeout);
    let closer = registration.handle().clone();

    // Losing the race drops the session, which closes the socket.
    let result = tokio::select! {
        res = session.run() => res,
        _ = closer.closed() => Ok(Outcome::Closed),
    };

    match result {
        Ok(outcome) => info!(%outcome, "connection closed"),
        Err(err) => warn!("connection error: {err:?}"),
    }

    drop(registration);
}
