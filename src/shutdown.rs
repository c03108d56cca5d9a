use anyhow::Result;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::state::ServerState;

/// How long shutdown waits for sessions to finish their cleanup.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Shutdown {
    state: ServerState,
    accept: CancellationToken,
    sessions: CancellationToken,
    tracker: TaskTracker,
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new(state: ServerState) -> Self {
        Self {
            state,
            accept: CancellationToken::new(),
            sessions: CancellationToken::new(),
            tracker: TaskTracker::new(),
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Closer for a new session. Also fires on shutdown, which covers a
    /// session registered after the registry was already walked.
    pub fn session_token(&self) -> CancellationToken {
        self.sessions.child_token()
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Resolves once the acceptor must stop.
    pub async fn stopped(&self) {
        self.accept.cancelled().await
    }

    /// Stops accepting and force-closes every registered connection.
    /// Returns `false` if shutdown was already underway.
    pub fn trigger(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!(live = self.state.len(), "shutting down");

        self.accept.cancel();

        self.state.for_each(|handle| {
            if !handle.is_closed() {
                info!(id = %handle.id, peer = %handle.peer, "closing connection");
                handle.close();
            }
        });

        self.sessions.cancel();

        true
    }

    /// Waits for every session task to finish, at most `grace`. Returns
    /// whether they all did.
    pub async fn wait(&self, grace: Duration) -> bool {
        self.tracker.close();

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!("shutdown complete");
                true
            }
            Err(_) => {
                warn!(live = self.state.len(), "sessions still running after grace period");
                false
            }
        }
    }
}

#[cfg(unix)]
pub struct Signals {
    term: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    pub fn new() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            term: signal(SignalKind::terminate())?,
            int: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> io::Result<&'static str> {
        let name = tokio::select! {
            s = self.term.recv() => s.map(|_| "SIGTERM"),
            s = self.int.recv() => s.map(|_| "SIGINT"),
        };

        name.ok_or_else(|| io::Error::other("signal stream closed"))
    }
}

#[cfg(not(unix))]
pub struct Signals;

#[cfg(not(unix))]
impl Signals {
    pub fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> io::Result<&'static str> {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}

/// Triggers shutdown on the first signal. Later signals are ignored.
pub async fn listen(mut signals: Signals, shutdown: Shutdown) {
    while on_signal(&shutdown, signals.recv().await) {}
}

/// Returns whether to keep listening. A broken signal source never counts
/// as a shutdown request.
fn on_signal(shutdown: &Shutdown, received: io::Result<&'static str>) -> bool {
    let name = match received {
        Ok(name) => name,
        Err(err) => {
            error!("no longer listening for signals: {err}");
            return false;
        }
    };

    if shutdown.trigger() {
        info!(signal = name, "shutdown requested");
    } else {
        debug!(signal = name, "shutdown already in progress, ignoring");
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> std::net::SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let shutdown = Shutdown::new(ServerState::default());

        assert!(shutdown.trigger());
        assert!(!shutdown.trigger());
        assert!(!shutdown.trigger());
    }

    #[tokio::test]
    async fn trigger_closes_registered_and_late_sessions() {
        let state = ServerState::default();
        let shutdown = Shutdown::new(state.clone());

        let early = state.register(peer(), shutdown.session_token());

        shutdown.trigger();
        shutdown.stopped().await;

        let late = state.register(peer(), shutdown.session_token());

        assert!(early.handle().is_closed());
        assert!(late.handle().is_closed());
        // Entries stay until their owners drop them.
        assert_eq!(state.len(), 2);
    }

    #[tokio::test]
    async fn wait_returns_once_sessions_finish() {
        let state = ServerState::default();
        let shutdown = Shutdown::new(state.clone());

        for _ in 0..3 {
            let reg = state.register(peer(), shutdown.session_token());
            shutdown.tracker().spawn(async move {
                reg.handle().closed().await;
                drop(reg);
            });
        }

        assert_eq!(state.len(), 3);

        shutdown.trigger();
        assert!(shutdown.wait(SHUTDOWN_GRACE).await);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn failed_signal_source_does_not_shut_down() {
        let shutdown = Shutdown::new(ServerState::default());

        let keep = on_signal(&shutdown, Err(io::Error::other("no handler")));

        assert!(!keep);
        assert!(shutdown.trigger());
    }

    #[tokio::test]
    async fn repeated_signals_trigger_once() {
        let shutdown = Shutdown::new(ServerState::default());

        assert!(on_signal(&shutdown, Ok("SIGINT")));
        assert!(on_signal(&shutdown, Ok("SIGINT")));
        assert!(!shutdown.trigger());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_closes_sessions_and_second_signal_is_ignored() {
        let state = ServerState::default();
        let shutdown = Shutdown::new(state.clone());

        let reg = state.register(peer(), shutdown.session_token());
        shutdown.tracker().spawn(async move {
            reg.handle().closed().await;
            drop(reg);
        });

        let signals = Signals::new().unwrap();
        let listener = tokio::spawn(listen(signals, shutdown.clone()));

        unsafe { libc::raise(libc::SIGTERM) };

        tokio::time::timeout(SHUTDOWN_GRACE, shutdown.stopped())
            .await
            .unwrap();
        assert!(shutdown.wait(SHUTDOWN_GRACE).await);
        assert!(state.is_empty());

        // Handled by the listener, so the process keeps running.
        unsafe { libc::raise(libc::SIGINT) };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!listener.is_finished());
        assert!(!shutdown.trigger());
        listener.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_gives_up_after_grace() {
        let shutdown = Shutdown::new(ServerState::default());

        shutdown.tracker().spawn(std::future::pending::<()>());

        shutdown.trigger();
        assert!(!shutdown.wait(Duration::from_secs(1)).await);
    }
}
