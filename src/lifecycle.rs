//! Server lifecycle: serve, drain on signal, stop.
//!
//! # States
//!
//! ```text
//! Starting ──run()──▶ Serving ──signal──▶ Draining ──drained / force-closed──▶ Stopped
//! ```
//!
//! Transitions are compare-and-swap on an atomic and only move forward.
//! Signals arrive on an mpsc channel; the controller is the only consumer,
//! so any number of concurrent signals collapse into one drain.
//!
//! # Draining
//!
//! Entering `Draining` cancels the shared token. The listener is dropped
//! and every open connection is asked for a graceful HTTP shutdown, so
//! in-flight requests finish and idle keep-alive connections close. Any
//! connection still open when the grace period ends is force-closed before
//! the controller reports `Stopped`.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ConnectInfo;
use hyper::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle position of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Starting = 0,
    Serving = 1,
    Draining = 2,
    Stopped = 3,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Starting,
            1 => LifecycleState::Serving,
            2 => LifecycleState::Draining,
            _ => LifecycleState::Stopped,
        }
    }
}

/// Termination request delivered to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Interrupt => f.write_str("SIGINT"),
            TerminationSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// How a [`LifecycleController::run`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// All in-flight requests finished within the grace period
    Graceful,
    /// Grace period elapsed and the remaining connections were force-closed
    TimedOut,
}

/// Owns the listening server and its shutdown sequence.
#[derive(Debug)]
pub struct LifecycleController {
    state: AtomicU8,
    cancel: CancellationToken,
    grace: Duration,
}

impl LifecycleController {
    /// Create a controller. `cancel` is shared with the application context
    /// so background tasks stop when draining starts.
    pub fn new(cancel: CancellationToken, grace: Duration) -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Starting as u8),
            cancel,
            grace,
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move to `Draining` and cancel the shared token.
    ///
    /// Only the first call from `Serving` (or `Starting`) wins; later calls
    /// return `false` and do nothing.
    pub fn begin_drain(&self, signal: TerminationSignal) -> bool {
        let won = self.transition(LifecycleState::Serving, LifecycleState::Draining)
            || self.transition(LifecycleState::Starting, LifecycleState::Draining);

        if won {
            warn!(
                signal = %signal,
                grace_secs = self.grace.as_secs_f64(),
                "Termination signal received, draining in-flight requests"
            );
            self.cancel.cancel();
        } else {
            info!(signal = %signal, state = ?self.state(), "Shutdown already in progress");
        }
        won
    }

    fn mark_stopped(&self) {
        self.state
            .store(LifecycleState::Stopped as u8, Ordering::SeqCst);
    }

    /// Serve one accepted connection until it ends, is drained or is
    /// force-closed.
    fn serve_connection(
        &self,
        connections: &TaskTracker,
        stream: TcpStream,
        peer: SocketAddr,
        router: Router,
        force_close: CancellationToken,
    ) {
        let drain = self.cancel.clone();

        connections.spawn(async move {
            let service = service_fn(move |mut req: Request<Incoming>| {
                req.extensions_mut().insert(ConnectInfo(peer));
                router.clone().oneshot(req)
            });
            let builder = auto::Builder::new(TokioExecutor::new());
            let mut conn = std::pin::pin!(builder.serve_connection(TokioIo::new(stream), service));

            let result = tokio::select! {
                result = conn.as_mut() => result,
                () = drain.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    tokio::select! {
                        result = conn.as_mut() => result,
                        () = force_close.cancelled() => {
                            debug!(%peer, "Connection force-closed");
                            return;
                        }
                    }
                }
            };

            if let Err(e) = result {
                debug!(%peer, error = %e, "Connection ended with an error");
            }
        });
    }

    /// Serve `router` on `listener` until a termination signal arrives on
    /// `signals`, then drain within the grace period.
    ///
    /// Each request carries `ConnectInfo<SocketAddr>` for the client
    /// address resolver.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the listener has no local address.
    pub async fn run(
        &self,
        listener: TcpListener,
        router: Router,
        mut signals: mpsc::Receiver<TerminationSignal>,
    ) -> std::io::Result<ShutdownOutcome> {
        let local_addr = listener.local_addr()?;
        let connections = TaskTracker::new();
        let force_close = CancellationToken::new();

        if !self.transition(LifecycleState::Starting, LifecycleState::Serving) {
            warn!(state = ?self.state(), "Server started after shutdown was requested");
        }
        info!(%local_addr, "Server is accepting connections");

        let mut channel_open = true;
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.serve_connection(
                        &connections,
                        stream,
                        peer,
                        router.clone(),
                        force_close.clone(),
                    ),
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                signal = signals.recv(), if channel_open => match signal {
                    Some(signal) => {
                        if self.begin_drain(signal) {
                            break;
                        }
                    }
                    None => channel_open = false,
                },
                // Drain started elsewhere (e.g. another holder of the token)
                () = self.cancel.cancelled() => {
                    let _ = self.transition(LifecycleState::Serving, LifecycleState::Draining);
                    break;
                }
            }
        }

        drop(listener);
        connections.close();
        info!(open_connections = connections.len(), "Listener closed, draining connections");

        // Later signals are coalesced into this drain
        let deadline = tokio::time::sleep(self.grace);
        let mut deadline = std::pin::pin!(deadline);
        let outcome = loop {
            tokio::select! {
                () = connections.wait() => {
                    info!("All in-flight requests completed");
                    break ShutdownOutcome::Graceful;
                }
                () = &mut deadline => {
                    warn!(
                        grace_secs = self.grace.as_secs_f64(),
                        open_connections = connections.len(),
                        "Grace period elapsed, force-closing open connections"
                    );
                    force_close.cancel();
                    connections.wait().await;
                    break ShutdownOutcome::TimedOut;
                }
                Some(signal) = signals.recv(), if channel_open => {
                    let _ = self.begin_drain(signal);
                }
            }
        };

        self.mark_stopped();
        info!(?outcome, "Server stopped");
        Ok(outcome)
    }
}

/// Forward OS termination signals into `tx`.
///
/// Installation failures are logged; the remaining signal source keeps
/// working.
pub fn spawn_signal_listener(tx: mpsc::Sender<TerminationSignal>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = {
            let tx = tx.clone();
            async move {
                loop {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to install Ctrl+C handler: {e}");
                        std::future::pending::<()>().await;
                    }
                    if tx.send(TerminationSignal::Interrupt).await.is_err() {
                        break;
                    }
                }
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    while stream.recv().await.is_some() {
                        if tx.send(TerminationSignal::Terminate).await.is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = {
            drop(tx);
            std::future::pending::<()>()
        };

        tokio::join!(ctrl_c, terminate);
    })
}
