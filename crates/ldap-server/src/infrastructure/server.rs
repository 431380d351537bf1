//! Server: the listening socket, the accept loop and the shutdown barrier.
//!
//! A server is started once, either plain ([`Server::listen`]) or LDAPS
//! ([`Server::listen_tls`]).  Startup errors (bad options, bind failure,
//! unusable key material) come back from that call before any connection
//! is accepted.  Once it returns `Ok` the accept loop runs on its own task
//! until [`Server::stop`].

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::application::handler::Handler;
use crate::domain::options::{OptionsError, ServerOptions};
use crate::infrastructure::session::{serve_connection, ListenerContext};
use crate::infrastructure::tls::{self, TlsError};

/// Used by [`Server::listen`] when the address is empty.
pub const DEFAULT_LDAP_ADDR: &str = "0.0.0.0:389";

/// Used by [`Server::listen_tls`] when the address is empty.
pub const DEFAULT_LDAPS_ADDR: &str = "0.0.0.0:636";

/// Startup and configuration errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no handler registered")]
    NoHandler,

    #[error("a handler is already registered")]
    HandlerAlreadyRegistered,

    #[error("server is already started")]
    AlreadyStarted,

    #[error("server has been stopped")]
    Stopped,

    #[error("invalid options: {0}")]
    InvalidOptions(#[from] OptionsError),

    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Tls(#[from] TlsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Starting,
    Running,
    Stopped,
}

/// An LDAP server.
///
/// Share it behind an `Arc` when `stop` is called from another task than
/// the one that started it.
pub struct Server {
    handler: OnceLock<Arc<dyn Handler>>,
    state: Mutex<State>,
    /// Single-fire broadcast observed by the accept loop and every session.
    shutdown: CancellationToken,
    listeners: TaskTracker,
    sessions: TaskTracker,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            handler: OnceLock::new(),
            state: Mutex::new(State::Idle),
            shutdown: CancellationToken::new(),
            listeners: TaskTracker::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Sets the handler every request is dispatched to.  May be called once.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::HandlerAlreadyRegistered`] on a second call.
    pub fn register_handler<H: Handler>(&self, handler: H) -> Result<(), ServerError> {
        self.handler
            .set(Arc::new(handler))
            .map_err(|_| ServerError::HandlerAlreadyRegistered)
    }

    /// Binds a plain listener on `addr` and starts accepting connections.
    /// An empty `addr` means [`DEFAULT_LDAP_ADDR`].
    ///
    /// Returns the bound address, which is useful with port `0`.
    pub async fn listen(&self, addr: &str, options: ServerOptions) -> Result<SocketAddr, ServerError> {
        self.start(or_default(addr, DEFAULT_LDAP_ADDR), options, None)
            .await
    }

    /// Loads the PEM key pair, binds an LDAPS listener on `addr` and starts
    /// accepting connections.  An empty `addr` means [`DEFAULT_LDAPS_ADDR`].
    pub async fn listen_tls(
        &self,
        addr: &str,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        options: ServerOptions,
    ) -> Result<SocketAddr, ServerError> {
        let acceptor = tls::load_acceptor(cert_path, key_path)?;
        self.listen_with_acceptor(addr, acceptor, options).await
    }

    /// Like [`Server::listen_tls`] with an already built acceptor.
    pub async fn listen_with_acceptor(
        &self,
        addr: &str,
        acceptor: TlsAcceptor,
        options: ServerOptions,
    ) -> Result<SocketAddr, ServerError> {
        self.start(or_default(addr, DEFAULT_LDAPS_ADDR), options, Some(acceptor))
            .await
    }

    async fn start(
        &self,
        addr: &str,
        options: ServerOptions,
        tls: Option<TlsAcceptor>,
    ) -> Result<SocketAddr, ServerError> {
        options.validate()?;
        let handler = self.handler.get().cloned().ok_or(ServerError::NoHandler)?;
        self.claim_start()?;

        let (listener, local) = match bind(addr).await {
            Ok(bound) => bound,
            Err(e) => {
                self.revert_start();
                return Err(e);
            }
        };

        let ldaps = tls.is_some();
        let context = Arc::new(ListenerContext {
            handler,
            options,
            shutdown: self.shutdown.clone(),
            tls,
        });

        {
            let mut state = self.lock_state();
            if *state == State::Stopped {
                return Err(ServerError::Stopped);
            }
            *state = State::Running;
            self.listeners
                .spawn(accept_loop(listener, local, context, self.sessions.clone()));
        }
        info!(addr = %local, tls = ldaps, "listening");
        Ok(local)
    }

    /// Fires the shutdown broadcast and waits until the accept loop has
    /// exited and every session has drained.  Safe to call more than once;
    /// every caller waits.
    pub async fn stop(&self) {
        let first = {
            let mut state = self.lock_state();
            let first = *state != State::Stopped;
            *state = State::Stopped;
            first
        };
        if first {
            info!(sessions = self.sessions.len(), "stopping server");
            self.shutdown.cancel();
        }

        self.listeners.close();
        self.listeners.wait().await;
        self.sessions.close();
        self.sessions.wait().await;

        if first {
            info!("server stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.lock_state() == State::Stopped
    }

    /// Sessions not yet fully torn down.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim_start(&self) -> Result<(), ServerError> {
        let mut state = self.lock_state();
        match *state {
            State::Idle => {
                *state = State::Starting;
                Ok(())
            }
            State::Starting | State::Running => Err(ServerError::AlreadyStarted),
            State::Stopped => Err(ServerError::Stopped),
        }
    }

    fn revert_start(&self) {
        let mut state = self.lock_state();
        if *state == State::Starting {
            *state = State::Idle;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn or_default<'a>(addr: &'a str, default: &'a str) -> &'a str {
    if addr.is_empty() {
        default
    } else {
        addr
    }
}

async fn bind(addr: &str) -> Result<(TcpListener, SocketAddr), ServerError> {
    let bind_error = |source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    };
    let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
    let local = listener.local_addr().map_err(bind_error)?;
    Ok((listener, local))
}

/// Accept errors that are retried at once without logging.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

async fn accept_loop(
    listener: TcpListener,
    local: SocketAddr,
    context: Arc<ListenerContext>,
    sessions: TaskTracker,
) {
    let min_backoff = context.options.accept_backoff_min;
    let max_backoff = context.options.accept_backoff_max;
    let mut backoff = min_backoff;
    let mut ordinal: u64 = 0;

    loop {
        let accepted = tokio::select! {
            biased;
            () = context.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((tcp, peer)) => {
                backoff = min_backoff;
                ordinal += 1;
                info!(session = ordinal, peer = %peer, "connection accepted");
                sessions.spawn(serve_connection(tcp, peer, ordinal, Arc::clone(&context)));
            }
            Err(e) if is_transient(&e) => {
                debug!(error = %e, "transient accept error; retrying");
            }
            Err(e) => {
                error!(addr = %local, error = %e, retry_in = ?backoff, "accept failed");
                tokio::select! {
                    biased;
                    () = context.shutdown.cancelled() => break,
                    () = sleep(backoff) => {}
                }
                backoff = next_backoff(backoff, max_backoff);
            }
        }
    }

    info!(addr = %local, "listener closed");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
