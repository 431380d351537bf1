//! Session: everything that happens on one accepted connection.
//!
//! # Lifecycle
//!
//! ```text
//! Accepted ──admission hook / TLS handshake──▶ Serving ──read loop exits──▶ Closing ──▶ Closed
//!     └──────────── rejected or handshake failed ────────────────────────────────────────▲
//! ```
//!
//! While serving, a session runs:
//!
//! - the **read loop** (the session task itself): reads one envelope at a
//!   time, decodes it, and dispatches it;
//! - the **write pump**: the only writer of the socket;
//! - the **shutdown watcher**: on server stop, queues a Notice of
//!   Disconnection and interrupts the read loop;
//! - one **handler task** per in-flight request.
//!
//! # Teardown order
//!
//! 1. cancel `closing` (stops the shutdown watcher)
//! 2. cancel `interrupt` (stops the read loop if it is still reading)
//! 3. post `SessionClosing` to every registered request
//! 4. wait for every handler task and the watcher
//! 5. close the outbound queue
//! 6. wait for the write pump to drain it
//! 7. shut the connection down
//!
//! Returning from [`serve_connection`] releases the session's slot in the
//! server's session tracker.  Anything queued before step 5 reaches the
//! wire; nothing is queued after it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use ldap_core::{LdapMessage, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::application::handler::Handler;
use crate::application::registry::RequestRegistry;
use crate::application::request::{AbandonReason, RequestContext, SessionHandle};
use crate::application::response::{Outbound, ResponseSink};
use crate::domain::options::ServerOptions;
use crate::infrastructure::framing::LdapCodec;
use crate::infrastructure::tls::{self, TlsError};
use crate::infrastructure::transport::Transport;
use crate::infrastructure::write_pump::{WritePump, WriterSlot};

/// Diagnostic carried by the Notice of Disconnection sent on server stop.
pub const STOP_NOTICE_DIAGNOSTIC: &str = "server is about to stop";

/// Upper bound on the final transport shutdown (TLS close_notify).
const CLOSE_GRACE: Duration = Duration::from_secs(5);

type Reader = FramedRead<ReadHalf<Transport>, LdapCodec>;

/// Errors that end a session.  None of them affect other sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("no request received within {0:?}")]
    ReadTimeout(Duration),

    #[error("response not written within {0:?}")]
    WriteTimeout(Duration),

    #[error("TLS upgrade failed: {0}")]
    Tls(#[from] TlsError),

    #[error("{0} bytes were pipelined after the StartTLS request")]
    StartTlsPipelined(usize),

    #[error("StartTLS requested on a session that is already encrypted")]
    AlreadySecured,

    #[error("StartTLS handler panicked")]
    HandlerPanicked,

    #[error("socket writer is not available")]
    WriterUnavailable,
}

/// Listener-wide state every session of that listener shares.
pub(crate) struct ListenerContext {
    pub handler: Arc<dyn Handler>,
    pub options: ServerOptions,
    /// Server-wide stop broadcast.
    pub shutdown: CancellationToken,
    /// Set for LDAPS listeners: every connection starts with a handshake.
    pub tls: Option<TlsAcceptor>,
}

/// Runs one accepted connection from admission to close.
pub(crate) async fn serve_connection(
    tcp: TcpStream,
    peer: SocketAddr,
    ordinal: u64,
    listener: Arc<ListenerContext>,
) {
    if let Some(hook) = &listener.options.on_new_connection {
        if let Err(e) = hook(&tcp) {
            warn!(session = ordinal, peer = %peer, error = %e, "connection rejected by admission hook");
            return;
        }
    }

    let local = match tcp.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(session = ordinal, peer = %peer, error = %e, "could not read local address");
            return;
        }
    };

    let transport = match &listener.tls {
        Some(acceptor) => match tls::handshake(
            acceptor,
            tcp,
            listener.options.read_timeout,
            &listener.shutdown,
        )
        .await
        {
            Ok(stream) => Transport::Tls(Box::new(stream)),
            Err(TlsError::Cancelled) => {
                debug!(session = ordinal, peer = %peer, "TLS handshake abandoned; server stopping");
                return;
            }
            Err(e) => {
                warn!(session = ordinal, peer = %peer, error = %e, "TLS handshake failed");
                return;
            }
        },
        None => Transport::Plain(tcp),
    };

    Session::start(ordinal, peer, local, transport, listener).await;
    info!(session = ordinal, peer = %peer, "connection closed");
}

struct Session {
    ordinal: u64,
    listener: Arc<ListenerContext>,
    handle: SessionHandle,
    registry: Arc<RequestRegistry>,
    outbound: mpsc::Sender<Outbound>,
    writer: WriterSlot<WriteHalf<Transport>>,
    /// In-flight handler invocations plus the shutdown watcher.
    tasks: TaskTracker,
    closing: CancellationToken,
    interrupt: CancellationToken,
}

impl Session {
    async fn start(
        ordinal: u64,
        peer: SocketAddr,
        local: SocketAddr,
        transport: Transport,
        listener: Arc<ListenerContext>,
    ) {
        let codec = LdapCodec::new(listener.options.max_message_size);
        let registry = Arc::new(RequestRegistry::default());
        let handle = SessionHandle::new(ordinal, peer, local, transport.is_tls(), &registry);

        let (read_half, write_half) = tokio::io::split(transport);
        let reader = FramedRead::new(read_half, codec);
        let writer = Arc::new(Mutex::new(Some(FramedWrite::new(write_half, codec))));

        let (outbound, queue) = mpsc::channel(listener.options.outbound_queue_capacity);
        let interrupt = CancellationToken::new();
        let pump = tokio::spawn(
            WritePump::new(
                ordinal,
                Arc::clone(&writer),
                queue,
                listener.options.write_timeout,
                interrupt.clone(),
            )
            .run(),
        );

        let session = Session {
            ordinal,
            listener,
            handle,
            registry,
            outbound,
            writer,
            tasks: TaskTracker::new(),
            closing: CancellationToken::new(),
            interrupt,
        };
        session.spawn_shutdown_watcher();

        let mut reader = Some(reader);
        match session.read_loop(&mut reader).await {
            Ok(()) => {}
            Err(SessionError::ReadTimeout(limit)) => {
                info!(session = ordinal, timeout = ?limit, "read timeout");
            }
            Err(SessionError::Tls(TlsError::Cancelled)) => {
                debug!(session = ordinal, "StartTLS handshake abandoned");
            }
            Err(e) => warn!(session = ordinal, error = %e, "session error"),
        }

        session.close(reader, pump).await;
    }

    // ── Read loop ────────────────────────────────────────────────────────────

    async fn read_loop(&self, reader: &mut Option<Reader>) -> Result<(), SessionError> {
        loop {
            let Some(frames) = reader.as_mut() else {
                return Ok(());
            };

            let next = tokio::select! {
                biased;
                () = self.interrupt.cancelled() => {
                    debug!(session = self.ordinal, "read loop interrupted");
                    return Ok(());
                }
                next = read_frame(frames, self.listener.options.read_timeout) => next?,
            };
            let Some(raw) = next else {
                debug!(session = self.ordinal, "client closed the connection");
                return Ok(());
            };

            let message = LdapMessage::decode(&raw)?;
            debug!(
                session = self.ordinal,
                message_id = message.message_id,
                op = message.op.name(),
                "<<< request received"
            );

            if message.is_unbind() {
                debug!(session = self.ordinal, "unbind requested");
                return Ok(());
            }

            if message.is_start_tls() {
                self.start_tls(message, raw, reader).await?;
                continue;
            }

            self.dispatch(message, raw);
        }
    }

    /// Registers the request and serves it on its own task.
    fn dispatch(&self, message: LdapMessage, raw: Bytes) {
        // Detached: `tasks` tracks the invocation and teardown waits for it.
        let (_, invocation) = self.spawn_invocation(message, raw);
        drop(invocation);
    }

    /// Like [`Self::dispatch`], but hands back the context and the task so
    /// the caller can wait for the handler to finish.
    fn spawn_invocation(
        &self,
        message: LdapMessage,
        raw: Bytes,
    ) -> (Arc<RequestContext>, JoinHandle<()>) {
        let sink = ResponseSink::new(message.message_id, self.outbound.clone());
        let context = Arc::new(RequestContext::new(message, raw, self.handle.clone()));
        let registration = self.registry.register(Arc::clone(&context));
        let handler = Arc::clone(&self.listener.handler);

        let invocation = self.tasks.spawn(async move {
            let request = Arc::clone(registration.context());
            handler.serve(sink, request).await;
            drop(registration);
        });
        (context, invocation)
    }

    // ── StartTLS ─────────────────────────────────────────────────────────────

    /// Serves a StartTLS request without reading further from the socket,
    /// then upgrades the transport if the handler accepted.
    async fn start_tls(
        &self,
        message: LdapMessage,
        raw: Bytes,
        reader: &mut Option<Reader>,
    ) -> Result<(), SessionError> {
        let (context, invocation) = self.spawn_invocation(message, raw);
        if invocation.await.is_err() {
            return Err(SessionError::HandlerPanicked);
        }

        if !context.start_tls_accepted() {
            debug!(session = self.ordinal, "StartTLS declined by handler");
            return Ok(());
        }
        if self.handle.is_tls() {
            return Err(SessionError::AlreadySecured);
        }
        let Some(acceptor) = self.listener.options.start_tls.clone() else {
            warn!(session = self.ordinal, "StartTLS accepted but no acceptor is configured");
            return Ok(());
        };
        let Some(frames) = reader.take() else {
            return Ok(());
        };

        *reader = Some(self.upgrade(frames, acceptor).await?);
        self.handle.mark_tls();
        info!(session = self.ordinal, "TLS established via StartTLS");
        Ok(())
    }

    async fn upgrade(&self, frames: Reader, acceptor: TlsAcceptor) -> Result<Reader, SessionError> {
        let pipelined = frames.read_buffer().len();
        if pipelined > 0 {
            return Err(SessionError::StartTlsPipelined(pipelined));
        }
        let read_half = frames.into_inner();

        // Park the pump once it has flushed the StartTLS response.
        let (paused_tx, paused_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        self.outbound
            .send(Outbound::Handoff {
                paused: paused_tx,
                resume: resume_rx,
            })
            .await
            .map_err(|_| SessionError::WriterUnavailable)?;
        paused_rx.await.map_err(|_| SessionError::WriterUnavailable)?;

        let result = self.handshake_in_place(read_half, acceptor).await;
        let _ = resume_tx.send(());
        result
    }

    async fn handshake_in_place(
        &self,
        read_half: ReadHalf<Transport>,
        acceptor: TlsAcceptor,
    ) -> Result<Reader, SessionError> {
        let mut slot = self.writer.lock().await;
        let writer = slot.take().ok_or(SessionError::WriterUnavailable)?;

        let tcp = match read_half.unsplit(writer.into_inner()) {
            Transport::Plain(tcp) => tcp,
            Transport::Tls(_) => return Err(SessionError::AlreadySecured),
        };
        // The shutdown watcher fires `interrupt` on stop.
        let stream = tls::handshake(
            &acceptor,
            tcp,
            self.listener.options.read_timeout,
            &self.interrupt,
        )
        .await?;

        let codec = LdapCodec::new(self.listener.options.max_message_size);
        let (read_half, write_half) = tokio::io::split(Transport::Tls(Box::new(stream)));
        *slot = Some(FramedWrite::new(write_half, codec));
        Ok(FramedRead::new(read_half, codec))
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    fn spawn_shutdown_watcher(&self) {
        let ordinal = self.ordinal;
        let shutdown = self.listener.shutdown.clone();
        let closing = self.closing.clone();
        let interrupt = self.interrupt.clone();
        let outbound = self.outbound.clone();

        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                () = closing.cancelled() => {}
                () = shutdown.cancelled() => {
                    let notice = LdapMessage::notice_of_disconnection(STOP_NOTICE_DIAGNOSTIC);
                    if outbound.send(Outbound::Message(notice)).await.is_err() {
                        debug!(session = ordinal, "notice of disconnection not queued; output closed");
                    }
                    interrupt.cancel();
                }
            }
        });
    }

    async fn close(self, reader: Option<Reader>, pump: JoinHandle<()>) {
        info!(session = self.ordinal, "closing connection");
        self.closing.cancel();
        self.interrupt.cancel();

        let signalled = self.registry.cancel_all(AbandonReason::SessionClosing);
        if signalled > 0 {
            debug!(session = self.ordinal, signalled, "cancelled in-flight requests");
        }

        self.tasks.close();
        self.tasks.wait().await;

        if self.outbound.send(Outbound::Close).await.is_err() {
            debug!(session = self.ordinal, "write pump already gone");
        }
        if pump.await.is_err() {
            warn!(session = self.ordinal, "write pump panicked");
        }

        let writer = self.writer.lock().await.take();
        if let (Some(reader), Some(writer)) = (reader, writer) {
            let mut transport = reader.into_inner().unsplit(writer.into_inner());
            match timeout(CLOSE_GRACE, transport.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(session = self.ordinal, error = %e, "transport shutdown failed"),
                Err(_) => debug!(session = self.ordinal, "transport shutdown timed out"),
            }
        }
    }
}

async fn read_frame(
    reader: &mut Reader,
    limit: Option<Duration>,
) -> Result<Option<Bytes>, SessionError> {
    match limit {
        Some(limit) => timeout(limit, reader.next())
            .await
            .map_err(|_| SessionError::ReadTimeout(limit))?
            .transpose(),
        None => reader.next().await.transpose(),
    }
}
