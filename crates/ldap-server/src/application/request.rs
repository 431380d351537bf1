//! RequestContext: one decoded request plus everything a handler needs to
//! know about where it came from and whether it should stop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use bytes::Bytes;
use ldap_core::{LdapMessage, MessageId, ProtocolOp};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::registry::RequestRegistry;

/// One slot for a client abandon plus one for the session shutdown sweep.
const CANCEL_SLOTS: usize = 2;

/// Why a request was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The client sent an AbandonRequest naming this request.
    Client,
    /// The session is closing (client disconnect, error, or server stop).
    SessionClosing,
}

/// Access flags a handler may attach to a session after a bind.
///
/// The server never reads these; they exist so a bind handler can record
/// what later requests on the same connection are allowed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionAcl {
    /// DN the session is bound as.
    pub bind_entry: String,
    pub search: bool,
    pub compare: bool,
    pub modify: bool,
}

#[derive(Debug)]
struct SessionState {
    ordinal: u64,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    tls: AtomicBool,
    acl: Mutex<SessionAcl>,
}

/// A cheap, cloneable view of the session a request arrived on.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: Arc<SessionState>,
    registry: Weak<RequestRegistry>,
}

impl SessionHandle {
    pub(crate) fn new(
        ordinal: u64,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        tls: bool,
        registry: &Arc<RequestRegistry>,
    ) -> Self {
        Self {
            state: Arc::new(SessionState {
                ordinal,
                peer_addr,
                local_addr,
                tls: AtomicBool::new(tls),
                acl: Mutex::new(SessionAcl::default()),
            }),
            registry: Arc::downgrade(registry),
        }
    }

    /// Sequence number assigned at accept time, for log correlation.
    pub fn ordinal(&self) -> u64 {
        self.state.ordinal
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.state.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.state.local_addr
    }

    /// Returns `true` once the transport is encrypted, either from the
    /// first byte (LDAPS) or after a completed StartTLS upgrade.
    pub fn is_tls(&self) -> bool {
        self.state.tls.load(Ordering::Acquire)
    }

    pub(crate) fn mark_tls(&self) {
        self.state.tls.store(true, Ordering::Release);
    }

    pub fn acl(&self) -> SessionAcl {
        self.state
            .acl
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_acl(&self, acl: SessionAcl) {
        *self.state.acl.lock().unwrap_or_else(PoisonError::into_inner) = acl;
    }

    /// Posts a client-abandon signal to the in-flight request registered
    /// under `message_id`.
    ///
    /// Returns `false` when no such request is running (it may already have
    /// finished) or when the session is gone.
    pub fn abandon(&self, message_id: MessageId) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.abandon(message_id, AbandonReason::Client))
    }

    /// Number of requests of this session currently being served.
    pub fn in_flight(&self) -> usize {
        self.registry.upgrade().map_or(0, |registry| registry.len())
    }
}

/// Two-slot, never-blocking cancellation signal.
#[derive(Debug)]
struct CancelSignal {
    token: CancellationToken,
    tx: mpsc::Sender<AbandonReason>,
    rx: Mutex<mpsc::Receiver<AbandonReason>>,
}

impl CancelSignal {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(CANCEL_SLOTS);
        Self {
            token: CancellationToken::new(),
            tx,
            rx: Mutex::new(rx),
        }
    }

    fn post(&self, reason: AbandonReason) -> bool {
        let queued = self.tx.try_send(reason).is_ok();
        self.token.cancel();
        queued
    }
}

/// A request being served.
///
/// Created by the session when an envelope is decoded, registered before the
/// handler starts, and unregistered exactly once when the handler returns.
#[derive(Debug)]
pub struct RequestContext {
    message: LdapMessage,
    raw: Bytes,
    session: SessionHandle,
    cancel: CancelSignal,
    start_tls_accepted: AtomicBool,
}

impl RequestContext {
    pub(crate) fn new(message: LdapMessage, raw: Bytes, session: SessionHandle) -> Self {
        Self {
            message,
            raw,
            session,
            cancel: CancelSignal::new(),
            start_tls_accepted: AtomicBool::new(false),
        }
    }

    pub fn message(&self) -> &LdapMessage {
        &self.message
    }

    pub fn message_id(&self) -> MessageId {
        self.message.message_id
    }

    pub fn op(&self) -> &ProtocolOp {
        &self.message.op
    }

    /// The exact bytes of the envelope as received.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Posts a cancellation signal.  Never blocks.
    ///
    /// Returns `true` if the reason was queued for
    /// [`try_abandon_reason`](Self::try_abandon_reason); `false` if both
    /// slots were already taken.  The request is marked cancelled either way.
    pub fn abandon(&self, reason: AbandonReason) -> bool {
        self.cancel.post(reason)
    }

    /// Resolves once any cancellation signal has been posted.
    pub async fn cancelled(&self) {
        self.cancel.token.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.token.is_cancelled()
    }

    /// A token that is cancelled together with this request, for use in
    /// `tokio::select!` or for passing to helper tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.token.child_token()
    }

    /// Pops the oldest pending cancellation reason, if any.
    pub fn try_abandon_reason(&self) -> Option<AbandonReason> {
        self.cancel
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv()
            .ok()
    }

    /// Called by a StartTLS handler after it has written a success response.
    /// Once the handler returns, the session flushes that response and
    /// upgrades the transport.
    pub fn accept_start_tls(&self) {
        self.start_tls_accepted.store(true, Ordering::Release);
    }

    pub(crate) fn start_tls_accepted(&self) -> bool {
        self.start_tls_accepted.load(Ordering::Acquire)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
