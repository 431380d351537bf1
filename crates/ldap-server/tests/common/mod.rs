//! Shared helpers for the ldap-server integration tests: a minimal LDAP
//! client over real sockets and a router handler with observable events.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use ldap_core::{
    frame_length, BindRequest, BindResponse, ExtendedRequest, ExtendedResponse, LdapMessage,
    LdapResult, MessageId, ProtocolOp, ResultCode, DEFAULT_MAX_MESSAGE_SIZE, OID_START_TLS,
};
use ldap_server::{AbandonReason, Handler, RequestContext, ResponseSink, Server, ServerOptions};
use rustls::crypto::ring::default_provider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
pub const SEARCH_REQUEST: u8 = 0x63;
pub const SEARCH_RESULT_ENTRY: u8 = 0x64;

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct TestClient<S> {
    stream: S,
    buf: BytesMut,
}

impl TestClient<TcpStream> {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self::new(stream)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> TestClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    pub async fn send(&mut self, message: &LdapMessage) {
        self.send_bytes(&message.encode()).await;
    }

    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("send");
        self.stream.flush().await.expect("flush");
    }

    /// Next envelope, or `None` at end of stream.
    pub async fn try_recv(&mut self) -> Option<LdapMessage> {
        loop {
            if let Some(len) = frame_length(&self.buf, DEFAULT_MAX_MESSAGE_SIZE).expect("framing") {
                let frame = self.buf.split_to(len);
                return Some(LdapMessage::decode(&frame).expect("decode"));
            }
            let read = timeout(RECV_TIMEOUT, self.stream.read_buf(&mut self.buf))
                .await
                .expect("timed out waiting for the server");
            match read {
                Ok(0) => {
                    assert!(self.buf.is_empty(), "stream ended mid-envelope");
                    return None;
                }
                Ok(_) => {}
                Err(e) if is_disconnect(&e) => return None,
                Err(e) => panic!("read failed: {e}"),
            }
        }
    }

    pub async fn recv(&mut self) -> LdapMessage {
        self.try_recv().await.expect("connection closed before a response")
    }

    /// Asserts the server closes the connection without sending anything else.
    pub async fn expect_eof(&mut self) {
        if let Some(message) = self.try_recv().await {
            panic!("expected end of stream, got {message:?}");
        }
    }

    pub fn into_inner(self) -> S {
        assert!(self.buf.is_empty(), "unread bytes left in the client buffer");
        self.stream
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
    )
}

/// Client side of a TLS handshake, trusting the fixture CA.
pub async fn tls_connect(tcp: TcpStream) -> TlsStream<TcpStream> {
    let ca_pem = std::fs::read(fixture("ca.pem")).expect("read ca.pem");
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut ca_pem.as_slice()) {
        roots.add(cert.expect("ca cert")).expect("add root");
    }
    let config = ClientConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_root_certificates(roots)
        .with_no_client_auth();
    let name = ServerName::try_from("localhost").expect("server name");
    TlsConnector::from(Arc::new(config))
        .connect(name, tcp)
        .await
        .expect("TLS handshake")
}

// ── Requests ──────────────────────────────────────────────────────────────────

pub fn bind(id: MessageId, name: &str, password: &str) -> LdapMessage {
    LdapMessage::new(id, ProtocolOp::BindRequest(BindRequest::simple(name, password)))
}

pub fn unbind(id: MessageId) -> LdapMessage {
    LdapMessage::new(id, ProtocolOp::UnbindRequest)
}

pub fn abandon(id: MessageId, target: MessageId) -> LdapMessage {
    LdapMessage::new(id, ProtocolOp::AbandonRequest(target))
}

pub fn start_tls(id: MessageId) -> LdapMessage {
    LdapMessage::new(
        id,
        ProtocolOp::ExtendedRequest(ExtendedRequest {
            name: OID_START_TLS.to_string(),
            value: None,
        }),
    )
}

pub fn search(id: MessageId) -> LdapMessage {
    LdapMessage::new(
        id,
        ProtocolOp::Other {
            tag: SEARCH_REQUEST,
            payload: Vec::new(),
        },
    )
}

pub fn result_code(message: &LdapMessage) -> ResultCode {
    match &message.op {
        ProtocolOp::BindResponse(r) => r.result.code,
        ProtocolOp::ExtendedResponse(r) => r.result.code,
        ProtocolOp::SearchResultDone(r) => r.code,
        other => panic!("no result code in {other:?}"),
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Something a [`TestRouter`] handler observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SearchStarted(MessageId),
    SearchCancelled(MessageId, Option<AbandonReason>),
    SearchCompleted(MessageId),
}

/// Binds `cn=admin` / `secret`, answers StartTLS, forwards abandons, and runs
/// searches that last `search_delay` unless cancelled first.
pub struct TestRouter {
    pub accept_start_tls: bool,
    pub search_delay: Duration,
    pub events: mpsc::UnboundedSender<Event>,
}

impl TestRouter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let router = Self {
            accept_start_tls: true,
            search_delay: Duration::from_secs(60),
            events,
        };
        (router, rx)
    }

    async fn search(&self, sink: &ResponseSink, request: &RequestContext) {
        let id = request.message_id();
        let _ = self.events.send(Event::SearchStarted(id));
        tokio::select! {
            () = request.cancelled() => {
                let reason = request.try_abandon_reason();
                let _ = self.events.send(Event::SearchCancelled(id, reason));
                if reason == Some(AbandonReason::SessionClosing) {
                    let done = LdapResult::new(ResultCode::UNAVAILABLE).with_diagnostic("closing");
                    let _ = sink.write(ProtocolOp::SearchResultDone(done)).await;
                }
            }
            () = tokio::time::sleep(self.search_delay) => {
                let _ = sink.write(ProtocolOp::SearchResultDone(LdapResult::success())).await;
                let _ = self.events.send(Event::SearchCompleted(id));
            }
        }
    }
}

#[async_trait]
impl Handler for TestRouter {
    async fn serve(&self, sink: ResponseSink, request: Arc<RequestContext>) {
        match request.op() {
            ProtocolOp::BindRequest(bind) => {
                let ok = bind.name == "cn=admin" && bind.simple_password() == Some(b"secret".as_slice());
                let response = if ok {
                    BindResponse::new(ResultCode::SUCCESS)
                } else {
                    BindResponse::new(ResultCode::INVALID_CREDENTIALS)
                        .with_diagnostic("invalid credentials")
                };
                let _ = sink.write(ProtocolOp::BindResponse(response)).await;
            }
            ProtocolOp::ExtendedRequest(ext) if ext.name == OID_START_TLS => {
                let code = if self.accept_start_tls {
                    ResultCode::SUCCESS
                } else {
                    ResultCode::UNAVAILABLE
                };
                let response = ExtendedResponse::new(code).with_name(OID_START_TLS);
                if sink.write(ProtocolOp::ExtendedResponse(response)).await.is_ok()
                    && self.accept_start_tls
                {
                    request.accept_start_tls();
                }
            }
            ProtocolOp::AbandonRequest(target) => {
                request.session().abandon(*target);
            }
            ProtocolOp::Other { tag, .. } if *tag == SEARCH_REQUEST => {
                self.search(&sink, &request).await;
            }
            _ => {}
        }
    }
}

pub async fn start_server<H: Handler>(handler: H, options: ServerOptions) -> (Arc<Server>, SocketAddr) {
    let server = Arc::new(Server::new());
    server.register_handler(handler).expect("register handler");
    let addr = server.listen("127.0.0.1:0", options).await.expect("listen");
    (server, addr)
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for a handler event")
        .expect("event channel closed")
}
