//! # ldap-server
//!
//! Connection management and request lifecycle for an LDAP server.
//!
//! The crate accepts plain or TLS connections, cuts the byte stream into
//! LDAP envelopes, dispatches every request to a user supplied [`Handler`],
//! serialises the responses back onto the socket, and shuts sessions down
//! without losing responses that were already queued.
//!
//! # Architecture
//!
//! ```text
//! Server::listen()
//!  └─ accept loop                       (one task per listener)
//!       └─ session                      (one task per connection)
//!            ├─ read loop               decode + dispatch
//!            ├─ write pump              the only task that writes the socket
//!            ├─ shutdown watcher        Notice of Disconnection on stop()
//!            └─ handler invocations     one task per in-flight request
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ldap_core::{BindResponse, ProtocolOp, ResultCode};
//! use ldap_server::{handler_fn, RequestContext, ResponseSink, Server, ServerOptions};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let server = Server::new();
//! server.register_handler(handler_fn(|sink: ResponseSink, _req: Arc<RequestContext>| async move {
//!     let _ = sink.write(ProtocolOp::BindResponse(BindResponse::new(ResultCode::SUCCESS))).await;
//! }))?;
//! let addr = server.listen("127.0.0.1:10389", ServerOptions::default()).await?;
//! println!("listening on {addr}");
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::handler::{handler_fn, Handler, HandlerFn};
pub use application::registry::{Registration, RequestRegistry};
pub use application::request::{AbandonReason, RequestContext, SessionAcl, SessionHandle};
pub use application::response::{ResponseSink, SessionClosed};
pub use domain::options::{AdmissionHook, OptionsError, ServerOptions};
pub use infrastructure::server::{Server, ServerError, DEFAULT_LDAPS_ADDR, DEFAULT_LDAP_ADDR};
pub use infrastructure::session::SessionError;
pub use infrastructure::settings::{ConfigError, ServerSettings, TlsSettings};
pub use infrastructure::tls::TlsError;
