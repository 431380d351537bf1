//! A small LDAP server wired on top of `ldap-server`.
//!
//! ```text
//! cargo run -p ldap-server --example simple_server [settings.toml]
//! ldapwhoami -x -H ldap://127.0.0.1:10389 -D cn=admin -w secret
//! ```
//!
//! Binds succeed for `cn=admin` / `secret` and for an anonymous bind named
//! `login`; everything else gets invalid credentials.  StartTLS is accepted
//! when the settings file configures `[tls] start_tls = true`.  Ctrl-C stops
//! the server gracefully, sending every client a Notice of Disconnection.

use std::sync::Arc;

use async_trait::async_trait;
use ldap_core::{
    BindResponse, ExtendedResponse, LdapResult, ProtocolOp, ResultCode, OID_START_TLS,
};
use ldap_server::{
    AbandonReason, Handler, RequestContext, ResponseSink, Server, ServerSettings, SessionAcl,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_ADDR: &str = "127.0.0.1:10389";
const SEARCH_REQUEST: u8 = 0x63;

/// Routes each request by operation type.
struct DemoRouter {
    start_tls_available: bool,
}

impl DemoRouter {
    async fn bind(&self, sink: &ResponseSink, request: &RequestContext) {
        let ProtocolOp::BindRequest(bind) = request.op() else {
            return;
        };
        let admin = bind.name == "cn=admin" && bind.simple_password() == Some(b"secret".as_slice());
        let response = if admin || bind.name == "login" {
            request.session().set_acl(SessionAcl {
                bind_entry: bind.name.clone(),
                search: true,
                compare: true,
                modify: admin,
            });
            BindResponse::new(ResultCode::SUCCESS)
        } else {
            BindResponse::new(ResultCode::INVALID_CREDENTIALS)
                .with_diagnostic("invalid credentials")
        };
        info!(
            session = request.session().ordinal(),
            dn = %bind.name,
            result = %response.result.code,
            "bind"
        );
        let _ = sink.write(ProtocolOp::BindResponse(response)).await;
    }

    async fn start_tls(&self, sink: &ResponseSink, request: &RequestContext) {
        if !self.start_tls_available || request.session().is_tls() {
            let response = ExtendedResponse::new(ResultCode::UNAVAILABLE)
                .with_name(OID_START_TLS)
                .with_diagnostic("StartTLS is not available");
            let _ = sink.write(ProtocolOp::ExtendedResponse(response)).await;
            return;
        }
        let response = ExtendedResponse::new(ResultCode::SUCCESS).with_name(OID_START_TLS);
        if sink.write(ProtocolOp::ExtendedResponse(response)).await.is_ok() {
            request.accept_start_tls();
        }
    }

    async fn search(&self, sink: &ResponseSink, request: &RequestContext) {
        if !request.session().acl().search {
            let denied = LdapResult::new(ResultCode::INSUFFICIENT_ACCESS_RIGHTS)
                .with_diagnostic("bind first");
            let _ = sink.write(ProtocolOp::SearchResultDone(denied)).await;
            return;
        }

        // Pretend the directory is slow so abandon and stop have something
        // to interrupt.
        tokio::select! {
            () = request.cancelled() => {
                let reason = request.try_abandon_reason();
                debug!(message_id = request.message_id(), ?reason, "search abandoned");
                if reason == Some(AbandonReason::SessionClosing) {
                    let _ = sink.write(ProtocolOp::SearchResultDone(
                        LdapResult::new(ResultCode::UNAVAILABLE),
                    )).await;
                }
            }
            () = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                let _ = sink.write(ProtocolOp::SearchResultDone(LdapResult::success())).await;
            }
        }
    }
}

#[async_trait]
impl Handler for DemoRouter {
    async fn serve(&self, sink: ResponseSink, request: Arc<RequestContext>) {
        match request.op() {
            ProtocolOp::BindRequest(_) => self.bind(&sink, &request).await,
            ProtocolOp::ExtendedRequest(ext) if ext.name == OID_START_TLS => {
                self.start_tls(&sink, &request).await;
            }
            ProtocolOp::AbandonRequest(target) => {
                // Abandon has no response.
                request.session().abandon(*target);
            }
            ProtocolOp::Other { tag, .. } if *tag == SEARCH_REQUEST => {
                self.search(&sink, &request).await;
            }
            other => {
                warn!(op = other.name(), "operation not supported by the demo");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = match std::env::args().nth(1) {
        Some(path) => ServerSettings::load(path)?,
        None => ServerSettings {
            bind_address: DEMO_ADDR.to_string(),
            ..ServerSettings::default()
        },
    };
    let options = settings.to_options()?;

    let server = Server::new();
    server.register_handler(DemoRouter {
        start_tls_available: options.start_tls.is_some(),
    })?;

    let addr = match &settings.tls {
        Some(tls) if settings.listens_tls() => {
            server
                .listen_tls(&settings.bind_address, &tls.cert_path, &tls.key_path, options)
                .await?
        }
        _ => server.listen(&settings.bind_address, options).await?,
    };
    info!(%addr, "demo server ready; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    server.stop().await;
    Ok(())
}
