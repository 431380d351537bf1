//! Infrastructure layer: sockets, TLS, framing and the session tasks.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain`
//! and `ldap_core`, but MUST NOT be imported by them.

pub(crate) mod framing;
pub mod server;
pub mod session;
pub mod settings;
pub mod tls;
pub(crate) mod transport;
pub(crate) mod write_pump;
