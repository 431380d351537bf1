//! Application layer: the request lifecycle seen by handlers.
//!
//! # What lives here? (for beginners)
//!
//! Everything a request handler touches, and nothing that touches a socket:
//!
//! - **`handler`**  – the [`Handler`](handler::Handler) trait implemented by
//!   the embedding application.
//! - **`request`**  – [`RequestContext`](request::RequestContext): the decoded
//!   request, its raw bytes, its session, and its cancellation signal.
//! - **`registry`** – the per-session map of in-flight requests used for
//!   client abandon and the shutdown cancellation sweep.
//! - **`response`** – [`ResponseSink`](response::ResponseSink): stamps the
//!   request's message identifier onto responses and queues them for the
//!   session's write pump.
//!
//! **Dependency rule**: this layer may depend on `domain` and `ldap_core`,
//! but MUST NOT import `infrastructure`.

pub mod handler;
pub mod registry;
pub mod request;
pub mod response;
