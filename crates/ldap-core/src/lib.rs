//! # ldap-core
//!
//! Shared protocol library for the LDAP server: BER primitives, the LDAPv3
//! message envelope, result codes, and the stream framing rules.
//!
//! This crate has zero dependencies on sockets, async runtimes, or TLS.  The
//! server crate consumes it through a handful of narrow functions:
//!
//! - [`frame_length`] – how many bytes of a receive buffer make up the next
//!   complete envelope (or `None` if more bytes are needed).
//! - [`decode_message`] – turn one complete envelope into a typed
//!   [`LdapMessage`].
//! - [`encode_message`] – turn a typed [`LdapMessage`] back into bytes.
//!
//! # What is an envelope? (for beginners)
//!
//! Every LDAP request and response travels as one BER-encoded `SEQUENCE`:
//!
//! ```text
//! LDAPMessage ::= SEQUENCE {
//!      messageID       INTEGER (0 .. 2^31 - 1),
//!      protocolOp      CHOICE { bindRequest, bindResponse, ... },
//!      controls        [0] Controls OPTIONAL }
//! ```
//!
//! The outer `SEQUENCE` header carries the total length, so a reader can
//! tell where one message ends and the next begins without understanding
//! the operation inside.  Only the operations the connection layer needs to
//! recognise (bind, unbind, abandon, extended) are decoded into typed
//! structs; everything else is kept as an opaque payload that round-trips
//! byte-for-byte.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `ldap_core::LdapMessage` instead of `ldap_core::protocol::messages::LdapMessage`.
pub use protocol::codec::{
    decode_message, encode_message, frame_length, ProtocolError, DEFAULT_MAX_MESSAGE_SIZE,
};
pub use protocol::messages::{
    BindAuthentication, BindRequest, BindResponse, ExtendedRequest, ExtendedResponse,
    LdapMessage, MessageId, ProtocolOp, OID_NOTICE_OF_DISCONNECTION, OID_START_TLS,
};
pub use protocol::result::{LdapResult, ResultCode};
