//! `tokio_util` codec that cuts the inbound byte stream into raw LDAP
//! envelopes and writes outbound envelopes.
//!
//! Decoding stops at the envelope boundary: the decoder yields the raw
//! bytes of one envelope and the session decodes them into an
//! [`LdapMessage`], so the exact bytes received stay available to handlers.

use bytes::{Bytes, BytesMut};
use ldap_core::{frame_length, LdapMessage};
use tokio_util::codec::{Decoder, Encoder};

use crate::infrastructure::session::SessionError;

/// Bytes reserved up front when the buffer holds only part of a header.
const MIN_RESERVE: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct LdapCodec {
    max_message_size: usize,
}

impl LdapCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Decoder for LdapCodec {
    type Item = Bytes;
    type Error = SessionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, SessionError> {
        match frame_length(src, self.max_message_size)? {
            Some(len) => Ok(Some(src.split_to(len).freeze())),
            None => {
                src.reserve(MIN_RESERVE);
                Ok(None)
            }
        }
    }
}

impl Encoder<LdapMessage> for LdapCodec {
    type Error = SessionError;

    fn encode(&mut self, item: LdapMessage, dst: &mut BytesMut) -> Result<(), SessionError> {
        dst.extend_from_slice(&item.encode());
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
