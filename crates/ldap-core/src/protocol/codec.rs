//! Stream framing plus the encode/decode entry points used by the server.
//!
//! Wire format: every envelope is one BER `SEQUENCE`:
//! ```text
//! [0x30][length:1..5][messageID][protocolOp][controls?]
//! ```
//! The outer length makes the envelope self-delimiting, so a stream reader
//! only needs [`frame_length`] to cut the byte stream into envelopes.

use thiserror::Error;

use crate::protocol::ber::{self, TAG_SEQUENCE};
use crate::protocol::messages::LdapMessage;

/// Default upper bound on the size of one envelope (10 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Errors that can occur during framing, encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// An element runs past the end of the available bytes.
    #[error("truncated BER element")]
    Truncated,

    /// A required element carried a different identifier octet.
    #[error("unexpected tag: expected 0x{expected:02X}, found 0x{found:02X}")]
    UnexpectedTag { expected: u8, found: u8 },

    /// Multi-octet (high tag number) identifiers are not used by LDAP.
    #[error("high tag number form is not supported: 0x{0:02X}")]
    HighTagNumber(u8),

    /// BER indefinite-length form is forbidden in LDAP.
    #[error("indefinite length form is not supported")]
    IndefiniteLength,

    /// Long-form length with more octets than supported.
    #[error("length field uses {0} octets; at most 4 are supported")]
    LengthTooLong(usize),

    /// INTEGER content that is empty or wider than 64 bits.
    #[error("invalid INTEGER encoding")]
    InvalidInteger,

    /// A well-formed integer outside the range allowed for its field.
    #[error("integer value {0} is out of range")]
    IntegerOutOfRange(i64),

    /// A string field that is not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// The payload could not be parsed for a field-specific reason.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Bytes were left over after a complete element.
    #[error("{0} unexpected trailing bytes")]
    TrailingData(usize),

    /// The stream does not start with a universal SEQUENCE.
    #[error("not an LDAP envelope: outer tag 0x{0:02X}")]
    NotAnEnvelope(u8),

    /// The `protocolOp` is not an application-class element.
    #[error("unknown protocol operation tag 0x{0:02X}")]
    UnknownOperation(u8),

    /// The declared envelope size exceeds the configured limit.
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Reports how many bytes at the front of `buf` form the next envelope.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete envelope, so
/// the caller can read more bytes and try again.
///
/// # Errors
///
/// Returns [`ProtocolError::NotAnEnvelope`] if the outer tag is not a
/// SEQUENCE and [`ProtocolError::FrameTooLarge`] if the declared size exceeds
/// `max_size`.  Both are fatal for the stream: there is no way to find the
/// next envelope boundary.
///
/// # Examples
///
/// ```rust
/// use ldap_core::{frame_length, LdapMessage, ProtocolOp, DEFAULT_MAX_MESSAGE_SIZE};
///
/// let bytes = LdapMessage::new(1, ProtocolOp::UnbindRequest).encode();
/// assert_eq!(frame_length(&bytes[..3], DEFAULT_MAX_MESSAGE_SIZE).unwrap(), None);
/// assert_eq!(frame_length(&bytes, DEFAULT_MAX_MESSAGE_SIZE).unwrap(), Some(bytes.len()));
/// ```
pub fn frame_length(buf: &[u8], max_size: usize) -> Result<Option<usize>, ProtocolError> {
    let Some(header) = ber::read_header(buf)? else {
        return Ok(None);
    };
    if header.tag != TAG_SEQUENCE {
        return Err(ProtocolError::NotAnEnvelope(header.tag));
    }
    let total = header.total_len();
    if total > max_size {
        return Err(ProtocolError::FrameTooLarge {
            size: total,
            max: max_size,
        });
    }
    Ok((buf.len() >= total).then_some(total))
}

/// Decodes one complete envelope.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
///
/// # Examples
///
/// ```rust
/// use ldap_core::{decode_message, encode_message, LdapMessage, ProtocolOp};
///
/// let original = LdapMessage::new(5, ProtocolOp::AbandonRequest(4));
/// let decoded = decode_message(&encode_message(&original)).unwrap();
/// assert_eq!(decoded, original);
/// ```
pub fn decode_message(bytes: &[u8]) -> Result<LdapMessage, ProtocolError> {
    LdapMessage::decode(bytes)
}

/// Encodes one envelope.
pub fn encode_message(message: &LdapMessage) -> Vec<u8> {
    message.encode()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{BindRequest, ProtocolOp};

    #[test]
    fn test_frame_length_waits_for_complete_envelope() {
        let bytes = LdapMessage::new(1, ProtocolOp::BindRequest(BindRequest::simple("cn=a", "b"))).encode();
        for cut in 0..bytes.len() {
            assert_eq!(
                frame_length(&bytes[..cut], DEFAULT_MAX_MESSAGE_SIZE),
                Ok(None),
                "prefix of {cut} bytes must not be reported complete"
            );
        }
        assert_eq!(frame_length(&bytes, DEFAULT_MAX_MESSAGE_SIZE), Ok(Some(bytes.len())));
    }

    #[test]
    fn test_frame_length_ignores_bytes_of_following_envelope() {
        let first = LdapMessage::new(1, ProtocolOp::UnbindRequest).encode();
        let mut buf = first.clone();
        buf.extend_from_slice(&LdapMessage::new(2, ProtocolOp::UnbindRequest).encode());
        assert_eq!(frame_length(&buf, DEFAULT_MAX_MESSAGE_SIZE), Ok(Some(first.len())));
    }

    #[test]
    fn test_frame_length_rejects_non_sequence() {
        assert_eq!(
            frame_length(&[0x04, 0x01, 0x00], DEFAULT_MAX_MESSAGE_SIZE),
            Err(ProtocolError::NotAnEnvelope(0x04))
        );
    }

    #[test]
    fn test_frame_length_rejects_oversized_declaration_before_body_arrives() {
        // Header alone declares 1 MiB of content
        let header = [0x30, 0x83, 0x10, 0x00, 0x00];
        assert_eq!(
            frame_length(&header, 1024),
            Err(ProtocolError::FrameTooLarge {
                size: 5 + 0x10_0000,
                max: 1024
            })
        );
    }

    #[test]
    fn test_decode_message_rejects_truncated_inner_element() {
        // Envelope claims 3 bytes, holding an INTEGER that claims 1 but no op
        let bytes = [0x30, 0x03, 0x02, 0x01, 0x01];
        assert_eq!(decode_message(&bytes), Err(ProtocolError::Truncated));
    }
}
