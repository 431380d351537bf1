//! Minimal BER (Basic Encoding Rules) primitives.
//!
//! # What is BER? (for beginners)
//!
//! BER encodes every value as a *TLV* triple:
//!
//! ```text
//! [identifier:1][length:1..5][content:N]
//! ```
//!
//! - The **identifier** octet packs the tag class (universal, application,
//!   context-specific), a constructed/primitive bit, and the tag number.
//! - The **length** is either a single octet (`< 0x80`, "short form") or
//!   `0x80 | n` followed by `n` big-endian length octets ("long form").
//! - The **content** is raw bytes for primitive values, or a concatenation of
//!   nested TLVs for constructed values such as `SEQUENCE`.
//!
//! Only the subset LDAPv3 needs is supported: low tag numbers (< 31),
//! definite lengths with at most four length octets, and the universal
//! INTEGER, ENUMERATED, BOOLEAN, OCTET STRING, NULL and SEQUENCE types.

use crate::protocol::codec::ProtocolError;

// ── Identifier octets ─────────────────────────────────────────────────────────

/// Application tag class bits.
pub const CLASS_APPLICATION: u8 = 0x40;
/// Context-specific tag class bits.
pub const CLASS_CONTEXT: u8 = 0x80;
/// Constructed encoding bit.
pub const CONSTRUCTED: u8 = 0x20;

pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_ENUMERATED: u8 = 0x0A;
pub const TAG_SEQUENCE: u8 = 0x30;

/// Largest number of long-form length octets accepted (lengths up to 4 GiB).
const MAX_LENGTH_OCTETS: usize = 4;

/// Identifier and length of one TLV, parsed from the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// The identifier octet.
    pub tag: u8,
    /// Number of identifier + length octets.
    pub header_len: usize,
    /// Number of content octets that follow the header.
    pub content_len: usize,
}

impl Header {
    /// Total encoded size of the element (header + content).
    pub fn total_len(&self) -> usize {
        self.header_len + self.content_len
    }
}

/// Parses the identifier and length octets at the start of `bytes`.
///
/// Returns `Ok(None)` when the buffer ends before the header is complete,
/// so stream readers can wait for more data.
///
/// # Errors
///
/// Returns [`ProtocolError`] for high tag numbers, indefinite lengths, and
/// long-form lengths wider than four octets.
pub fn read_header(bytes: &[u8]) -> Result<Option<Header>, ProtocolError> {
    let Some(&tag) = bytes.first() else {
        return Ok(None);
    };
    if tag & 0x1F == 0x1F {
        return Err(ProtocolError::HighTagNumber(tag));
    }

    let Some(&first) = bytes.get(1) else {
        return Ok(None);
    };
    if first & 0x80 == 0 {
        return Ok(Some(Header {
            tag,
            header_len: 2,
            content_len: usize::from(first),
        }));
    }

    let octets = usize::from(first & 0x7F);
    if octets == 0 {
        return Err(ProtocolError::IndefiniteLength);
    }
    if octets > MAX_LENGTH_OCTETS {
        return Err(ProtocolError::LengthTooLong(octets));
    }
    if bytes.len() < 2 + octets {
        return Ok(None);
    }

    let content_len = bytes[2..2 + octets]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));

    Ok(Some(Header {
        tag,
        header_len: 2 + octets,
        content_len,
    }))
}

/// Decodes two's-complement INTEGER content octets.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidInteger`] for empty content or content
/// wider than eight octets.
pub fn parse_integer(content: &[u8]) -> Result<i64, ProtocolError> {
    if content.is_empty() || content.len() > 8 {
        return Err(ProtocolError::InvalidInteger);
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for b in content {
        value = (value << 8) | i64::from(*b);
    }
    Ok(value)
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// A forward-only cursor over a sequence of complete TLVs.
///
/// Each `read_*` call consumes exactly one element.  Nested constructed
/// values are read by handing their content slice to a new `Reader`.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns `true` once every element has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of bytes left unread.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// The identifier octet of the next element, if any.
    pub fn peek_tag(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    /// Reads the next element of any tag and returns `(tag, content)`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] if the element runs past the end
    /// of the buffer.
    pub fn read_any(&mut self) -> Result<(u8, &'a [u8]), ProtocolError> {
        let header = read_header(self.buf)?.ok_or(ProtocolError::Truncated)?;
        let total = header.total_len();
        if self.buf.len() < total {
            return Err(ProtocolError::Truncated);
        }
        let content = &self.buf[header.header_len..total];
        self.buf = &self.buf[total..];
        Ok((header.tag, content))
    }

    /// Reads the next element and checks its tag.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedTag`] on a tag mismatch.
    pub fn read_expect(&mut self, tag: u8) -> Result<&'a [u8], ProtocolError> {
        let (found, content) = self.read_any()?;
        if found != tag {
            return Err(ProtocolError::UnexpectedTag {
                expected: tag,
                found,
            });
        }
        Ok(content)
    }

    /// Reads the next element only if it carries `tag`.
    ///
    /// # Errors
    ///
    /// Propagates [`read_any`](Self::read_any) errors.
    pub fn read_optional(&mut self, tag: u8) -> Result<Option<&'a [u8]>, ProtocolError> {
        if self.peek_tag() == Some(tag) {
            self.read_expect(tag).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Reads an INTEGER (or ENUMERATED, or implicitly tagged integer).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on tag mismatch or malformed content.
    pub fn read_integer(&mut self, tag: u8) -> Result<i64, ProtocolError> {
        parse_integer(self.read_expect(tag)?)
    }

    /// Reads a BOOLEAN.  Any non-zero content octet is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the content is not
    /// exactly one octet.
    pub fn read_boolean(&mut self, tag: u8) -> Result<bool, ProtocolError> {
        match self.read_expect(tag)? {
            [b] => Ok(*b != 0),
            other => Err(ProtocolError::MalformedPayload(format!(
                "BOOLEAN must be one octet, got {}",
                other.len()
            ))),
        }
    }

    /// Reads an OCTET STRING and decodes it as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidUtf8`] if the bytes are not UTF-8.
    pub fn read_string(&mut self, tag: u8) -> Result<String, ProtocolError> {
        let content = self.read_expect(tag)?;
        std::str::from_utf8(content)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }
}

// ── Writer helpers ────────────────────────────────────────────────────────────

/// Appends definite-form length octets (short form when possible).
pub fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = (len as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

/// Appends one complete TLV.
pub fn write_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    write_length(out, content.len());
    out.extend_from_slice(content);
}

/// Appends a constructed element whose content is produced by `build`.
pub fn write_constructed(out: &mut Vec<u8>, tag: u8, build: impl FnOnce(&mut Vec<u8>)) {
    let mut inner = Vec::new();
    build(&mut inner);
    write_tlv(out, tag, &inner);
}

/// Appends an INTEGER using the minimal two's-complement encoding.
pub fn write_integer(out: &mut Vec<u8>, tag: u8, value: i64) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Drop leading octets that only repeat the sign bit of the next octet.
    while start < 7 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        let redundant = (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    write_tlv(out, tag, &bytes[start..]);
}

/// Appends a BOOLEAN (DER canonical `0xFF` for true).
pub fn write_boolean(out: &mut Vec<u8>, tag: u8, value: bool) {
    write_tlv(out, tag, &[if value { 0xFF } else { 0x00 }]);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
