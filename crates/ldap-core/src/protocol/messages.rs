//! LDAPv3 message envelope and the protocol operations the server core
//! recognises.
//!
//! Operations are identified by their `[APPLICATION n]` tag (RFC 4511 §4.2).
//! The connection layer only needs to understand a few of them: bind (for
//! the common request/response scenario), unbind (ends the session),
//! abandon (cancels an in-flight request) and extended operations (StartTLS
//! and the Notice of Disconnection).  Every other operation is carried as an
//! opaque [`ProtocolOp::Other`] payload and left to the request handler.

use crate::protocol::ber::{
    self, Reader, CLASS_APPLICATION, CLASS_CONTEXT, CONSTRUCTED, TAG_INTEGER, TAG_OCTET_STRING,
    TAG_SEQUENCE,
};
use crate::protocol::codec::ProtocolError;
use crate::protocol::result::{LdapResult, ResultCode};

// ── Protocol constants ────────────────────────────────────────────────────────

/// The `messageID` of an envelope.  Valid values are `0 ..= 2^31 - 1`; zero
/// is reserved for unsolicited notifications.
pub type MessageId = i32;

/// Highest legal message identifier.
pub const MAX_MESSAGE_ID: MessageId = i32::MAX;

/// The only protocol version this codec accepts in bind requests.
pub const LDAP_VERSION_3: u8 = 3;

/// Name of the unsolicited Notice of Disconnection (RFC 4511 §4.4.1).
pub const OID_NOTICE_OF_DISCONNECTION: &str = "1.3.6.1.4.1.1466.20036";

/// Name of the StartTLS extended operation (RFC 4511 §4.14).
pub const OID_START_TLS: &str = "1.3.6.1.4.1.1466.20037";

/// Identifier octets of the protocol operations.
pub mod tags {
    use super::{CLASS_APPLICATION, CLASS_CONTEXT, CONSTRUCTED};

    pub const BIND_REQUEST: u8 = CLASS_APPLICATION | CONSTRUCTED;
    pub const BIND_RESPONSE: u8 = CLASS_APPLICATION | CONSTRUCTED | 1;
    pub const UNBIND_REQUEST: u8 = CLASS_APPLICATION | 2;
    pub const SEARCH_REQUEST: u8 = CLASS_APPLICATION | CONSTRUCTED | 3;
    pub const SEARCH_RESULT_ENTRY: u8 = CLASS_APPLICATION | CONSTRUCTED | 4;
    pub const SEARCH_RESULT_DONE: u8 = CLASS_APPLICATION | CONSTRUCTED | 5;
    pub const MODIFY_REQUEST: u8 = CLASS_APPLICATION | CONSTRUCTED | 6;
    pub const MODIFY_RESPONSE: u8 = CLASS_APPLICATION | CONSTRUCTED | 7;
    pub const ADD_REQUEST: u8 = CLASS_APPLICATION | CONSTRUCTED | 8;
    pub const ADD_RESPONSE: u8 = CLASS_APPLICATION | CONSTRUCTED | 9;
    pub const DEL_REQUEST: u8 = CLASS_APPLICATION | 10;
    pub const DEL_RESPONSE: u8 = CLASS_APPLICATION | CONSTRUCTED | 11;
    pub const MODIFY_DN_REQUEST: u8 = CLASS_APPLICATION | CONSTRUCTED | 12;
    pub const MODIFY_DN_RESPONSE: u8 = CLASS_APPLICATION | CONSTRUCTED | 13;
    pub const COMPARE_REQUEST: u8 = CLASS_APPLICATION | CONSTRUCTED | 14;
    pub const COMPARE_RESPONSE: u8 = CLASS_APPLICATION | CONSTRUCTED | 15;
    pub const ABANDON_REQUEST: u8 = CLASS_APPLICATION | 16;
    pub const SEARCH_RESULT_REFERENCE: u8 = CLASS_APPLICATION | CONSTRUCTED | 19;
    pub const EXTENDED_REQUEST: u8 = CLASS_APPLICATION | CONSTRUCTED | 23;
    pub const EXTENDED_RESPONSE: u8 = CLASS_APPLICATION | CONSTRUCTED | 24;
    pub const INTERMEDIATE_RESPONSE: u8 = CLASS_APPLICATION | CONSTRUCTED | 25;

    /// `controls [0] Controls OPTIONAL` on the envelope.
    pub const CONTROLS: u8 = CLASS_CONTEXT | CONSTRUCTED;

    pub(crate) const AUTH_SIMPLE: u8 = CLASS_CONTEXT;
    pub(crate) const AUTH_SASL: u8 = CLASS_CONTEXT | CONSTRUCTED | 3;
    pub(crate) const SERVER_SASL_CREDS: u8 = CLASS_CONTEXT | 7;
    pub(crate) const EXTENDED_REQUEST_NAME: u8 = CLASS_CONTEXT;
    pub(crate) const EXTENDED_REQUEST_VALUE: u8 = CLASS_CONTEXT | 1;
    pub(crate) const EXTENDED_RESPONSE_NAME: u8 = CLASS_CONTEXT | 10;
    pub(crate) const EXTENDED_RESPONSE_VALUE: u8 = CLASS_CONTEXT | 11;
}

// ── Operation payloads ────────────────────────────────────────────────────────

/// The `authentication` choice of a bind request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAuthentication {
    /// `simple [0] OCTET STRING` – a plain password.
    Simple(Vec<u8>),
    /// `sasl [3] SaslCredentials`.
    Sasl {
        mechanism: String,
        credentials: Option<Vec<u8>>,
    },
}

/// BindRequest (`[APPLICATION 0]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub version: u8,
    /// The DN to bind as; empty for anonymous binds.
    pub name: String,
    pub authentication: BindAuthentication,
}

impl BindRequest {
    /// A version-3 simple bind.
    pub fn simple(name: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        Self {
            version: LDAP_VERSION_3,
            name: name.into(),
            authentication: BindAuthentication::Simple(password.into()),
        }
    }

    /// The simple-bind password, if this is a simple bind.
    pub fn simple_password(&self) -> Option<&[u8]> {
        match &self.authentication {
            BindAuthentication::Simple(password) => Some(password),
            BindAuthentication::Sasl { .. } => None,
        }
    }
}

/// BindResponse (`[APPLICATION 1]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindResponse {
    pub result: LdapResult,
    pub server_sasl_creds: Option<Vec<u8>>,
}

impl BindResponse {
    pub fn new(code: ResultCode) -> Self {
        Self {
            result: LdapResult::new(code),
            server_sasl_creds: None,
        }
    }

    #[must_use]
    pub fn with_diagnostic(mut self, message: impl Into<String>) -> Self {
        self.result.diagnostic_message = message.into();
        self
    }
}

/// ExtendedRequest (`[APPLICATION 23]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRequest {
    /// The request OID.
    pub name: String,
    pub value: Option<Vec<u8>>,
}

/// ExtendedResponse (`[APPLICATION 24]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    /// The response OID, if any.
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
}

impl ExtendedResponse {
    pub fn new(code: ResultCode) -> Self {
        Self {
            result: LdapResult::new(code),
            name: None,
            value: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, oid: impl Into<String>) -> Self {
        self.name = Some(oid.into());
        self
    }

    #[must_use]
    pub fn with_diagnostic(mut self, message: impl Into<String>) -> Self {
        self.result.diagnostic_message = message.into();
        self
    }
}

/// The `protocolOp` choice of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOp {
    BindRequest(BindRequest),
    BindResponse(BindResponse),
    UnbindRequest,
    /// AbandonRequest carrying the identifier of the request to abandon.
    AbandonRequest(MessageId),
    ExtendedRequest(ExtendedRequest),
    ExtendedResponse(ExtendedResponse),
    SearchResultDone(LdapResult),
    ModifyResponse(LdapResult),
    AddResponse(LdapResult),
    DelResponse(LdapResult),
    ModifyDnResponse(LdapResult),
    CompareResponse(LdapResult),
    /// Any other application-class operation, kept as its raw content octets.
    Other { tag: u8, payload: Vec<u8> },
}

impl ProtocolOp {
    /// The identifier octet this operation is encoded with.
    pub fn tag(&self) -> u8 {
        match self {
            ProtocolOp::BindRequest(_) => tags::BIND_REQUEST,
            ProtocolOp::BindResponse(_) => tags::BIND_RESPONSE,
            ProtocolOp::UnbindRequest => tags::UNBIND_REQUEST,
            ProtocolOp::AbandonRequest(_) => tags::ABANDON_REQUEST,
            ProtocolOp::ExtendedRequest(_) => tags::EXTENDED_REQUEST,
            ProtocolOp::ExtendedResponse(_) => tags::EXTENDED_RESPONSE,
            ProtocolOp::SearchResultDone(_) => tags::SEARCH_RESULT_DONE,
            ProtocolOp::ModifyResponse(_) => tags::MODIFY_RESPONSE,
            ProtocolOp::AddResponse(_) => tags::ADD_RESPONSE,
            ProtocolOp::DelResponse(_) => tags::DEL_RESPONSE,
            ProtocolOp::ModifyDnResponse(_) => tags::MODIFY_DN_RESPONSE,
            ProtocolOp::CompareResponse(_) => tags::COMPARE_RESPONSE,
            ProtocolOp::Other { tag, .. } => *tag,
        }
    }

    /// A short operation name for log lines.  Never includes field values,
    /// so bind passwords cannot leak into logs.
    pub fn name(&self) -> &'static str {
        match self.tag() {
            tags::BIND_REQUEST => "BindRequest",
            tags::BIND_RESPONSE => "BindResponse",
            tags::UNBIND_REQUEST => "UnbindRequest",
            tags::SEARCH_REQUEST => "SearchRequest",
            tags::SEARCH_RESULT_ENTRY => "SearchResultEntry",
            tags::SEARCH_RESULT_DONE => "SearchResultDone",
            tags::SEARCH_RESULT_REFERENCE => "SearchResultReference",
            tags::MODIFY_REQUEST => "ModifyRequest",
            tags::MODIFY_RESPONSE => "ModifyResponse",
            tags::ADD_REQUEST => "AddRequest",
            tags::ADD_RESPONSE => "AddResponse",
            tags::DEL_REQUEST => "DelRequest",
            tags::DEL_RESPONSE => "DelResponse",
            tags::MODIFY_DN_REQUEST => "ModifyDNRequest",
            tags::MODIFY_DN_RESPONSE => "ModifyDNResponse",
            tags::COMPARE_REQUEST => "CompareRequest",
            tags::COMPARE_RESPONSE => "CompareResponse",
            tags::ABANDON_REQUEST => "AbandonRequest",
            tags::EXTENDED_REQUEST => "ExtendedRequest",
            tags::EXTENDED_RESPONSE => "ExtendedResponse",
            tags::INTERMEDIATE_RESPONSE => "IntermediateResponse",
            _ => "UnknownOperation",
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let tag = self.tag();
        match self {
            ProtocolOp::BindRequest(req) => ber::write_constructed(out, tag, |c| {
                ber::write_integer(c, TAG_INTEGER, i64::from(req.version));
                ber::write_tlv(c, TAG_OCTET_STRING, req.name.as_bytes());
                match &req.authentication {
                    BindAuthentication::Simple(password) => {
                        ber::write_tlv(c, tags::AUTH_SIMPLE, password);
                    }
                    BindAuthentication::Sasl {
                        mechanism,
                        credentials,
                    } => ber::write_constructed(c, tags::AUTH_SASL, |sasl| {
                        ber::write_tlv(sasl, TAG_OCTET_STRING, mechanism.as_bytes());
                        if let Some(creds) = credentials {
                            ber::write_tlv(sasl, TAG_OCTET_STRING, creds);
                        }
                    }),
                }
            }),
            ProtocolOp::BindResponse(resp) => ber::write_constructed(out, tag, |c| {
                resp.result.encode_components(c);
                if let Some(creds) = &resp.server_sasl_creds {
                    ber::write_tlv(c, tags::SERVER_SASL_CREDS, creds);
                }
            }),
            ProtocolOp::UnbindRequest => ber::write_tlv(out, tag, &[]),
            ProtocolOp::AbandonRequest(id) => ber::write_integer(out, tag, i64::from(*id)),
            ProtocolOp::ExtendedRequest(req) => ber::write_constructed(out, tag, |c| {
                ber::write_tlv(c, tags::EXTENDED_REQUEST_NAME, req.name.as_bytes());
                if let Some(value) = &req.value {
                    ber::write_tlv(c, tags::EXTENDED_REQUEST_VALUE, value);
                }
            }),
            ProtocolOp::ExtendedResponse(resp) => ber::write_constructed(out, tag, |c| {
                resp.result.encode_components(c);
                if let Some(name) = &resp.name {
                    ber::write_tlv(c, tags::EXTENDED_RESPONSE_NAME, name.as_bytes());
                }
                if let Some(value) = &resp.value {
                    ber::write_tlv(c, tags::EXTENDED_RESPONSE_VALUE, value);
                }
            }),
            ProtocolOp::SearchResultDone(result)
            | ProtocolOp::ModifyResponse(result)
            | ProtocolOp::AddResponse(result)
            | ProtocolOp::DelResponse(result)
            | ProtocolOp::ModifyDnResponse(result)
            | ProtocolOp::CompareResponse(result) => {
                ber::write_constructed(out, tag, |c| result.encode_components(c));
            }
            ProtocolOp::Other { payload, .. } => ber::write_tlv(out, tag, payload),
        }
    }

    fn decode(tag: u8, content: &[u8]) -> Result<Self, ProtocolError> {
        if tag & 0xC0 != CLASS_APPLICATION {
            return Err(ProtocolError::UnknownOperation(tag));
        }
        let mut r = Reader::new(content);
        let op = match tag {
            tags::BIND_REQUEST => ProtocolOp::BindRequest(decode_bind_request(&mut r)?),
            tags::BIND_RESPONSE => {
                let result = LdapResult::decode_components(&mut r)?;
                let server_sasl_creds = r.read_optional(tags::SERVER_SASL_CREDS)?.map(<[u8]>::to_vec);
                ProtocolOp::BindResponse(BindResponse {
                    result,
                    server_sasl_creds,
                })
            }
            tags::UNBIND_REQUEST => {
                // NULL content; anything inside is ignored.
                r = Reader::new(&[]);
                ProtocolOp::UnbindRequest
            }
            tags::ABANDON_REQUEST => {
                r = Reader::new(&[]);
                ProtocolOp::AbandonRequest(to_message_id(ber::parse_integer(content)?)?)
            }
            tags::EXTENDED_REQUEST => {
                let name = r.read_string(tags::EXTENDED_REQUEST_NAME)?;
                let value = r.read_optional(tags::EXTENDED_REQUEST_VALUE)?.map(<[u8]>::to_vec);
                ProtocolOp::ExtendedRequest(ExtendedRequest { name, value })
            }
            tags::EXTENDED_RESPONSE => {
                let result = LdapResult::decode_components(&mut r)?;
                let name = match r.read_optional(tags::EXTENDED_RESPONSE_NAME)? {
                    Some(bytes) => Some(utf8(bytes)?),
                    None => None,
                };
                let value = r.read_optional(tags::EXTENDED_RESPONSE_VALUE)?.map(<[u8]>::to_vec);
                ProtocolOp::ExtendedResponse(ExtendedResponse {
                    result,
                    name,
                    value,
                })
            }
            tags::SEARCH_RESULT_DONE => ProtocolOp::SearchResultDone(LdapResult::decode_components(&mut r)?),
            tags::MODIFY_RESPONSE => ProtocolOp::ModifyResponse(LdapResult::decode_components(&mut r)?),
            tags::ADD_RESPONSE => ProtocolOp::AddResponse(LdapResult::decode_components(&mut r)?),
            tags::DEL_RESPONSE => ProtocolOp::DelResponse(LdapResult::decode_components(&mut r)?),
            tags::MODIFY_DN_RESPONSE => ProtocolOp::ModifyDnResponse(LdapResult::decode_components(&mut r)?),
            tags::COMPARE_RESPONSE => ProtocolOp::CompareResponse(LdapResult::decode_components(&mut r)?),
            _ => {
                r = Reader::new(&[]);
                ProtocolOp::Other {
                    tag,
                    payload: content.to_vec(),
                }
            }
        };
        if !r.is_empty() {
            return Err(ProtocolError::TrailingData(r.remaining()));
        }
        Ok(op)
    }
}

fn decode_bind_request(r: &mut Reader<'_>) -> Result<BindRequest, ProtocolError> {
    let raw_version = r.read_integer(TAG_INTEGER)?;
    let version = u8::try_from(raw_version)
        .ok()
        .filter(|v| (1..=127).contains(v))
        .ok_or(ProtocolError::IntegerOutOfRange(raw_version))?;
    let name = r.read_string(TAG_OCTET_STRING)?;
    let authentication = match r.read_any()? {
        (tags::AUTH_SIMPLE, password) => BindAuthentication::Simple(password.to_vec()),
        (tags::AUTH_SASL, sasl) => {
            let mut s = Reader::new(sasl);
            let mechanism = s.read_string(TAG_OCTET_STRING)?;
            let credentials = s.read_optional(TAG_OCTET_STRING)?.map(<[u8]>::to_vec);
            BindAuthentication::Sasl {
                mechanism,
                credentials,
            }
        }
        (found, _) => {
            return Err(ProtocolError::UnexpectedTag {
                expected: tags::AUTH_SIMPLE,
                found,
            })
        }
    };
    Ok(BindRequest {
        version,
        name,
        authentication,
    })
}

fn to_message_id(raw: i64) -> Result<MessageId, ProtocolError> {
    MessageId::try_from(raw)
        .ok()
        .filter(|id| *id >= 0)
        .ok_or(ProtocolError::IntegerOutOfRange(raw))
}

fn utf8(bytes: &[u8]) -> Result<String, ProtocolError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidUtf8)
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// One LDAP envelope: identifier, operation, and optional controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapMessage {
    pub message_id: MessageId,
    pub op: ProtocolOp,
    /// Content octets of the `controls [0]` element, kept opaque.
    pub controls: Option<Vec<u8>>,
}

impl LdapMessage {
    pub fn new(message_id: MessageId, op: ProtocolOp) -> Self {
        Self {
            message_id,
            op,
            controls: None,
        }
    }

    /// The unsolicited notice a server sends before terminating a session.
    ///
    /// Carries message identifier 0, `unwillingToPerform`, and the Notice of
    /// Disconnection OID as the response name.
    pub fn notice_of_disconnection(diagnostic: impl Into<String>) -> Self {
        let notice = ExtendedResponse::new(ResultCode::UNWILLING_TO_PERFORM)
            .with_name(OID_NOTICE_OF_DISCONNECTION)
            .with_diagnostic(diagnostic);
        Self::new(0, ProtocolOp::ExtendedResponse(notice))
    }

    /// Returns `true` for an UnbindRequest.
    pub fn is_unbind(&self) -> bool {
        matches!(self.op, ProtocolOp::UnbindRequest)
    }

    /// Returns `true` for an ExtendedRequest naming the StartTLS OID.
    pub fn is_start_tls(&self) -> bool {
        matches!(&self.op, ProtocolOp::ExtendedRequest(req) if req.name == OID_START_TLS)
    }

    /// Returns `true` for the unsolicited Notice of Disconnection.
    pub fn is_notice_of_disconnection(&self) -> bool {
        matches!(
            &self.op,
            ProtocolOp::ExtendedResponse(resp)
                if resp.name.as_deref() == Some(OID_NOTICE_OF_DISCONNECTION)
        )
    }

    /// Encodes the envelope into a fresh byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        ber::write_constructed(&mut out, TAG_SEQUENCE, |env| {
            ber::write_integer(env, TAG_INTEGER, i64::from(self.message_id));
            self.op.encode(env);
            if let Some(controls) = &self.controls {
                ber::write_tlv(env, tags::CONTROLS, controls);
            }
        });
        out
    }

    /// Decodes exactly one envelope occupying all of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the bytes are not a well-formed envelope
    /// or carry trailing data.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut outer = Reader::new(bytes);
        let (tag, content) = outer.read_any()?;
        if tag != TAG_SEQUENCE {
            return Err(ProtocolError::NotAnEnvelope(tag));
        }
        if !outer.is_empty() {
            return Err(ProtocolError::TrailingData(outer.remaining()));
        }

        let mut env = Reader::new(content);
        let message_id = to_message_id(env.read_integer(TAG_INTEGER)?)?;
        let (op_tag, op_content) = env.read_any()?;
        let op = ProtocolOp::decode(op_tag, op_content)?;
        let controls = env.read_optional(tags::CONTROLS)?.map(<[u8]>::to_vec);
        if !env.is_empty() {
            return Err(ProtocolError::TrailingData(env.remaining()));
        }

        Ok(Self {
            message_id,
            op,
            controls,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_bind_request_matches_known_encoding() {
        // Simple bind of "a" with password "b", assembled by hand per RFC 4511
        let expected = vec![
            0x30, 0x0E, // envelope
            0x02, 0x01, 0x01, // messageID 1
            0x60, 0x09, // BindRequest
            0x02, 0x01, 0x03, // version 3
            0x04, 0x01, b'a', // name "a"
            0x80, 0x01, b'b', // simple "b"
        ];
        let msg = LdapMessage::new(1, ProtocolOp::BindRequest(BindRequest::simple("a", "b")));
        assert_eq!(msg.encode(), expected);
        assert_eq!(LdapMessage::decode(&expected).unwrap(), msg);
    }

    #[test]
    fn test_unbind_request_is_recognised() {
        let bytes = [0x30, 0x05, 0x02, 0x01, 0x03, 0x42, 0x00];
        let msg = LdapMessage::decode(&bytes).unwrap();
        assert_eq!(msg.message_id, 3);
        assert!(msg.is_unbind());
        assert_eq!(msg.encode(), bytes.to_vec());
    }

    #[test]
    fn test_abandon_request_carries_target_id() {
        let msg = LdapMessage::new(9, ProtocolOp::AbandonRequest(7));
        let decoded = LdapMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.op, ProtocolOp::AbandonRequest(7));
    }

    #[test]
    fn test_start_tls_request_is_recognised() {
        let msg = LdapMessage::new(
            1,
            ProtocolOp::ExtendedRequest(ExtendedRequest {
                name: OID_START_TLS.to_string(),
                value: None,
            }),
        );
        let decoded = LdapMessage::decode(&msg.encode()).unwrap();
        assert!(decoded.is_start_tls());
        assert!(!decoded.is_unbind());
    }

    #[test]
    fn test_other_extended_request_is_not_start_tls() {
        let msg = LdapMessage::new(
            1,
            ProtocolOp::ExtendedRequest(ExtendedRequest {
                name: "1.3.6.1.4.1.4203.1.11.3".to_string(), // Who am I?
                value: None,
            }),
        );
        assert!(!msg.is_start_tls());
    }

    #[test]
    fn test_notice_of_disconnection_shape() {
        let notice = LdapMessage::notice_of_disconnection("server is about to stop");
        assert_eq!(notice.message_id, 0);
        assert!(notice.is_notice_of_disconnection());
        match LdapMessage::decode(&notice.encode()).unwrap().op {
            ProtocolOp::ExtendedResponse(resp) => {
                assert_eq!(resp.result.code, ResultCode::UNWILLING_TO_PERFORM);
                assert_eq!(resp.result.diagnostic_message, "server is about to stop");
                assert_eq!(resp.name.as_deref(), Some(OID_NOTICE_OF_DISCONNECTION));
            }
            other => panic!("expected ExtendedResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_operation_payload_is_preserved() {
        // A SearchRequest is opaque to the codec and must survive untouched.
        let payload = vec![0x04, 0x00, 0x0A, 0x01, 0x02];
        let msg = LdapMessage::new(
            4,
            ProtocolOp::Other {
                tag: tags::SEARCH_REQUEST,
                payload: payload.clone(),
            },
        );
        let decoded = LdapMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.op.name(), "SearchRequest");
        assert_eq!(
            decoded.op,
            ProtocolOp::Other {
                tag: tags::SEARCH_REQUEST,
                payload
            }
        );
    }

    #[test]
    fn test_controls_are_kept_opaque() {
        let mut msg = LdapMessage::new(2, ProtocolOp::UnbindRequest);
        msg.controls = Some(vec![0x30, 0x03, 0x04, 0x01, b'x']);
        let decoded = LdapMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.controls, msg.controls);
    }

    #[test]
    fn test_sasl_bind_credentials_are_optional() {
        let req = BindRequest {
            version: 3,
            name: String::new(),
            authentication: BindAuthentication::Sasl {
                mechanism: "EXTERNAL".to_string(),
                credentials: None,
            },
        };
        let msg = LdapMessage::new(1, ProtocolOp::BindRequest(req.clone()));
        let decoded = LdapMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.op, ProtocolOp::BindRequest(req));
        assert!(matches!(decoded.op, ProtocolOp::BindRequest(ref r) if r.simple_password().is_none()));
    }

    #[test]
    fn test_negative_message_id_is_rejected() {
        let bytes = [0x30, 0x05, 0x02, 0x01, 0xFF, 0x42, 0x00];
        assert_eq!(
            LdapMessage::decode(&bytes),
            Err(ProtocolError::IntegerOutOfRange(-1))
        );
    }

    #[test]
    fn test_context_tag_in_operation_position_is_rejected() {
        let bytes = [0x30, 0x05, 0x02, 0x01, 0x01, 0x80, 0x00];
        assert_eq!(
            LdapMessage::decode(&bytes),
            Err(ProtocolError::UnknownOperation(0x80))
        );
    }

    #[test]
    fn test_trailing_bytes_after_envelope_are_rejected() {
        let mut bytes = LdapMessage::new(1, ProtocolOp::UnbindRequest).encode();
        bytes.push(0x00);
        assert_eq!(LdapMessage::decode(&bytes), Err(ProtocolError::TrailingData(1)));
    }

    #[test]
    fn test_op_name_never_exposes_password() {
        let op = ProtocolOp::BindRequest(BindRequest::simple("cn=admin", "hunter2"));
        assert_eq!(op.name(), "BindRequest");
        assert!(!op.name().contains("hunter2"));
    }
}
