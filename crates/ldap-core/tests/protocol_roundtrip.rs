//! Integration tests for the ldap-core envelope codec.
//!
//! These tests drive the public API the way the server's stream reader does:
//! cut envelopes out of a byte buffer with `frame_length`, decode them, and
//! encode responses back.

use ldap_core::{
    decode_message, encode_message, frame_length,
    protocol::messages::tags,
    BindRequest, BindResponse, ExtendedRequest, ExtendedResponse, LdapMessage, LdapResult,
    ProtocolError, ProtocolOp, ResultCode, DEFAULT_MAX_MESSAGE_SIZE, OID_NOTICE_OF_DISCONNECTION,
    OID_START_TLS,
};

/// Splits a buffer holding several back-to-back envelopes into decoded messages.
fn split_stream(mut buf: &[u8]) -> Vec<LdapMessage> {
    let mut out = Vec::new();
    while let Some(len) = frame_length(buf, DEFAULT_MAX_MESSAGE_SIZE).expect("framing must succeed") {
        out.push(decode_message(&buf[..len]).expect("decode must succeed"));
        buf = &buf[len..];
    }
    assert!(buf.is_empty(), "stream must end on an envelope boundary");
    out
}

#[test]
fn test_pipelined_requests_are_framed_in_order() {
    let requests = vec![
        LdapMessage::new(1, ProtocolOp::BindRequest(BindRequest::simple("cn=admin", "secret"))),
        LdapMessage::new(
            2,
            ProtocolOp::Other {
                tag: tags::SEARCH_REQUEST,
                payload: vec![0x04, 0x00],
            },
        ),
        LdapMessage::new(3, ProtocolOp::AbandonRequest(2)),
        LdapMessage::new(4, ProtocolOp::UnbindRequest),
    ];
    let stream: Vec<u8> = requests.iter().flat_map(encode_message).collect();

    assert_eq!(split_stream(&stream), requests);
}

#[test]
fn test_bind_exchange_preserves_diagnostic_text() {
    let mut response = BindResponse::new(ResultCode::INVALID_CREDENTIALS);
    response.result = response.result.with_diagnostic("bad password for cn=admin");
    let reply = LdapMessage::new(1, ProtocolOp::BindResponse(response.clone()));

    let decoded = decode_message(&encode_message(&reply)).expect("decode must succeed");

    assert_eq!(decoded.message_id, 1);
    assert_eq!(decoded.op, ProtocolOp::BindResponse(response));
}

#[test]
fn test_large_payload_uses_long_form_length() {
    let payload = vec![0x5A; 70_000];
    let msg = LdapMessage::new(
        12,
        ProtocolOp::Other {
            tag: tags::SEARCH_RESULT_ENTRY,
            payload: payload.clone(),
        },
    );
    let bytes = encode_message(&msg);

    // 0x30, 0x83, then three length octets
    assert_eq!(&bytes[..2], &[0x30, 0x83]);
    assert_eq!(frame_length(&bytes, DEFAULT_MAX_MESSAGE_SIZE), Ok(Some(bytes.len())));
    assert_eq!(frame_length(&bytes, 1024), Err(ProtocolError::FrameTooLarge { size: bytes.len(), max: 1024 }));
    assert_eq!(decode_message(&bytes).expect("decode must succeed"), msg);
}

#[test]
fn test_start_tls_exchange() {
    let request = LdapMessage::new(
        1,
        ProtocolOp::ExtendedRequest(ExtendedRequest {
            name: OID_START_TLS.to_string(),
            value: None,
        }),
    );
    let decoded = decode_message(&encode_message(&request)).expect("decode must succeed");
    assert!(decoded.is_start_tls());

    let reply = LdapMessage::new(
        decoded.message_id,
        ProtocolOp::ExtendedResponse(ExtendedResponse::new(ResultCode::SUCCESS).with_name(OID_START_TLS)),
    );
    let decoded_reply = decode_message(&encode_message(&reply)).expect("decode must succeed");
    assert!(!decoded_reply.is_notice_of_disconnection());
    assert_eq!(decoded_reply, reply);
}

#[test]
fn test_notice_of_disconnection_is_unsolicited() {
    let notice = LdapMessage::notice_of_disconnection("server is about to stop");
    let decoded = decode_message(&encode_message(&notice)).expect("decode must succeed");

    assert_eq!(decoded.message_id, 0);
    match decoded.op {
        ProtocolOp::ExtendedResponse(ExtendedResponse { result, name, .. }) => {
            assert_eq!(result, LdapResult::new(ResultCode::UNWILLING_TO_PERFORM).with_diagnostic("server is about to stop"));
            assert_eq!(name.as_deref(), Some(OID_NOTICE_OF_DISCONNECTION));
        }
        other => panic!("expected ExtendedResponse, got {other:?}"),
    }
}

#[test]
fn test_garbage_is_rejected_at_the_framing_layer() {
    let garbage = b"GET / HTTP/1.1\r\n\r\n";
    assert_eq!(
        frame_length(garbage, DEFAULT_MAX_MESSAGE_SIZE),
        Err(ProtocolError::NotAnEnvelope(b'G'))
    );
}
