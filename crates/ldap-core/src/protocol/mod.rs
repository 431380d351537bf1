//! Protocol module containing BER primitives, message types and the codec.

pub mod ber;
pub mod codec;
pub mod messages;
pub mod result;

pub use codec::{decode_message, encode_message, frame_length, ProtocolError};
pub use messages::*;
pub use result::{LdapResult, ResultCode};
