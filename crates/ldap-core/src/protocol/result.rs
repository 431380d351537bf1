//! LDAP result codes and the `LDAPResult` component shared by most responses.

use std::fmt;

use crate::protocol::ber::{self, Reader, CLASS_CONTEXT, CONSTRUCTED, TAG_ENUMERATED, TAG_OCTET_STRING};
use crate::protocol::codec::ProtocolError;

/// Context tag of the optional `referral [3]` component.
const TAG_REFERRAL: u8 = CLASS_CONTEXT | CONSTRUCTED | 0x03;

/// An LDAP `resultCode` (RFC 4511 §4.1.9).
///
/// The set of codes is open-ended (extensions may define new ones), so this
/// is a newtype over the raw value with named constants for the standard
/// codes rather than a closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const SUCCESS: Self = Self(0);
    pub const OPERATIONS_ERROR: Self = Self(1);
    pub const PROTOCOL_ERROR: Self = Self(2);
    pub const TIME_LIMIT_EXCEEDED: Self = Self(3);
    pub const SIZE_LIMIT_EXCEEDED: Self = Self(4);
    pub const COMPARE_FALSE: Self = Self(5);
    pub const COMPARE_TRUE: Self = Self(6);
    pub const AUTH_METHOD_NOT_SUPPORTED: Self = Self(7);
    pub const STRONGER_AUTH_REQUIRED: Self = Self(8);
    pub const REFERRAL: Self = Self(10);
    pub const ADMIN_LIMIT_EXCEEDED: Self = Self(11);
    pub const UNAVAILABLE_CRITICAL_EXTENSION: Self = Self(12);
    pub const CONFIDENTIALITY_REQUIRED: Self = Self(13);
    pub const SASL_BIND_IN_PROGRESS: Self = Self(14);
    pub const NO_SUCH_ATTRIBUTE: Self = Self(16);
    pub const UNDEFINED_ATTRIBUTE_TYPE: Self = Self(17);
    pub const INAPPROPRIATE_MATCHING: Self = Self(18);
    pub const CONSTRAINT_VIOLATION: Self = Self(19);
    pub const ATTRIBUTE_OR_VALUE_EXISTS: Self = Self(20);
    pub const INVALID_ATTRIBUTE_SYNTAX: Self = Self(21);
    pub const NO_SUCH_OBJECT: Self = Self(32);
    pub const ALIAS_PROBLEM: Self = Self(33);
    pub const INVALID_DN_SYNTAX: Self = Self(34);
    pub const ALIAS_DEREFERENCING_PROBLEM: Self = Self(36);
    pub const INAPPROPRIATE_AUTHENTICATION: Self = Self(48);
    pub const INVALID_CREDENTIALS: Self = Self(49);
    pub const INSUFFICIENT_ACCESS_RIGHTS: Self = Self(50);
    pub const BUSY: Self = Self(51);
    pub const UNAVAILABLE: Self = Self(52);
    pub const UNWILLING_TO_PERFORM: Self = Self(53);
    pub const LOOP_DETECT: Self = Self(54);
    pub const NAMING_VIOLATION: Self = Self(64);
    pub const OBJECT_CLASS_VIOLATION: Self = Self(65);
    pub const NOT_ALLOWED_ON_NON_LEAF: Self = Self(66);
    pub const NOT_ALLOWED_ON_RDN: Self = Self(67);
    pub const ENTRY_ALREADY_EXISTS: Self = Self(68);
    pub const OBJECT_CLASS_MODS_PROHIBITED: Self = Self(69);
    pub const AFFECTS_MULTIPLE_DSAS: Self = Self(71);
    pub const OTHER: Self = Self(80);

    /// Returns `true` for `success (0)`.
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// The RFC 4511 name of a standard code, or `None` for unknown values.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "success",
            1 => "operationsError",
            2 => "protocolError",
            3 => "timeLimitExceeded",
            4 => "sizeLimitExceeded",
            5 => "compareFalse",
            6 => "compareTrue",
            7 => "authMethodNotSupported",
            8 => "strongerAuthRequired",
            10 => "referral",
            11 => "adminLimitExceeded",
            12 => "unavailableCriticalExtension",
            13 => "confidentialityRequired",
            14 => "saslBindInProgress",
            16 => "noSuchAttribute",
            17 => "undefinedAttributeType",
            18 => "inappropriateMatching",
            19 => "constraintViolation",
            20 => "attributeOrValueExists",
            21 => "invalidAttributeSyntax",
            32 => "noSuchObject",
            33 => "aliasProblem",
            34 => "invalidDNSyntax",
            36 => "aliasDereferencingProblem",
            48 => "inappropriateAuthentication",
            49 => "invalidCredentials",
            50 => "insufficientAccessRights",
            51 => "busy",
            52 => "unavailable",
            53 => "unwillingToPerform",
            54 => "loopDetect",
            64 => "namingViolation",
            65 => "objectClassViolation",
            66 => "notAllowedOnNonLeaf",
            67 => "notAllowedOnRDN",
            68 => "entryAlreadyExists",
            69 => "objectClassModsProhibited",
            71 => "affectsMultipleDSAs",
            80 => "other",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "resultCode {}", self.0),
        }
    }
}

/// The `LDAPResult` components carried by bind, modify, search-done and
/// extended responses.
///
/// Referrals are skipped on decode and never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub diagnostic_message: String,
}

impl LdapResult {
    /// A result with the given code and empty DN / diagnostic.
    pub fn new(code: ResultCode) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            diagnostic_message: String::new(),
        }
    }

    /// Shorthand for `LdapResult::new(ResultCode::SUCCESS)`.
    pub fn success() -> Self {
        Self::new(ResultCode::SUCCESS)
    }

    #[must_use]
    pub fn with_diagnostic(mut self, message: impl Into<String>) -> Self {
        self.diagnostic_message = message.into();
        self
    }

    #[must_use]
    pub fn with_matched_dn(mut self, dn: impl Into<String>) -> Self {
        self.matched_dn = dn.into();
        self
    }

    pub(crate) fn encode_components(&self, out: &mut Vec<u8>) {
        ber::write_integer(out, TAG_ENUMERATED, i64::from(self.code.0));
        ber::write_tlv(out, TAG_OCTET_STRING, self.matched_dn.as_bytes());
        ber::write_tlv(out, TAG_OCTET_STRING, self.diagnostic_message.as_bytes());
    }

    pub(crate) fn decode_components(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let raw_code = reader.read_integer(TAG_ENUMERATED)?;
        let code = u32::try_from(raw_code).map_err(|_| ProtocolError::IntegerOutOfRange(raw_code))?;
        let matched_dn = reader.read_string(TAG_OCTET_STRING)?;
        let diagnostic_message = reader.read_string(TAG_OCTET_STRING)?;
        reader.read_optional(TAG_REFERRAL)?;
        Ok(Self {
            code: ResultCode(code),
            matched_dn,
            diagnostic_message,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_display_includes_name_and_value() {
        assert_eq!(ResultCode::INVALID_CREDENTIALS.to_string(), "invalidCredentials (49)");
        assert_eq!(ResultCode(4242).to_string(), "resultCode 4242");
    }

    #[test]
    fn test_only_zero_is_success() {
        assert!(ResultCode::SUCCESS.is_success());
        assert!(!ResultCode::COMPARE_TRUE.is_success());
    }

    #[test]
    fn test_ldap_result_components_decode_after_encode() {
        let result = LdapResult::new(ResultCode::NO_SUCH_OBJECT)
            .with_matched_dn("dc=example,dc=com")
            .with_diagnostic("entry not found");
        let mut out = Vec::new();
        result.encode_components(&mut out);

        let mut reader = Reader::new(&out);
        let decoded = LdapResult::decode_components(&mut reader).unwrap();
        assert_eq!(decoded, result);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_ldap_result_decode_skips_referral() {
        let mut out = Vec::new();
        LdapResult::new(ResultCode::REFERRAL).encode_components(&mut out);
        ber::write_constructed(&mut out, TAG_REFERRAL, |refs| {
            ber::write_tlv(refs, TAG_OCTET_STRING, b"ldap://other.example.com/");
        });

        let mut reader = Reader::new(&out);
        let decoded = LdapResult::decode_components(&mut reader).unwrap();
        assert_eq!(decoded.code, ResultCode::REFERRAL);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_negative_result_code_is_rejected() {
        let mut out = Vec::new();
        ber::write_integer(&mut out, TAG_ENUMERATED, -1);
        ber::write_tlv(&mut out, TAG_OCTET_STRING, b"");
        ber::write_tlv(&mut out, TAG_OCTET_STRING, b"");
        let mut reader = Reader::new(&out);
        assert_eq!(
            LdapResult::decode_components(&mut reader),
            Err(ProtocolError::IntegerOutOfRange(-1))
        );
    }
}
