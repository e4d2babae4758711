use alloy_primitives::U256;
use serde::Deserialize;

use super::{AuthenticatorAssertionResponse, WebAuthnError};

pub(crate) const CLIENT_DATA_TYPE_GET: &str = "webauthn.get";
const CLIENT_DATA_PREFIX: &str = r#"{"type":"webauthn.get","challenge":""#;

#[derive(Deserialize)]
struct ClientData<'a> {
    #[serde(rename = "type")]
    ty: &'a str,
    challenge: &'a str,
}

/// clientDataJSON as the simulator emits it and as a verifier rebuilds it.
pub fn client_data_json(challenge_b64url: &str, client_data_fields: &str) -> String {
    format!("{CLIENT_DATA_PREFIX}{challenge_b64url}\",{client_data_fields}}}")
}

/// Return the clientDataJSON members that follow the challenge, byte for byte.
///
/// For `{"type":"webauthn.get","challenge":"…","origin":"https://x","crossOrigin":false}`
/// this yields `"origin":"https://x","crossOrigin":false`.
pub fn extract_client_data_fields(
    response: &AuthenticatorAssertionResponse,
) -> Result<String, WebAuthnError> {
    let json = std::str::from_utf8(&response.client_data_json)
        .map_err(|_| malformed("clientDataJSON is not UTF-8"))?;
    let parsed: ClientData<'_> =
        serde_json::from_str(json).map_err(|e| malformed(format!("clientDataJSON: {e}")))?;
    if parsed.ty != CLIENT_DATA_TYPE_GET {
        return Err(malformed(format!("unexpected type {:?}", parsed.ty)));
    }

    let rest = json
        .strip_prefix(CLIENT_DATA_PREFIX)
        .ok_or_else(|| malformed("clientDataJSON does not start with type and challenge"))?;
    let challenge_len = rest
        .find('"')
        .ok_or_else(|| malformed("unterminated challenge"))?;
    let challenge = &rest[..challenge_len];
    if challenge != parsed.challenge
        || !challenge.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(malformed("challenge is not base64url"));
    }

    let fields = rest[challenge_len + 1..]
        .strip_prefix(',')
        .and_then(|f| f.strip_suffix('}'))
        .ok_or_else(|| malformed("no members follow the challenge"))?;
    Ok(fields.to_string())
}

/// Decode the DER assertion signature into the `(r, s)` pair an on-chain verifier takes.
pub fn extract_signature(
    response: &AuthenticatorAssertionResponse,
) -> Result<(U256, U256), WebAuthnError> {
    let (r, s) = parse_der_signature(&response.signature)?;
    Ok((U256::from_be_bytes(r), U256::from_be_bytes(s)))
}

/// Parse `SEQUENCE { INTEGER r, INTEGER s }` into two left-padded 32-byte values.
pub fn parse_der_signature(der: &[u8]) -> Result<([u8; 32], [u8; 32]), WebAuthnError> {
    if der.len() < 2 || der[0] != 0x30 {
        return Err(invalid("outer SEQUENCE tag missing"));
    }
    let body_len = der[1] as usize;
    if body_len & 0x80 != 0 || der.len() != 2 + body_len {
        return Err(invalid(format!("SEQUENCE length {body_len} does not match {} bytes", der.len() - 2)));
    }
    let body = &der[2..];
    let (r, rest) = der_integer(body)?;
    let (s, rest) = der_integer(rest)?;
    if !rest.is_empty() {
        return Err(invalid(format!("{} trailing bytes after s", rest.len())));
    }
    Ok((r, s))
}

fn der_integer(input: &[u8]) -> Result<([u8; 32], &[u8]), WebAuthnError> {
    if input.len() < 2 || input[0] != 0x02 {
        return Err(invalid("INTEGER tag missing"));
    }
    let len = input[1] as usize;
    if len == 0 || len > 33 {
        return Err(invalid(format!("INTEGER length {len}")));
    }
    if input.len() < 2 + len {
        return Err(invalid("INTEGER truncated"));
    }
    let mut value = &input[2..2 + len];
    // Sign byte in front of a value whose top bit is set.
    if value.len() > 1 && value[0] == 0 {
        value = &value[1..];
    }
    if value.len() > 32 {
        return Err(invalid("INTEGER wider than 32 bytes"));
    }
    let mut out = [0u8; 32];
    out[32 - value.len()..].copy_from_slice(value);
    Ok((out, &input[2 + len..]))
}

fn malformed(msg: impl Into<String>) -> WebAuthnError {
    WebAuthnError::MalformedClientData(msg.into())
}

fn invalid(msg: impl Into<String>) -> WebAuthnError {
    WebAuthnError::InvalidSignatureEncoding(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::authenticator_data::encode_der_ecdsa;
    use proptest::prelude::*;

    fn assertion(client_data: &str, signature: Vec<u8>) -> AuthenticatorAssertionResponse {
        AuthenticatorAssertionResponse {
            authenticator_data: vec![0; 37],
            client_data_json: client_data.as_bytes().to_vec(),
            signature,
            user_handle: vec![],
        }
    }

    #[test]
    fn test_client_data_fields_verbatim() {
        let json = r#"{"type":"webauthn.get","challenge":"3q2-7w","origin":"https://safe.global","crossOrigin":false}"#;
        let fields = extract_client_data_fields(&assertion(json, vec![])).unwrap();
        assert_eq!(fields, r#""origin":"https://safe.global","crossOrigin":false"#);
        assert_eq!(client_data_json("3q2-7w", &fields), json);
    }

    #[test]
    fn test_client_data_fields_keep_extension_members() {
        let json = r#"{"type":"webauthn.get","challenge":"AA","origin":"https://a.b","crossOrigin":false,"other_keys_can_be_added_here":"do not compare clientDataJSON against a template"}"#;
        let fields = extract_client_data_fields(&assertion(json, vec![])).unwrap();
        assert!(fields.ends_with(r#""do not compare clientDataJSON against a template""#));
        assert_eq!(client_data_json("AA", &fields), json);
    }

    #[test]
    fn test_client_data_wrong_type_rejected() {
        let json = r#"{"type":"webauthn.create","challenge":"AA","origin":"https://a.b"}"#;
        let err = extract_client_data_fields(&assertion(json, vec![])).unwrap_err();
        assert!(matches!(err, WebAuthnError::MalformedClientData(_)));
    }

    #[test]
    fn test_client_data_reordered_members_rejected() {
        let json = r#"{"challenge":"AA","type":"webauthn.get","origin":"https://a.b"}"#;
        let err = extract_client_data_fields(&assertion(json, vec![])).unwrap_err();
        assert!(matches!(err, WebAuthnError::MalformedClientData(_)));
    }

    #[test]
    fn test_client_data_without_trailing_members_rejected() {
        let json = r#"{"type":"webauthn.get","challenge":"AA"}"#;
        let err = extract_client_data_fields(&assertion(json, vec![])).unwrap_err();
        assert!(matches!(err, WebAuthnError::MalformedClientData(_)));
    }

    #[test]
    fn test_der_high_bit_values_unpadded() {
        let mut raw = [0u8; 64];
        raw[..32].copy_from_slice(&[0xFF; 32]);
        raw[63] = 0x01;
        let (r, s) = parse_der_signature(&encode_der_ecdsa(&raw)).unwrap();
        assert_eq!(r, [0xFF; 32]);
        assert_eq!(s[31], 0x01);
        assert_eq!(&s[..31], &[0u8; 31]);
    }

    #[test]
    fn test_der_wrong_outer_tag() {
        let mut der = encode_der_ecdsa(&[1u8; 64]);
        der[0] = 0x31;
        let err = parse_der_signature(&der).unwrap_err();
        assert!(matches!(err, WebAuthnError::InvalidSignatureEncoding(_)));
    }

    #[test]
    fn test_der_integer_too_long() {
        // r claims 34 bytes
        let mut der = vec![0x30, 0x00, 0x02, 34];
        der.extend_from_slice(&[0x01; 34]);
        der.extend_from_slice(&[0x02, 0x01, 0x01]);
        der[1] = (der.len() - 2) as u8;
        let err = parse_der_signature(&der).unwrap_err();
        assert!(matches!(err, WebAuthnError::InvalidSignatureEncoding(m) if m.contains("34")));
    }

    #[test]
    fn test_der_33_bytes_without_sign_byte_rejected() {
        let mut der = vec![0x30, 0x00, 0x02, 33];
        der.extend_from_slice(&[0x01; 33]);
        der.extend_from_slice(&[0x02, 0x01, 0x01]);
        der[1] = (der.len() - 2) as u8;
        let err = parse_der_signature(&der).unwrap_err();
        assert!(matches!(err, WebAuthnError::InvalidSignatureEncoding(_)));
    }

    #[test]
    fn test_der_trailing_garbage_rejected() {
        let mut der = encode_der_ecdsa(&[7u8; 64]);
        der.push(0x00);
        der[1] += 1;
        let err = parse_der_signature(&der).unwrap_err();
        assert!(matches!(err, WebAuthnError::InvalidSignatureEncoding(_)));
    }

    proptest! {
        #[test]
        fn der_parse_is_left_inverse_of_encode(r in any::<[u8; 32]>(), s in any::<[u8; 32]>()) {
            let mut raw = [0u8; 64];
            raw[..32].copy_from_slice(&r);
            raw[32..].copy_from_slice(&s);
            let der = encode_der_ecdsa(&raw);
            let response = assertion("{}", der);
            let (pr, ps) = extract_signature(&response).unwrap();
            prop_assert_eq!(pr, U256::from_be_bytes(r));
            prop_assert_eq!(ps, U256::from_be_bytes(s));
        }
    }
}
