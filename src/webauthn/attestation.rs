use ciborium::value::Value;

use super::authenticator_data::{
    AAGUID_LEN, AUTH_DATA_HEADER_LEN, FLAG_AT, RP_ID_HASH_LEN, cbor_bytes, cbor_get, cbor_get_str, cbor_int,
    cbor_map,
};
use super::{AuthenticatorAttestationResponse, WebAuthnError, WebAuthnPublicKey};

/// Build a "none" attestation object: `{"fmt": "none", "attStmt": {}, "authData": ...}`.
pub(crate) fn build_attestation_object(auth_data: &[u8]) -> Result<Vec<u8>, WebAuthnError> {
    let map = Value::Map(vec![
        (Value::Text("fmt".to_string()), Value::Text("none".to_string())),
        (Value::Text("attStmt".to_string()), Value::Map(vec![])),
        (Value::Text("authData".to_string()), Value::Bytes(auth_data.to_vec())),
    ]);
    let mut buf = Vec::new();
    ciborium::into_writer(&map, &mut buf).map_err(|e| WebAuthnError::Cbor(e.to_string()))?;
    Ok(buf)
}

/// Recover the credential public key from an attestation response.
pub fn extract_public_key(
    response: &AuthenticatorAttestationResponse,
) -> Result<WebAuthnPublicKey, WebAuthnError> {
    let value: Value = ciborium::from_reader(response.attestation_object.as_slice())
        .map_err(|e| malformed(format!("attestation object is not CBOR: {e}")))?;
    let map = cbor_map(&value).ok_or_else(|| malformed("attestation object is not a map"))?;
    let auth_data = cbor_get_str(map, "authData")
        .and_then(cbor_bytes)
        .ok_or_else(|| malformed("missing authData"))?;
    parse_attested_public_key(auth_data)
}

/// Walk authenticatorData to the attested credential data and decode its COSE key.
pub fn parse_attested_public_key(auth_data: &[u8]) -> Result<WebAuthnPublicKey, WebAuthnError> {
    let fixed_end = AUTH_DATA_HEADER_LEN + AAGUID_LEN + 2;
    if auth_data.len() < fixed_end {
        return Err(malformed(format!("authData is {} bytes, need at least {fixed_end}", auth_data.len())));
    }
    let flags = auth_data[RP_ID_HASH_LEN];
    if flags & FLAG_AT == 0 {
        return Err(malformed("AT flag not set"));
    }

    let cred_id_len =
        u16::from_be_bytes([auth_data[fixed_end - 2], auth_data[fixed_end - 1]]) as usize;
    let cose_start = fixed_end + cred_id_len;
    if auth_data.len() <= cose_start {
        return Err(malformed(format!("credential id length {cred_id_len} overruns authData")));
    }

    // Reads exactly one CBOR item; extension data after the key is left untouched.
    let cose: Value = ciborium::from_reader(&auth_data[cose_start..])
        .map_err(|e| malformed(format!("COSE key is not CBOR: {e}")))?;
    let key = cbor_map(&cose).ok_or_else(|| malformed("COSE key is not a map"))?;

    let expect = |label: i64, want: i128, what: &str| -> Result<(), WebAuthnError> {
        match cbor_get(key, label).and_then(cbor_int) {
            Some(v) if v == want => Ok(()),
            other => Err(malformed(format!("COSE {what} is {other:?}, expected {want}"))),
        }
    };
    expect(1, 2, "kty")?;
    expect(3, -7, "alg")?;
    expect(-1, 1, "crv")?;

    let coordinate = |label: i64, name: &str| -> Result<[u8; 32], WebAuthnError> {
        let bytes = cbor_get(key, label)
            .and_then(cbor_bytes)
            .ok_or_else(|| malformed(format!("COSE key missing {name}")))?;
        bytes
            .try_into()
            .map_err(|_| malformed(format!("COSE {name} is {} bytes, expected 32", bytes.len())))
    };
    let x = coordinate(-2, "x")?;
    let y = coordinate(-3, "y")?;

    Ok(WebAuthnPublicKey::from_coordinates(&x, &y))
}

fn malformed(msg: impl Into<String>) -> WebAuthnError {
    WebAuthnError::MalformedAttestation(msg.into())
}
