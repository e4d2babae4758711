use ciborium::value::Value;

use super::WebAuthnError;

pub(crate) const FLAG_UP: u8 = 0x01;
pub(crate) const FLAG_UV: u8 = 0x04;
pub(crate) const FLAG_AT: u8 = 0x40;

pub(crate) const RP_ID_HASH_LEN: usize = 32;
pub(crate) const AAGUID_LEN: usize = 16;
/// rpIdHash + flags + signCount
pub(crate) const AUTH_DATA_HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;

/// Build authenticatorData for credential creation (AT set, attested credential data appended).
pub(crate) fn build_attested_auth_data(
    rp_id_hash: &[u8; 32],
    flags: u8,
    credential_id: &[u8],
    public_key_x: &[u8; 32],
    public_key_y: &[u8; 32],
) -> Result<Vec<u8>, WebAuthnError> {
    let cose_key = encode_cose_key(public_key_x, public_key_y)?;
    let cred_id_len = u16::try_from(credential_id.len())
        .map_err(|_| WebAuthnError::MalformedAttestation("credential id too long".into()))?;
    let mut data = Vec::with_capacity(AUTH_DATA_HEADER_LEN + AAGUID_LEN + 2 + credential_id.len() + cose_key.len());
    data.extend_from_slice(rp_id_hash);
    data.push(flags | FLAG_AT);
    data.extend_from_slice(&[0, 0, 0, 0]); // signCount = 0
    data.extend_from_slice(&crate::config::AAGUID);
    data.extend_from_slice(&cred_id_len.to_be_bytes());
    data.extend_from_slice(credential_id);
    data.extend_from_slice(&cose_key);
    Ok(data)
}

/// Build authenticatorData for an assertion (no AT flag, exactly 37 bytes).
pub(crate) fn build_assertion_auth_data(rp_id_hash: &[u8; 32], flags: u8, sign_count: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(AUTH_DATA_HEADER_LEN);
    data.extend_from_slice(rp_id_hash);
    data.push(flags & !FLAG_AT);
    data.extend_from_slice(&sign_count.to_be_bytes());
    data
}

/// Encode a P-256 public key as a COSE_Key CBOR map (kty=2, alg=-7, crv=1, x, y).
pub(crate) fn encode_cose_key(x: &[u8; 32], y: &[u8; 32]) -> Result<Vec<u8>, WebAuthnError> {
    let map = Value::Map(vec![
        (Value::Integer(1i64.into()), Value::Integer(2i64.into())),
        (Value::Integer(3i64.into()), Value::Integer((-7i64).into())),
        (Value::Integer((-1i64).into()), Value::Integer(1i64.into())),
        (Value::Integer((-2i64).into()), Value::Bytes(x.to_vec())),
        (Value::Integer((-3i64).into()), Value::Bytes(y.to_vec())),
    ]);
    let mut buf = Vec::new();
    ciborium::into_writer(&map, &mut buf).map_err(|e| WebAuthnError::Cbor(e.to_string()))?;
    Ok(buf)
}

/// DER-encode a raw 64-byte P-256 ECDSA signature (r || s).
pub(crate) fn encode_der_ecdsa(raw: &[u8; 64]) -> Vec<u8> {
    let r_der = der_integer(&raw[0..32]);
    let s_der = der_integer(&raw[32..64]);
    let inner_len = (r_der.len() + s_der.len()) as u8;
    let mut out = vec![0x30u8, inner_len];
    out.extend_from_slice(&r_der);
    out.extend_from_slice(&s_der);
    out
}

fn der_integer(n: &[u8]) -> Vec<u8> {
    let n: Vec<u8> = n.iter().skip_while(|&&b| b == 0).copied().collect();
    let n = if n.is_empty() { vec![0u8] } else { n };
    let pad = n[0] & 0x80 != 0;
    let mut out = vec![0x02u8, n.len() as u8 + pad as u8];
    if pad {
        out.push(0);
    }
    out.extend_from_slice(&n);
    out
}

// CBOR lookup helpers

pub(crate) fn cbor_get<'a>(map: &'a [(Value, Value)], key: i64) -> Option<&'a Value> {
    let target = Value::Integer(key.into());
    map.iter().find(|(k, _)| k == &target).map(|(_, v)| v)
}

pub(crate) fn cbor_get_str<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Text(s) if s == key))
        .map(|(_, v)| v)
}

pub(crate) fn cbor_bytes(v: &Value) -> Option<&[u8]> {
    match v { Value::Bytes(b) => Some(b), _ => None }
}

pub(crate) fn cbor_int(v: &Value) -> Option<i128> {
    match v { Value::Integer(i) => Some(i128::from(*i)), _ => None }
}

pub(crate) fn cbor_map(v: &Value) -> Option<&[(Value, Value)]> {
    match v { Value::Map(m) => Some(m), _ => None }
}
