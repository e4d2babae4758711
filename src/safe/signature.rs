use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolValue;

use super::contracts::SafeAddresses;
use super::signer::{SignaturePayload, SignerIdentity, SignerSignaturePair, WebAuthnSignatureData};
use super::SignatureError;
use crate::webauthn::WebAuthnPublicKey;

const STATIC_PART_LEN: usize = 65;
const VALIDITY_LEN: usize = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatOptions {
    /// The operation also deploys the account (nonce 0); no owner state exists on-chain yet.
    pub is_init:       bool,
    pub valid_after:   u64,
    pub valid_until:   u64,
    /// Passkey the shared signer is configured with on a deployed account. It
    /// signs through the shared signer instead of its own verifier.
    pub shared_signer: Option<WebAuthnPublicKey>,
}

/// Merge signer/signature pairs into the Safe 4337 module signature blob.
///
/// Layout: `validAfter(6) || validUntil(6) || static parts (65 bytes each) || dynamic parts`.
/// EOA signatures are inlined. WebAuthn signatures are contract signatures:
/// `r` = verifier address, `s` = offset of the dynamic entry (from the first
/// static part), `v` = 0; the dynamic entry is `len(32) || abi.encode(bytes
/// authenticatorData, string clientDataFields, uint256[2] rs)`, followed by the
/// key's `x || y` when `is_init`. A passkey behind the shared signer (every
/// passkey while `is_init`, afterwards the one in `shared_signer`) names the
/// shared signer as verifier.
pub fn format_signatures(
    pairs: &[SignerSignaturePair],
    options: &FormatOptions,
    addresses: &SafeAddresses,
) -> Result<Bytes, SignatureError> {
    if pairs.is_empty() {
        return Err(SignatureError::NoSignatures);
    }

    let mut sorted: Vec<&SignerSignaturePair> = pairs.iter().collect();
    sorted.sort_by(|a, b| {
        let ka = (verifier_address(&a.signer, options, addresses), a.signer);
        let kb = (verifier_address(&b.signer, options, addresses), b.signer);
        ka.cmp(&kb)
    });
    if let Some(pair) = sorted.windows(2).find(|w| w[0].signer == w[1].signer) {
        return Err(SignatureError::DuplicateSigner(pair[0].signer.owner_address()));
    }

    let static_len = STATIC_PART_LEN * sorted.len();
    let mut static_part = Vec::with_capacity(static_len);
    let mut dynamic_part = Vec::new();

    for pair in sorted {
        match (&pair.signer, &pair.signature) {
            (SignerIdentity::Eoa(_), SignaturePayload::Eoa(rsv)) => static_part.extend_from_slice(rsv),
            (SignerIdentity::WebAuthn(key), SignaturePayload::WebAuthn(data)) => {
                let mut payload = encode_webauthn_signature(data);
                if options.is_init {
                    payload.extend_from_slice(&key.x_bytes());
                    payload.extend_from_slice(&key.y_bytes());
                }
                let offset = U256::from(static_len + dynamic_part.len());
                let verifier = verifier_address(&pair.signer, options, addresses);

                static_part.extend_from_slice(verifier.into_word().as_slice());
                static_part.extend_from_slice(&offset.to_be_bytes::<32>());
                static_part.push(0x00);

                dynamic_part.extend_from_slice(&U256::from(payload.len()).to_be_bytes::<32>());
                dynamic_part.extend_from_slice(&payload);
            }
            (signer, payload) => {
                return Err(SignatureError::UnknownSignerType(format!(
                    "{} signer paired with {} signature",
                    kind(signer),
                    match payload {
                        SignaturePayload::Eoa(_) => "EOA",
                        SignaturePayload::WebAuthn(_) => "WebAuthn",
                    }
                )));
            }
        }
    }

    let mut out = Vec::with_capacity(2 * VALIDITY_LEN + static_part.len() + dynamic_part.len());
    out.extend_from_slice(&options.valid_after.to_be_bytes()[8 - VALIDITY_LEN..]);
    out.extend_from_slice(&options.valid_until.to_be_bytes()[8 - VALIDITY_LEN..]);
    out.extend_from_slice(&static_part);
    out.extend_from_slice(&dynamic_part);
    Ok(out.into())
}

/// `abi.encode(bytes authenticatorData, string clientDataFields, uint256[2] rs)`
pub fn encode_webauthn_signature(data: &WebAuthnSignatureData) -> Vec<u8> {
    (data.authenticator_data.clone(), data.client_data_fields.clone(), [data.r, data.s]).abi_encode_params()
}

/// Placeholder signature with the exact shape the real one will have, for gas estimation.
pub fn dummy_signatures(
    expected_signers: &[SignerIdentity],
    options: &FormatOptions,
    addresses: &SafeAddresses,
) -> Result<Bytes, SignatureError> {
    let pairs: Vec<SignerSignaturePair> = expected_signers
        .iter()
        .map(|signer| SignerSignaturePair {
            signer: *signer,
            signature: match signer {
                SignerIdentity::Eoa(_) => {
                    let mut rsv = [0xEEu8; 65];
                    rsv[32..64].fill(0x77);
                    rsv[64] = 28;
                    SignaturePayload::Eoa(rsv)
                }
                SignerIdentity::WebAuthn(_) => {
                    let mut auth_data = vec![0xFEu8; 37];
                    auth_data[32] = 0x05;
                    SignaturePayload::WebAuthn(WebAuthnSignatureData {
                        authenticator_data: auth_data.into(),
                        client_data_fields: r#""origin":"https://safe.global","crossOrigin":false"#.to_string(),
                        r: U256::from_be_bytes([0xECu8; 32]),
                        s: U256::from_be_bytes([0x7Du8; 32]),
                    })
                }
            },
        })
        .collect();
    format_signatures(&pairs, options, addresses)
}

/// Address placed in `r` for a contract signature, or the EOA itself. This is
/// also the address the signer is listed under among the Safe owners.
pub fn verifier_address(signer: &SignerIdentity, options: &FormatOptions, addresses: &SafeAddresses) -> Address {
    match signer {
        SignerIdentity::Eoa(address) => *address,
        SignerIdentity::WebAuthn(key) if options.is_init || options.shared_signer == Some(*key) => {
            addresses.webauthn_shared_signer
        }
        SignerIdentity::WebAuthn(_) => signer.owner_address(),
    }
}

fn kind(signer: &SignerIdentity) -> &'static str {
    match signer {
        SignerIdentity::Eoa(_) => "EOA",
        SignerIdentity::WebAuthn(_) => "WebAuthn",
    }
}
