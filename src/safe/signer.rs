use std::cmp::Ordering;

use alloy_primitives::{Address, Bytes, U256, keccak256};
use serde::{Deserialize, Serialize};

use super::SignatureError;
use crate::webauthn::{
    AuthenticatorAssertionResponse, WebAuthnError, WebAuthnPublicKey, extract_client_data_fields, extract_signature,
};

/// Who may sign for a Safe: a plain EOA or a WebAuthn (P-256) key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignerIdentity {
    Eoa(Address),
    WebAuthn(WebAuthnPublicKey),
}

impl SignerIdentity {
    /// Address under which the signer appears in the Safe owner list once the
    /// account exists: the EOA itself, or the P-256 verifier derived from the key.
    pub fn owner_address(&self) -> Address {
        match self {
            Self::Eoa(address) => *address,
            Self::WebAuthn(key) => webauthn_signer_address(key),
        }
    }

    pub fn is_webauthn(&self) -> bool {
        matches!(self, Self::WebAuthn(_))
    }

    fn sort_key(&self) -> (Address, u8, [u8; 64]) {
        match self {
            Self::Eoa(address) => (*address, 0, [0u8; 64]),
            Self::WebAuthn(key) => {
                let mut coords = [0u8; 64];
                coords[..32].copy_from_slice(&key.x_bytes());
                coords[32..].copy_from_slice(&key.y_bytes());
                (webauthn_signer_address(key), 1, coords)
            }
        }
    }
}

/// Owner addresses compare as 160-bit big-endian integers; the variant and key
/// bytes only break ties so the order stays total.
impl Ord for SignerIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for SignerIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<Address> for SignerIdentity {
    fn from(address: Address) -> Self {
        Self::Eoa(address)
    }
}

impl From<WebAuthnPublicKey> for SignerIdentity {
    fn from(key: WebAuthnPublicKey) -> Self {
        Self::WebAuthn(key)
    }
}

/// Untyped identities: 20 bytes is an EOA, 64 bytes is `x || y`.
impl TryFrom<&[u8]> for SignerIdentity {
    type Error = SignatureError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        match bytes.len() {
            20 => Ok(Self::Eoa(Address::from_slice(bytes))),
            64 => Ok(Self::WebAuthn(WebAuthnPublicKey {
                x: U256::from_be_slice(&bytes[..32]),
                y: U256::from_be_slice(&bytes[32..]),
            })),
            len => Err(SignatureError::UnknownSignerType(format!("{len}-byte signer"))),
        }
    }
}

/// Deterministic verifier address for a WebAuthn owner: the low 20 bytes of
/// `keccak256(x || y)`.
pub fn webauthn_signer_address(key: &WebAuthnPublicKey) -> Address {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(&key.x_bytes());
    preimage[32..].copy_from_slice(&key.y_bytes());
    Address::from_slice(&keccak256(preimage)[12..])
}

/// Signature material produced by a WebAuthn assertion, ready for aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebAuthnSignatureData {
    pub authenticator_data: Bytes,
    pub client_data_fields: String,
    pub r: U256,
    pub s: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignaturePayload {
    /// `r || s || v`, v in {27, 28}.
    Eoa([u8; 65]),
    WebAuthn(WebAuthnSignatureData),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerSignaturePair {
    pub signer:    SignerIdentity,
    pub signature: SignaturePayload,
}

impl SignerSignaturePair {
    pub fn eoa(address: Address, signature: [u8; 65]) -> Self {
        Self { signer: SignerIdentity::Eoa(address), signature: SignaturePayload::Eoa(signature) }
    }

    pub fn webauthn(key: WebAuthnPublicKey, data: WebAuthnSignatureData) -> Self {
        Self { signer: SignerIdentity::WebAuthn(key), signature: SignaturePayload::WebAuthn(data) }
    }

    /// Pair a passkey with the signature material of one of its assertions.
    pub fn from_assertion(
        key: WebAuthnPublicKey,
        response: &AuthenticatorAssertionResponse,
    ) -> Result<Self, WebAuthnError> {
        let client_data_fields = extract_client_data_fields(response)?;
        let (r, s) = extract_signature(response)?;
        Ok(Self::webauthn(
            key,
            WebAuthnSignatureData {
                authenticator_data: response.authenticator_data.clone().into(),
                client_data_fields,
                r,
                s,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(x: u64, y: u64) -> WebAuthnPublicKey {
        WebAuthnPublicKey { x: U256::from(x), y: U256::from(y) }
    }

    #[test]
    fn test_parse_untyped_signers() {
        let eoa = SignerIdentity::try_from(&[0x11u8; 20][..]).unwrap();
        assert_eq!(eoa, SignerIdentity::Eoa(Address::repeat_byte(0x11)));

        let mut raw = [0u8; 64];
        raw[31] = 7;
        raw[63] = 9;
        let passkey = SignerIdentity::try_from(&raw[..]).unwrap();
        assert_eq!(passkey, SignerIdentity::WebAuthn(key(7, 9)));

        let err = SignerIdentity::try_from(&[0u8; 33][..]).unwrap_err();
        assert!(matches!(err, SignatureError::UnknownSignerType(_)));
    }

    #[test]
    fn test_order_follows_owner_address() {
        let passkey = SignerIdentity::WebAuthn(key(1, 2));
        let derived = passkey.owner_address();
        let below = SignerIdentity::Eoa(Address::ZERO);
        let above = SignerIdentity::Eoa(Address::repeat_byte(0xFF));
        assert!(below < passkey);
        assert!(passkey < above);
        assert_eq!(SignerIdentity::Eoa(derived).cmp(&passkey), Ordering::Less);
    }

    #[test]
    fn test_owner_address_is_stable() {
        let a = SignerIdentity::WebAuthn(key(5, 6));
        assert_eq!(a.owner_address(), webauthn_signer_address(&key(5, 6)));
        assert_ne!(a.owner_address(), SignerIdentity::WebAuthn(key(6, 5)).owner_address());
    }
}
