use alloy_primitives::U256;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

pub const COSE_ALG_ES256: i64 = -7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingParty {
    pub id:   String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id:           Vec<u8>,
    pub name:         String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKeyCredParam {
    pub alg: i64,
}

impl PubKeyCredParam {
    pub const ES256: Self = Self { alg: COSE_ALG_ES256 };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

#[derive(Debug, Clone)]
pub struct CredentialCreationOptions {
    pub rp:                   RelyingParty,
    pub user:                 UserEntity,
    pub challenge:            Vec<u8>,
    pub pub_key_cred_params:  Vec<PubKeyCredParam>,
    pub user_verification:    UserVerification,
}

#[derive(Debug, Clone)]
pub struct CredentialRequestOptions {
    pub challenge:         Vec<u8>,
    pub rp_id:             String,
    pub allow_credentials: Vec<Vec<u8>>,
    pub user_verification: UserVerification,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorAttestationResponse {
    pub client_data_json:   Vec<u8>,
    pub attestation_object: Vec<u8>,
}

/// Result of `CredentialSimulator::create`. Carries no private material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyCredential {
    pub id:       String,
    pub raw_id:   Vec<u8>,
    pub response: AuthenticatorAttestationResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorAssertionResponse {
    pub authenticator_data: Vec<u8>,
    pub client_data_json:   Vec<u8>,
    pub signature:          Vec<u8>,
    pub user_handle:        Vec<u8>,
}

/// Result of `CredentialSimulator::get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionCredential {
    pub id:       String,
    pub raw_id:   Vec<u8>,
    pub response: AuthenticatorAssertionResponse,
}

/// Uncompressed P-256 public key as the two affine coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebAuthnPublicKey {
    pub x: U256,
    pub y: U256,
}

impl WebAuthnPublicKey {
    pub fn from_coordinates(x: &[u8; 32], y: &[u8; 32]) -> Self {
        Self {
            x: U256::from_be_bytes(*x),
            y: U256::from_be_bytes(*y),
        }
    }

    pub fn x_bytes(&self) -> [u8; 32] {
        self.x.to_be_bytes()
    }

    pub fn y_bytes(&self) -> [u8; 32] {
        self.y.to_be_bytes()
    }
}

/// A registered passkey as the account side knows it: where to ask for
/// assertions and which key they verify under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passkey {
    pub credential_id: Vec<u8>,
    pub rp_id:         String,
    pub public_key:    WebAuthnPublicKey,
}

impl Passkey {
    pub fn from_credential(credential: &PublicKeyCredential, rp_id: &str) -> Result<Self, super::WebAuthnError> {
        Ok(Self {
            credential_id: credential.raw_id.clone(),
            rp_id:         rp_id.to_string(),
            public_key:    super::extract_public_key(&credential.response)?,
        })
    }
}

pub fn base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}
