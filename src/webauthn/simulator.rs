use p256::ecdsa::{Signature, SigningKey, signature::Signer};
use parking_lot::Mutex;
use rand::Rng;
use sha2::{Digest, Sha256};

use super::assertion::client_data_json;
use super::attestation::build_attestation_object;
use super::authenticator_data::{
    FLAG_UP, FLAG_UV, build_assertion_auth_data, build_attested_auth_data, encode_der_ecdsa,
};
use super::registry::{Credential, CredentialId, CredentialRegistry};
use super::{
    AssertionCredential, AuthenticatorAssertionResponse, AuthenticatorAttestationResponse,
    CredentialCreationOptions, CredentialRequestOptions, PublicKeyCredential, UserVerification,
    WebAuthnError, base64url,
};

/// Software authenticator owned by the test harness.
///
/// `create` and `get` each run entirely under the registry lock, so concurrent
/// callers can never claim the same credential id or observe a half-applied
/// counter update.
#[derive(Debug, Default)]
pub struct CredentialSimulator {
    registry: Mutex<CredentialRegistry>,
}

impl CredentialSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `navigator.credentials.create()`: mint a P-256 passkey and return its attestation.
    pub fn create(&self, options: &CredentialCreationOptions) -> Result<PublicKeyCredential, WebAuthnError> {
        if !options.pub_key_cred_params.iter().any(|p| p.alg == super::COSE_ALG_ES256) {
            return Err(WebAuthnError::UnsupportedAlgorithm);
        }

        let rp_id = &options.rp.id;
        let rp_id_hash: [u8; 32] = Sha256::digest(rp_id.as_bytes()).into();
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(WebAuthnError::Signing("public key is the identity point".into()));
        };
        let mut x_bytes = [0u8; 32];
        let mut y_bytes = [0u8; 32];
        x_bytes.copy_from_slice(x);
        y_bytes.copy_from_slice(y);

        let client_data = serde_json::json!({
            "type": "webauthn.create",
            "challenge": base64url(&options.challenge),
            "origin": origin(rp_id),
            "crossOrigin": false,
        });
        let client_data_json = serde_json::to_vec(&client_data)
            .map_err(|e| WebAuthnError::Signing(e.to_string()))?;

        let mut registry = self.registry.lock();
        let credential_id = fresh_credential_id(&registry);
        let auth_data = build_attested_auth_data(&rp_id_hash, flags(options.user_verification), &credential_id, &x_bytes, &y_bytes)?;
        let attestation_object = build_attestation_object(&auth_data)?;

        let added = registry.add(Credential {
            credential_id,
            rp_id: rp_id.clone(),
            user_id: options.user.id.clone(),
            signing_key,
            sign_count: 0,
        });
        debug_assert!(added, "fresh_credential_id returned a taken id");
        drop(registry);

        tracing::info!(
            cred_id = alloy_primitives::hex::encode(credential_id),
            rp_id = %rp_id,
            user = %options.user.name,
            "Credential created"
        );

        Ok(PublicKeyCredential {
            id: base64url(&credential_id),
            raw_id: credential_id.to_vec(),
            response: AuthenticatorAttestationResponse { client_data_json, attestation_object },
        })
    }

    /// `navigator.credentials.get()`: sign `challenge` with the first allow-listed credential.
    pub fn get(&self, options: &CredentialRequestOptions) -> Result<AssertionCredential, WebAuthnError> {
        let rp_id_hash: [u8; 32] = Sha256::digest(options.rp_id.as_bytes()).into();
        let mut registry = self.registry.lock();

        let credential_id = options
            .allow_credentials
            .iter()
            .find(|id| {
                registry
                    .get_by_id(id)
                    .is_some_and(|c| c.rp_id == options.rp_id)
            })
            .cloned()
            .ok_or(WebAuthnError::CredentialNotFound)?;
        let credential = registry
            .get_by_id_mut(&credential_id)
            .ok_or(WebAuthnError::CredentialNotFound)?;

        let sign_count = credential
            .sign_count
            .checked_add(1)
            .ok_or_else(|| WebAuthnError::Signing("signature counter exhausted".into()))?;
        let auth_data = build_assertion_auth_data(&rp_id_hash, flags(options.user_verification), sign_count);
        let client_data_json = client_data_json(
            &base64url(&options.challenge),
            &format!(r#""origin":"{}","crossOrigin":false"#, origin(&options.rp_id)),
        )
        .into_bytes();

        let mut to_sign = auth_data.clone();
        to_sign.extend_from_slice(&Sha256::digest(&client_data_json));
        let signature: Signature = credential
            .signing_key
            .try_sign(&to_sign)
            .map_err(|e| WebAuthnError::Signing(e.to_string()))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        let mut raw = [0u8; 64];
        raw.copy_from_slice(&signature.to_bytes());

        // Commit only once everything that can fail has succeeded.
        credential.sign_count = sign_count;
        tracing::info!(count = sign_count, rp_id = %credential.rp_id, "Assertion signed");

        Ok(AssertionCredential {
            id: base64url(&credential_id),
            raw_id: credential_id,
            response: AuthenticatorAssertionResponse {
                authenticator_data: auth_data,
                client_data_json,
                signature: encode_der_ecdsa(&raw),
                user_handle: credential.user_id.clone(),
            },
        })
    }

    pub fn credential_count(&self) -> usize {
        self.registry.lock().credential_count()
    }

    pub fn sign_count(&self, credential_id: &[u8]) -> Option<u32> {
        self.registry.lock().sign_count(credential_id)
    }
}

fn fresh_credential_id(registry: &CredentialRegistry) -> CredentialId {
    loop {
        let id: CredentialId = rand::thread_rng().r#gen();
        if !registry.contains(&id) {
            return id;
        }
    }
}

fn flags(user_verification: UserVerification) -> u8 {
    match user_verification {
        UserVerification::Discouraged => FLAG_UP,
        UserVerification::Required | UserVerification::Preferred => FLAG_UP | FLAG_UV,
    }
}

fn origin(rp_id: &str) -> String {
    format!("https://{rp_id}")
}
