use alloy_primitives::{B256, Bytes};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use p256::ecdsa::{Signature as P256Signature, VerifyingKey, signature::Verifier};
use p256::{EncodedPoint, FieldBytes};
use sha2::{Digest, Sha256};

use super::inclusion::SubmittedUserOperation;
use super::{LifecycleError, OperationState, PendingUserOperation, Stage};
use crate::config::DEFAULT_POLL_INTERVAL;
use crate::provider::{
    BundlerProvider, GasEstimate, NodeProvider, PaymasterFields, PaymasterProvider, ProviderError, SponsorMetadata,
};
use crate::safe::{
    FormatOptions, MetaTransaction, OwnerConfig, SafeAccount, SignaturePayload, SignerIdentity, SignerSignaturePair,
    UserOperation, WebAuthnSignatureData, dummy_signatures, format_signatures, safe_operation_hash,
    verifier_address,
};
use crate::webauthn::{
    CredentialRequestOptions, CredentialSimulator, Passkey, UserVerification, WebAuthnPublicKey, base64url,
    client_data_json,
};

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub expected_signers: Vec<SignerIdentity>,
    pub valid_after:      u64,
    /// Zero means no expiry.
    pub valid_until:      u64,
}

impl SafeAccount {
    /// Build an unsigned, unestimated UserOperation executing `calls`.
    pub async fn draft(
        &self,
        calls: &[MetaTransaction],
        node: &impl NodeProvider,
        expected_signers: &[SignerIdentity],
    ) -> Result<PendingUserOperation, LifecycleError> {
        if calls.is_empty() {
            return Err(LifecycleError::EmptyBatch);
        }

        // Deployment is read from the chain rather than inferred from nonce 0:
        // the factory call must ride along exactly when no account code exists.
        let on_chain = node.owner_config(self.address()).await.map_err(LifecycleError::provider(Stage::Draft))?;
        let (is_init, shared_signer, threshold, factory, factory_data) = match (&on_chain, self.init()) {
            (Some(config), _) => {
                let shared_signer = self.shared_signer_key(node, config, expected_signers).await?;
                let options = FormatOptions { shared_signer, ..Default::default() };
                check_signers(expected_signers, config.threshold(), |s| {
                    config.is_owner(&verifier_address(s, &options, self.addresses()))
                })?;
                (false, shared_signer, config.threshold(), None, None)
            }
            (None, Some(init)) => {
                check_signers(expected_signers, init.threshold, |s| init.owners.contains(s))?;
                let shared_signer = init.owners.iter().find_map(|owner| match owner {
                    SignerIdentity::WebAuthn(key) => Some(*key),
                    SignerIdentity::Eoa(_) => None,
                });
                (true, shared_signer, init.threshold, Some(init.factory), Some(init.factory_data.clone()))
            }
            (None, None) => return Err(LifecycleError::NotDeployed(self.address())),
        };

        let entry_point = self.addresses().entry_point;
        let nonce = node.nonce(entry_point, self.address()).await.map_err(LifecycleError::provider(Stage::Draft))?;
        let fees = node.fee_hints().await.map_err(LifecycleError::provider(Stage::Draft))?;

        let user_operation = UserOperation {
            sender: self.address(),
            nonce,
            factory,
            factory_data,
            call_data: self.execute_calldata(calls),
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            ..Default::default()
        };
        tracing::debug!(sender = %self.address(), %nonce, is_init, calls = calls.len(), "Drafted user operation");

        Ok(PendingUserOperation {
            user_operation,
            state: OperationState::Draft,
            expected_signers: expected_signers.to_vec(),
            is_init,
            shared_signer,
            threshold,
            valid_after: 0,
            valid_until: 0,
        })
    }

    /// Key the shared signer holds for this account, looked up only when the
    /// shared signer is an owner and a passkey is about to sign.
    async fn shared_signer_key(
        &self,
        node: &impl NodeProvider,
        config: &OwnerConfig,
        expected_signers: &[SignerIdentity],
    ) -> Result<Option<WebAuthnPublicKey>, LifecycleError> {
        let shared_signer = self.addresses().webauthn_shared_signer;
        if !config.is_owner(&shared_signer) || !expected_signers.iter().any(SignerIdentity::is_webauthn) {
            return Ok(None);
        }
        node.shared_signer_key(shared_signer, self.address()).await.map_err(LifecycleError::provider(Stage::Draft))
    }

    /// Fill gas limits from the bundler, estimating against a placeholder signature.
    pub async fn estimate(
        &self,
        op: &PendingUserOperation,
        bundler: &impl BundlerProvider,
    ) -> Result<PendingUserOperation, LifecycleError> {
        require_state(op, Stage::Estimate, &[OperationState::Draft, OperationState::Estimated])?;

        let mut user_operation = self.with_dummy_signature(op)?;
        let estimate = bundler
            .estimate_user_operation_gas(&user_operation, self.addresses().entry_point)
            .await
            .map_err(LifecycleError::provider(Stage::Estimate))?;
        apply_gas(&mut user_operation, &estimate);
        user_operation.signature = Bytes::new();

        tracing::debug!(
            call_gas = %user_operation.call_gas_limit,
            verification_gas = %user_operation.verification_gas_limit,
            pre_verification_gas = %user_operation.pre_verification_gas,
            "Estimated user operation"
        );
        Ok(PendingUserOperation { user_operation, state: OperationState::Estimated, ..op.clone() })
    }

    /// `draft` followed by `estimate`.
    pub async fn create(
        &self,
        calls: &[MetaTransaction],
        node: &impl NodeProvider,
        bundler: &impl BundlerProvider,
        options: &CreateOptions,
    ) -> Result<PendingUserOperation, LifecycleError> {
        let mut draft = self.draft(calls, node, &options.expected_signers).await?;
        draft.valid_after = options.valid_after;
        draft.valid_until = options.valid_until;
        self.estimate(&draft, bundler).await
    }

    /// Ask the paymaster to cover gas under `policy_id`: stub data, a bundler
    /// re-estimate with the paymaster in place, then the final sponsorship.
    pub async fn sponsor(
        &self,
        op: &PendingUserOperation,
        paymaster: &impl PaymasterProvider,
        bundler: &impl BundlerProvider,
        policy_id: &str,
    ) -> Result<(PendingUserOperation, SponsorMetadata), LifecycleError> {
        require_state(op, Stage::Sponsor, &[OperationState::Estimated])?;
        let entry_point = self.addresses().entry_point;

        let mut user_operation = self.with_dummy_signature(op)?;
        let stub = paymaster.stub_data(&user_operation, entry_point, policy_id).await.map_err(paymaster_error)?;
        apply_paymaster(&mut user_operation, &stub);

        let estimate = bundler
            .estimate_user_operation_gas(&user_operation, entry_point)
            .await
            .map_err(LifecycleError::provider(Stage::Sponsor))?;
        apply_gas(&mut user_operation, &estimate);

        let sponsored = paymaster.sponsor(&user_operation, entry_point, policy_id).await.map_err(paymaster_error)?;
        apply_paymaster(&mut user_operation, &sponsored.fields);
        if let Some(gas) = sponsored.pre_verification_gas {
            user_operation.pre_verification_gas = gas;
        }
        if let Some(gas) = sponsored.verification_gas_limit {
            user_operation.verification_gas_limit = gas;
        }
        if let Some(gas) = sponsored.call_gas_limit {
            user_operation.call_gas_limit = gas;
        }
        user_operation.signature = Bytes::new();

        let metadata = sponsored.fields.sponsor.or(stub.sponsor).unwrap_or_default();
        tracing::info!(paymaster = %sponsored.fields.paymaster, sponsor = %metadata.name, policy_id, "Sponsored user operation");
        Ok((PendingUserOperation { user_operation, state: OperationState::Sponsored, ..op.clone() }, metadata))
    }

    /// EIP-712 `SafeOp` hash the owners sign.
    pub fn operation_hash(&self, op: &PendingUserOperation, chain_id: u64) -> B256 {
        safe_operation_hash(&op.user_operation, op.valid_after, op.valid_until, chain_id, self.addresses())
    }

    /// Verify every pair against the operation hash and attach the aggregated signature.
    pub fn sign(
        &self,
        op: &PendingUserOperation,
        pairs: &[SignerSignaturePair],
        chain_id: u64,
    ) -> Result<PendingUserOperation, LifecycleError> {
        require_state(op, Stage::Sign, &[OperationState::Estimated, OperationState::Sponsored])?;
        if pairs.len() < op.threshold {
            tracing::warn!(signatures = pairs.len(), threshold = op.threshold, "Not enough signatures");
            return Err(LifecycleError::SignerMismatch(format!(
                "{} signatures below threshold {}",
                pairs.len(),
                op.threshold
            )));
        }
        let hash = self.operation_hash(op, chain_id);

        for pair in pairs {
            if !op.expected_signers.contains(&pair.signer) {
                return Err(LifecycleError::SignerMismatch(format!(
                    "{} was not expected to sign",
                    pair.signer.owner_address()
                )));
            }
            let valid = match (&pair.signer, &pair.signature) {
                (SignerIdentity::Eoa(address), SignaturePayload::Eoa(rsv)) => {
                    recover_signer(rsv, &hash).is_some_and(|recovered| recovered == *address)
                }
                (SignerIdentity::WebAuthn(key), SignaturePayload::WebAuthn(data)) => verify_webauthn(key, data, &hash),
                _ => false,
            };
            if !valid {
                return Err(LifecycleError::InvalidSignature(pair.signer.owner_address()));
            }
        }

        let signature = format_signatures(pairs, &op.format_options(), self.addresses())?;

        let mut user_operation = op.user_operation.clone();
        user_operation.signature = signature;
        tracing::info!(%hash, signers = pairs.len(), "Signed user operation");
        Ok(PendingUserOperation { user_operation, state: OperationState::Signed, ..op.clone() })
    }

    /// Signature pair for `op` from a local secp256k1 key.
    pub fn eoa_signature(
        &self,
        op: &PendingUserOperation,
        signer: &PrivateKeySigner,
        chain_id: u64,
    ) -> Result<SignerSignaturePair, LifecycleError> {
        let hash = self.operation_hash(op, chain_id);
        let signature = signer.sign_hash_sync(&hash).map_err(|e| LifecycleError::Signer(e.to_string()))?;
        Ok(SignerSignaturePair::eoa(signer.address(), signature.as_bytes()))
    }

    pub fn sign_with_eoa(
        &self,
        op: &PendingUserOperation,
        signers: &[PrivateKeySigner],
        chain_id: u64,
    ) -> Result<PendingUserOperation, LifecycleError> {
        let pairs = signers
            .iter()
            .map(|signer| self.eoa_signature(op, signer, chain_id))
            .collect::<Result<Vec<_>, _>>()?;
        self.sign(op, &pairs, chain_id)
    }

    /// Signature pair for `op` from a passkey held by `simulator`; the
    /// operation hash is the WebAuthn challenge.
    pub fn passkey_signature(
        &self,
        op: &PendingUserOperation,
        simulator: &CredentialSimulator,
        passkey: &Passkey,
        chain_id: u64,
    ) -> Result<SignerSignaturePair, LifecycleError> {
        let hash = self.operation_hash(op, chain_id);
        let assertion = simulator.get(&CredentialRequestOptions {
            challenge:         hash.to_vec(),
            rp_id:             passkey.rp_id.clone(),
            allow_credentials: vec![passkey.credential_id.clone()],
            user_verification: UserVerification::Required,
        })?;
        Ok(SignerSignaturePair::from_assertion(passkey.public_key, &assertion.response)?)
    }

    pub fn sign_with_passkey(
        &self,
        op: &PendingUserOperation,
        simulator: &CredentialSimulator,
        passkey: &Passkey,
        chain_id: u64,
    ) -> Result<PendingUserOperation, LifecycleError> {
        let pair = self.passkey_signature(op, simulator, passkey, chain_id)?;
        self.sign(op, &[pair], chain_id)
    }

    /// Hand a signed operation to the bundler.
    pub async fn submit<'b, B: BundlerProvider>(
        &self,
        op: &PendingUserOperation,
        bundler: &'b B,
    ) -> Result<SubmittedUserOperation<'b, B>, LifecycleError> {
        require_state(op, Stage::Submit, &[OperationState::Signed])?;
        let user_op_hash = bundler
            .send_user_operation(&op.user_operation, self.addresses().entry_point)
            .await
            .map_err(LifecycleError::provider(Stage::Submit))?;
        tracing::info!(%user_op_hash, sender = %op.user_operation.sender, "Submitted user operation");
        Ok(SubmittedUserOperation::new(user_op_hash, bundler, DEFAULT_POLL_INTERVAL))
    }

    fn with_dummy_signature(&self, op: &PendingUserOperation) -> Result<UserOperation, LifecycleError> {
        let mut user_operation = op.user_operation.clone();
        user_operation.signature = dummy_signatures(&op.expected_signers, &op.format_options(), self.addresses())?;
        Ok(user_operation)
    }
}

fn require_state(op: &PendingUserOperation, stage: Stage, allowed: &[OperationState]) -> Result<(), LifecycleError> {
    if allowed.contains(&op.state) {
        Ok(())
    } else {
        Err(LifecycleError::InvalidState { stage, found: op.state })
    }
}

/// Every expected signer is a distinct owner and together they meet the threshold.
fn check_signers(
    expected: &[SignerIdentity],
    threshold: usize,
    is_owner: impl Fn(&SignerIdentity) -> bool,
) -> Result<(), LifecycleError> {
    for (i, signer) in expected.iter().enumerate() {
        if expected[..i].contains(signer) {
            return Err(LifecycleError::SignerMismatch(format!("{} listed twice", signer.owner_address())));
        }
        if !is_owner(signer) {
            return Err(LifecycleError::SignerMismatch(format!("{} is not an owner", signer.owner_address())));
        }
    }
    if expected.len() < threshold {
        return Err(LifecycleError::SignerMismatch(format!(
            "{} signers below threshold {threshold}",
            expected.len()
        )));
    }
    Ok(())
}

fn paymaster_error(error: ProviderError) -> LifecycleError {
    match error {
        ProviderError::Rejected { code, message } => LifecycleError::PaymasterRejected { code, message },
        source => LifecycleError::Provider { stage: Stage::Sponsor, source },
    }
}

fn apply_gas(op: &mut UserOperation, estimate: &GasEstimate) {
    op.pre_verification_gas = estimate.pre_verification_gas;
    op.verification_gas_limit = estimate.verification_gas_limit;
    op.call_gas_limit = estimate.call_gas_limit;
    if estimate.paymaster_verification_gas_limit.is_some() {
        op.paymaster_verification_gas_limit = estimate.paymaster_verification_gas_limit;
    }
    if estimate.paymaster_post_op_gas_limit.is_some() {
        op.paymaster_post_op_gas_limit = estimate.paymaster_post_op_gas_limit;
    }
}

fn apply_paymaster(op: &mut UserOperation, fields: &PaymasterFields) {
    op.paymaster = Some(fields.paymaster);
    op.paymaster_data = Some(fields.paymaster_data.clone());
    if fields.paymaster_verification_gas_limit.is_some() {
        op.paymaster_verification_gas_limit = fields.paymaster_verification_gas_limit;
    }
    if fields.paymaster_post_op_gas_limit.is_some() {
        op.paymaster_post_op_gas_limit = fields.paymaster_post_op_gas_limit;
    }
}

fn recover_signer(rsv: &[u8; 65], hash: &B256) -> Option<alloy_primitives::Address> {
    let signature = alloy_primitives::Signature::from_raw(rsv).ok()?;
    signature.recover_address_from_prehash(hash).ok()
}

/// P-256 check of a WebAuthn assertion whose challenge is `hash`.
fn verify_webauthn(key: &WebAuthnPublicKey, data: &WebAuthnSignatureData, hash: &B256) -> bool {
    let client_data = client_data_json(&base64url(hash.as_slice()), &data.client_data_fields);
    let mut message = data.authenticator_data.to_vec();
    message.extend_from_slice(&Sha256::digest(client_data.as_bytes()));

    let (x, y) = (key.x_bytes(), key.y_bytes());
    let point = EncodedPoint::from_affine_coordinates(FieldBytes::from_slice(&x), FieldBytes::from_slice(&y), false);
    let Ok(verifying_key) = VerifyingKey::from_encoded_point(&point) else {
        return false;
    };
    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&data.r.to_be_bytes::<32>());
    rs[32..].copy_from_slice(&data.s.to_be_bytes::<32>());
    let Ok(signature) = P256Signature::from_slice(&rs) else {
        return false;
    };
    verifying_key.verify(&message, &signature).is_ok()
}
