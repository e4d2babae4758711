//! In-memory chain standing in for the node, the bundler and the paymaster.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use alloy_primitives::{Address, B256, Bytes, U64, U256, keccak256};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use p256::ecdsa::{Signature as P256Signature, VerifyingKey, signature::Verifier};
use p256::{EncodedPoint, FieldBytes};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use safepass::provider::{
    BundlerProvider, FeeHints, GasEstimate, NodeProvider, PaymasterFields, PaymasterProvider, ProviderError,
    SponsorMetadata, SponsorResponse, TransactionInclusion, UserOperationReceipt,
};
use safepass::safe::owners::decode_multi_send;
use safepass::safe::{
    MetaTransaction, OwnerConfig, SafeAddresses, UserOperation, contracts, safe_operation_hash,
    webauthn_signer_address,
};
use safepass::webauthn::{
    CredentialCreationOptions, CredentialSimulator, Passkey, PubKeyCredParam, RelyingParty, UserEntity,
    UserVerification, WebAuthnPublicKey, base64url, client_data_json,
};

pub const CHAIN_ID: u64 = 11155111;
pub const POLICY_ID: &str = "P1";
pub const PAYMASTER: Address = Address::repeat_byte(0x9A);
pub const SPONSOR_NAME: &str = "Mock Sponsor";

/// A fresh ES256 passkey for rp "safe.global".
pub fn new_passkey(simulator: &CredentialSimulator) -> Passkey {
    let credential = simulator
        .create(&CredentialCreationOptions {
            rp:                  RelyingParty { id: "safe.global".into(), name: "Safe".into() },
            user:                UserEntity {
                id:           b"chucknorris".to_vec(),
                name:         "chucknorris".into(),
                display_name: "Chuck Norris".into(),
            },
            challenge:           1_700_000_000_000u64.to_be_bytes().to_vec(),
            pub_key_cred_params: vec![PubKeyCredParam::ES256],
            user_verification:   UserVerification::Required,
        })
        .unwrap();
    Passkey::from_credential(&credential, "safe.global").unwrap()
}

#[derive(Debug, Default)]
struct State {
    accounts:         HashMap<Address, OwnerConfig>,
    nonces:           HashMap<Address, U256>,
    passkey_signers:  HashMap<Address, WebAuthnPublicKey>,
    /// Shared signer configuration, per account.
    shared_signer_keys: HashMap<Address, WebAuthnPublicKey>,
    receipts:         HashMap<B256, UserOperationReceipt>,
    sent:             Vec<UserOperation>,
    estimates:        usize,
    block:            u64,
    never_include:    bool,
    revert_target:    Option<Address>,
    failing_sends:    usize,
}

#[derive(Debug, Default)]
pub struct MockChain {
    state: Mutex<State>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owners(&self, account: Address) -> Option<Vec<Address>> {
        self.state.lock().accounts.get(&account).map(|c| c.owners().to_vec())
    }

    pub fn sent(&self) -> Vec<UserOperation> {
        self.state.lock().sent.clone()
    }

    pub fn estimates(&self) -> usize {
        self.state.lock().estimates
    }

    /// Accept operations but never mine them.
    pub fn never_include(&self) {
        self.state.lock().never_include = true;
    }

    /// Any call to `target` reverts.
    pub fn revert_calls_to(&self, target: Address) {
        self.state.lock().revert_target = Some(target);
    }

    /// The next `n` sends fail with a transport error.
    pub fn fail_next_sends(&self, n: usize) {
        self.state.lock().failing_sends = n;
    }
}

fn rejected(code: i64, message: impl Into<String>) -> ProviderError {
    ProviderError::Rejected { code, message: message.into() }
}

#[async_trait]
impl NodeProvider for MockChain {
    async fn nonce(&self, _entry_point: Address, sender: Address) -> Result<U256, ProviderError> {
        Ok(self.state.lock().nonces.get(&sender).copied().unwrap_or_default())
    }

    async fn fee_hints(&self) -> Result<FeeHints, ProviderError> {
        Ok(FeeHints {
            max_fee_per_gas:          U256::from(3_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
        })
    }

    async fn owner_config(&self, account: Address) -> Result<Option<OwnerConfig>, ProviderError> {
        Ok(self.state.lock().accounts.get(&account).cloned())
    }

    async fn proxy_creation_code(&self, _factory: Address) -> Result<Bytes, ProviderError> {
        Ok(Bytes::from_static(&[0x60, 0x80, 0x60, 0x40, 0x52]))
    }

    async fn shared_signer_key(
        &self,
        shared_signer: Address,
        account: Address,
    ) -> Result<Option<WebAuthnPublicKey>, ProviderError> {
        if shared_signer != SafeAddresses::default().webauthn_shared_signer {
            return Err(ProviderError::Decode("no shared signer at that address".into()));
        }
        Ok(self.state.lock().shared_signer_keys.get(&account).copied())
    }
}

#[async_trait]
impl BundlerProvider for MockChain {
    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        _entry_point: Address,
    ) -> Result<GasEstimate, ProviderError> {
        if op.signature.len() < 12 + 65 {
            return Err(rejected(-32602, "AA23 estimation needs a placeholder signature"));
        }
        self.state.lock().estimates += 1;
        let sponsored = op.paymaster.is_some();
        Ok(GasEstimate {
            pre_verification_gas:   U256::from(50_000),
            verification_gas_limit: U256::from(if op.factory.is_some() { 500_000 } else { 150_000 }),
            call_gas_limit:         U256::from(100_000),
            paymaster_verification_gas_limit: sponsored.then(|| U256::from(40_000)),
            paymaster_post_op_gas_limit:      sponsored.then(|| U256::from(1)),
        })
    }

    async fn send_user_operation(&self, op: &UserOperation, _entry_point: Address) -> Result<B256, ProviderError> {
        let mut state = self.state.lock();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(ProviderError::Rpc("connection reset".into()));
        }

        let expected_nonce = state.nonces.get(&op.sender).copied().unwrap_or_default();
        if op.nonce != expected_nonce {
            return Err(rejected(-32602, "AA25 invalid account nonce"));
        }

        let addresses = SafeAddresses::default();
        let (config, shared_key, deploying) = match state.accounts.get(&op.sender) {
            Some(config) => (config.clone(), state.shared_signer_keys.get(&op.sender).copied(), false),
            None => {
                let (config, shared_key) =
                    deploy(op, &addresses).ok_or_else(|| rejected(-32602, "AA20 account not deployed"))?;
                (config, shared_key, true)
            }
        };
        let signers = Signers { passkeys: &state.passkey_signers, shared_key, deploying };
        if !signatures_valid(op, &config, &signers, &addresses) {
            return Err(rejected(-32507, "AA24 signature error"));
        }
        if let Some(key) = shared_key {
            state.shared_signer_keys.insert(op.sender, key);
        }

        let user_op_hash = keccak256(serde_json::to_vec(op).map_err(|e| ProviderError::Decode(e.to_string()))?);
        state.accounts.insert(op.sender, config.clone());
        state.nonces.insert(op.sender, expected_nonce + U256::from(1));
        state.sent.push(op.clone());

        let (success, reason) = match execute(op, &config, &addresses, state.revert_target) {
            Ok(effects) => {
                if let Some(owners) = effects.owners {
                    state.accounts.insert(op.sender, owners);
                }
                state.passkey_signers.extend(effects.passkeys);
                (true, None)
            }
            Err(reason) => (false, Some(reason)),
        };

        if !state.never_include {
            state.block += 1;
            let mut tx_preimage = user_op_hash.to_vec();
            tx_preimage.extend_from_slice(b"tx");
            let receipt = UserOperationReceipt {
                user_op_hash,
                sender: op.sender,
                nonce: op.nonce,
                success,
                reason,
                actual_gas_cost: U256::from(21_000),
                actual_gas_used: U256::from(21_000),
                receipt: TransactionInclusion {
                    transaction_hash: keccak256(tx_preimage),
                    block_number:     U64::from(state.block),
                },
            };
            state.receipts.insert(user_op_hash, receipt);
        }
        Ok(user_op_hash)
    }

    async fn user_operation_receipt(&self, hash: B256) -> Result<Option<UserOperationReceipt>, ProviderError> {
        Ok(self.state.lock().receipts.get(&hash).cloned())
    }
}

#[async_trait]
impl PaymasterProvider for MockChain {
    async fn stub_data(
        &self,
        _op: &UserOperation,
        _entry_point: Address,
        policy_id: &str,
    ) -> Result<PaymasterFields, ProviderError> {
        check_policy(policy_id)?;
        Ok(PaymasterFields {
            paymaster:      PAYMASTER,
            paymaster_data: Bytes::from(vec![0u8; 65]),
            paymaster_verification_gas_limit: Some(U256::from(30_000)),
            paymaster_post_op_gas_limit:      Some(U256::from(1)),
            sponsor:        Some(SponsorMetadata { name: SPONSOR_NAME.into(), icon: None }),
        })
    }

    async fn sponsor(
        &self,
        op: &UserOperation,
        _entry_point: Address,
        policy_id: &str,
    ) -> Result<SponsorResponse, ProviderError> {
        check_policy(policy_id)?;
        if op.paymaster != Some(PAYMASTER) {
            return Err(rejected(-32602, "paymaster stub data missing"));
        }
        Ok(SponsorResponse {
            fields: PaymasterFields {
                paymaster:      PAYMASTER,
                paymaster_data: keccak256(&op.call_data).to_vec().into(),
                paymaster_verification_gas_limit: Some(U256::from(45_000)),
                paymaster_post_op_gas_limit:      Some(U256::from(1)),
                sponsor:        None,
            },
            pre_verification_gas:   Some(U256::from(55_000)),
            verification_gas_limit: None,
            call_gas_limit:         None,
        })
    }
}

fn check_policy(policy_id: &str) -> Result<(), ProviderError> {
    if policy_id == POLICY_ID {
        Ok(())
    } else {
        Err(rejected(-32001, format!("sponsorship policy {policy_id} not found")))
    }
}

/// Owner configuration installed by the factory call in `op`, plus the key
/// the setup delegatecall configured on the shared signer.
fn deploy(op: &UserOperation, addresses: &SafeAddresses) -> Option<(OwnerConfig, Option<WebAuthnPublicKey>)> {
    let factory_data = op.factory_data.as_ref()?;
    let create = contracts::createProxyWithNonceCall::abi_decode(factory_data).ok()?;
    let setup = contracts::setupCall::abi_decode(&create.initializer).ok()?;
    let config = OwnerConfig::new(setup._owners, setup._threshold.to::<usize>()).ok()?;

    let mut shared_key = None;
    if setup.to == addresses.multi_send_call_only {
        let batch = contracts::multiSendCall::abi_decode(&setup.data).ok()?;
        for tx in decode_multi_send(&batch.transactions)? {
            if tx.to == addresses.webauthn_shared_signer {
                let configure = contracts::configureCall::abi_decode(&tx.data).ok()?;
                shared_key = Some(WebAuthnPublicKey { x: configure.signer.x, y: configure.signer.y });
            }
        }
    }
    Some((config, shared_key))
}

/// Verifier state the signature check needs.
struct Signers<'a> {
    passkeys:   &'a HashMap<Address, WebAuthnPublicKey>,
    shared_key: Option<WebAuthnPublicKey>,
    /// During deployment the shared signer takes the key from the signature.
    deploying:  bool,
}

/// Checks `threshold` signatures the way the Safe does: strictly ascending
/// owners, EOA signatures recovered against the SafeOp hash, contract
/// signatures verified by their P-256 verifier.
fn signatures_valid(op: &UserOperation, config: &OwnerConfig, signers: &Signers<'_>, addresses: &SafeAddresses) -> bool {
    let sig = &op.signature;
    if sig.len() < 12 {
        return false;
    }
    let valid_after = u64::from_be_bytes([0, 0, sig[0], sig[1], sig[2], sig[3], sig[4], sig[5]]);
    let valid_until = u64::from_be_bytes([0, 0, sig[6], sig[7], sig[8], sig[9], sig[10], sig[11]]);
    let hash = safe_operation_hash(op, valid_after, valid_until, CHAIN_ID, addresses);
    let body = &sig[12..];

    let mut last = Address::ZERO;
    let mut seen = HashSet::new();
    for i in 0..config.threshold() {
        let Some(part) = body.get(i * 65..(i + 1) * 65) else {
            return false;
        };
        let owner = if part[64] == 0 {
            let verifier = Address::from_slice(&part[12..32]);
            let offset = U256::from_be_slice(&part[32..64]).to::<usize>();
            let Some(len_word) = body.get(offset..offset + 32) else {
                return false;
            };
            let len = U256::from_be_slice(len_word).to::<usize>();
            let Some(payload) = body.get(offset + 32..offset + 32 + len) else {
                return false;
            };
            let (payload, key) = if verifier == addresses.webauthn_shared_signer {
                let Some(configured) = signers.shared_key else {
                    return false;
                };
                if signers.deploying {
                    let Some(split) = payload.len().checked_sub(64) else {
                        return false;
                    };
                    let proof = WebAuthnPublicKey {
                        x: U256::from_be_slice(&payload[split..split + 32]),
                        y: U256::from_be_slice(&payload[split + 32..]),
                    };
                    if proof != configured {
                        return false;
                    }
                    (&payload[..split], configured)
                } else {
                    (payload, configured)
                }
            } else {
                let Some(key) = signers.passkeys.get(&verifier) else {
                    return false;
                };
                (payload, *key)
            };
            let Ok((auth_data, fields, rs)) = <(Bytes, String, [U256; 2])>::abi_decode_params(payload) else {
                return false;
            };
            if !p256_valid(&key, &auth_data, &fields, rs, &hash) {
                return false;
            }
            verifier
        } else {
            let Ok(signature) = alloy_primitives::Signature::from_raw(part) else {
                return false;
            };
            let Ok(recovered) = signature.recover_address_from_prehash(&hash) else {
                return false;
            };
            recovered
        };
        if owner <= last || !config.is_owner(&owner) || !seen.insert(owner) {
            return false;
        }
        last = owner;
    }
    true
}

fn p256_valid(key: &WebAuthnPublicKey, auth_data: &[u8], fields: &str, rs: [U256; 2], hash: &B256) -> bool {
    let client_data = client_data_json(&base64url(hash.as_slice()), fields);
    let mut message = auth_data.to_vec();
    message.extend_from_slice(&Sha256::digest(client_data.as_bytes()));

    let (x, y) = (key.x_bytes(), key.y_bytes());
    let point = EncodedPoint::from_affine_coordinates(FieldBytes::from_slice(&x), FieldBytes::from_slice(&y), false);
    let Ok(verifying_key) = VerifyingKey::from_encoded_point(&point) else {
        return false;
    };
    let mut raw = [0u8; 64];
    raw[..32].copy_from_slice(&rs[0].to_be_bytes::<32>());
    raw[32..].copy_from_slice(&rs[1].to_be_bytes::<32>());
    let Ok(signature) = P256Signature::from_slice(&raw) else {
        return false;
    };
    verifying_key.verify(&message, &signature).is_ok()
}

#[derive(Default)]
struct Effects {
    owners:   Option<OwnerConfig>,
    passkeys: Vec<(Address, WebAuthnPublicKey)>,
}

/// Apply the account call; `Err` carries the revert reason.
fn execute(
    op: &UserOperation,
    config: &OwnerConfig,
    addresses: &SafeAddresses,
    revert_target: Option<Address>,
) -> Result<Effects, String> {
    let call = contracts::executeUserOpCall::abi_decode(&op.call_data).map_err(|e| e.to_string())?;
    let txs = if call.to == addresses.multi_send_call_only && call.operation == 1 {
        let batch = contracts::multiSendCall::abi_decode(&call.data).map_err(|e| e.to_string())?;
        decode_multi_send(&batch.transactions).ok_or("malformed multisend")?
    } else {
        vec![MetaTransaction {
            to:        call.to,
            value:     call.value,
            data:      call.data,
            operation: safepass::safe::Operation::Call,
        }]
    };

    let mut owners = config.owners().to_vec();
    let mut effects = Effects::default();
    for tx in txs {
        if Some(tx.to) == revert_target {
            return Err("execution reverted".into());
        }
        if tx.to == addresses.webauthn_signer_factory {
            let create = contracts::createSignerCall::abi_decode(&tx.data).map_err(|e| e.to_string())?;
            let key = WebAuthnPublicKey { x: create.x, y: create.y };
            effects.passkeys.push((webauthn_signer_address(&key), key));
        } else if tx.to == op.sender {
            let swap = contracts::swapOwnerCall::abi_decode(&tx.data).map_err(|e| e.to_string())?;
            let index = owners.iter().position(|o| *o == swap.oldOwner).ok_or("GS205")?;
            let prev = if index == 0 { safepass::safe::SENTINEL_OWNERS } else { owners[index - 1] };
            if prev != swap.prevOwner {
                return Err("GS205".into());
            }
            owners[index] = swap.newOwner;
            effects.owners = Some(OwnerConfig::new(owners.clone(), config.threshold()).map_err(|e| e.to_string())?);
        }
    }
    Ok(effects)
}
