use alloy_primitives::{Address, Bytes, U256, aliases::U176};
use alloy_sol_types::SolCall;

use super::contracts::{self, SENTINEL_OWNERS, SafeAddresses};
use super::signer::SignerIdentity;
use super::user_operation::{MetaTransaction, Operation};
use crate::webauthn::WebAuthnPublicKey;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OwnerConfigError {
    #[error("owner list is empty")]                       NoOwners,
    #[error("duplicate owner {0}")]                       DuplicateOwner(Address),
    #[error("invalid owner address {0}")]                 InvalidOwner(Address),
    #[error("threshold {threshold} out of range 1..={owners}")]
    InvalidThreshold { threshold: usize, owners: usize },
    #[error("at most one passkey owner can be set at deployment")]
    MultiplePasskeysAtInit,
    #[error("{0} is not an owner")]                       NotAnOwner(Address),
    #[error("{0} is already an owner")]                   AlreadyOwner(Address),
}

/// Owner set and threshold as stored by the Safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerConfig {
    owners:    Vec<Address>,
    threshold: usize,
}

impl OwnerConfig {
    pub fn new(owners: Vec<Address>, threshold: usize) -> Result<Self, OwnerConfigError> {
        validate(&owners, threshold)?;
        Ok(Self { owners, threshold })
    }

    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_owner(&self, address: &Address) -> bool {
        self.owners.contains(address)
    }
}

fn validate(owners: &[Address], threshold: usize) -> Result<(), OwnerConfigError> {
    if owners.is_empty() {
        return Err(OwnerConfigError::NoOwners);
    }
    for (i, owner) in owners.iter().enumerate() {
        if *owner == Address::ZERO || *owner == SENTINEL_OWNERS {
            return Err(OwnerConfigError::InvalidOwner(*owner));
        }
        if owners[..i].contains(owner) {
            return Err(OwnerConfigError::DuplicateOwner(*owner));
        }
    }
    if threshold == 0 || threshold > owners.len() {
        return Err(OwnerConfigError::InvalidThreshold { threshold, owners: owners.len() });
    }
    Ok(())
}

/// Packed verifier configuration `(precompile << 160) | fallbackVerifier`.
pub fn p256_verifiers(addresses: &SafeAddresses) -> U176 {
    let mut packed = [0u8; 22];
    packed[..2].copy_from_slice(&addresses.p256_precompile.to_be_bytes());
    packed[2..].copy_from_slice(addresses.fcl_p256_verifier.as_slice());
    U176::from_be_slice(&packed)
}

/// `Safe.setup` calldata for a fresh account. A passkey owner is installed as
/// the shared signer, configured by delegatecall during setup.
pub fn setup_initializer(
    owners: &[SignerIdentity],
    threshold: usize,
    addresses: &SafeAddresses,
) -> Result<Bytes, OwnerConfigError> {
    let mut passkey: Option<&WebAuthnPublicKey> = None;
    let mut owner_addresses = Vec::with_capacity(owners.len());
    for owner in owners {
        match owner {
            SignerIdentity::Eoa(address) => owner_addresses.push(*address),
            SignerIdentity::WebAuthn(key) => {
                if passkey.replace(key).is_some() {
                    return Err(OwnerConfigError::MultiplePasskeysAtInit);
                }
                owner_addresses.push(addresses.webauthn_shared_signer);
            }
        }
    }
    validate(&owner_addresses, threshold)?;

    let enable_modules = MetaTransaction {
        to:        addresses.safe_module_setup,
        value:     U256::ZERO,
        data:      contracts::enableModulesCall { modules: vec![addresses.safe_4337_module] }.abi_encode().into(),
        operation: Operation::DelegateCall,
    };
    let (to, data) = match passkey {
        None => (enable_modules.to, enable_modules.data),
        Some(key) => {
            let configure = MetaTransaction {
                to:        addresses.webauthn_shared_signer,
                value:     U256::ZERO,
                data:      contracts::configureCall {
                    signer: contracts::SharedSignerConfig { x: key.x, y: key.y, verifiers: p256_verifiers(addresses) },
                }
                .abi_encode()
                .into(),
                operation: Operation::DelegateCall,
            };
            let batch = contracts::multiSendCall { transactions: encode_multi_send(&[enable_modules, configure]) };
            (addresses.multi_send_call_only, batch.abi_encode().into())
        }
    };

    Ok(contracts::setupCall {
        _owners: owner_addresses,
        _threshold: U256::from(threshold),
        to,
        data,
        fallbackHandler: addresses.safe_4337_module,
        paymentToken: Address::ZERO,
        payment: U256::ZERO,
        paymentReceiver: Address::ZERO,
    }
    .abi_encode()
    .into())
}

/// Transactions replacing `old_owner` with `new_signer`. For a passkey the
/// verifier contract is deployed first through the signer factory.
pub fn swap_owner_transactions(
    account: Address,
    addresses: &SafeAddresses,
    current_owners: &[Address],
    new_signer: &SignerIdentity,
    old_owner: Address,
) -> Result<Vec<MetaTransaction>, OwnerConfigError> {
    let index = current_owners
        .iter()
        .position(|o| *o == old_owner)
        .ok_or(OwnerConfigError::NotAnOwner(old_owner))?;
    let prev_owner = if index == 0 { SENTINEL_OWNERS } else { current_owners[index - 1] };
    let new_owner = new_signer.owner_address();
    if current_owners.contains(&new_owner) {
        return Err(OwnerConfigError::AlreadyOwner(new_owner));
    }

    let mut txs = Vec::with_capacity(2);
    if let SignerIdentity::WebAuthn(key) = new_signer {
        let create = contracts::createSignerCall { x: key.x, y: key.y, verifiers: p256_verifiers(addresses) };
        txs.push(MetaTransaction::call(addresses.webauthn_signer_factory, create.abi_encode()));
    }
    let swap = contracts::swapOwnerCall { prevOwner: prev_owner, oldOwner: old_owner, newOwner: new_owner };
    txs.push(MetaTransaction::call(account, swap.abi_encode()));

    tracing::debug!(%old_owner, %new_owner, %prev_owner, calls = txs.len(), "Prepared owner swap");
    Ok(txs)
}

/// MultiSend packing: `operation(1) || to(20) || value(32) || dataLength(32) || data` per call.
pub fn encode_multi_send(txs: &[MetaTransaction]) -> Bytes {
    let mut out = Vec::new();
    for tx in txs {
        out.push(tx.operation as u8);
        out.extend_from_slice(tx.to.as_slice());
        out.extend_from_slice(&tx.value.to_be_bytes::<32>());
        out.extend_from_slice(&U256::from(tx.data.len()).to_be_bytes::<32>());
        out.extend_from_slice(&tx.data);
    }
    out.into()
}

/// Inverse of [`encode_multi_send`]; `None` on truncated input.
pub fn decode_multi_send(mut packed: &[u8]) -> Option<Vec<MetaTransaction>> {
    let mut txs = Vec::new();
    while !packed.is_empty() {
        if packed.len() < 85 {
            return None;
        }
        let operation = match packed[0] {
            0 => Operation::Call,
            1 => Operation::DelegateCall,
            _ => return None,
        };
        let to = Address::from_slice(&packed[1..21]);
        let value = U256::from_be_slice(&packed[21..53]);
        let len = usize::try_from(U256::from_be_slice(&packed[53..85])).ok()?;
        let end = 85usize.checked_add(len)?;
        let data = packed.get(85..end)?;
        txs.push(MetaTransaction { to, value, data: Bytes::copy_from_slice(data), operation });
        packed = &packed[end..];
    }
    Some(txs)
}

/// `Safe4337Module.executeUserOp` calldata for one call, or for a MultiSend
/// delegatecall wrapping several.
pub fn execute_calldata(calls: &[MetaTransaction], addresses: &SafeAddresses) -> Bytes {
    let call = match calls {
        [single] => contracts::executeUserOpCall {
            to:        single.to,
            value:     single.value,
            data:      single.data.clone(),
            operation: single.operation as u8,
        },
        many => contracts::executeUserOpCall {
            to:        addresses.multi_send_call_only,
            value:     U256::ZERO,
            data:      contracts::multiSendCall { transactions: encode_multi_send(many) }.abi_encode().into(),
            operation: Operation::DelegateCall as u8,
        },
    };
    call.abi_encode().into()
}
