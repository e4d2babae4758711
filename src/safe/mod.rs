//! Safe smart account client: owner management, UserOperation encoding and
//! aggregation of owner signatures into the blob the 4337 module verifies.

pub mod contracts;
pub mod owners;
pub mod signature;
pub mod signer;
pub mod user_operation;

use alloy_primitives::{Address, Bytes, U256, keccak256};
use alloy_sol_types::SolCall;

pub use contracts::{SENTINEL_OWNERS, SafeAddresses};
pub use owners::{OwnerConfig, OwnerConfigError};
pub use signature::{FormatOptions, dummy_signatures, format_signatures, verifier_address};
pub use signer::{SignaturePayload, SignerIdentity, SignerSignaturePair, WebAuthnSignatureData, webauthn_signer_address};
pub use user_operation::{MetaTransaction, Operation, UserOperation, safe_operation_hash};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("unknown signer type: {0}")]   UnknownSignerType(String),
    #[error("duplicate signer {0}")]       DuplicateSigner(Address),
    #[error("no signatures to aggregate")] NoSignatures,
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub threshold:           usize,
    pub salt_nonce:          U256,
    /// `SafeProxyFactory.proxyCreationCode()`; see `NodeProvider::proxy_creation_code`.
    pub proxy_creation_code: Bytes,
}

/// Deployment parameters of an account that does not exist on-chain yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInit {
    pub owners:       Vec<SignerIdentity>,
    pub threshold:    usize,
    pub factory:      Address,
    pub factory_data: Bytes,
}

/// Handle on a Safe; either already deployed or carrying everything needed to
/// deploy it from its first UserOperation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeAccount {
    address:   Address,
    addresses: SafeAddresses,
    init:      Option<AccountInit>,
}

impl SafeAccount {
    /// An existing account.
    pub fn new(address: Address) -> Self {
        Self { address, addresses: SafeAddresses::default(), init: None }
    }

    /// A counterfactual account: its address is predicted with CREATE2 and its
    /// first UserOperation carries the factory call.
    pub fn initialize_new_account(
        owners: Vec<SignerIdentity>,
        options: InitOptions,
    ) -> Result<Self, OwnerConfigError> {
        Self::initialize_with_addresses(owners, options, SafeAddresses::default())
    }

    pub fn initialize_with_addresses(
        owners: Vec<SignerIdentity>,
        options: InitOptions,
        addresses: SafeAddresses,
    ) -> Result<Self, OwnerConfigError> {
        let initializer = owners::setup_initializer(&owners, options.threshold, &addresses)?;
        let factory_data = contracts::createProxyWithNonceCall {
            _singleton: addresses.safe_singleton,
            initializer: initializer.clone(),
            saltNonce: options.salt_nonce,
        }
        .abi_encode();

        let mut salt_preimage = [0u8; 64];
        salt_preimage[..32].copy_from_slice(keccak256(&initializer).as_slice());
        salt_preimage[32..].copy_from_slice(&options.salt_nonce.to_be_bytes::<32>());
        let salt = keccak256(salt_preimage);

        let mut deployment_code = options.proxy_creation_code.to_vec();
        deployment_code.extend_from_slice(addresses.safe_singleton.into_word().as_slice());
        let address = addresses.proxy_factory.create2(salt.0, keccak256(&deployment_code).0);

        tracing::debug!(%address, owners = owners.len(), threshold = options.threshold, "Predicted account address");

        Ok(Self {
            address,
            addresses,
            init: Some(AccountInit {
                owners,
                threshold: options.threshold,
                factory: addresses.proxy_factory,
                factory_data: factory_data.into(),
            }),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn addresses(&self) -> &SafeAddresses {
        &self.addresses
    }

    pub fn init(&self) -> Option<&AccountInit> {
        self.init.as_ref()
    }

    /// Owner-swap transactions for this account. Pure: `current_owners` is the
    /// on-chain list in linked-list order.
    pub fn swap_owner(
        &self,
        current_owners: &[Address],
        new_signer: &SignerIdentity,
        old_owner: Address,
    ) -> Result<Vec<MetaTransaction>, OwnerConfigError> {
        owners::swap_owner_transactions(self.address, &self.addresses, current_owners, new_signer, old_owner)
    }

    /// `executeUserOp` calldata for `calls`; batches go through MultiSendCallOnly.
    pub fn execute_calldata(&self, calls: &[MetaTransaction]) -> Bytes {
        owners::execute_calldata(calls, &self.addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_options() -> InitOptions {
        InitOptions { threshold: 1, salt_nonce: U256::from(7), proxy_creation_code: Bytes::from_static(&[0x60, 0x80]) }
    }

    #[test]
    fn test_predicted_address_is_deterministic() {
        let owners = vec![SignerIdentity::Eoa(Address::repeat_byte(1)), SignerIdentity::Eoa(Address::repeat_byte(2))];
        let a = SafeAccount::initialize_new_account(owners.clone(), init_options()).unwrap();
        let b = SafeAccount::initialize_new_account(owners.clone(), init_options()).unwrap();
        assert_eq!(a.address(), b.address());

        let mut other_salt = init_options();
        other_salt.salt_nonce = U256::from(8);
        let c = SafeAccount::initialize_new_account(owners, other_salt).unwrap();
        assert_ne!(a.address(), c.address());
    }

    #[test]
    fn test_factory_data_targets_singleton() {
        let account =
            SafeAccount::initialize_new_account(vec![SignerIdentity::Eoa(Address::repeat_byte(1))], init_options())
                .unwrap();
        let init = account.init().unwrap();
        let call = contracts::createProxyWithNonceCall::abi_decode(&init.factory_data).unwrap();
        assert_eq!(call._singleton, account.addresses().safe_singleton);
        assert_eq!(call.saltNonce, U256::from(7));
        assert_eq!(init.factory, account.addresses().proxy_factory);
    }

    #[test]
    fn test_existing_account_has_no_init() {
        let account = SafeAccount::new(Address::repeat_byte(0xAB));
        assert!(account.init().is_none());
        assert_eq!(account.address(), Address::repeat_byte(0xAB));
    }
}
