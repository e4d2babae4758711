use alloy_primitives::{Address, B256, Bytes, U256, aliases::U48};
use alloy_sol_types::{SolStruct, eip712_domain};
use serde::{Deserialize, Serialize};

use super::contracts::{SafeAddresses, SafeOp};

const UINT48_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// EntryPoint v0.7 UserOperation in the unpacked form bundlers accept over JSON-RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender:                   Address,
    pub nonce:                    U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory:                  Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data:             Option<Bytes>,
    pub call_data:                Bytes,
    pub call_gas_limit:           U256,
    pub verification_gas_limit:   U256,
    pub pre_verification_gas:     U256,
    pub max_fee_per_gas:          U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster:                Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit:      Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data:           Option<Bytes>,
    pub signature:                Bytes,
}

impl UserOperation {
    /// `factory || factoryData`, empty when the account already exists.
    pub fn init_code(&self) -> Vec<u8> {
        match self.factory {
            Some(factory) => {
                let mut out = factory.to_vec();
                if let Some(data) = &self.factory_data {
                    out.extend_from_slice(data);
                }
                out
            }
            None => Vec::new(),
        }
    }

    /// `paymaster || verificationGasLimit(16) || postOpGasLimit(16) || paymasterData`.
    pub fn paymaster_and_data(&self) -> Vec<u8> {
        let Some(paymaster) = self.paymaster else {
            return Vec::new();
        };
        let mut out = paymaster.to_vec();
        out.extend_from_slice(&low_u128(self.paymaster_verification_gas_limit.unwrap_or_default()).to_be_bytes());
        out.extend_from_slice(&low_u128(self.paymaster_post_op_gas_limit.unwrap_or_default()).to_be_bytes());
        if let Some(data) = &self.paymaster_data {
            out.extend_from_slice(data);
        }
        out
    }

    pub fn is_sponsored(&self) -> bool {
        self.paymaster.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Operation {
    #[default]
    Call         = 0,
    DelegateCall = 1,
}

/// A call the account makes on its own behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaTransaction {
    pub to:        Address,
    pub value:     U256,
    pub data:      Bytes,
    pub operation: Operation,
}

impl MetaTransaction {
    pub fn call(to: Address, data: impl Into<Bytes>) -> Self {
        Self { to, value: U256::ZERO, data: data.into(), operation: Operation::Call }
    }
}

/// EIP-712 hash of the `SafeOp` the 4337 module asks owners to sign. The
/// domain is `{chainId, verifyingContract: module}`.
pub fn safe_operation_hash(
    op: &UserOperation,
    valid_after: u64,
    valid_until: u64,
    chain_id: u64,
    addresses: &SafeAddresses,
) -> B256 {
    let domain = eip712_domain! {
        chain_id: chain_id,
        verifying_contract: addresses.safe_4337_module,
    };
    let safe_op = SafeOp {
        safe:                 op.sender,
        nonce:                op.nonce,
        initCode:             op.init_code().into(),
        callData:             op.call_data.clone(),
        verificationGasLimit: low_u128(op.verification_gas_limit),
        callGasLimit:         low_u128(op.call_gas_limit),
        preVerificationGas:   op.pre_verification_gas,
        maxPriorityFeePerGas: low_u128(op.max_priority_fee_per_gas),
        maxFeePerGas:         low_u128(op.max_fee_per_gas),
        paymasterAndData:     op.paymaster_and_data().into(),
        validAfter:           U48::from(valid_after & UINT48_MASK),
        validUntil:           U48::from(valid_until & UINT48_MASK),
        entryPoint:           addresses.entry_point,
    };
    safe_op.eip712_signing_hash(&domain)
}

/// Values above `u128::MAX` cannot be represented on-chain; they saturate.
fn low_u128(value: U256) -> u128 {
    u128::try_from(value).unwrap_or(u128::MAX)
}
