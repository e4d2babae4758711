//! Solidity bindings and canonical deployment addresses for Safe v1.4.1 with
//! the 4337 module v0.3.0 and the WebAuthn signer contracts.

use alloy_primitives::{Address, address};
use alloy_sol_types::sol;

sol! {
    /// Safe singleton.
    function setup(
        address[] _owners,
        uint256 _threshold,
        address to,
        bytes data,
        address fallbackHandler,
        address paymentToken,
        uint256 payment,
        address paymentReceiver
    ) external;

    function getOwners() external view returns (address[]);
    function getThreshold() external view returns (uint256);
    function swapOwner(address prevOwner, address oldOwner, address newOwner) external;

    /// SafeProxyFactory.
    function createProxyWithNonce(address _singleton, bytes initializer, uint256 saltNonce)
        external returns (address proxy);
    function proxyCreationCode() external pure returns (bytes);

    /// SafeModuleSetup.
    function enableModules(address[] modules) external;

    /// Safe4337Module.
    function executeUserOp(address to, uint256 value, bytes data, uint8 operation) external;

    /// MultiSendCallOnly.
    function multiSend(bytes transactions) external payable;

    /// EntryPoint v0.7.
    function getNonce(address sender, uint192 key) external view returns (uint256 nonce);

    /// SafeWebAuthnSignerFactory.
    function createSigner(uint256 x, uint256 y, uint176 verifiers) external returns (address signer);

    /// SafeWebAuthnSharedSigner.
    struct SharedSignerConfig {
        uint256 x;
        uint256 y;
        uint176 verifiers;
    }
    function configure(SharedSignerConfig signer) external;
    function getConfiguration(address account) external view returns (SharedSignerConfig signer);

    /// EIP-712 message the 4337 module asks owners to sign.
    struct SafeOp {
        address safe;
        uint256 nonce;
        bytes initCode;
        bytes callData;
        uint128 verificationGasLimit;
        uint128 callGasLimit;
        uint256 preVerificationGas;
        uint128 maxPriorityFeePerGas;
        uint128 maxFeePerGas;
        bytes paymasterAndData;
        uint48 validAfter;
        uint48 validUntil;
        address entryPoint;
    }

    /// ERC-721 with open minting, used by the demo flow.
    function mint(address to) external;
}

/// Addresses of every contract the account relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeAddresses {
    pub entry_point:          Address,
    pub safe_4337_module:     Address,
    pub safe_module_setup:    Address,
    pub safe_singleton:       Address,
    pub proxy_factory:        Address,
    pub multi_send_call_only: Address,
    pub webauthn_shared_signer:  Address,
    pub webauthn_signer_factory: Address,
    pub fcl_p256_verifier:       Address,
    /// RIP-7212 precompile; zero disables the precompile path.
    pub p256_precompile:         u16,
}

impl Default for SafeAddresses {
    fn default() -> Self {
        Self {
            entry_point: address!("0x0000000071727De22E5E9d8BAf0edAc6f37da032"),
            safe_4337_module: address!("0x75cf11467937ce3F2f357CE24ffc3DBF8fD5c226"),
            safe_module_setup: address!("0x2dd68b007B46fBe91B9A7c3EDa5A7a1063cB5b47"),
            safe_singleton: address!("0x29fcB43b46531BcA003ddC8FCB67FFE91900C762"),
            proxy_factory: address!("0x4e1DCf7AD4e460CfD30791CCC4F9c8a4f820ec67"),
            multi_send_call_only: address!("0x9641d764fc13c8B624c04430C7356C1C7C8102e2"),
            webauthn_shared_signer: address!("0x94a4F6affBd8975951142c3999aEAB7ecee555c2"),
            webauthn_signer_factory: address!("0x1d31F259eE307358a26dFb23EB365939E8641195"),
            fcl_p256_verifier: address!("0x445a0683e494ea0c5AF3E83c5159fBE47Cf9e765"),
            p256_precompile: 0x0100,
        }
    }
}

/// First entry of the Safe owner linked list.
pub const SENTINEL_OWNERS: Address = address!("0x0000000000000000000000000000000000000001");
