pub mod config;
pub mod diagnostics;
pub mod error;
pub mod lifecycle;
pub mod provider;
pub mod safe;
pub mod webauthn;

use std::time::Duration;

use alloy_primitives::U256;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolCall;

use lifecycle::{CreateOptions, LifecycleError, PendingUserOperation};
use provider::rpc::{RpcBundler, RpcNode, RpcPaymaster};
use provider::{BundlerProvider, NodeProvider, Outcome, PaymasterProvider};
use safe::{InitOptions, MetaTransaction, SafeAccount, SignerIdentity};
use webauthn::{
    CredentialCreationOptions, CredentialSimulator, Passkey, PubKeyCredParam, RelyingParty, UserEntity,
    UserVerification,
};

pub use error::{Error, Result};

/// Replay the three-operation demo: deploy a two-EOA Safe while minting an NFT,
/// swap the second EOA for a passkey, then mint again signed by the passkey.
pub async fn run(cfg: config::Config) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    let level = match cfg.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .init();

    tracing::info!(chain_id = cfg.chain_id, "Starting safepass");

    diagnostics::check(&cfg)?;

    let node = RpcNode::new(cfg.node_url.clone());
    let bundler = RpcBundler::new(cfg.bundler_url.clone());
    let paymaster = RpcPaymaster::new(cfg.paymaster_url.clone(), cfg.chain_id);
    let timeout = Duration::from_secs(cfg.inclusion_timeout);

    let eoa1 = PrivateKeySigner::random();
    let eoa2 = PrivateKeySigner::random();
    let proxy_creation_code = node.proxy_creation_code(safe::SafeAddresses::default().proxy_factory).await?;
    let account = SafeAccount::initialize_new_account(
        vec![SignerIdentity::Eoa(eoa1.address()), SignerIdentity::Eoa(eoa2.address())],
        InitOptions { threshold: 1, salt_nonce: U256::ZERO, proxy_creation_code },
    )?;
    println!("Account address (sender): {}", account.address());

    let mint = MetaTransaction::call(cfg.nft_contract, safe::contracts::mintCall { to: account.address() }.abi_encode());
    let eoa1_only = CreateOptions { expected_signers: vec![SignerIdentity::Eoa(eoa1.address())], ..Default::default() };

    // 1. Deploy and mint, signed by EOA 1.
    let op = account.create(&[mint.clone()], &node, &bundler, &eoa1_only).await?;
    let op = sponsor(&account, &op, &paymaster, &bundler, &cfg.sponsorship_policy_id).await?;
    println!("EOA owner 1 signing...");
    let op = account.sign_with_eoa(&op, &[eoa1.clone()], cfg.chain_id)?;
    report("Safe deployed with two EOA owners and an NFT minted", submit(&account, &op, &bundler, timeout).await?);

    // 2. Swap EOA 2 for a passkey.
    let simulator = CredentialSimulator::new();
    let credential = simulator.create(&CredentialCreationOptions {
        rp:                  RelyingParty { id: cfg.rp_id.clone(), name: "Safe".into() },
        user:                UserEntity {
            id:           alloy_primitives::keccak256("chucknorris").to_vec(),
            name:         "chucknorris".into(),
            display_name: "Chuck Norris".into(),
        },
        challenge:           now_millis().to_be_bytes().to_vec(),
        pub_key_cred_params: vec![PubKeyCredParam::ES256],
        user_verification:   UserVerification::Required,
    })?;
    let passkey = Passkey::from_credential(&credential, &cfg.rp_id)?;

    println!("Swapping EOA owner 2 for the passkey owner");
    let owners = node
        .owner_config(account.address())
        .await?
        .ok_or(LifecycleError::NotDeployed(account.address()))?;
    let swap = account.swap_owner(owners.owners(), &SignerIdentity::WebAuthn(passkey.public_key), eoa2.address())?;
    let op = account.create(&swap, &node, &bundler, &eoa1_only).await?;
    let op = sponsor(&account, &op, &paymaster, &bundler, &cfg.sponsorship_policy_id).await?;
    println!("EOA owner 1 signing...");
    let op = account.sign_with_eoa(&op, &[eoa1], cfg.chain_id)?;
    report("EOA owner 2 swapped for the passkey owner", submit(&account, &op, &bundler, timeout).await?);

    // 3. Mint, signed by the passkey.
    let passkey_only =
        CreateOptions { expected_signers: vec![SignerIdentity::WebAuthn(passkey.public_key)], ..Default::default() };
    let op = account.create(&[mint], &node, &bundler, &passkey_only).await?;
    let op = sponsor(&account, &op, &paymaster, &bundler, &cfg.sponsorship_policy_id).await?;
    println!("Passkey owner signing...");
    let op = account.sign_with_passkey(&op, &simulator, &passkey, cfg.chain_id)?;
    report("NFT minted, signed by the passkey owner", submit(&account, &op, &bundler, timeout).await?);

    Ok(())
}

async fn sponsor(
    account: &SafeAccount,
    op: &PendingUserOperation,
    paymaster: &impl PaymasterProvider,
    bundler: &impl BundlerProvider,
    policy_id: &str,
) -> Result<PendingUserOperation, LifecycleError> {
    let (op, metadata) = account.sponsor(op, paymaster, bundler, policy_id).await?;
    println!("Gas sponsored by {}", metadata.name);
    Ok(op)
}

async fn submit(
    account: &SafeAccount,
    op: &PendingUserOperation,
    bundler: &impl BundlerProvider,
    timeout: Duration,
) -> Result<Outcome, LifecycleError> {
    let submitted = account.submit(op, bundler).await?;
    println!("User operation {} sent, waiting for inclusion...", submitted.user_op_hash());
    submitted.included_within(timeout).await
}

fn report(what: &str, outcome: Outcome) {
    if outcome.success() {
        println!("{what}. Transaction hash: {}", outcome.transaction_hash());
    } else {
        let reason = outcome.receipt().reason.as_deref().unwrap_or("no reason given");
        println!("User operation execution failed ({reason}). Transaction hash: {}", outcome.transaction_hash());
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
