use std::time::Duration;

/// AAGUID reported in attested credential data by the simulator.
pub const AAGUID: [u8; 16] = [
    0x5a, 0xfe, 0x9a, 0x55, 0x0c, 0x4e, 0x4b, 0x1d, 0x9f, 0x3e, 0x73, 0x61, 0x66, 0x65, 0x00, 0x01,
];
pub const CREDENTIAL_ID_LEN: usize = 32;

pub const DEFAULT_INCLUSION_TIMEOUT: Duration = Duration::from_secs(180);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(clap::Parser, Debug, Clone)]
#[command(name = "safepass", about = "Drive Safe UserOperations with EOA and passkey owners")]
pub struct Config {
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[arg(long, env = "CHAIN_ID")]
    pub chain_id: u64,
    #[arg(long, env = "BUNDLER_URL")]
    pub bundler_url: url::Url,
    #[arg(long = "node-url", env = "JSON_RPC_NODE_PROVIDER")]
    pub node_url: url::Url,
    #[arg(long, env = "PAYMASTER_RPC")]
    pub paymaster_url: url::Url,
    #[arg(long, env = "SPONSORSHIP_POLICY_ID")]
    pub sponsorship_policy_id: String,
    /// NFT contract exposing `mint(address)` used by the demo flow.
    #[arg(long, default_value = "0x9a7af758aE5d7B6aAE84fe4C5Ba67c041dFE5336")]
    pub nft_contract: alloy_primitives::Address,
    /// Relying party id the simulated passkey is scoped to.
    #[arg(long, default_value = "safe.global")]
    pub rp_id: String,
    /// Seconds to wait for each UserOperation to be included.
    #[arg(long, default_value_t = DEFAULT_INCLUSION_TIMEOUT.as_secs())]
    pub inclusion_timeout: u64,
}
