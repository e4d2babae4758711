use crate::config::Config;

pub fn check(cfg: &Config) -> anyhow::Result<()> {
    let mut errors: Vec<String> = Vec::new();

    for (name, url) in [
        ("BUNDLER_URL", &cfg.bundler_url),
        ("JSON_RPC_NODE_PROVIDER", &cfg.node_url),
        ("PAYMASTER_RPC", &cfg.paymaster_url),
    ] {
        if !matches!(url.scheme(), "http" | "https") {
            errors.push(format!(
                "{name} must be an http(s) endpoint, got scheme '{}'\n  \
                 → only JSON-RPC over HTTP is supported",
                url.scheme()
            ));
        }
    }

    if cfg.chain_id == 0 {
        errors.push("CHAIN_ID is 0\n  → set it to the chain the bundler serves, e.g. 11155111".to_string());
    }

    if cfg.sponsorship_policy_id.trim().is_empty() {
        errors.push("SPONSORSHIP_POLICY_ID is empty\n  → every operation in the demo is sponsored".to_string());
    }

    if cfg.inclusion_timeout == 0 {
        errors.push("--inclusion-timeout is 0\n  → operations could never be observed as included".to_string());
    }

    if errors.is_empty() {
        return Ok(());
    }

    for err in &errors {
        eprintln!("ERROR: {err}");
    }
    anyhow::bail!("{} preflight check(s) failed", errors.len());
}
