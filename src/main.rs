use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cfg = safepass::config::Config::parse();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(safepass::run(cfg))
}
