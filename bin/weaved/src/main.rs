use std::path::PathBuf;

use anyhow::{anyhow, Context};
use tracing::*;

use weave_common::logging;
use weave_node::{Node, NodeConfig};
use weave_primitives::params::Network;

use crate::args::Args;

mod args;

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    if let Err(e) = main_inner(args) {
        eprintln!("FATAL ERROR: {e}");
        return Err(e);
    }
    Ok(())
}

fn main_inner(args: Args) -> anyhow::Result<()> {
    let config = resolve_config(&args)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("weave-rt")
        .build()
        .context("init: build runtime")?;

    logging::init(logging::LoggerConfig::new("weaved".to_owned()));

    runtime.block_on(async move {
        let node = Node::start(config).await.context("init: start node")?;
        info!("node running, ctrl-c to stop");
        tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
        node.stop();
        Ok::<(), anyhow::Error>(())
    })?;

    logging::finalize();
    Ok(())
}

/// Config file first, CLI args layered on top.
fn resolve_config(args: &Args) -> anyhow::Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => {
            let data_dir = args
                .data_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("weave-data"));
            NodeConfig::with_data_dir(data_dir, Network::Live)
        }
    };
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(network) = &args.network {
        config.network = match network.as_str() {
            "test" => Network::Test,
            "beta" => Network::Beta,
            "live" => Network::Live,
            other => return Err(anyhow!("unknown network {other:?}")),
        };
    }
    if let Some(port) = args.peering_port {
        config.peering_port = port;
    }
    if let Some(port) = args.bootstrap_port {
        config.bootstrap_port = port;
    }
    config
        .preconfigured_peers
        .extend(args.peer.iter().cloned());
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("create data dir {}", config.data_dir.display()))?;
    Ok(config)
}
