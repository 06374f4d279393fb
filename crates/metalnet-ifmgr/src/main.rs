//! ifquery - resolve interface specifiers against a network snapshot

use anyhow::{Context, Result};
use clap::Parser;
use metalnet_common::MetalnetConfig;
use metalnet_ifmgr::{IfMgr, NetworkStore, SpecifierQuery, TracingSink};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Resolve interface specifiers against a saved network state.
#[derive(Parser, Debug)]
#[command(name = "ifquery")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = metalnet_common::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// JSON snapshot of the network state
    #[arg(short = 's', long)]
    state: PathBuf,

    /// Log level, overrides the configuration file (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Separator between qualifier and value
    #[arg(long, default_value_t = metalnet_ifmgr::fields::DEFAULT_SEPARATOR)]
    separator: char,

    /// Specifiers, e.g. `name:eth0`, `&vid:untagged`, `|tag:sriov`
    specifiers: Vec<String>,
}

fn init_logging(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr).json())
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn load_store(path: &Path) -> Result<NetworkStore> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse state file {}", path.display()))
}

fn run(args: Args) -> Result<()> {
    let config = MetalnetConfig::load_or_default(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    init_logging(
        args.log_level.as_deref().unwrap_or(&config.logging.level),
        config.logging.json,
    );

    let store = load_store(&args.state)?;
    debug!(
        "Loaded {} interfaces, {} links",
        store.interfaces().count(),
        store.links().count()
    );
    let mgr = IfMgr::new(store, config, Arc::new(TracingSink));

    let query = SpecifierQuery::parse(args.specifiers.iter().map(String::as_str), args.separator)?;
    let (nodes, map) = query.matching_node_map(mgr.store());
    info!("{} node(s) matched", nodes.len());

    for node in nodes {
        let hostname = mgr
            .store()
            .node(node)
            .map(|n| n.hostname.clone())
            .unwrap_or_else(|| node.to_string());
        let names: Vec<&str> = map
            .get(&node)
            .into_iter()
            .flatten()
            .filter_map(|id| mgr.store().interface(*id))
            .map(|i| i.name())
            .collect();
        println!("{}: {}", hostname, names.join(", "));
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("ifquery: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
