//! nodenet - bring up a test network from a config file, or preview a topology

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nodenet_harness::{HarnessConfig, TestHarness, TopologySpec};
use nodenet_logging::{LogConfig, NodenetSubscriberBuilder};
use serde::Deserialize;

#[derive(Parser)]
#[command(
    name = "nodenet",
    about = "Multi-node test network harness",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a network, sync it, print peer counts, and tear it down
    Run {
        /// Harness configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print a topology preset
    Topology {
        /// Preset: none, chain, ring, star, full, random
        #[arg(short, long, default_value = "chain")]
        preset: String,

        /// Number of nodes
        #[arg(short, long, default_value = "4")]
        nodes: usize,

        /// Connection probability for the random preset
        #[arg(short, long, default_value = "0.4")]
        connection_prob: f64,
    },
}

/// Config file layout: harness settings plus an optional `[log]` table
#[derive(Deserialize)]
struct RunFile {
    #[serde(flatten)]
    harness: HarnessConfig,
    #[serde(default)]
    log: LogConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config, cli.verbose).await,
        Commands::Topology {
            preset,
            nodes,
            connection_prob,
        } => {
            let spec = if preset == "random" {
                TopologySpec::Random {
                    probability: connection_prob,
                }
            } else {
                preset.parse()?
            };
            let topology = spec.build(nodes)?;
            println!("{}", topology.visualize());
            println!("Connection order:");
            for (from, to) in topology.edges() {
                println!("  node{from} -> node{to}");
            }
            Ok(())
        }
    }
}

async fn run(path: PathBuf, verbose: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&path)?;
    let file: RunFile = toml::from_str(&text)?;
    file.harness.validate()?;

    let mut logging = NodenetSubscriberBuilder::new().with_config(file.log);
    if verbose {
        logging = logging.with_level("debug");
    }
    let _guard = logging.init()?;

    let report = TestHarness::run(file.harness, async |harness: &mut TestHarness| {
        harness.sync_blocks().await?;
        for node in harness.nodes() {
            let peers = node.rpc().get_connection_count().await?;
            let height = node.rpc().get_block_count().await?;
            println!("node{}: {peers} peers, height {height}", node.index());
        }
        Ok(())
    })
    .await;

    println!("{report}");
    if !report.passed() {
        anyhow::bail!("{} failure(s)", report.failures().len());
    }
    Ok(())
}
