//! nodenet-mock-node - a minimal node for exercising the harness
//!
//! Keeps an in-memory block tree, relays blocks to its peers over the P2P
//! protocol, and answers the JSON-RPC methods the harness relies on.
//!
//! Switches for failure tests:
//! - `--no-rpc`: never open the RPC port, so the node never becomes ready
//! - `--ignore-stop`: acknowledge the `stop` RPC but keep running
//! - `--warmup-ms`: answer every RPC with the warm-up error for a while

mod chain;
mod node;
mod p2p;
mod rpc;

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use nodenet_logging::{LogConfig, NodenetSubscriberBuilder};
use nodenet_p2p::ConnectionConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::node::{MockNode, NodeOptions};

#[derive(Parser)]
#[command(
    name = "nodenet-mock-node",
    about = "Minimal node speaking the nodenet RPC and P2P protocols",
    version
)]
struct Args {
    /// Data directory; `debug.log` is written here
    #[arg(long)]
    datadir: PathBuf,

    /// P2P listening port
    #[arg(long, default_value = "18444")]
    port: u16,

    /// RPC listening port
    #[arg(long, default_value = "18443")]
    rpcport: u16,

    /// Address to listen on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,

    /// Do not start the RPC server
    #[arg(long)]
    no_rpc: bool,

    /// Keep running after the stop RPC
    #[arg(long)]
    ignore_stop: bool,

    /// Report warm-up on every RPC for this many milliseconds
    #[arg(long, default_value = "0")]
    warmup_ms: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    std::fs::create_dir_all(&args.datadir)?;
    let _guard = NodenetSubscriberBuilder::new()
        .with_config(LogConfig::node(&args.datadir))
        .with_level(args.log_level.clone())
        .init()?;

    let connection = ConnectionConfig::default().with_user_agent(concat!(
        "/nodenet-mock-node:",
        env!("CARGO_PKG_VERSION"),
        "/"
    ));
    let node = MockNode::new(
        connection,
        NodeOptions {
            ignore_stop: args.ignore_stop,
            warmup: Duration::from_millis(args.warmup_ms),
        },
    );

    let p2p_listener = TcpListener::bind((args.bind, args.port)).await?;
    info!(addr = %p2p_listener.local_addr()?, "P2P listening");
    let p2p_task = tokio::spawn(p2p::listen(node.clone(), p2p_listener));

    let rpc_task = if args.no_rpc {
        warn!("RPC server disabled");
        None
    } else {
        let listener = TcpListener::bind((args.bind, args.rpcport)).await?;
        info!(addr = %listener.local_addr()?, "RPC listening");
        let shutdown = node.shutdown_token().clone();
        let app = rpc::router(node.clone());
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }))
    };

    tokio::select! {
        _ = node.shutdown_token().cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted");
            node.shutdown_token().cancel();
        }
    }

    if let Some(task) = rpc_task {
        task.await??;
    }
    node.close_all().await;
    p2p_task.await?;
    info!("Shut down");
    Ok(())
}
