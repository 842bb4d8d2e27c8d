// gossipnode - run a gossip peer from the command line
//
// stdin commands:
//   # <text>          gossip text to every known peer
//   @<peer> <text>    send a direct message
//   >info             print identity, address and counters

use clap::Parser;
use gossipmesh::gossip::GossipEvent;
use gossipmesh::identity::{Keypair, PeerId};
use gossipmesh::node::{Node, NodeConfig};
use gossipmesh::peer::SubnetId;
use gossipmesh::transport::TransportConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// A known peer, given as `<base58 id>@<ip:port>`
#[derive(Clone, Debug)]
struct PeerArg {
    id: PeerId,
    addr: SocketAddr,
}

impl FromStr for PeerArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s
            .split_once('@')
            .ok_or_else(|| "peer must be <base58 id>@<ip:port>".to_string())?;
        let id = id.parse::<PeerId>().map_err(|e| e.to_string())?;
        let addr = addr.parse::<SocketAddr>().map_err(|e| e.to_string())?;
        Ok(Self { id, addr })
    }
}

#[derive(Parser, Debug)]
#[command(name = "gossipnode")]
#[command(author, version, about = "Epidemic content dissemination peer", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long, default_value_t = 0)]
    port: u16,

    /// Known peer, repeatable
    #[arg(long = "peer", value_name = "ID@ADDR")]
    peers: Vec<PeerArg>,

    /// Capacity of one cache generation, in bytes
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    cache_capacity: usize,

    /// Keep received content in a sled store at this path
    #[arg(long)]
    store: Option<PathBuf>,

    /// Delay between dial attempts
    #[arg(long, default_value_t = 1000)]
    dial_retry_ms: u64,

    /// Hex-encoded secret key file, created if missing
    #[arg(long)]
    key: Option<PathBuf>,
}

fn load_or_create_key(path: &Path) -> Result<Keypair, Box<dyn std::error::Error>> {
    if path.exists() {
        let encoded = std::fs::read_to_string(path)?;
        let bytes = hex::decode(encoded.trim())?;
        return Ok(Keypair::from_bytes(&bytes)?);
    }
    let keypair = Keypair::generate();
    std::fs::write(path, hex::encode(keypair.to_bytes()))?;
    Ok(keypair)
}

async fn handle_line(node: &Node, line: &str) {
    let line = line.trim();
    if let Some(text) = line.strip_prefix('#') {
        match node.gossip(SubnetId::GLOBAL, text.trim().as_bytes().to_vec()).await {
            Ok(id) => info!(content = %id, "gossiped"),
            Err(e) => warn!(error = %e, "gossip incomplete"),
        }
    } else if let Some(rest) = line.strip_prefix('@') {
        let Some((peer, text)) = rest.split_once(' ') else {
            warn!("usage: @<peer> <text>");
            return;
        };
        let peer = match peer.parse::<PeerId>() {
            Ok(peer) => peer,
            Err(e) => {
                warn!(error = %e, "invalid peer id");
                return;
            }
        };
        if let Err(e) = node.send(&peer, text.as_bytes().to_vec()).await {
            warn!(peer = %peer.short(), error = %e, "send failed");
        }
    } else if line == ">info" {
        println!("id:      {}", node.id());
        println!("address: {}", node.local_addr());
        println!("peers:   {}", node.table().peer_count());
        println!("cached:  {}", node.cache().len());
        println!("gossip:  {:?}", node.gossip_stats());
        println!("network: {:?}", node.transport_stats());
    } else if !line.is_empty() {
        warn!("unknown command, expected '# text', '@peer text' or '>info'");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let keypair = match &args.key {
        Some(path) => load_or_create_key(path)?,
        None => Keypair::generate(),
    };

    let mut config = NodeConfig::new()
        .with_transport(
            TransportConfig::new()
                .with_bind_address(&args.bind)
                .with_bind_port(args.port),
        )
        .with_cache_capacity(args.cache_capacity)
        .with_dial_retry(Duration::from_millis(args.dial_retry_ms));
    if let Some(store) = &args.store {
        config = config.with_store_path(store);
    }

    let node = Arc::new(Node::new(keypair, config).await?);
    info!(id = %node.id(), addr = %node.local_addr(), "gossipnode started");
    for peer in &args.peers {
        node.add_peer(peer.id, peer.addr);
    }

    let runner = node.clone();
    let run = tokio::spawn(async move { runner.run().await });

    let mut events = node.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(GossipEvent::ContentReceived { id, data, from }) => {
                    println!("[{} via {}] {}", id, from.short(), String::from_utf8_lossy(&data));
                }
                Ok(GossipEvent::DirectMessage { from, data }) => {
                    println!("[direct from {}] {}", from.short(), String::from_utf8_lossy(&data));
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "event subscriber lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => handle_line(&node, &line).await,
                None => break,
            }
        }
    }

    node.shutdown();
    run.await??;
    Ok(())
}
