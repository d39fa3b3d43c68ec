//! Example: run the BlockFetcher against an in-process synthetic chain and write FIRE lines
//! to stdout. Logs go to stderr.
//!
//! Usage: cargo run -p firecardano --example simulated_fetcher -- [--network preview]
//!   [--network-magic N] [--address HOST:PORT | --socket-path PATH] [--pipeline-limit N]
//!   [--start-slot N --start-hash HEX] [--cursor-file PATH] [--blocks N] [--interval-ms N]
//!   [--rollback-every N]
//!
//! A TCP address simulates node-to-node (headers, then block-fetch); a socket path simulates
//! node-to-client (full blocks inline).

use anyhow::Result;
use async_trait::async_trait;
use firecardano::{
    Block, BlockFetcher, BlockHeader, ChainEvent, ChainPoint, ChainSyncClient, Connector, FetcherConfig, Network,
    Tip, Transport,
};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Slots between consecutive synthetic blocks.
const SLOT_SPACING: u64 = 20;

#[derive(Debug, Clone, Serialize)]
struct SyntheticBlock {
    slot: u64,
    number: u64,
    #[serde(with = "hex_bytes")]
    hash: Vec<u8>,
    #[serde(with = "hex_bytes")]
    prev_hash: Vec<u8>,
    era: &'static str,
}

mod hex_bytes {
    pub fn serialize<S: serde::Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }
}

impl SyntheticBlock {
    fn at(number: u64, fork: u8) -> Self {
        Self {
            slot: number * SLOT_SPACING,
            number,
            hash: block_hash(number, fork),
            prev_hash: block_hash(number.saturating_sub(1), fork),
            era: "conway",
        }
    }
}

impl Block for SyntheticBlock {
    fn slot(&self) -> u64 {
        self.slot
    }
    fn number(&self) -> u64 {
        self.number
    }
    fn hash(&self) -> Vec<u8> {
        self.hash.clone()
    }
    fn prev_hash(&self) -> Vec<u8> {
        self.prev_hash.clone()
    }
}

#[derive(Debug, Clone)]
struct SyntheticHeader {
    slot: u64,
    hash: Vec<u8>,
}

impl BlockHeader for SyntheticHeader {
    fn slot(&self) -> u64 {
        self.slot
    }
    fn hash(&self) -> Vec<u8> {
        self.hash.clone()
    }
}

fn block_hash(number: u64, fork: u8) -> Vec<u8> {
    let mut h = vec![0u8; 32];
    h[..8].copy_from_slice(&number.to_be_bytes());
    h[31] = fork;
    h
}

fn serialize_block(block: &SyntheticBlock) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(block)?)
}

#[derive(Clone)]
struct SyntheticChain {
    tip_number: u64,
    interval: Duration,
    blocks: Option<u64>,
    rollback_every: Option<u64>,
    done: CancellationToken,
}

struct SyntheticClient {
    chain: SyntheticChain,
    inline_blocks: bool,
    next: u64,
    emitted: u64,
    fork: u8,
}

#[async_trait]
impl Connector for SyntheticChain {
    type Client = SyntheticClient;

    async fn connect(&self, transport: &Transport, network: &Network, pipeline_limit: u32) -> Result<SyntheticClient> {
        tracing::info!(%transport, network = %network.name, pipeline_limit, "synthetic node accepted session");
        Ok(SyntheticClient {
            chain: self.clone(),
            inline_blocks: !transport.is_node_to_node(),
            next: self.tip_number + 1,
            emitted: 0,
            fork: 0,
        })
    }
}

#[async_trait]
impl ChainSyncClient for SyntheticClient {
    type Block = SyntheticBlock;
    type Header = SyntheticHeader;

    async fn current_tip(&mut self) -> Result<Tip> {
        let b = SyntheticBlock::at(self.chain.tip_number, self.fork);
        Ok(Tip {
            point: b.point(),
            block_number: b.number,
        })
    }

    async fn sync(&mut self, points: &[ChainPoint]) -> Result<()> {
        // Intersect at the newest point; the synthetic chain knows every slot.
        if let Some(p) = points.first() {
            self.next = p.slot / SLOT_SPACING + 1;
            tracing::info!(intersect = %p, "intersection found");
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ChainEvent<SyntheticBlock, SyntheticHeader>>> {
        if self.chain.blocks.is_some_and(|limit| self.emitted >= limit) {
            self.chain.done.cancel();
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.chain.interval).await;

        if let Some(every) = self.chain.rollback_every.filter(|n| *n > 0) {
            if self.emitted > 0 && self.emitted % every == 0 && self.next > 3 {
                self.emitted += 1;
                self.fork = self.fork.wrapping_add(1);
                let target = SyntheticBlock::at(self.next - 3, self.fork.wrapping_sub(1));
                self.next -= 2;
                return Ok(Some(ChainEvent::Backward {
                    point: target.point(),
                    tip: self.tip(),
                }));
            }
        }

        let block = SyntheticBlock::at(self.next, self.fork);
        self.next += 1;
        self.emitted += 1;
        let tip = self.tip();
        if self.inline_blocks {
            Ok(Some(ChainEvent::ForwardWithBlock { block, tip }))
        } else {
            Ok(Some(ChainEvent::ForwardWithHeader {
                header: SyntheticHeader {
                    slot: block.slot,
                    hash: block.hash,
                },
                tip,
            }))
        }
    }

    async fn fetch_block(&mut self, point: &ChainPoint) -> Result<SyntheticBlock> {
        let fork = point.hash.last().copied().unwrap_or_default();
        Ok(SyntheticBlock::at(point.slot / SLOT_SPACING, fork))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl SyntheticClient {
    fn tip(&self) -> Tip {
        let b = SyntheticBlock::at(self.next.max(self.chain.tip_number), self.fork);
        Tip {
            point: b.point(),
            block_number: b.number,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        tracing::error!(reason = %format!("{:#}", e), "block fetcher exited with error");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = FetcherConfig::default();
    let mut blocks = None;
    let mut interval_ms = 200u64;
    let mut rollback_every = None;
    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        i += 1;
        let value = args.get(i).cloned().unwrap_or_default();
        match flag {
            "--address" => {
                config.address = Some(value);
                config.socket_path = None;
            }
            "--socket-path" => {
                config.address = None;
                config.socket_path = Some(value.into());
            }
            "--network" => config.network = value,
            "--network-magic" => config.network_magic = value.parse()?,
            "--pipeline-limit" => config.pipeline_limit = value.parse()?,
            "--start-slot" => config.start_slot = value.parse()?,
            "--start-hash" => config.start_hash = Some(value),
            "--cursor-file" => config.cursor_file = Some(value.into()),
            "--blocks" => blocks = Some(value.parse()?),
            "--interval-ms" => interval_ms = value.parse()?,
            "--rollback-every" => rollback_every = Some(value.parse()?),
            other => anyhow::bail!("unknown flag {other}"),
        }
        i += 1;
    }

    let cancel = CancellationToken::new();
    let chain = SyntheticChain {
        tip_number: 1_000,
        interval: Duration::from_millis(interval_ms),
        blocks,
        rollback_every,
        done: cancel.clone(),
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let mut fetcher = BlockFetcher::new(config, chain, tokio::io::stdout(), serialize_block)?;
        tracing::info!(network = %fetcher.network().name, magic = fetcher.network().magic, "block fetcher starting");

        let signal_token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received shutdown signal, shutting down gracefully");
                signal_token.cancel();
            }
        });

        fetcher.run(cancel).await?;
        tracing::info!(cursor_points = fetcher.cursor().len(), "block fetcher stopped");
        Ok::<_, anyhow::Error>(())
    })
}
