//! Seam to the node protocol client (chain-sync + block-fetch) and the block model.
//!
//! The wire protocol, handshake and ledger decoding live behind these traits. Chain-sync
//! callbacks are surfaced as a pull-based stream of [ChainEvent]s so the fetcher's state
//! machine does not depend on how a particular client registers handlers.

use crate::config::Transport;
use crate::network::Network;
use crate::point::{ChainPoint, Tip};
use async_trait::async_trait;

/// A full block as exposed by the ledger model.
pub trait Block: Send + Sync {
    fn slot(&self) -> u64;
    /// Block height.
    fn number(&self) -> u64;
    fn hash(&self) -> Vec<u8>;
    fn prev_hash(&self) -> Vec<u8>;

    fn point(&self) -> ChainPoint {
        ChainPoint::new(self.slot(), self.hash())
    }
}

/// A block header delivered by chain-sync when the full body is not inlined.
pub trait BlockHeader: Send + Sync {
    fn slot(&self) -> u64;
    fn hash(&self) -> Vec<u8>;

    fn point(&self) -> ChainPoint {
        ChainPoint::new(self.slot(), self.hash())
    }
}

/// Turns a block into the opaque payload carried in `FIRE BLOCK`.
pub trait BlockSerializer<B>: Send + Sync {
    fn serialize(&self, block: &B) -> anyhow::Result<Vec<u8>>;
}

impl<B, F> BlockSerializer<B> for F
where
    F: Fn(&B) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    fn serialize(&self, block: &B) -> anyhow::Result<Vec<u8>> {
        self(block)
    }
}

/// One chain-sync notification.
#[derive(Debug, Clone)]
pub enum ChainEvent<B, H> {
    /// Roll forward with the full block inlined.
    ForwardWithBlock { block: B, tip: Tip },
    /// Roll forward with only a header; the block must be fetched by point.
    ForwardWithHeader { header: H, tip: Tip },
    /// Roll back to `point`.
    Backward { point: ChainPoint, tip: Tip },
}

/// An established chain-sync/block-fetch session.
#[async_trait]
pub trait ChainSyncClient: Send {
    type Block: Block + 'static;
    type Header: BlockHeader + 'static;

    async fn current_tip(&mut self) -> anyhow::Result<Tip>;

    /// Find an intersection with `points` (newest first) and start following from it.
    async fn sync(&mut self, points: &[ChainPoint]) -> anyhow::Result<()>;

    /// Wait for the next event. `Ok(None)` means the remote ended the stream.
    async fn next_event(&mut self) -> anyhow::Result<Option<ChainEvent<Self::Block, Self::Header>>>;

    /// Fetch a full block by point.
    async fn fetch_block(&mut self, point: &ChainPoint) -> anyhow::Result<Self::Block>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Opens protocol sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    type Client: ChainSyncClient + 'static;

    async fn connect(
        &self,
        transport: &Transport,
        network: &Network,
        pipeline_limit: u32,
    ) -> anyhow::Result<Self::Client>;
}
