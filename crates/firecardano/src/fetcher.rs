//! BlockFetcher: follows the chain through a protocol client and emits `FIRE` lines.
//!
//! One run: emit `FIRE INIT`, dial, pick start points (checkpoint, configured point, or tip),
//! find the intersection, then handle chain-sync events until cancelled. Every emitted block
//! advances the cursor, which is persisted best-effort when a cursor file is configured.
//! No retries happen here; errors end the run and the caller decides whether to restart.

use crate::client::{Block, BlockHeader, BlockSerializer, ChainEvent, ChainSyncClient, Connector};
use crate::config::{ConfigError, FetcherConfig, Transport};
use crate::cursor::CursorStore;
use crate::firehose::FirehoseInstrumentation;
use crate::network::Network;
use crate::point::{ChainPoint, Tip};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

type ClientOf<C> = <C as Connector>::Client;
type BlockOf<C> = <ClientOf<C> as ChainSyncClient>::Block;
type HeaderOf<C> = <ClientOf<C> as ChainSyncClient>::Header;

#[derive(Debug, Error)]
pub enum FetcherError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("failed to fetch block at {point}: {reason}")]
    Fetch { point: ChainPoint, reason: String },

    #[error("failed to serialize block {number}: {reason}")]
    Serialize { number: u64, reason: String },

    #[error("failed to write block output: {0}")]
    Output(#[from] std::io::Error),
}

/// Lifecycle of a [BlockFetcher].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherState {
    Disconnected,
    Connecting,
    Syncing,
    ShuttingDown,
    Closed,
}

/// Block fetcher with Firehose instrumentation.
pub struct BlockFetcher<C: Connector, W, S> {
    config: FetcherConfig,
    network: Network,
    transport: Transport,
    connector: C,
    client: Option<C::Client>,
    firehose: FirehoseInstrumentation<W, S>,
    cursor: CursorStore,
    state: FetcherState,
}

impl<C, W, S> BlockFetcher<C, W, S>
where
    C: Connector,
    W: AsyncWrite + Unpin + Send,
    S: BlockSerializer<BlockOf<C>>,
{
    /// Resolve the network and transport and validate the configured start point.
    pub fn new(config: FetcherConfig, connector: C, writer: W, serializer: S) -> Result<Self, FetcherError> {
        let network = config.resolve_network()?;
        let transport = config.transport()?;
        config.start_point()?;
        let firehose = FirehoseInstrumentation::new(
            writer,
            serializer,
            config.block_type_url.clone(),
            network.slot_config,
        );
        Ok(Self {
            config,
            network,
            transport,
            connector,
            client: None,
            firehose,
            cursor: CursorStore::new(),
            state: FetcherState::Disconnected,
        })
    }

    pub fn state(&self) -> FetcherState {
        self.state
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn cursor(&self) -> &CursorStore {
        &self.cursor
    }

    /// Consume the fetcher, returning the output stream.
    pub fn into_output(self) -> W {
        self.firehose.into_writer()
    }

    /// Run until `cancel` fires or an error ends the session. The transport is closed
    /// either way. Cancellation is a clean `Ok(())`.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), FetcherError> {
        let result = self.run_once(&cancel).await;
        if let Err(e) = &result {
            tracing::error!(reason = %e, "block fetcher failed");
        }
        self.close().await;
        result
    }

    async fn run_once(&mut self, cancel: &CancellationToken) -> Result<(), FetcherError> {
        match cancel.run_until_cancelled(self.firehose.init()).await {
            Some(r) => r?,
            None => return Ok(()),
        }
        let resume = self.load_cursor().await;

        if !self.connect(cancel).await? {
            return Ok(());
        }

        tracing::info!("starting chain sync");
        let points = match cancel.run_until_cancelled(self.start_points(resume)).await {
            Some(points) => points?,
            None => return Ok(()),
        };
        let client = self.client_mut()?;
        match cancel.run_until_cancelled(client.sync(&points)).await {
            Some(r) => r.map_err(|e| FetcherError::Connection(format!("chain sync failed: {:#}", e)))?,
            None => return Ok(()),
        }
        self.state = FetcherState::Syncing;

        loop {
            let client = self.client_mut()?;
            let event = match cancel.run_until_cancelled(client.next_event()).await {
                Some(event) => event.map_err(|e| FetcherError::Connection(format!("chain sync: {:#}", e)))?,
                None => {
                    tracing::info!("cancelled, stopping chain sync");
                    return Ok(());
                }
            };
            let event = event.ok_or_else(|| FetcherError::Connection("chain sync stream closed by peer".into()))?;
            self.handle_event(event, cancel).await?;
        }
    }

    /// Dial the node. Returns `false` if cancelled while dialing.
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<bool, FetcherError> {
        self.state = FetcherState::Connecting;
        tracing::info!(
            transport = %self.transport,
            network = %self.network.name,
            magic = self.network.magic,
            node_to_node = self.transport.is_node_to_node(),
            "connecting"
        );
        let dial = self
            .connector
            .connect(&self.transport, &self.network, self.config.pipeline_limit);
        let client = match cancel.run_until_cancelled(dial).await {
            Some(r) => r.map_err(|e| {
                FetcherError::Connection(format!("failed to dial {}: {:#}", self.transport, e))
            })?,
            None => return Ok(false),
        };
        self.client = Some(client);
        tracing::info!(transport = %self.transport, "connected");
        Ok(true)
    }

    /// Load the checkpoint into the cursor store; returns its points (empty if none).
    async fn load_cursor(&mut self) -> Vec<ChainPoint> {
        let path = match &self.config.cursor_file {
            Some(p) => p,
            None => return Vec::new(),
        };
        match CursorStore::load(path).await {
            Ok(Some(store)) => {
                self.cursor = store;
                self.cursor.start_points()
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(reason = %e, "ignoring unreadable cursor file");
                Vec::new()
            }
        }
    }

    /// Intersection candidates: checkpoint points, else the configured point, else the tip.
    async fn start_points(&mut self, resume: Vec<ChainPoint>) -> Result<Vec<ChainPoint>, FetcherError> {
        if let Some(latest) = resume.first() {
            tracing::info!(count = resume.len(), latest_slot = latest.slot, "using cursor points for intersection");
            return Ok(resume);
        }
        if let Some(point) = self.config.start_point()? {
            tracing::info!(start = %point, "using configured start point");
            return Ok(vec![point]);
        }
        let tip = self
            .client_mut()?
            .current_tip()
            .await
            .map_err(|e| FetcherError::Connection(format!("failed to get current tip: {:#}", e)))?;
        tracing::info!(tip = %tip, "using current tip as start point");
        Ok(vec![tip.point])
    }

    async fn handle_event(
        &mut self,
        event: ChainEvent<BlockOf<C>, HeaderOf<C>>,
        cancel: &CancellationToken,
    ) -> Result<(), FetcherError> {
        match event {
            ChainEvent::ForwardWithBlock { block, tip } => self.process_block(&block, &tip, cancel).await,
            ChainEvent::ForwardWithHeader { header, tip } => {
                let point = header.point();
                let client = self.client_mut()?;
                let block = match cancel.run_until_cancelled(client.fetch_block(&point)).await {
                    Some(r) => r.map_err(|e| FetcherError::Fetch {
                        point: point.clone(),
                        reason: format!("{:#}", e),
                    })?,
                    None => return Ok(()),
                };
                self.process_block(&block, &tip, cancel).await
            }
            ChainEvent::Backward { point, tip } => {
                // The cursor is left untouched here; see DESIGN.md.
                tracing::info!(point = %point, tip = %tip, "roll backward");
                Ok(())
            }
        }
    }

    /// Emit `block` and advance the cursor. A write interrupted by cancellation leaves the
    /// cursor where it was.
    async fn process_block(
        &mut self,
        block: &BlockOf<C>,
        tip: &Tip,
        cancel: &CancellationToken,
    ) -> Result<(), FetcherError> {
        let record = self.firehose.record(block).map_err(|e| FetcherError::Serialize {
            number: block.number(),
            reason: format!("{:#}", e),
        })?;
        match cancel.run_until_cancelled(self.firehose.output(&record)).await {
            Some(r) => r?,
            None => {
                tracing::info!(number = record.number, "cancelled while writing block output");
                return Ok(());
            }
        }
        tracing::debug!(
            number = record.number,
            slot = block.slot(),
            id = %record.id,
            tip = tip.block_number,
            "block emitted"
        );

        self.cursor.add(block.point());
        if let Some(path) = &self.config.cursor_file {
            if let Err(e) = self.cursor.save(path).await {
                tracing::warn!(reason = %e, "failed to save cursor state");
            }
        }
        Ok(())
    }

    /// Close the transport. Safe to call repeatedly and before any connection exists.
    pub async fn close(&mut self) {
        if self.state == FetcherState::Closed {
            return;
        }
        self.state = FetcherState::ShuttingDown;
        if let Some(mut client) = self.client.take() {
            tracing::info!("closing connection");
            match client.close().await {
                Ok(()) => tracing::info!("connection closed"),
                Err(e) => tracing::warn!(reason = %e, "error during cleanup"),
            }
        }
        self.state = FetcherState::Closed;
    }

    fn client_mut(&mut self) -> Result<&mut C::Client, FetcherError> {
        self.client
            .as_mut()
            .ok_or_else(|| FetcherError::Connection("not connected".into()))
    }
}
