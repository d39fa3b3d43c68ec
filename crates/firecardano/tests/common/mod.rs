//! Common helpers for integration tests: an in-memory node behind the client traits.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use firecardano::{
    Block, BlockFetcher, BlockHeader, ChainEvent, ChainPoint, ChainSyncClient, Connector, FetcherConfig,
    FetcherError, Network, Tip, Transport,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockBlock {
    pub slot: u64,
    pub number: u64,
    pub hash: Vec<u8>,
    pub prev_hash: Vec<u8>,
}

impl Block for MockBlock {
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
pub struct MockHeader {
    pub slot: u64,
    pub hash: Vec<u8>,
}

impl BlockHeader for MockHeader {
    fn slot(&self) -> u64 {
        self.slot
    }
    fn hash(&self) -> Vec<u8> {
        self.hash.clone()
    }
}

pub type MockEvent = ChainEvent<MockBlock, MockHeader>;

pub fn hash_for(number: u64) -> Vec<u8> {
    let mut h = vec![0xb1];
    h.extend_from_slice(&number.to_be_bytes());
    h
}

/// Block `number` at slot `number * 20`.
pub fn block(number: u64) -> MockBlock {
    MockBlock {
        slot: number * 20,
        number,
        hash: hash_for(number),
        prev_hash: hash_for(number.saturating_sub(1)),
    }
}

pub fn header(b: &MockBlock) -> MockHeader {
    MockHeader {
        slot: b.slot,
        hash: b.hash.clone(),
    }
}

pub fn tip_at(number: u64) -> Tip {
    Tip {
        point: block(number).point(),
        block_number: number,
    }
}

pub fn forward(b: MockBlock) -> Result<MockEvent> {
    let tip = Tip {
        point: b.point(),
        block_number: b.number,
    };
    Ok(ChainEvent::ForwardWithBlock { block: b, tip })
}

/// Payload carried in `FIRE BLOCK`.
pub fn payload(b: &MockBlock) -> Result<Vec<u8>> {
    Ok(format!("block-{}", b.number).into_bytes())
}

/// Everything the mock node was asked to do.
#[derive(Debug, Default)]
pub struct Calls {
    pub connects: Vec<(Transport, u32)>,
    pub tip_requests: usize,
    pub sync_points: Vec<Vec<ChainPoint>>,
    pub fetches: Vec<ChainPoint>,
    pub closes: usize,
}

pub struct MockConnector {
    events: Mutex<Option<mpsc::Receiver<Result<MockEvent>>>>,
    store: HashMap<ChainPoint, MockBlock>,
    tip: Tip,
    calls: Arc<Mutex<Calls>>,
}

pub struct MockClient {
    events: mpsc::Receiver<Result<MockEvent>>,
    store: HashMap<ChainPoint, MockBlock>,
    tip: Tip,
    calls: Arc<Mutex<Calls>>,
}

/// Handles a test keeps to drive and inspect the mock node.
pub struct MockNode {
    pub events: mpsc::Sender<Result<MockEvent>>,
    pub calls: Arc<Mutex<Calls>>,
}

/// A mock node at `tip` that can serve `blocks` through block-fetch.
pub fn mock_node(tip: Tip, blocks: Vec<MockBlock>) -> (MockConnector, MockNode) {
    let (tx, rx) = mpsc::channel(64);
    let calls = Arc::new(Mutex::new(Calls::default()));
    let store = blocks.into_iter().map(|b| (b.point(), b)).collect();
    let connector = MockConnector {
        events: Mutex::new(Some(rx)),
        store,
        tip,
        calls: Arc::clone(&calls),
    };
    (connector, MockNode { events: tx, calls })
}

#[async_trait]
impl Connector for MockConnector {
    type Client = MockClient;

    async fn connect(&self, transport: &Transport, _network: &Network, pipeline_limit: u32) -> Result<MockClient> {
        self.calls
            .lock()
            .unwrap()
            .connects
            .push((transport.clone(), pipeline_limit));
        let events = match self.events.lock().unwrap().take() {
            Some(rx) => rx,
            None => bail!("mock node accepts a single session"),
        };
        Ok(MockClient {
            events,
            store: self.store.clone(),
            tip: self.tip.clone(),
            calls: Arc::clone(&self.calls),
        })
    }
}

#[async_trait]
impl ChainSyncClient for MockClient {
    type Block = MockBlock;
    type Header = MockHeader;

    async fn current_tip(&mut self) -> Result<Tip> {
        self.calls.lock().unwrap().tip_requests += 1;
        Ok(self.tip.clone())
    }

    async fn sync(&mut self, points: &[ChainPoint]) -> Result<()> {
        self.calls.lock().unwrap().sync_points.push(points.to_vec());
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<MockEvent>> {
        self.events.recv().await.transpose()
    }

    async fn fetch_block(&mut self, point: &ChainPoint) -> Result<MockBlock> {
        self.calls.lock().unwrap().fetches.push(point.clone());
        self.store
            .get(point)
            .cloned()
            .ok_or_else(|| anyhow!("no block at {}", point))
    }

    async fn close(&mut self) -> Result<()> {
        self.calls.lock().unwrap().closes += 1;
        Ok(())
    }
}

pub type PayloadFn = fn(&MockBlock) -> Result<Vec<u8>>;
pub type TestFetcher = BlockFetcher<MockConnector, DuplexStream, PayloadFn>;

/// Preview network over the default relay address.
pub fn config() -> FetcherConfig {
    FetcherConfig {
        network: "preview".to_string(),
        ..Default::default()
    }
}

/// A fetcher running on its own task, with its output readable line by line.
pub struct Running {
    pub lines: Lines<BufReader<DuplexStream>>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<(Result<(), FetcherError>, TestFetcher)>,
}

impl Running {
    pub async fn next_line(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for fetcher output")
            .expect("reading fetcher output")
            .expect("fetcher output closed")
    }

    /// Cancel and wait for the run to return.
    pub async fn stop(self) -> (Result<(), FetcherError>, TestFetcher) {
        self.cancel.cancel();
        self.finish().await
    }

    /// Wait for the run to return on its own.
    pub async fn finish(self) -> (Result<(), FetcherError>, TestFetcher) {
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("timed out waiting for fetcher to stop")
            .expect("fetcher task panicked")
    }
}

pub fn spawn_fetcher(config: FetcherConfig, connector: MockConnector) -> Running {
    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let mut fetcher: TestFetcher =
        BlockFetcher::new(config, connector, writer, payload as PayloadFn).expect("valid config");
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let result = fetcher.run(token).await;
        (result, fetcher)
    });
    Running {
        lines: BufReader::new(reader).lines(),
        cancel,
        task,
    }
}
