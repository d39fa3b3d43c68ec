//! Firehose ingestion for a Cardano-style chain.
//!
//! - **BlockFetcher**: follows the chain over a node protocol client, emits one `FIRE BLOCK`
//!   line per block on an output stream, and keeps a sparse cursor of recent points so a
//!   restart can resume from the last emitted block.
//! - **ConsoleReader**: the consumer side; scans a byte stream, decodes `FIRE` lines and
//!   delivers ordered blocks on a bounded queue with a separate error side channel.
//!
//! The node protocol itself sits behind [Connector] / [ChainSyncClient].

pub mod client;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod fetcher;
pub mod firehose;
pub mod network;
pub mod point;
pub mod reader;

pub use client::{Block, BlockHeader, BlockSerializer, ChainEvent, ChainSyncClient, Connector};
pub use codec::{decode_line, CodecError, Decoded, FirehoseBlock, FirehoseRecord, InitRecord};
pub use config::{ConfigError, FetcherConfig, Transport};
pub use cursor::{CursorStore, PersistError};
pub use fetcher::{BlockFetcher, FetcherError, FetcherState};
pub use firehose::FirehoseInstrumentation;
pub use network::{Network, SlotConfig};
pub use point::{ChainPoint, Tip};
pub use reader::{ConsoleReader, ReadError, ReaderOptions, ReaderStreams};
