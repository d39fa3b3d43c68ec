//! Firehose instrumentation: turns blocks into `FIRE` lines on an output stream.

use crate::client::{Block, BlockSerializer};
use crate::codec::{FirehoseRecord, InitRecord};
use crate::network::SlotConfig;
use anyhow::Context;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Blocks behind the current one that are considered irreversible.
pub const LIB_OFFSET: u64 = 2160;

/// Build the wire record for `block` around an already-serialized payload.
pub fn record_for<B: Block>(block: &B, payload: Vec<u8>, slot_config: &SlotConfig) -> FirehoseRecord {
    let number = block.number();
    FirehoseRecord {
        number,
        id: hex::encode(block.hash()),
        parent_number: number.saturating_sub(1),
        parent_id: hex::encode(block.prev_hash()),
        lib_number: number.saturating_sub(LIB_OFFSET),
        timestamp_nanos: slot_config.slot_to_unix_nanos(block.slot()),
        payload,
    }
}

/// Writes `FIRE INIT` once and a `FIRE BLOCK` per block to `W`.
pub struct FirehoseInstrumentation<W, S> {
    writer: W,
    serializer: S,
    block_type_url: String,
    slot_config: SlotConfig,
}

impl<W, S> FirehoseInstrumentation<W, S>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, serializer: S, block_type_url: impl Into<String>, slot_config: SlotConfig) -> Self {
        Self {
            writer,
            serializer,
            block_type_url: block_type_url.into(),
            slot_config,
        }
    }

    pub async fn init(&mut self) -> std::io::Result<()> {
        let line = InitRecord::new(self.block_type_url.clone()).encode();
        self.write_line(&line).await
    }

    /// Serialize `block` into its record. Does not write anything.
    pub fn record<B>(&self, block: &B) -> anyhow::Result<FirehoseRecord>
    where
        B: Block,
        S: BlockSerializer<B>,
    {
        let payload = self
            .serializer
            .serialize(block)
            .context("failed to serialize block")?;
        Ok(record_for(block, payload, &self.slot_config))
    }

    pub async fn output(&mut self, record: &FirehoseRecord) -> std::io::Result<()> {
        self.write_line(&record.encode()).await
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}
