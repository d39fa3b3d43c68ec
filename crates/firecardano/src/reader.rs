//! ConsoleReader: consumer side of the FIRE line protocol.
//!
//! A single scan task reads the input line by line, decodes `FIRE` lines and pushes blocks
//! onto a bounded queue (blocking when full, never dropping). Decode problems go to a
//! small side queue with drop-when-full semantics. Both queues close when the scan task
//! returns, which happens at end of input, on an input error, or on cancellation.

use crate::codec::{decode_line, is_fire_line, CodecError, Decoded, FirehoseBlock, InitRecord};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Longest accepted line (payloads are base64 blocks and can be large).
pub const DEFAULT_MAX_LINE_SIZE: usize = 8 * 1024 * 1024;

const SKIP_CHUNK: u64 = 64 * 1024;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("line {line}: {source}")]
    Decode {
        line: u64,
        #[source]
        source: CodecError,
    },

    #[error("line {line}: longer than {limit} bytes, skipped")]
    LineTooLong { line: u64, limit: usize },

    #[error("line {line}: FIRE line is not valid UTF-8")]
    InvalidUtf8 { line: u64 },

    #[error("reading input: {0}")]
    Io(#[from] io::Error),
}

/// Queue sizes and line limit.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub max_line_size: usize,
    pub block_buffer: usize,
    pub error_buffer: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_line_size: DEFAULT_MAX_LINE_SIZE,
            block_buffer: 100,
            error_buffer: 10,
        }
    }
}

/// Receiving ends of the reader's queues.
#[derive(Debug)]
pub struct ReaderStreams {
    pub blocks: mpsc::Receiver<FirehoseBlock>,
    pub errors: mpsc::Receiver<ReadError>,
}

/// Handle to a running scan task.
pub struct ConsoleReader {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    init: Arc<RwLock<Option<InitRecord>>>,
}

impl ConsoleReader {
    /// Spawn the scan task over `input`. Cancelling `cancel` (or calling [ConsoleReader::close])
    /// stops it; the queues in [ReaderStreams] close once it has stopped.
    pub fn start<R>(input: R, options: ReaderOptions, cancel: CancellationToken) -> (Self, ReaderStreams)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (block_tx, blocks) = mpsc::channel(options.block_buffer.max(1));
        let (error_tx, errors) = mpsc::channel(options.error_buffer.max(1));
        let init = Arc::new(RwLock::new(None));
        let cancel = cancel.child_token();
        let scanner = Scanner {
            input: BufReader::new(input),
            max_line_size: options.max_line_size,
            block_tx,
            error_tx,
            init: Arc::clone(&init),
            line_no: 0,
        };
        let task = tokio::spawn(scanner.run(cancel.clone()));
        let reader = Self {
            cancel,
            task: Some(task),
            init,
        };
        (reader, ReaderStreams { blocks, errors })
    }

    /// The most recent `FIRE INIT` seen, if any.
    pub async fn init_record(&self) -> Option<InitRecord> {
        self.init.read().await.clone()
    }

    /// Wait for the scan task to finish on its own (end of input or input error).
    pub async fn done(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(reason = %e, "console reader task failed");
            }
        }
    }

    /// Stop scanning and wait for the scan task. Idempotent.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        self.done().await;
    }
}

enum LineRead {
    Eof,
    Line,
    TooLong,
}

struct Scanner<R> {
    input: BufReader<R>,
    max_line_size: usize,
    block_tx: mpsc::Sender<FirehoseBlock>,
    error_tx: mpsc::Sender<ReadError>,
    init: Arc<RwLock<Option<InitRecord>>>,
    line_no: u64,
}

impl<R: AsyncRead + Unpin + Send> Scanner<R> {
    async fn run(mut self, cancel: CancellationToken) {
        let mut buf = Vec::new();
        loop {
            let read = match cancel.run_until_cancelled(self.read_line(&mut buf)).await {
                Some(r) => r,
                None => break,
            };
            match read {
                Ok(LineRead::Eof) => {
                    tracing::debug!(lines = self.line_no, "input closed");
                    break;
                }
                Ok(LineRead::TooLong) => self.report(ReadError::LineTooLong {
                    line: self.line_no,
                    limit: self.max_line_size,
                }),
                Ok(LineRead::Line) => {
                    if !self.handle_line(&buf, &cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    self.report(ReadError::Io(e));
                    break;
                }
            }
        }
        // Dropping self closes both queues, after the last send.
    }

    /// Returns `false` when scanning should stop (cancelled or block receiver gone).
    async fn handle_line(&mut self, raw: &[u8], cancel: &CancellationToken) -> bool {
        let line = trim_line_end(raw);
        if !is_fire_line(line) {
            return true;
        }
        let line = match std::str::from_utf8(line) {
            Ok(s) => s,
            Err(_) => {
                self.report(ReadError::InvalidUtf8 { line: self.line_no });
                return true;
            }
        };
        match decode_line(line) {
            Ok(Some(Decoded::Block(block))) => {
                match cancel.run_until_cancelled(self.block_tx.send(block)).await {
                    Some(Ok(())) => true,
                    Some(Err(_)) => {
                        tracing::debug!("block receiver dropped, stopping");
                        false
                    }
                    None => false,
                }
            }
            Ok(Some(Decoded::Init(init))) => {
                tracing::info!(
                    version = %init.protocol_version,
                    block_type = %init.block_type,
                    "FIRE INIT received"
                );
                *self.init.write().await = Some(init);
                true
            }
            Ok(None) => true,
            Err(source) => {
                self.report(ReadError::Decode {
                    line: self.line_no,
                    source,
                });
                true
            }
        }
    }

    /// Read one line into `buf` (newline included), enforcing the size limit.
    async fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<LineRead> {
        buf.clear();
        let limit = self.max_line_size as u64;
        let n = (&mut self.input)
            .take(limit.saturating_add(1))
            .read_until(b'\n', buf)
            .await?;
        if n == 0 {
            return Ok(LineRead::Eof);
        }
        self.line_no += 1;
        if buf.last() == Some(&b'\n') || n as u64 <= limit {
            return Ok(LineRead::Line);
        }
        // Over the limit: discard up to and including the next newline.
        loop {
            buf.clear();
            let n = (&mut self.input).take(SKIP_CHUNK).read_until(b'\n', buf).await?;
            if n == 0 || buf.last() == Some(&b'\n') {
                break;
            }
        }
        buf.clear();
        Ok(LineRead::TooLong)
    }

    /// Offer an error without blocking; dropped if the error queue is full.
    fn report(&self, err: ReadError) {
        match self.error_tx.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(err)) => {
                tracing::warn!(reason = %err, "error queue full, dropping parse error");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FirehoseRecord;
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    fn block_line(number: u64) -> String {
        FirehoseRecord {
            number,
            id: format!("id{number}"),
            parent_number: number - 1,
            parent_id: format!("id{}", number - 1),
            lib_number: 0,
            timestamp_nanos: 1,
            payload: vec![number as u8],
        }
        .encode()
            + "\n"
    }

    async fn drain(streams: &mut ReaderStreams) -> Vec<u64> {
        let mut out = Vec::new();
        while let Some(b) = streams.blocks.recv().await {
            out.push(b.record.number);
        }
        out
    }

    #[tokio::test]
    async fn preserves_order() {
        let input = format!("{}{}{}", block_line(10), block_line(11), block_line(12));
        let mock = Builder::new().read(input.as_bytes()).build();
        let (_reader, mut streams) = ConsoleReader::start(mock, ReaderOptions::default(), CancellationToken::new());
        assert_eq!(drain(&mut streams).await, vec![10, 11, 12]);
        assert!(streams.errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn init_then_block() {
        let mock = Builder::new()
            .read(b"FIRE INIT 3.0 type.example/Block\n")
            .read(b"FIRE BLOCK 100 hashA 99 hashB 0 1700000000000000000 aGk=\n")
            .build();
        let (mut reader, mut streams) = ConsoleReader::start(mock, ReaderOptions::default(), CancellationToken::new());
        let block = streams.blocks.recv().await.unwrap();
        assert_eq!(
            block.record,
            FirehoseRecord {
                number: 100,
                id: "hashA".into(),
                parent_number: 99,
                parent_id: "hashB".into(),
                lib_number: 0,
                timestamp_nanos: 1_700_000_000_000_000_000,
                payload: b"hi".to_vec(),
            }
        );
        assert_eq!(block.raw, "FIRE BLOCK 100 hashA 99 hashB 0 1700000000000000000 aGk=");
        reader.done().await;
        let init = reader.init_record().await.unwrap();
        assert_eq!(init.protocol_version, "3.0");
        assert_eq!(init.block_type, "type.example/Block");
    }

    #[tokio::test]
    async fn line_split_across_reads() {
        let mock = Builder::new()
            .read(b"FIRE BLOCK 7 a 6 ")
            .read(b"b 0 1 aGk=\nFIRE BLOCK 8 c 7 a 0 2")
            .read(b" aGk=")
            .build();
        let (_reader, mut streams) = ConsoleReader::start(mock, ReaderOptions::default(), CancellationToken::new());
        assert_eq!(drain(&mut streams).await, vec![7, 8]);
    }

    #[tokio::test]
    async fn bad_lines_are_reported_and_skipped() {
        let input = format!(
            "[BlockFetcher] connected\nFIRE BLOCK 5 abc\n{}FIRE BLOCK 6 a 5 b 0 1 %%%\n{}",
            block_line(1),
            block_line(2)
        );
        let mock = Builder::new().read(input.as_bytes()).build();
        let (_reader, mut streams) = ConsoleReader::start(mock, ReaderOptions::default(), CancellationToken::new());
        assert_eq!(drain(&mut streams).await, vec![1, 2]);

        let first = streams.errors.recv().await.unwrap();
        assert!(matches!(
            first,
            ReadError::Decode { line: 2, source: CodecError::MalformedLine { .. } }
        ));
        let second = streams.errors.recv().await.unwrap();
        assert!(matches!(
            second,
            ReadError::Decode { line: 4, source: CodecError::PayloadDecode(_) }
        ));
        assert!(streams.errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_error_queue_drops_errors() {
        let input = format!("FIRE BLOCK x\nFIRE BLOCK y\nFIRE BLOCK z\n{}", block_line(3));
        let mock = Builder::new().read(input.as_bytes()).build();
        let options = ReaderOptions {
            error_buffer: 1,
            ..Default::default()
        };
        let (_reader, mut streams) = ConsoleReader::start(mock, options, CancellationToken::new());
        assert_eq!(drain(&mut streams).await, vec![3]);
        assert!(matches!(streams.errors.recv().await, Some(ReadError::Decode { line: 1, .. })));
        assert!(streams.errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn over_long_line_is_reported_not_truncated() {
        let long = format!("FIRE BLOCK 1 a 0 b 0 1 {}\n", "A".repeat(500));
        let input = format!("{long}{}", block_line(2));
        let mock = Builder::new().read(input.as_bytes()).build();
        let options = ReaderOptions {
            max_line_size: 128,
            ..Default::default()
        };
        let (_reader, mut streams) = ConsoleReader::start(mock, options, CancellationToken::new());
        assert_eq!(drain(&mut streams).await, vec![2]);
        assert!(matches!(
            streams.errors.recv().await,
            Some(ReadError::LineTooLong { line: 1, limit: 128 })
        ));
    }

    #[tokio::test]
    async fn line_of_exactly_max_size_is_accepted() {
        let line = block_line(5);
        let limit = line.len() - 1;
        // Once newline-terminated, once as the final unterminated line.
        let input = format!("{line}{}", line.trim_end());
        let mock = Builder::new().read(input.as_bytes()).build();
        let options = ReaderOptions {
            max_line_size: limit,
            ..Default::default()
        };
        let (_reader, mut streams) = ConsoleReader::start(mock, options, CancellationToken::new());
        assert_eq!(drain(&mut streams).await, vec![5, 5]);
        assert!(streams.errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn one_byte_over_max_size_is_rejected() {
        let line = block_line(5);
        let limit = line.len() - 2;
        let mock = Builder::new()
            .read(line.as_bytes())
            .read(b"FIRE BLOCK 7 a 6 b 0 1 \n")
            .read(line.trim_end().as_bytes())
            .build();
        let options = ReaderOptions {
            max_line_size: limit,
            ..Default::default()
        };
        let (_reader, mut streams) = ConsoleReader::start(mock, options, CancellationToken::new());
        assert_eq!(drain(&mut streams).await, vec![7]);
        assert!(matches!(streams.errors.recv().await, Some(ReadError::LineTooLong { line: 1, .. })));
        assert!(matches!(streams.errors.recv().await, Some(ReadError::LineTooLong { line: 3, .. })));
    }

    #[tokio::test]
    async fn unbounded_line_size_reads_normally() {
        let input = format!("{}{}", block_line(1), block_line(2));
        let mock = Builder::new().read(input.as_bytes()).build();
        let options = ReaderOptions {
            max_line_size: usize::MAX,
            ..Default::default()
        };
        let (_reader, mut streams) = ConsoleReader::start(mock, options, CancellationToken::new());
        assert_eq!(drain(&mut streams).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn invalid_utf8_only_matters_on_fire_lines() {
        let mut input = b"noise \xff\xfe\n".to_vec();
        input.extend_from_slice(b"FIRE BLOCK 1 \xff 0 b 0 1 \n");
        input.extend_from_slice(block_line(2).as_bytes());
        let mock = Builder::new().read(&input).build();
        let (_reader, mut streams) = ConsoleReader::start(mock, ReaderOptions::default(), CancellationToken::new());
        assert_eq!(drain(&mut streams).await, vec![2]);
        assert!(matches!(streams.errors.recv().await, Some(ReadError::InvalidUtf8 { line: 2 })));
        assert!(streams.errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn backpressure_does_not_drop_blocks() {
        let input: String = (1..=20).map(block_line).collect();
        let mock = Builder::new().read(input.as_bytes()).build();
        let options = ReaderOptions {
            block_buffer: 1,
            ..Default::default()
        };
        let (_reader, mut streams) = ConsoleReader::start(mock, options, CancellationToken::new());
        let mut got = Vec::new();
        while let Some(b) = streams.blocks.recv().await {
            tokio::task::yield_now().await;
            got.push(b.record.number);
        }
        assert_eq!(got, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn close_stops_scan_and_closes_queues() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let (mut reader, mut streams) = ConsoleReader::start(rx, ReaderOptions::default(), CancellationToken::new());
        tx.write_all(block_line(1).as_bytes()).await.unwrap();
        assert_eq!(streams.blocks.recv().await.unwrap().record.number, 1);

        // Input is still open; only cancellation can end the scan.
        reader.close().await;
        assert!(streams.blocks.recv().await.is_none());
        assert!(streams.errors.recv().await.is_none());
        reader.close().await;
    }

    #[tokio::test]
    async fn parent_cancellation_stops_scan() {
        let (_tx, rx) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();
        let (mut reader, mut streams) = ConsoleReader::start(rx, ReaderOptions::default(), cancel.clone());
        cancel.cancel();
        reader.done().await;
        assert!(streams.blocks.recv().await.is_none());
    }
}
