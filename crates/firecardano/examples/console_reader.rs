//! Example: read FIRE lines from stdin and print each block as one JSON object.
//!
//! Usage: simulated_fetcher | cargo run -p firecardano --example console_reader -- [--max-line-size BYTES]

use firecardano::{ConsoleReader, ReaderOptions};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct JsonBlock<'a> {
    number: u64,
    id: &'a str,
    parent_num: u64,
    parent_id: &'a str,
    lib_num: u64,
    timestamp: u64,
    payload_len: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut options = ReaderOptions::default();
    let mut i = 1;
    while i < args.len() {
        if args[i] == "--max-line-size" {
            i += 1;
            let value = args.get(i).map(String::as_str).unwrap_or_default();
            options.max_line_size = value
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid --max-line-size {value:?}: {e}"))?;
        }
        i += 1;
    }

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run(options));
    // A stdin read may still be parked on the blocking pool.
    rt.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run(options: ReaderOptions) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal");
            signal_token.cancel();
        }
    });

    let (mut reader, mut streams) = ConsoleReader::start(tokio::io::stdin(), options, cancel.clone());
    tracing::info!("console reader started, waiting for FIRE BLOCK lines on stdin");

    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            block = streams.blocks.recv() => {
                let Some(block) = block else {
                    tracing::info!("blocks channel closed, exiting");
                    break;
                };
                let r = &block.record;
                let out = JsonBlock {
                    number: r.number,
                    id: &r.id,
                    parent_num: r.parent_number,
                    parent_id: &r.parent_id,
                    lib_num: r.lib_number,
                    timestamp: r.timestamp_nanos,
                    payload_len: r.payload.len(),
                };
                println!("{}", serde_json::to_string(&out)?);
            }
            Some(err) = streams.errors.recv() => {
                tracing::warn!(reason = %err, "parse error");
            }
            _ = heartbeat.tick() => {
                tracing::info!("still running - waiting for more blocks");
            }
            _ = cancel.cancelled() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    reader.close().await;
    if let Some(init) = reader.init_record().await {
        tracing::info!(version = %init.protocol_version, block_type = %init.block_type, "stream metadata");
    }
    Ok(())
}
