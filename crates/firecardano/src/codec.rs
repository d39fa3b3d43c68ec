//! FIRE line protocol.
//!
//! Two line kinds travel between the fetcher and a consumer over a plain byte pipe:
//!
//! ```text
//! FIRE INIT <protocol-version> <block-type-url>
//! FIRE BLOCK <number> <id> <parent-number> <parent-id> <lib-number> <timestamp-nanos> <base64-payload>
//! ```
//!
//! Any other line is foreign output and is ignored by the decoder.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::num::ParseIntError;
use thiserror::Error;

/// Protocol version written in `FIRE INIT`.
pub const PROTOCOL_VERSION: &str = "3.0";

const INIT_PREFIX: &str = "FIRE INIT ";
const BLOCK_PREFIX: &str = "FIRE BLOCK ";
/// `FIRE`, `BLOCK` and the seven block fields.
const BLOCK_PIECES: usize = 9;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed FIRE {kind} line: expected {expected} fields, got {got}")]
    MalformedLine {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid {field} {value:?}: {source}")]
    FieldParse {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid base64 payload: {0}")]
    PayloadDecode(#[from] base64::DecodeError),
}

/// `FIRE INIT` contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitRecord {
    pub protocol_version: String,
    pub block_type: String,
}

impl InitRecord {
    pub fn new(block_type: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            block_type: block_type.into(),
        }
    }

    /// Encode without the trailing newline.
    pub fn encode(&self) -> String {
        format!("FIRE INIT {} {}", self.protocol_version, self.block_type)
    }
}

/// Wire record for one block. `id` and `parent_id` must not contain spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirehoseRecord {
    pub number: u64,
    pub id: String,
    pub parent_number: u64,
    pub parent_id: String,
    pub lib_number: u64,
    pub timestamp_nanos: u64,
    pub payload: Vec<u8>,
}

impl FirehoseRecord {
    /// Encode without the trailing newline.
    pub fn encode(&self) -> String {
        format!(
            "FIRE BLOCK {} {} {} {} {} {} {}",
            self.number,
            self.id,
            self.parent_number,
            self.parent_id,
            self.lib_number,
            self.timestamp_nanos,
            STANDARD.encode(&self.payload),
        )
    }
}

/// A decoded `FIRE BLOCK` line together with the line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirehoseBlock {
    pub record: FirehoseRecord,
    pub raw: String,
}

/// Result of decoding one recognised line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Init(InitRecord),
    Block(FirehoseBlock),
}

/// Whether a line carries a FIRE tag (and so must decode cleanly).
pub fn is_fire_line(line: &[u8]) -> bool {
    line.starts_with(BLOCK_PREFIX.as_bytes()) || line.starts_with(INIT_PREFIX.as_bytes())
}

/// Decode one line. Foreign lines yield `Ok(None)`. Trailing `\r`/`\n` are ignored.
pub fn decode_line(line: &str) -> Result<Option<Decoded>, CodecError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.starts_with(BLOCK_PREFIX) {
        decode_block(line).map(|b| Some(Decoded::Block(b)))
    } else if let Some(rest) = line.strip_prefix(INIT_PREFIX) {
        decode_init(rest).map(|i| Some(Decoded::Init(i)))
    } else {
        Ok(None)
    }
}

fn decode_init(rest: &str) -> Result<InitRecord, CodecError> {
    let fields: Vec<&str> = rest.splitn(2, ' ').collect();
    if fields.len() < 2 {
        return Err(CodecError::MalformedLine {
            kind: "INIT",
            expected: 2,
            got: fields.len(),
        });
    }
    Ok(InitRecord {
        protocol_version: fields[0].to_string(),
        block_type: fields[1].to_string(),
    })
}

fn decode_block(line: &str) -> Result<FirehoseBlock, CodecError> {
    // Bounded split: the payload is always the last, unsplit piece.
    let pieces: Vec<&str> = line.splitn(BLOCK_PIECES, ' ').collect();
    if pieces.len() < BLOCK_PIECES {
        return Err(CodecError::MalformedLine {
            kind: "BLOCK",
            expected: BLOCK_PIECES - 2,
            got: pieces.len() - 2,
        });
    }
    let payload = match pieces[8] {
        "" => Vec::new(),
        b64 => STANDARD.decode(b64)?,
    };
    let record = FirehoseRecord {
        number: parse_u64("number", pieces[2])?,
        id: pieces[3].to_string(),
        parent_number: parse_u64("parent number", pieces[4])?,
        parent_id: pieces[5].to_string(),
        lib_number: parse_u64("lib number", pieces[6])?,
        timestamp_nanos: parse_u64("timestamp", pieces[7])?,
        payload,
    };
    Ok(FirehoseBlock {
        record,
        raw: line.to_string(),
    })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, CodecError> {
    value.parse().map_err(|source| CodecError::FieldParse {
        field,
        value: value.to_string(),
        source,
    })
}
