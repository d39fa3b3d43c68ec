//! Resumable cursor: a bounded, geometrically sparse history of accepted chain points.
//!
//! The newest points are kept densely and older ones progressively sparser, so that on
//! restart the node can be offered intersection candidates for both shallow and deep forks
//! while the checkpoint stays small. The checkpoint file is JSON:
//! `{"points": [{"slot": 500, "hash": "<hex>"}, ...]}`, newest first.

use crate::point::ChainPoint;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum number of points kept (and persisted).
pub const CURSOR_CAPACITY: usize = 200;

/// Errors reading or writing the checkpoint file. Never fatal to ingestion.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("cursor file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cursor file {path} is not valid cursor JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Retention policy relative to the first point ever seen (`base_slot`).
///
/// Keeps every point within 10 slots, every 10th slot up to 1000, every 100th beyond.
pub fn should_retain(slot: u64, base_slot: Option<u64>) -> bool {
    let base = match base_slot {
        Some(b) => b,
        None => return true,
    };
    let distance = slot.saturating_sub(base);
    distance <= 10 || (distance <= 1000 && distance % 10 == 0) || distance % 100 == 0
}

/// One persisted point: slot plus hex hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPoint {
    pub slot: u64,
    pub hash: String,
}

/// On-disk checkpoint document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    pub points: Vec<CursorPoint>,
}

impl CursorState {
    /// Read and parse the checkpoint file.
    pub async fn read(path: &Path) -> Result<Self, PersistError> {
        let data = tokio::fs::read(path).await.map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| PersistError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replace the checkpoint file with this state. Written to a sibling temp file and
    /// renamed over `path`, so readers never see a partial document.
    pub async fn write(&self, path: &Path) -> Result<(), PersistError> {
        let data = serde_json::to_vec_pretty(self).map_err(|source| PersistError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = temp_path(path);
        let io_err = |source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        };
        tokio::fs::write(&tmp, data).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)
    }

    /// Decode into chain points, skipping entries whose hash is not valid hex.
    pub fn chain_points(&self) -> Vec<ChainPoint> {
        self.points
            .iter()
            .filter_map(|p| {
                ChainPoint::from_hex(p.slot, &p.hash)
                    .map_err(|e| tracing::warn!(slot = p.slot, hash = %p.hash, reason = %e, "skipping cursor point"))
                    .ok()
            })
            .collect()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// In-memory cursor, newest point first.
#[derive(Debug, Clone, Default)]
pub struct CursorStore {
    points: VecDeque<ChainPoint>,
    base_slot: Option<u64>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from previously persisted points. The input is put in newest-first order and
    /// repeated slots keep their first entry; the oldest surviving point becomes the base.
    pub fn from_points(mut points: Vec<ChainPoint>) -> Self {
        let given = points.len();
        points.sort_by(|a, b| b.slot.cmp(&a.slot));
        points.dedup_by_key(|p| p.slot);
        if points.len() != given {
            tracing::warn!(given, kept = points.len(), "dropped duplicate cursor slots");
        }
        let mut points: VecDeque<ChainPoint> = points.into();
        points.truncate(CURSOR_CAPACITY);
        let base_slot = points.back().map(|p| p.slot);
        Self { points, base_slot }
    }

    /// Offer an accepted point. Returns whether it was retained.
    ///
    /// Retained points go to the front; entries at or after the point's slot are dropped so
    /// slots stay strictly decreasing, and the tail beyond [CURSOR_CAPACITY] is evicted.
    pub fn add(&mut self, point: ChainPoint) -> bool {
        if !should_retain(point.slot, self.base_slot) {
            return false;
        }
        if self.base_slot.is_none() {
            self.base_slot = Some(point.slot);
        }
        while self.points.front().is_some_and(|p| p.slot >= point.slot) {
            self.points.pop_front();
        }
        self.points.push_front(point);
        self.points.truncate(CURSOR_CAPACITY);
        true
    }

    pub fn points(&self) -> impl Iterator<Item = &ChainPoint> {
        self.points.iter()
    }

    /// Snapshot of the points, newest first: the intersection candidates for a resume.
    pub fn start_points(&self) -> Vec<ChainPoint> {
        self.points.iter().cloned().collect()
    }

    pub fn head(&self) -> Option<&ChainPoint> {
        self.points.front()
    }

    pub fn base_slot(&self) -> Option<u64> {
        self.base_slot
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn state(&self) -> CursorState {
        CursorState {
            points: self
                .points
                .iter()
                .map(|p| CursorPoint {
                    slot: p.slot,
                    hash: p.hash_hex(),
                })
                .collect(),
        }
    }

    /// Persist to `path`, overwriting it.
    pub async fn save(&self, path: &Path) -> Result<(), PersistError> {
        self.state().write(path).await
    }

    /// Load from `path`. A missing file is `Ok(None)`; a malformed one is an error the
    /// caller is expected to log and treat the same way.
    pub async fn load(path: &Path) -> Result<Option<Self>, PersistError> {
        match CursorState::read(path).await {
            Ok(state) => Ok(Some(Self::from_points(state.chain_points()))),
            Err(PersistError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
