//! In-memory similarity index with flat-file persistence.
//!
//! Stores [`Chunk`]s (text, vector, source) and answers nearest-neighbour
//! queries by brute-force cosine similarity over every stored vector. The
//! corpus is a single user's local document set, so a linear scan is the
//! intended design; an approximate index could sit behind the same
//! `search` contract if corpora grow.
//!
//! The in-memory collection is authoritative for the running process. The
//! snapshot file is only read on start ([`SimilarityIndex::open`]) and
//! rewritten after a rebuild ([`SimilarityIndex::save`]).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, FileState, FileStatus, IndexStatus};
use crate::snapshot::{self, SnapshotError};

/// A search hit with its score, for callers that want more than the text.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub text: String,
    pub source: String,
    pub score: f64,
}

pub struct SimilarityIndex {
    path: PathBuf,
    chunks: Vec<Chunk>,
}

impl SimilarityIndex {
    /// An empty index that persists to `path`. Does not touch the file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunks: Vec::new(),
        }
    }

    /// Create an index and load its snapshot.
    ///
    /// Never fails: a missing snapshot is normal on first start, and a
    /// corrupt or unreadable one is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut index = Self::new(path);
        match index.load() {
            Ok(n) => info!(path = %index.path.display(), chunks = n, "loaded index snapshot"),
            Err(SnapshotError::NotFound(_)) => {
                debug!(path = %index.path.display(), "no index snapshot yet")
            }
            Err(e @ SnapshotError::Corrupt { .. }) => {
                warn!(error = %e, "ignoring corrupt index snapshot")
            }
            Err(e @ SnapshotError::Io { .. }) => {
                error!(error = %e, "could not read index snapshot, starting empty")
            }
        }
        index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Dimensionality of the stored vectors, if any are stored.
    pub fn dims(&self) -> Option<usize> {
        self.chunks.first().map(|c| c.vector.len())
    }

    /// Append a chunk. No deduplication and no size cap.
    pub fn add(&mut self, text: impl Into<String>, vector: Vec<f32>, source: impl Into<String>) {
        if let Some(dims) = self.dims() {
            if dims != vector.len() {
                warn!(
                    expected = dims,
                    got = vector.len(),
                    "chunk vector dimensionality differs from index; it will never match"
                );
            }
        }
        self.chunks.push(Chunk {
            text: text.into(),
            vector,
            source: source.into(),
        });
    }

    /// Up to `top_k` chunk texts ranked by cosine similarity, best first.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<String> {
        self.search_scored(query, top_k)
            .into_iter()
            .map(|hit| hit.text)
            .collect()
    }

    /// Like [`search`](Self::search) but keeps scores and sources.
    ///
    /// Ties keep insertion order (the sort is stable).
    pub fn search_scored(&self, query: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        if top_k == 0 || self.chunks.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(f64, &Chunk)> = self
            .chunks
            .iter()
            .map(|c| (cosine_similarity(query, &c.vector), c))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(score, c)| ScoredChunk {
                text: c.text.clone(),
                source: c.source.clone(),
                score,
            })
            .collect()
    }

    /// Empty the index in memory. The snapshot is untouched until the next save.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// Replace the in-memory chunks with the snapshot contents.
    ///
    /// On any error the index is left empty, never partially populated.
    pub fn load(&mut self) -> Result<usize, SnapshotError> {
        self.chunks.clear();
        let chunks: Vec<Chunk> = snapshot::read_json(&self.path)?;
        self.chunks = chunks;
        Ok(self.chunks.len())
    }

    /// Write the full chunk collection to the snapshot file.
    pub fn try_save(&self) -> Result<(), SnapshotError> {
        snapshot::write_json(&self.path, &self.chunks, false)
    }

    /// Like [`try_save`](Self::try_save), but logs failures instead of
    /// returning them; the in-memory index stays authoritative.
    pub fn save(&self) {
        match self.try_save() {
            Ok(()) => debug!(path = %self.path.display(), chunks = self.len(), "saved index snapshot"),
            Err(e) => error!(error = %e, "failed to save index snapshot"),
        }
    }

    /// Chunk counts per source label, sorted by label.
    pub fn status(&self) -> IndexStatus {
        let mut per_source: BTreeMap<&str, usize> = BTreeMap::new();
        for c in &self.chunks {
            *per_source.entry(c.source.as_str()).or_insert(0) += 1;
        }

        IndexStatus {
            total_chunks: self.chunks.len(),
            files: per_source
                .into_iter()
                .map(|(name, chunks)| FileStatus {
                    name: name.to_string(),
                    status: FileState::Cached,
                    chunks,
                })
                .collect(),
        }
    }
}
