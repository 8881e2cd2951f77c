//! Document sync: scan → extract → chunk → embed → swap index.
//!
//! A sync rebuilds the similarity index from scratch. The new index is
//! filled off to the side and only replaces the live one once every file
//! has been processed, so concurrent searches see either the old index or
//! the new one, never a half-built mix.
//!
//! Per-file failures are recorded in the report and do not stop the batch.
//! If the documents folder holds no eligible files, the live index is left
//! exactly as it was.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::chunk::split_chunks;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::extract::{content_type_for_path, extract_text};
use crate::index::SimilarityIndex;
use crate::models::{FileState, FileStatus, SyncReport, SyncStatus};

/// A document found under the documents root.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentFile {
    pub path: PathBuf,
    /// Path relative to the root with `/` separators; used as the chunk source.
    pub label: String,
}

/// Rebuild `index` from the configured documents folder.
///
/// Never fails: unexpected faults are reported as an `error` report.
pub async fn sync_documents(
    config: &Config,
    embedder: &dyn EmbeddingClient,
    index: &RwLock<SimilarityIndex>,
) -> SyncReport {
    match try_sync(config, embedder, index).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %format!("{:#}", e), "document sync failed");
            SyncReport {
                status: SyncStatus::Error,
                message: format!("sync failed: {:#}", e),
                files: Vec::new(),
            }
        }
    }
}

async fn try_sync(
    config: &Config,
    embedder: &dyn EmbeddingClient,
    index: &RwLock<SimilarityIndex>,
) -> Result<SyncReport> {
    let root = &config.documents.root;
    std::fs::create_dir_all(root)
        .with_context(|| format!("Failed to create documents folder: {}", root.display()))?;

    let files = scan_documents(root, &config.documents.include_globs)?;
    if files.is_empty() {
        warn!(root = %root.display(), "no documents to sync");
        return Ok(SyncReport {
            status: SyncStatus::Warning,
            message: format!("documents folder is empty: {}", root.display()),
            files: Vec::new(),
        });
    }

    info!(root = %root.display(), files = files.len(), "syncing documents");

    let snapshot_path = index.read().await.path().to_path_buf();
    let mut fresh = SimilarityIndex::new(snapshot_path);
    let mut statuses = Vec::with_capacity(files.len());
    for doc in &files {
        statuses.push(ingest_file(doc, config.chunking.max_chars, embedder, &mut fresh).await);
    }

    let total_chunks = fresh.len();
    {
        // Snapshot and live index change together.
        let mut live = index.write().await;
        fresh.save();
        *live = fresh;
    }

    info!(files = files.len(), chunks = total_chunks, "sync complete");
    Ok(SyncReport {
        status: SyncStatus::Success,
        message: format!(
            "processed {} files, {} chunks indexed",
            files.len(),
            total_chunks
        ),
        files: statuses,
    })
}

async fn ingest_file(
    doc: &DocumentFile,
    max_chars: usize,
    embedder: &dyn EmbeddingClient,
    index: &mut SimilarityIndex,
) -> FileStatus {
    let text = match read_document(&doc.path) {
        Ok(text) => text,
        Err(e) => {
            warn!(file = %doc.label, error = %format!("{:#}", e), "failed to read document");
            return FileStatus {
                name: doc.label.clone(),
                status: FileState::Error,
                chunks: 0,
            };
        }
    };

    let chunks = split_chunks(&text, max_chars);
    if chunks.is_empty() {
        info!(file = %doc.label, "document has no text");
        return FileStatus {
            name: doc.label.clone(),
            status: FileState::Empty,
            chunks: 0,
        };
    }

    let count = chunks.len();
    for chunk in chunks {
        let vector = embedder.embed(&chunk).await;
        index.add(chunk, vector, doc.label.clone());
    }
    info!(file = %doc.label, chunks = count, "indexed document");

    FileStatus {
        name: doc.label.clone(),
        status: FileState::Success,
        chunks: count,
    }
}

fn read_document(path: &Path) -> Result<String> {
    let content_type = content_type_for_path(path)
        .with_context(|| format!("no extractor for {}", path.display()))?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(extract_text(&bytes, content_type)?)
}

/// Files under `root` matching `include_globs`, sorted by label.
///
/// Office lock files (`~$name.docx`) and VCS directories are skipped.
pub fn scan_documents(root: &Path, include_globs: &[String]) -> Result<Vec<DocumentFile>> {
    let include_set = build_globset(include_globs)?;
    let exclude_set = build_globset(&["**/.git/**".to_string(), "**/~$*".to_string()])?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("Failed to scan {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let label = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&label) || !include_set.is_match(&label) {
            continue;
        }

        files.push(DocumentFile {
            path: path.to_path_buf(),
            label,
        });
    }

    files.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
