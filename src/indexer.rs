//! Walks directory trees and commits file records and vectors together.
//!
//! The record table and the vector index are logically one store split
//! across two files. Every mutation here happens under the index write
//! lock: a vector row is appended, the record with the matching id is
//! inserted, and if the insert fails the row is popped again. Readers
//! taking the read lock therefore never see one side without the other.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::change::{self, Change};
use crate::embedding::Embedder;
use crate::error::{IndexError, Result};
use crate::extract;
use crate::ignore::PathFilter;
use crate::store::{FileRecord, MetadataStore};
use crate::vector::VectorIndex;

/// How often the vector index is snapshotted to disk during a walk. The
/// relational store commits per record regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Snapshot once, after the whole walk.
    #[default]
    Walk,
    /// Snapshot after each directory's files are committed.
    Directory,
    /// Snapshot after every committed file.
    File,
}

/// Counts for one walk. Files can land in exactly one bucket.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct IndexReport {
    /// New files committed.
    pub indexed: u64,
    /// Changed files replaced.
    pub updated: u64,
    /// Hash matched the stored record.
    pub unchanged: u64,
    /// Ignored paths and unsupported extensions.
    pub skipped: u64,
    /// Extraction or embedding failed.
    pub failed: u64,
}

enum Outcome {
    Indexed,
    Updated,
    Unchanged,
    Skipped,
    Failed,
}

pub struct Indexer {
    store: MetadataStore,
    index: Arc<RwLock<VectorIndex>>,
    embedder: Arc<dyn Embedder>,
    index_path: PathBuf,
    snapshot_gate: Mutex<()>,
}

impl Indexer {
    pub fn new(
        store: MetadataStore,
        index: Arc<RwLock<VectorIndex>>,
        embedder: Arc<dyn Embedder>,
        index_path: PathBuf,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            index_path,
            snapshot_gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn index(&self) -> &Arc<RwLock<VectorIndex>> {
        &self.index
    }

    /// Live record count and live vector count must agree at all times.
    /// The read lock is held across the record count so a concurrent
    /// commit, which holds the write lock, cannot land between the two
    /// reads.
    pub async fn check_alignment(&self) -> Result<()> {
        let index = self.index.read().await;
        let records = self.store.count().await?;
        let vectors = index.live_len() as u64;
        if records != vectors {
            return Err(IndexError::IndexAlignment { records, vectors });
        }
        Ok(())
    }

    /// Empty both stores under the write lock and persist an empty
    /// snapshot. Callers walking several roots concurrently must clear
    /// here once before spawning, not inside any one walk, or a sibling
    /// walk's early commits get wiped.
    pub async fn clear_all(&self) -> Result<()> {
        let mut index = self.index.write().await;
        self.store.clear().await?;
        *index = VectorIndex::new(self.embedder.dims());
        index.save(&self.index_path)
    }

    /// Index everything under `root`. With `overwrite`, both stores are
    /// emptied first and the tree is indexed from scratch. A snapshot is
    /// always written at the end, whatever the durability level.
    pub async fn index_tree(
        &self,
        root: &Path,
        overwrite: bool,
        durability: Durability,
    ) -> Result<IndexReport> {
        let root = std::fs::canonicalize(root).map_err(|e| IndexError::io(root, e))?;
        info!(root = %root.display(), overwrite, ?durability, "indexing tree");

        if overwrite {
            self.clear_all().await?;
        }
        self.check_alignment().await?;

        let filter = PathFilter::scoped(&self.store, &root);
        let mut report = IndexReport::default();

        // Depth-first with an explicit stack; subdirectories of a
        // directory are visited after its files.
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            if filter.is_ignored(&dir).await? {
                debug!(dir = %dir.display(), "subtree ignored");
                report.skipped += 1;
                continue;
            }

            let mut entries = Vec::new();
            match std::fs::read_dir(&dir) {
                Ok(iter) => {
                    for entry in iter {
                        match entry {
                            Ok(entry) => entries.push(entry.path()),
                            Err(e) => {
                                warn!(dir = %dir.display(), error = %e, "unreadable entry, skipping");
                                report.failed += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "unreadable directory, skipping");
                    report.failed += 1;
                    continue;
                }
            }
            entries.sort();

            for path in entries {
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                match self.index_file(&path, &filter).await? {
                    Outcome::Indexed => report.indexed += 1,
                    Outcome::Updated => report.updated += 1,
                    Outcome::Unchanged => report.unchanged += 1,
                    Outcome::Skipped => report.skipped += 1,
                    Outcome::Failed => report.failed += 1,
                }
                if durability == Durability::File {
                    self.snapshot().await?;
                }
            }

            if durability == Durability::Directory {
                self.snapshot().await?;
            }
        }

        self.snapshot().await?;
        self.check_alignment().await?;
        info!(
            indexed = report.indexed,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            "walk complete"
        );
        Ok(report)
    }

    /// Index one file. Per-file problems (unsupported extension, broken
    /// document, embedding failure, wrong dimension) are logged and
    /// reported, never returned; store errors abort the walk.
    async fn index_file(&self, path: &Path, filter: &PathFilter<'_>) -> Result<Outcome> {
        if filter.is_ignored(path).await? {
            debug!(path = %path.display(), "ignored");
            return Ok(Outcome::Skipped);
        }

        if let Err(e) = extract::DocFormat::from_path(path) {
            debug!(path = %path.display(), error = %e, "unsupported extension");
            return Ok(Outcome::Skipped);
        }

        // Hash before extraction so unchanged files never pay the
        // extraction and embedding cost.
        let content_hash = match change::hash_file(path) {
            Ok(h) => h,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable file");
                return Ok(Outcome::Failed);
            }
        };

        let path_str = path.to_string_lossy().to_string();
        let existing = self.store.get(&path_str).await?;
        let classification = change::classify(existing.as_ref(), &content_hash);
        if classification == Change::Unchanged {
            debug!(path = %path.display(), "unchanged");
            return Ok(Outcome::Unchanged);
        }

        let text = match extract::extract_text(path) {
            Ok(t) if t.trim().is_empty() => {
                warn!(path = %path.display(), "no extractable text");
                return Ok(Outcome::Failed);
            }
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "extraction failed");
                return Ok(Outcome::Failed);
            }
        };

        let embedding = match self.embedder.embed(&text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "embedding failed");
                return Ok(Outcome::Failed);
            }
        };
        if embedding.len() != self.embedder.dims() {
            warn!(
                path = %path.display(),
                got = embedding.len(),
                expected = self.embedder.dims(),
                "embedding dimension mismatch"
            );
            return Ok(Outcome::Failed);
        }

        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "file vanished before commit");
                return Ok(Outcome::Failed);
            }
        };
        let record_template = FileRecord {
            id: 0,
            path: path_str.clone(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            size_bytes: meta.len() as i64,
            content_hash,
            created_at: meta
                .created()
                .or_else(|_| meta.modified())
                .map(system_time_secs)
                .unwrap_or(0),
            modified_at: meta.modified().map(system_time_secs).unwrap_or(0),
            embedding,
        };

        // The replace-then-insert sequence runs under one write guard so
        // readers never see the record table and the vector index with
        // only one side of the change applied.
        let mut index = self.index.write().await;
        let outcome = if let Some(old) = existing {
            self.store.delete(&path_str).await?;
            index.retire(old.id);
            Outcome::Updated
        } else {
            Outcome::Indexed
        };

        let row = index.add(&record_template.embedding)?;
        let record = FileRecord {
            id: row,
            ..record_template
        };
        if let Err(e) = self.store.insert(&record).await {
            index.pop();
            return Err(e);
        }

        debug!(path = %path.display(), row, "committed");
        Ok(outcome)
    }

    /// Write the vector index snapshot under the read lock. The gate
    /// keeps two walks from writing the same temp file at once.
    pub async fn snapshot(&self) -> Result<()> {
        let _gate = self.snapshot_gate.lock().await;
        self.index.read().await.save(&self.index_path)
    }
}

fn system_time_secs(t: SystemTime) -> i64 {
    DateTime::<Utc>::from(t).timestamp()
}
