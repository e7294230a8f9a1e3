//! Relational store of file records and ignore rules.
//!
//! One SQLite file holds both tables. A file record's `id` doubles as its
//! row position in the vector index; the two are assigned together by the
//! coordinator's commit path and must never drift apart. The store itself
//! commits one transaction per record; serialization across writers is the
//! coordinator's job.

use sqlx::{Row, SqlitePool};
use std::path::MAIN_SEPARATOR;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{IndexError, Result};

/// One indexed file. `id` equals the paired vector row.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub created_at: i64,
    pub modified_at: i64,
    pub embedding: Vec<f32>,
}

/// Which paths an ignore rule applies to: the exact file, or a directory
/// and every descendant at any depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    File,
    Directory,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::File => "file",
            RuleKind::Directory => "directory",
        }
    }
}

impl std::str::FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "file" => Ok(RuleKind::File),
            "directory" => Ok(RuleKind::Directory),
            other => Err(format!("unknown rule kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IgnoreRule {
    pub path: String,
    pub kind: RuleKind,
}

#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create both tables. Idempotent.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                file_name TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                modified_at INTEGER NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ignore_rules (
                path TEXT NOT NULL,
                kind TEXT NOT NULL,
                UNIQUE(path, kind)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============ File records ============

    pub async fn get(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT id, path, file_name, size_bytes, content_hash, created_at, modified_at, embedding
             FROM files WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            FileRecord {
                id: row.get("id"),
                path: row.get("path"),
                file_name: row.get("file_name"),
                size_bytes: row.get("size_bytes"),
                content_hash: row.get("content_hash"),
                created_at: row.get("created_at"),
                modified_at: row.get("modified_at"),
                embedding: blob_to_vec(&blob),
            }
        }))
    }

    /// Insert a new record. There is no upsert: a duplicate path is a
    /// constraint violation and the caller must delete first.
    pub async fn insert(&self, record: &FileRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO files (id, path, file_name, size_bytes, content_hash, created_at, modified_at, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id)
        .bind(&record.path)
        .bind(&record.file_name)
        .bind(record.size_bytes)
        .bind(&record.content_hash)
        .bind(record.created_at)
        .bind(record.modified_at)
        .bind(vec_to_blob(&record.embedding))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false)
                {
                    Err(IndexError::ConstraintViolation {
                        path: record.path.clone(),
                    })
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Returns the number of rows removed (0 or 1).
    pub async fn delete(&self, path: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM files WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    /// Drop every file record. Used by overwrite re-indexing; ignore rules
    /// are administrative state and survive.
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM files").execute(&self.pool).await?;
        Ok(())
    }

    /// Ids of records whose path lies under `dir_prefix` (prefix plus
    /// separator match, not a pattern), ascending by id.
    pub async fn list_ids_under_prefix(&self, dir_prefix: &str) -> Result<Vec<i64>> {
        let prefix = dir_prefix.trim_end_matches(MAIN_SEPARATOR);
        let pattern = format!("{}{}%", escape_like(prefix), MAIN_SEPARATOR);

        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM files WHERE path LIKE ? ESCAPE '\\' ORDER BY id ASC")
                .bind(pattern)
                .fetch_all(&self.pool)
                .await?;

        Ok(ids)
    }

    /// Resolve ids to paths, preserving the exact order and length of the
    /// input. Ids with no surviving record map to `None`; callers zip the
    /// result positionally against distances, so dropping or reordering
    /// entries here would corrupt their pairing.
    pub async fn resolve_paths_by_ids(&self, ids: &[i64]) -> Result<Vec<Option<String>>> {
        let mut paths = Vec::with_capacity(ids.len());
        for id in ids {
            let path: Option<String> = sqlx::query_scalar("SELECT path FROM files WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            paths.push(path);
        }
        Ok(paths)
    }

    // ============ Ignore rules ============

    /// Idempotent per (path, kind); re-adding an existing rule is a no-op.
    pub async fn add_rule(&self, path: &str, kind: RuleKind) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO ignore_rules (path, kind) VALUES (?, ?)")
            .bind(path)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes every rule for the path, no-op if none exists.
    pub async fn remove_rule(&self, path: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ignore_rules WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn has_rule(&self, path: &str, kind: RuleKind) -> Result<bool> {
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ignore_rules WHERE path = ? AND kind = ?")
                .bind(path)
                .bind(kind.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(n > 0)
    }

    pub async fn list_rules(&self) -> Result<Vec<IgnoreRule>> {
        let rows = sqlx::query("SELECT path, kind FROM ignore_rules ORDER BY path ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let kind: String = row.get("kind");
                // Only `add_rule` writes this column, so the value is one of
                // the two canonical strings.
                let kind = match kind.as_str() {
                    "directory" => RuleKind::Directory,
                    _ => RuleKind::File,
                };
                IgnoreRule {
                    path: row.get("path"),
                    kind,
                }
            })
            .collect())
    }

    /// File-kind rules lexically under a directory prefix. Reporting only;
    /// the indexing decision path never calls this.
    pub async fn file_rules_under(&self, dir_prefix: &str) -> Result<Vec<String>> {
        let prefix = dir_prefix.trim_end_matches(MAIN_SEPARATOR);
        let pattern = format!("{}{}%", escape_like(prefix), MAIN_SEPARATOR);

        let paths: Vec<String> = sqlx::query_scalar(
            "SELECT path FROM ignore_rules WHERE kind = 'file' AND path LIKE ? ESCAPE '\\' ORDER BY path ASC",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(paths)
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
