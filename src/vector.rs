//! Flat L2 vector index with tombstones and binary snapshots.
//!
//! Rows are append-only and never renumbered: row N is the Nth vector ever
//! added, and the relational store uses the same number as the record id.
//! Removal is a tombstone that excludes the row from search but keeps its
//! slot, so every later row keeps its position. Snapshots serialize the
//! whole thing to one file, written to a temp path and renamed into place.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{IndexError, Result};

const SNAPSHOT_MAGIC: &[u8; 4] = b"FDX1";

/// Row id returned in search results when fewer than k live vectors exist.
pub const NO_RESULT: i64 = -1;

pub struct VectorIndex {
    dims: usize,
    // Flattened row-major storage, dims floats per row.
    data: Vec<f32>,
    tombstones: Vec<bool>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
            tombstones: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Total rows ever added, tombstoned or not. The next row id.
    pub fn len(&self) -> usize {
        self.tombstones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tombstones.is_empty()
    }

    /// Rows that still participate in search.
    pub fn live_len(&self) -> usize {
        self.tombstones.iter().filter(|t| !**t).count()
    }

    /// Append a vector, returning its row id.
    pub fn add(&mut self, vector: &[f32]) -> Result<i64> {
        if vector.len() != self.dims {
            return Err(IndexError::EmbeddingDimension {
                got: vector.len(),
                expected: self.dims,
            });
        }
        let row = self.tombstones.len() as i64;
        self.data.extend_from_slice(vector);
        self.tombstones.push(false);
        Ok(row)
    }

    /// Undo the most recent `add`. Only the final row can be removed
    /// outright; everything else must go through `retire` so earlier row
    /// ids stay stable.
    pub fn pop(&mut self) {
        if self.tombstones.pop().is_some() {
            self.data.truncate(self.data.len() - self.dims);
        }
    }

    /// Tombstone a row. Idempotent, out-of-range rows are a no-op.
    pub fn retire(&mut self, row: i64) {
        if let Ok(idx) = usize::try_from(row) {
            if let Some(slot) = self.tombstones.get_mut(idx) {
                *slot = true;
            }
        }
    }

    pub fn is_live(&self, row: i64) -> bool {
        usize::try_from(row)
            .ok()
            .and_then(|idx| self.tombstones.get(idx))
            .map(|t| !*t)
            .unwrap_or(false)
    }

    fn row_slice(&self, idx: usize) -> &[f32] {
        &self.data[idx * self.dims..(idx + 1) * self.dims]
    }

    /// Nearest-neighbor search over all live rows, squared L2, ascending.
    /// Always returns exactly k entries; when fewer live rows exist the
    /// tail is padded with `NO_RESULT` ids and infinite distances. An
    /// index with no live rows at all is an error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<(Vec<i64>, Vec<f32>)> {
        if query.len() != self.dims {
            return Err(IndexError::EmbeddingDimension {
                got: query.len(),
                expected: self.dims,
            });
        }
        if self.live_len() == 0 {
            return Err(IndexError::EmptyIndex);
        }

        let mut scored: Vec<(f32, i64)> = self
            .tombstones
            .iter()
            .enumerate()
            .filter(|(_, dead)| !**dead)
            .map(|(idx, _)| (l2_squared(query, self.row_slice(idx)), idx as i64))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        let mut ids: Vec<i64> = scored.iter().map(|(_, id)| *id).collect();
        let mut dists: Vec<f32> = scored.iter().map(|(d, _)| *d).collect();
        ids.resize(k, NO_RESULT);
        dists.resize(k, f32::INFINITY);
        Ok((ids, dists))
    }

    /// Search restricted to the given rows. Tombstoned or out-of-range
    /// rows in the subset are skipped; result ids are the original row
    /// ids, not positions within the subset.
    pub fn search_subset(&self, query: &[f32], k: usize, rows: &[i64]) -> Result<(Vec<i64>, Vec<f32>)> {
        if query.len() != self.dims {
            return Err(IndexError::EmbeddingDimension {
                got: query.len(),
                expected: self.dims,
            });
        }

        // Build a throwaway index over the subset and search that, keeping
        // a local-to-global row map for translating the results back.
        let mut scratch = VectorIndex::new(self.dims);
        let mut global: Vec<i64> = Vec::new();
        for &row in rows {
            if self.is_live(row) {
                scratch.add(self.row_slice(row as usize))?;
                global.push(row);
            }
        }

        let (local_ids, dists) = scratch.search(query, k)?;
        let ids = local_ids
            .into_iter()
            .map(|local| {
                if local == NO_RESULT {
                    NO_RESULT
                } else {
                    global[local as usize]
                }
            })
            .collect();
        Ok((ids, dists))
    }

    /// Write a snapshot atomically: temp file in the same directory, then
    /// rename over the target.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(|e| IndexError::io(&tmp, e))?;
            file.write_all(SNAPSHOT_MAGIC)
                .map_err(|e| IndexError::io(&tmp, e))?;
            file.write_all(&(self.dims as u32).to_le_bytes())
                .map_err(|e| IndexError::io(&tmp, e))?;
            file.write_all(&(self.tombstones.len() as u64).to_le_bytes())
                .map_err(|e| IndexError::io(&tmp, e))?;
            let flags: Vec<u8> = self.tombstones.iter().map(|t| *t as u8).collect();
            file.write_all(&flags).map_err(|e| IndexError::io(&tmp, e))?;
            let mut bytes = Vec::with_capacity(self.data.len() * 4);
            for v in &self.data {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            file.write_all(&bytes).map_err(|e| IndexError::io(&tmp, e))?;
            file.sync_all().map_err(|e| IndexError::io(&tmp, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| IndexError::io(path, e))?;
        Ok(())
    }

    /// Load a snapshot, enforcing that it was written for `dims`.
    pub fn load(path: &Path, dims: usize) -> Result<Self> {
        let mut file = fs::File::open(path).map_err(|e| IndexError::io(path, e))?;
        let bad = |msg: &str| {
            IndexError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string()),
            )
        };

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).map_err(|e| IndexError::io(path, e))?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(bad("not a vector index snapshot"));
        }

        let mut dims_buf = [0u8; 4];
        file.read_exact(&mut dims_buf).map_err(|e| IndexError::io(path, e))?;
        let file_dims = u32::from_le_bytes(dims_buf) as usize;
        if file_dims != dims {
            return Err(IndexError::EmbeddingDimension {
                got: file_dims,
                expected: dims,
            });
        }

        let mut count_buf = [0u8; 8];
        file.read_exact(&mut count_buf).map_err(|e| IndexError::io(path, e))?;
        let count = u64::from_le_bytes(count_buf) as usize;

        let mut flags = vec![0u8; count];
        file.read_exact(&mut flags).map_err(|e| IndexError::io(path, e))?;

        let mut bytes = vec![0u8; count * dims * 4];
        file.read_exact(&mut bytes).map_err(|e| IndexError::io(path, e))?;
        let mut trailing = [0u8; 1];
        if file.read(&mut trailing).map_err(|e| IndexError::io(path, e))? != 0 {
            return Err(bad("snapshot has trailing bytes"));
        }

        let data = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            dims,
            data,
            tombstones: flags.into_iter().map(|f| f != 0).collect(),
        })
    }
}

fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VectorIndex {
        let mut index = VectorIndex::new(2);
        index.add(&[0.0, 0.0]).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 2.0]).unwrap();
        index
    }

    #[test]
    fn search_orders_by_distance_ascending() {
        let index = sample();
        let (ids, dists) = index.search(&[0.1, 0.0], 3).unwrap();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(dists[0] < dists[1] && dists[1] < dists[2]);
    }

    #[test]
    fn short_results_are_padded_with_sentinel() {
        let index = sample();
        let (ids, dists) = index.search(&[0.0, 0.0], 5).unwrap();
        assert_eq!(&ids[3..], &[NO_RESULT, NO_RESULT]);
        assert!(dists[3].is_infinite() && dists[4].is_infinite());
    }

    #[test]
    fn retired_rows_are_excluded_and_ids_stay_stable() {
        let mut index = sample();
        index.retire(1);
        assert_eq!(index.live_len(), 2);
        let (ids, _) = index.search(&[1.0, 0.0], 3).unwrap();
        assert!(!ids.contains(&1));
        // The row after the tombstone keeps its id.
        assert!(ids.contains(&2));
        // Tombstoning again changes nothing.
        index.retire(1);
        assert_eq!(index.live_len(), 2);
    }

    #[test]
    fn searching_an_empty_index_is_an_error() {
        let index = VectorIndex::new(2);
        assert!(matches!(
            index.search(&[0.0, 0.0], 1),
            Err(crate::error::IndexError::EmptyIndex)
        ));
        let mut index = sample();
        index.retire(0);
        index.retire(1);
        index.retire(2);
        assert!(matches!(
            index.search(&[0.0, 0.0], 1),
            Err(crate::error::IndexError::EmptyIndex)
        ));
    }

    #[test]
    fn add_rejects_wrong_dimension() {
        let mut index = VectorIndex::new(2);
        let err = index.add(&[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::IndexError::EmbeddingDimension { got: 3, expected: 2 }
        ));
    }

    #[test]
    fn pop_removes_only_final_row() {
        let mut index = sample();
        index.pop();
        assert_eq!(index.len(), 2);
        let row = index.add(&[5.0, 5.0]).unwrap();
        assert_eq!(row, 2);
    }

    #[test]
    fn subset_search_maps_back_to_global_rows() {
        let index = sample();
        let (ids, _) = index.search_subset(&[0.0, 2.0], 2, &[1, 2]).unwrap();
        assert_eq!(ids, vec![2, 1]);
        // Rows outside the subset never appear, and bogus rows are skipped.
        let (ids, _) = index.search_subset(&[0.0, 0.0], 2, &[2, 99, -1]).unwrap();
        assert_eq!(ids, vec![2, NO_RESULT]);
    }

    #[test]
    fn snapshot_roundtrip_preserves_rows_and_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");
        let mut index = sample();
        index.retire(0);
        index.save(&path).unwrap();

        let restored = VectorIndex::load(&path, 2).unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.live_len(), 2);
        let (ids, _) = restored.search(&[1.0, 0.0], 1).unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn load_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");
        sample().save(&path).unwrap();
        assert!(VectorIndex::load(&path, 4).is_err());
    }
}
