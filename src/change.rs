//! Content-hash change detection.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::store::FileRecord;

/// What the coordinator should do with a walked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// No record exists for this path.
    New,
    /// A record exists and its content hash differs.
    Modified,
    /// A record exists with the same content hash.
    Unchanged,
}

/// Streaming sha256 over file contents, hex-encoded lowercase. Reads in
/// 64 KiB chunks so large files never load whole.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| IndexError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| IndexError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn classify(existing: Option<&FileRecord>, content_hash: &str) -> Change {
    match existing {
        None => Change::New,
        Some(record) if record.content_hash == content_hash => Change::Unchanged,
        Some(_) => Change::Modified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_matches_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"abc")
            .unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn empty_file_hashes_to_sha256_of_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::File::create(&path).unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn classify_covers_all_three_cases() {
        let record = FileRecord {
            id: 0,
            path: "/x".into(),
            file_name: "x".into(),
            size_bytes: 3,
            content_hash: "aaa".into(),
            created_at: 0,
            modified_at: 0,
            embedding: vec![],
        };
        assert_eq!(classify(None, "aaa"), Change::New);
        assert_eq!(classify(Some(&record), "aaa"), Change::Unchanged);
        assert_eq!(classify(Some(&record), "bbb"), Change::Modified);
    }
}
