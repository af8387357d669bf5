//! Flat inner-product vector index with stable handles and checksummed
//! persistence.
//!
//! Vectors are normalized on insert, so inner product equals cosine
//! similarity. Handles are monotonically increasing and never reused within
//! one index generation; `next_handle` survives delete and persist/load.
//! Search is exact: every live vector is scored, ordered by descending score
//! with ties broken by ascending handle for determinism.
//!
//! # On-disk format
//!
//! ```text
//! magic   "RGIX"          4 bytes
//! version u16 LE          currently 1
//! dims    u32 LE
//! generation u64 LE
//! next_handle i64 LE
//! count   u64 LE
//! entries count × (handle i64 LE, dims × f32 LE)
//! trailer SHA-256 of everything above
//! ```
//!
//! Any structural or checksum failure on load is `IndexCorrupt`; the index
//! is never silently repaired.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::embedding::normalize;
use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"RGIX";
const VERSION: u16 = 1;

#[derive(Debug, Clone)]
pub struct VectorIndex {
    dims: usize,
    generation: u64,
    next_handle: i64,
    entries: BTreeMap<i64, Vec<f32>>,
}

impl VectorIndex {
    pub fn new(dims: usize, generation: u64) -> Self {
        Self {
            dims,
            generation,
            next_handle: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, handle: i64) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn handles(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.keys().copied()
    }

    /// Insert a vector, returning its handle. The vector is normalized so
    /// that search scores are cosine similarities.
    pub fn insert(&mut self, vector: &[f32]) -> Result<i64> {
        if vector.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        let mut v = vector.to_vec();
        normalize(&mut v);
        let handle = self.next_handle;
        self.next_handle += 1;
        self.entries.insert(handle, v);
        Ok(handle)
    }

    /// Remove a handle. Returns false if it was not present. The handle is
    /// not reused afterwards.
    pub fn delete(&mut self, handle: i64) -> bool {
        self.entries.remove(&handle).is_some()
    }

    /// Exact nearest-neighbor search: at most `k` results by descending
    /// inner-product score, ties broken by ascending handle.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        if query.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scored: Vec<(i64, f32)> = self
            .entries
            .iter()
            .map(|(&handle, vec)| {
                let dot: f32 = q.iter().zip(vec.iter()).map(|(a, b)| a * b).sum();
                (handle, dot)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Write the index to `path` atomically (temp file + rename).
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut payload = Vec::with_capacity(32 + self.entries.len() * (8 + self.dims * 4));
        payload.extend_from_slice(MAGIC);
        payload.extend_from_slice(&VERSION.to_le_bytes());
        payload.extend_from_slice(&(self.dims as u32).to_le_bytes());
        payload.extend_from_slice(&self.generation.to_le_bytes());
        payload.extend_from_slice(&self.next_handle.to_le_bytes());
        payload.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        for (handle, vec) in &self.entries {
            payload.extend_from_slice(&handle.to_le_bytes());
            for v in vec {
                payload.extend_from_slice(&v.to_le_bytes());
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();

        let tmp_path = path.with_extension("idx.tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&payload)?;
            file.write_all(&checksum)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Load an index, verifying magic, version, structure, and checksum.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            Error::IndexCorrupt(format!("cannot read {}: {}", path.display(), e))
        })?;

        if bytes.len() < 4 + 2 + 4 + 8 + 8 + 8 + 32 {
            return Err(Error::IndexCorrupt("file too short".to_string()));
        }

        let (payload, trailer) = bytes.split_at(bytes.len() - 32);
        let mut hasher = Sha256::new();
        hasher.update(payload);
        if hasher.finalize().as_slice() != trailer {
            return Err(Error::IndexCorrupt("checksum mismatch".to_string()));
        }

        let mut pos = 0usize;

        if take(payload, &mut pos, 4)? != MAGIC {
            return Err(Error::IndexCorrupt("bad magic".to_string()));
        }
        let version = read_u16(payload, &mut pos)?;
        if version != VERSION {
            return Err(Error::IndexCorrupt(format!(
                "unsupported version {}",
                version
            )));
        }
        let dims = read_u32(payload, &mut pos)? as usize;
        let generation = read_u64(payload, &mut pos)?;
        let next_handle = read_u64(payload, &mut pos)? as i64;
        let count = read_u64(payload, &mut pos)? as usize;

        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let handle = read_u64(payload, &mut pos)? as i64;
            let raw = take(payload, &mut pos, dims * 4)?;
            let vec: Vec<f32> = raw
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            if handle >= next_handle {
                return Err(Error::IndexCorrupt(format!(
                    "handle {} >= next_handle {}",
                    handle, next_handle
                )));
            }
            entries.insert(handle, vec);
        }

        if pos != payload.len() {
            return Err(Error::IndexCorrupt("trailing bytes in payload".to_string()));
        }

        Ok(Self {
            dims,
            generation,
            next_handle,
            entries,
        })
    }
}

fn take<'a>(payload: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    if *pos + n > payload.len() {
        return Err(Error::IndexCorrupt("truncated payload".to_string()));
    }
    let slice = &payload[*pos..*pos + n];
    *pos += n;
    Ok(slice)
}

fn read_u16(payload: &[u8], pos: &mut usize) -> Result<u16> {
    let b = take(payload, pos, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(payload: &[u8], pos: &mut usize) -> Result<u32> {
    let b = take(payload, pos, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64(payload: &[u8], pos: &mut usize) -> Result<u64> {
    let b = take(payload, pos, 8)?;
    Ok(u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dims: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_insert_assigns_monotonic_handles() {
        let mut idx = VectorIndex::new(3, 0);
        assert_eq!(idx.insert(&unit(3, 0)).unwrap(), 0);
        assert_eq!(idx.insert(&unit(3, 1)).unwrap(), 1);
        assert_eq!(idx.insert(&unit(3, 2)).unwrap(), 2);
        assert_eq!(idx.len(), 3);
    }

    #[test]
    fn test_handles_not_reused_after_delete() {
        let mut idx = VectorIndex::new(2, 0);
        let h0 = idx.insert(&unit(2, 0)).unwrap();
        assert!(idx.delete(h0));
        let h1 = idx.insert(&unit(2, 1)).unwrap();
        assert_ne!(h0, h1);
        assert!(!idx.contains(h0));
    }

    #[test]
    fn test_insert_wrong_dims() {
        let mut idx = VectorIndex::new(3, 0);
        assert!(matches!(
            idx.insert(&[1.0, 2.0]),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_search_orders_by_score_then_handle() {
        let mut idx = VectorIndex::new(2, 0);
        idx.insert(&[1.0, 0.0]).unwrap(); // h0, score 1.0
        idx.insert(&[0.0, 1.0]).unwrap(); // h1, score 0.0
        idx.insert(&[1.0, 0.0]).unwrap(); // h2, score 1.0 (tie with h0)

        let hits = idx.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 2);
        assert_eq!(hits[2].0, 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_at_most_k() {
        let mut idx = VectorIndex::new(2, 0);
        for i in 0..5 {
            idx.insert(&[1.0, i as f32]).unwrap();
        }
        assert_eq!(idx.search(&[1.0, 0.0], 2).unwrap().len(), 2);
        assert_eq!(idx.search(&[1.0, 0.0], 100).unwrap().len(), 5);
    }

    #[test]
    fn test_deleted_handle_unreachable_by_search() {
        let mut idx = VectorIndex::new(2, 0);
        let h0 = idx.insert(&[1.0, 0.0]).unwrap();
        idx.insert(&[0.0, 1.0]).unwrap();
        idx.delete(h0);
        let hits = idx.search(&[1.0, 0.0], 10).unwrap();
        assert!(hits.iter().all(|(h, _)| *h != h0));
    }

    #[test]
    fn test_persist_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vector.idx");

        let mut idx = VectorIndex::new(3, 7);
        idx.insert(&[1.0, 2.0, 3.0]).unwrap();
        let h1 = idx.insert(&[0.5, 0.5, 0.5]).unwrap();
        idx.insert(&[-1.0, 0.0, 1.0]).unwrap();
        idx.delete(h1);
        idx.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.dims(), 3);
        assert_eq!(loaded.generation(), 7);
        assert_eq!(loaded.len(), 2);
        assert!(!loaded.contains(h1));

        // next_handle survives: new inserts don't recycle deleted handles
        let mut loaded = loaded;
        assert_eq!(loaded.insert(&[0.0, 0.0, 1.0]).unwrap(), 3);

        let query = vec![0.3, -0.2, 0.9];
        let before = idx.search(&query, 10).unwrap();
        let after = VectorIndex::load(&path).unwrap().search(&query, 10).unwrap();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.0, b.0);
            assert!((a.1 - b.1).abs() < 1e-6);
        }
    }

    #[test]
    fn test_load_rejects_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vector.idx");

        let mut idx = VectorIndex::new(2, 0);
        idx.insert(&[1.0, 0.0]).unwrap();
        idx.persist(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            VectorIndex::load(&path),
            Err(Error::IndexCorrupt(_))
        ));
    }

    #[test]
    fn test_load_rejects_bad_magic() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vector.idx");
        std::fs::write(&path, vec![0u8; 128]).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(Error::IndexCorrupt(_))
        ));
    }

    #[test]
    fn test_missing_file_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            VectorIndex::load(&tmp.path().join("nope.idx")),
            Err(Error::IndexCorrupt(_))
        ));
    }
}
