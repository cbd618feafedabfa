//! Content-addressed Object Store (spec §4.4)

use crate::error::{Result, StoreError};
use std::path::{Path, PathBuf};
use tilecanvas_core::{hash_bytes, verify, Algo, HashRef};
use tokio::fs;
use tokio::io::AsyncWriteExt;

fn algo_dir(algo: Algo) -> &'static str {
    match algo {
        Algo::Sha256 => "sha256",
        Algo::Blake3 => "blake3",
    }
}

/// A filesystem-backed store of immutable, content-addressed blobs.
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ObjectStore { root: root.into() }
    }

    /// Fan-out path `objects/<algo>/<hex[0..2]>/<hex[2..]>`.
    pub(crate) fn path_for(&self, hash_ref: &HashRef) -> PathBuf {
        let (_, hex_part) = hash_ref.as_str().split_once(':').expect("HashRef is well-formed");
        let (head, tail) = hex_part.split_at(2);
        self.root.join("objects").join(algo_dir(hash_ref.algo())).join(head).join(tail)
    }

    /// Hash `bytes` with SHA-256 and write it if not already present.
    pub async fn put(&self, bytes: &[u8]) -> Result<HashRef> {
        let hash_ref = hash_bytes(bytes);
        self.write_object(&hash_ref, bytes).await?;
        Ok(hash_ref)
    }

    async fn write_object(&self, hash_ref: &HashRef, bytes: &[u8]) -> Result<()> {
        let dest = self.path_for(hash_ref);
        if fs::try_exists(&dest).await? {
            return Ok(());
        }
        let parent = dest.parent().expect("object path always has a parent");
        fs::create_dir_all(parent).await?;
        let tmp = parent.join(format!(".tmp-{}-{}", std::process::id(), tmp_suffix(hash_ref)));
        write_atomic(&tmp, &dest, bytes).await?;
        Ok(())
    }

    /// Read and verify an object's bytes.
    pub async fn get(&self, hash_ref: &HashRef) -> Result<Vec<u8>> {
        let path = self.path_for(hash_ref);
        let bytes = fs::read(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(hash_ref.as_str().to_string())
            } else {
                StoreError::IoFailure(err)
            }
        })?;
        if !verify(&bytes, hash_ref) {
            return Err(StoreError::IntegrityError { hash_ref: hash_ref.as_str().to_string() });
        }
        Ok(bytes)
    }

    /// Whether an object is present on disk, without reading or verifying it.
    pub async fn has(&self, hash_ref: &HashRef) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(hash_ref)).await?)
    }
}

fn tmp_suffix(hash_ref: &HashRef) -> String {
    hash_ref.as_str().rsplit(':').next().unwrap_or("x").chars().take(12).collect()
}

/// Write `bytes` to `tmp`, then atomically rename it onto `dest`. Readers
/// never observe a partially-written object.
pub(crate) async fn write_atomic(tmp: &Path, dest: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp, dest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path());
        let hash_ref = store.put(b"hello tile canvas").await.unwrap();
        assert!(store.has(&hash_ref).await.unwrap());
        let bytes = store.get(&hash_ref).await.unwrap();
        assert_eq!(bytes, b"hello tile canvas");
    }

    #[tokio::test]
    async fn concurrent_put_of_identical_content_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path());
        let a = store.put(b"same bytes").await.unwrap();
        let b = store.put(b"same bytes").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path());
        let hash_ref = tilecanvas_core::hash_bytes(b"never written");
        assert!(matches!(store.get(&hash_ref).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn tampered_bytes_fail_integrity_check() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path());
        let hash_ref = store.put(b"original").await.unwrap();
        let path = store.path_for(&hash_ref);
        tokio::fs::write(&path, b"tampered!").await.unwrap();
        assert!(matches!(store.get(&hash_ref).await, Err(StoreError::IntegrityError { .. })));
    }
}
