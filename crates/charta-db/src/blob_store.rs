//! Blob store for uploaded note files.
//!
//! Content is addressed by a storage-relative, PHI-free key of the form
//! `{patient_id}/{note_id}/{random_uuid}` under a configurable base
//! directory. Writes are atomic (temp file + rename) and checksummed with
//! SHA-256 so the stored bytes can later be verified against the note
//! row's recorded checksum.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use charta_core::{Error, Result};

/// A blob written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Storage-relative key. Never an absolute path, never contains
    /// traversal segments.
    pub key: String,
    pub size_bytes: i64,
    /// SHA-256 of the stored bytes, 64 hex chars.
    pub checksum_sha256: String,
}

/// Byte-oriented storage for uploaded note content.
///
/// Abstracts over filesystem now and object storage later. The blob is
/// either fully written before `put` returns or the operation fails with
/// nothing persisted.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `data` under a fresh key scoped to the given patient/note.
    async fn put(&self, patient_id: Uuid, note_id: Uuid, data: &[u8]) -> Result<StoredBlob>;

    /// Read a blob back by key.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete a blob. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check whether a blob exists.
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Compute the SHA-256 checksum of blob data as lowercase hex.
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Filesystem blob store rooted at a base directory.
pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    /// Create a filesystem store rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Join a key under the base directory, rejecting keys that would
    /// escape it (absolute paths, `..` segments).
    fn safe_join(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::Storage("invalid storage key".to_string()));
        }
        Ok(self.base_path.join(rel))
    }

    /// Validate that the store can write, read, and delete files.
    ///
    /// Performs a full round-trip at startup to catch filesystem issues
    /// (permissions, missing mounts) before the first upload hits them.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let test_dir = self.base_path.join(".health-check");
        let test_file = test_dir.join("probe.bin");

        fs::create_dir_all(&test_dir)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", test_dir, e))?;

        let data = b"storage-health-check";
        fs::write(&test_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", test_file, e))?;

        let read_back = fs::read(&test_file)
            .await
            .map_err(|e| format!("read({:?}): {}", test_file, e))?;
        if read_back != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", test_file, e))?;
        let _ = fs::remove_dir(&test_dir).await;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for FilesystemStore {
    async fn put(&self, patient_id: Uuid, note_id: Uuid, data: &[u8]) -> Result<StoredBlob> {
        // Random leaf keeps keys unguessable and collision-free even if a
        // note is re-uploaded.
        let key = format!("{}/{}/{}", patient_id, note_id, Uuid::new_v4());
        let full_path = self.safe_join(&key)?;

        debug!(
            subsystem = "storage",
            component = "blob_store",
            op = "put",
            note_id = %note_id,
            blob_size = data.len(),
            "Writing blob"
        );

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(
                    subsystem = "storage",
                    component = "blob_store",
                    error = %e,
                    "create_dir_all failed"
                );
                Error::Storage(format!("failed to create blob directory: {}", e))
            })?;
        }

        // Atomic write: temp file + rename, fsynced before the rename so
        // a crash never leaves a half-written blob under the final key.
        let temp_path = full_path.with_extension("tmp");
        let write_result: std::io::Result<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &full_path).await
        }
        .await;

        if let Err(e) = write_result {
            let _ = fs::remove_file(&temp_path).await;
            warn!(
                subsystem = "storage",
                component = "blob_store",
                op = "put",
                error = %e,
                "Blob write failed"
            );
            return Err(Error::Storage(format!("failed to write blob: {}", e)));
        }

        Ok(StoredBlob {
            key,
            size_bytes: data.len() as i64,
            checksum_sha256: compute_checksum(data),
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.safe_join(key)?;
        fs::read(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("failed to read blob: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.safe_join(key)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("failed to delete blob: {}", e))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.safe_join(key)?;
        fs::try_exists(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("failed to stat blob: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FilesystemStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (_dir, store) = store();
        let data = b"S: chest pain\nO: HR 80";
        let blob = store
            .put(Uuid::new_v4(), Uuid::new_v4(), data)
            .await
            .unwrap();

        assert_eq!(blob.size_bytes, data.len() as i64);
        assert_eq!(store.get(&blob.key).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_checksum_is_64_hex_chars() {
        let (_dir, store) = store();
        let blob = store
            .put(Uuid::new_v4(), Uuid::new_v4(), b"content")
            .await
            .unwrap();
        assert_eq!(blob.checksum_sha256.len(), 64);
        assert!(blob.checksum_sha256.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(blob.checksum_sha256, compute_checksum(b"content"));
    }

    #[tokio::test]
    async fn test_key_is_relative_and_scoped() {
        let (_dir, store) = store();
        let patient_id = Uuid::new_v4();
        let note_id = Uuid::new_v4();
        let blob = store.put(patient_id, note_id, b"x").await.unwrap();
        assert!(blob.key.starts_with(&format!("{}/{}/", patient_id, note_id)));
        assert!(!blob.key.starts_with('/'));
        assert!(!blob.key.contains(".."));
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let (_dir, store) = store();
        for key in ["../escape", "/etc/passwd", "a/../../b", ""] {
            assert!(store.get(key).await.is_err(), "key {key:?}");
            assert!(store.delete(key).await.is_err(), "key {key:?}");
        }
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, store) = store();
        let blob = store
            .put(Uuid::new_v4(), Uuid::new_v4(), b"bytes")
            .await
            .unwrap();

        store.delete(&blob.key).await.unwrap();
        assert!(!store.exists(&blob.key).await.unwrap());
        // Second delete of a missing key is not an error.
        store.delete(&blob.key).await.unwrap();
    }

    #[tokio::test]
    async fn test_validate_round_trip() {
        let (_dir, store) = store();
        store.validate().await.unwrap();
    }
}
