//! Blob store port and its two implementations.
//!
//! Objects are immutable once written. The filesystem store writes a temp
//! file next to the target and links it into place without clobbering, so
//! readers never observe a partially written or replaced artifact.
use crate::error::StoreError;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    pub size: u64,
}

pub trait BlobStore: Send + Sync {
    fn bucket(&self) -> &str;
    /// Write a new object; fails with `AlreadyExists` if the key holds data.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    fn head(&self, key: &str) -> Result<Option<BlobMeta>, StoreError>;
}

fn check_key(key: &str) -> Result<(), StoreError> {
    let path = Path::new(key);
    let safe = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Blob store rooted at `<root>/<bucket>/`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    bucket: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(&self.bucket).join(key)
    }
}

fn io_error(key: &str, source: io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        source,
    }
}

impl BlobStore for FsBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        check_key(key)?;
        let path = self.object_path(key);
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent).map_err(|err| io_error(key, err))?;
        let mut tmp = NamedTempFile::new_in(parent).map_err(|err| io_error(key, err))?;
        tmp.write_all(bytes).map_err(|err| io_error(key, err))?;
        tmp.as_file().sync_all().map_err(|err| io_error(key, err))?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(()),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists {
                    key: key.to_string(),
                })
            }
            Err(err) => Err(io_error(key, err.error)),
        }
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        check_key(key)?;
        match fs::read(self.object_path(key)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::ReferenceNotFound {
                    key: key.to_string(),
                    reason: "no object at key".to_string(),
                })
            }
            Err(err) => Err(io_error(key, err)),
        }
    }

    fn head(&self, key: &str) -> Result<Option<BlobMeta>, StoreError> {
        check_key(key)?;
        match fs::metadata(self.object_path(key)) {
            Ok(meta) if meta.is_file() => Ok(Some(BlobMeta { size: meta.len() })),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(key, err)),
        }
    }
}

/// In-process blob store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Remove an object, simulating an artifact that never became visible.
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().remove(key)
    }

    /// Overwrite an object behind the store's back.
    pub fn tamper(&self, key: &str, bytes: Vec<u8>) {
        self.lock().insert(key.to_string(), bytes);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BlobStore for MemoryBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        check_key(key)?;
        let mut objects = self.lock();
        if objects.contains_key(key) {
            return Err(StoreError::AlreadyExists {
                key: key.to_string(),
            });
        }
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        check_key(key)?;
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::ReferenceNotFound {
                key: key.to_string(),
                reason: "no object at key".to_string(),
            })
    }

    fn head(&self, key: &str) -> Result<Option<BlobMeta>, StoreError> {
        check_key(key)?;
        Ok(self.lock().get(key).map(|bytes| BlobMeta {
            size: bytes.len() as u64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_store_refuses_second_writer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::new(dir.path(), "bucket");
        store.put("a/b/c.json", b"first").expect("first put");
        let err = store.put("a/b/c.json", b"second").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(store.get("a/b/c.json").expect("get"), b"first");
    }

    #[test]
    fn fs_store_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::new(dir.path(), "bucket");
        store.put("k", b"three").expect("put");
        assert!(store.put("k", b"four").is_err());
        assert_eq!(store.get("k").expect("get"), b"three");
        assert_eq!(store.head("k").expect("head"), Some(BlobMeta { size: 5 }));
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("bucket"))
            .expect("read bucket")
            .collect();
        assert_eq!(leftovers.len(), 1, "temp files must not linger");
    }

    #[test]
    fn missing_objects_are_reference_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::new(dir.path(), "bucket");
        assert!(matches!(
            store.get("nope").unwrap_err(),
            StoreError::ReferenceNotFound { .. }
        ));
        assert_eq!(store.head("nope").expect("head"), None);
    }

    #[test]
    fn keys_escaping_the_bucket_are_rejected() {
        let store = MemoryBlobStore::new("bucket");
        for key in ["", "../x", "/etc/passwd", "a/../../b"] {
            assert!(
                matches!(
                    store.put(key, b"x"),
                    Err(StoreError::InvalidKey(_))
                ),
                "{key}"
            );
        }
    }

    #[test]
    fn memory_store_refuses_second_writer() {
        let store = MemoryBlobStore::new("bucket");
        store.put("k", b"1").expect("put");
        assert!(store.put("k", b"2").is_err());
        assert_eq!(store.get("k").expect("get"), b"1");
        assert_eq!(store.keys(), vec!["k".to_string()]);
    }
}
