//! Put/get of artifacts through references.
use super::blob::BlobStore;
use super::paths::{date_partition, standard_path, versioned_path};
use super::reference::Reference;
use super::registry::{ArtifactKey, Category, LogicalName};
use crate::conversation::Deadline;
use crate::error::StoreError;
use crate::ids;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub fn content_hash(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

#[derive(Clone)]
pub struct StateStore {
    blobs: Arc<dyn BlobStore>,
    deadline: Option<Deadline>,
}

impl StateStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            deadline: None,
        }
    }

    /// The same store, refusing to start any operation once `deadline`
    /// has passed or been cancelled.
    pub fn bounded(&self, deadline: &Deadline) -> Self {
        Self {
            blobs: Arc::clone(&self.blobs),
            deadline: Some(deadline.clone()),
        }
    }

    pub fn bucket(&self) -> &str {
        self.blobs.bucket()
    }

    fn check_deadline(&self, key: &str) -> Result<(), StoreError> {
        match &self.deadline {
            Some(deadline) if deadline.check().is_err() => Err(StoreError::DeadlineExceeded {
                key: key.to_string(),
                elapsed_ms: deadline.elapsed_ms(),
            }),
            _ => Ok(()),
        }
    }

    /// Store `payload` for (category, name) and return a reference to it.
    ///
    /// Objects are never overwritten. The first version lands on the run's
    /// standard path; a later, different payload for a replaceable name lands
    /// on a hash-suffixed key next to it, so earlier references stay valid.
    /// Create-once names fail with `AlreadyExists` instead. Re-putting bytes
    /// that are already stored returns the existing reference.
    pub fn put(
        &self,
        verification_id: &str,
        category: Category,
        name: LogicalName,
        payload: &[u8],
    ) -> Result<Reference, StoreError> {
        let key = ArtifactKey::new(category, name)?;
        self.put_artifact(verification_id, key, payload)
    }

    pub fn put_artifact(
        &self,
        verification_id: &str,
        artifact: ArtifactKey,
        payload: &[u8],
    ) -> Result<Reference, StoreError> {
        ids::validate_verification_id(verification_id).map_err(|reason| {
            StoreError::InvalidVerificationId {
                id: verification_id.to_string(),
                reason,
            }
        })?;
        let date = date_partition(verification_id, Utc::now());
        let standard = standard_path(artifact.category(), artifact.name(), date, verification_id);
        let hash = content_hash(payload);
        let mut candidates = vec![standard.clone()];
        if !artifact.name().is_create_once() {
            candidates.push(versioned_path(&standard, &hash));
        }

        let mut taken = None;
        for key in candidates {
            self.check_deadline(&key)?;
            match self.blobs.put(&key, payload) {
                Ok(()) => {
                    tracing::debug!(
                        verification_id,
                        artifact = %artifact,
                        bytes = payload.len(),
                        key = %key,
                        "artifact stored"
                    );
                    return Ok(self.reference_to(&key, payload.len(), hash));
                }
                Err(StoreError::AlreadyExists { .. })
                    if self.holds_identical(&key, payload.len(), &hash)? =>
                {
                    tracing::debug!(
                        verification_id,
                        artifact = %artifact,
                        key = %key,
                        "artifact unchanged; reusing stored object"
                    );
                    return Ok(self.reference_to(&key, payload.len(), hash));
                }
                Err(StoreError::AlreadyExists { key }) => taken = Some(key),
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::AlreadyExists {
            key: taken.unwrap_or(standard),
        })
    }

    fn reference_to(&self, key: &str, len: usize, hash: String) -> Reference {
        Reference::new(self.bucket(), key, len, Some(hash))
    }

    fn holds_identical(&self, key: &str, len: usize, hash: &str) -> Result<bool, StoreError> {
        match self.blobs.head(key)? {
            Some(meta) if meta.size == len as u64 => {
                let existing = self.blobs.get(key)?;
                Ok(content_hash(&existing) == hash)
            }
            _ => Ok(false),
        }
    }

    /// Serialize `value` as pretty JSON under the name's own category.
    pub fn put_json<T: Serialize>(
        &self,
        verification_id: &str,
        name: LogicalName,
        value: &T,
    ) -> Result<Reference, StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|err| StoreError::Encode {
            key: ArtifactKey::from(name).to_string(),
            message: err.to_string(),
        })?;
        self.put_artifact(verification_id, name.into(), &bytes)
    }

    pub fn put_text(
        &self,
        verification_id: &str,
        name: LogicalName,
        text: &str,
    ) -> Result<Reference, StoreError> {
        self.put_artifact(verification_id, name.into(), text.as_bytes())
    }

    /// Fetch the bytes a reference points at, verifying size and hash.
    pub fn get(&self, reference: &Reference) -> Result<Vec<u8>, StoreError> {
        let key = &reference.location.key;
        reference
            .validate()
            .map_err(|reason| StoreError::ReferenceNotFound {
                key: reference.location.to_string(),
                reason,
            })?;
        if reference.location.bucket != self.bucket() {
            return Err(StoreError::ReferenceNotFound {
                key: reference.location.to_string(),
                reason: format!("bucket {} is not served here", reference.location.bucket),
            });
        }
        self.check_deadline(key)?;
        let bytes = self.blobs.get(key)?;
        let actual_size = bytes.len() as i64;
        if actual_size != reference.size {
            return Err(StoreError::Corrupt {
                key: key.clone(),
                expected: format!("{} bytes", reference.size),
                actual: format!("{actual_size} bytes"),
            });
        }
        if let Some(expected) = &reference.hash {
            let actual = content_hash(&bytes);
            if &actual != expected {
                return Err(StoreError::Corrupt {
                    key: key.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(bytes)
    }

    pub fn get_json<T: DeserializeOwned>(&self, reference: &Reference) -> Result<T, StoreError> {
        let bytes = self.get(reference)?;
        serde_json::from_slice(&bytes).map_err(|err| StoreError::Decode {
            key: reference.location.key.clone(),
            message: err.to_string(),
        })
    }

    pub fn get_text(&self, reference: &Reference) -> Result<String, StoreError> {
        let bytes = self.get(reference)?;
        String::from_utf8(bytes).map_err(|err| StoreError::Decode {
            key: reference.location.key.clone(),
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
