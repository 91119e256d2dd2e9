use super::*;
use crate::state::{FsBlobStore, MemoryBlobStore};
use serde_json::json;
use std::time::Duration;

const RUN: &str = "verif-20250611143005-ab12";

fn memory_store() -> (Arc<MemoryBlobStore>, StateStore) {
    let blobs = Arc::new(MemoryBlobStore::new("verification-state"));
    let store = StateStore::new(blobs.clone());
    (blobs, store)
}

#[test]
fn get_returns_what_put_stored_for_every_artifact() {
    let (_, store) = memory_store();
    for name in LogicalName::ALL {
        let payload = format!("payload for {name}").into_bytes();
        let reference = store
            .put(RUN, name.category(), name, &payload)
            .expect("put artifact");
        assert_eq!(store.get(&reference).expect("get artifact"), payload);
    }
}

#[test]
fn references_follow_the_standard_layout() {
    let (_, store) = memory_store();
    let reference = store
        .put(
            RUN,
            Category::Prompts,
            LogicalName::SystemPrompt,
            b"You are a vending machine auditor.",
        )
        .expect("put prompt");
    assert_eq!(reference.location.bucket, "verification-state");
    assert_eq!(
        reference.location.key,
        format!("2025/06/11/{RUN}/prompts/system-prompt")
    );
    assert_eq!(reference.size, 34);
    assert_eq!(
        reference.hash.as_deref(),
        Some(content_hash(b"You are a vending machine auditor.").as_str())
    );
}

#[test]
fn unrecognized_pairs_are_rejected_before_writing() {
    let (blobs, store) = memory_store();
    let err = store
        .put(RUN, Category::Images, LogicalName::Turn1Prompt, b"x")
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownArtifact { .. }));
    assert!(blobs.keys().is_empty());
}

#[test]
fn create_once_artifacts_keep_the_first_payload() {
    let (_, store) = memory_store();
    let first = store
        .put_json(RUN, LogicalName::LayoutMetadata, &json!({"layoutId": 7}))
        .expect("first write");
    let err = store
        .put_json(RUN, LogicalName::LayoutMetadata, &json!({"layoutId": 8}))
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }));
    let stored: serde_json::Value = store.get_json(&first).expect("read back");
    assert_eq!(stored, json!({"layoutId": 7}));
}

#[test]
fn create_once_is_enforced_by_the_filesystem_store_too() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = StateStore::new(Arc::new(FsBlobStore::new(dir.path(), "state")));
    store
        .put_text(RUN, LogicalName::Initialization, "{}")
        .expect("first write");
    let err = store
        .put_text(RUN, LogicalName::Initialization, "{\"again\":true}")
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }));
}

#[test]
fn identical_replaceable_puts_are_idempotent() {
    let (blobs, store) = memory_store();
    let first = store
        .put_text(RUN, LogicalName::Turn1Prompt, "Describe row A.")
        .expect("first write");
    let second = store
        .put_text(RUN, LogicalName::Turn1Prompt, "Describe row A.")
        .expect("second write");
    assert_eq!(first, second);
    assert_eq!(blobs.keys().len(), 1);
}

#[test]
fn invalid_and_dangling_references_are_not_found() {
    let (blobs, store) = memory_store();
    let reference = store
        .put_text(RUN, LogicalName::Turn1RawResponse, "{}")
        .expect("put");

    let mut empty_key = reference.clone();
    empty_key.location.key.clear();
    assert!(matches!(
        store.get(&empty_key).unwrap_err(),
        StoreError::ReferenceNotFound { .. }
    ));

    let mut other_bucket = reference.clone();
    other_bucket.location.bucket = "elsewhere".to_string();
    assert!(matches!(
        store.get(&other_bucket).unwrap_err(),
        StoreError::ReferenceNotFound { .. }
    ));

    blobs.remove(&reference.location.key);
    assert!(matches!(
        store.get(&reference).unwrap_err(),
        StoreError::ReferenceNotFound { .. }
    ));
}

#[test]
fn tampered_objects_fail_the_hash_check() {
    let (blobs, store) = memory_store();
    let reference = store
        .put_text(RUN, LogicalName::Turn2Prompt, "abc")
        .expect("put");
    blobs.tamper(&reference.location.key, b"abd".to_vec());
    let err = store.get(&reference).unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }), "{err}");
    assert!(!err.is_retryable());
}

#[test]
fn unsafe_verification_ids_never_reach_the_blob_store() {
    let (blobs, store) = memory_store();
    let err = store
        .put_text("../escape", LogicalName::Turn1Prompt, "x")
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidVerificationId { .. }));
    assert!(blobs.keys().is_empty());
}

#[test]
fn undecodable_json_is_a_decode_error() {
    let (_, store) = memory_store();
    let reference = store
        .put_text(RUN, LogicalName::Turn1ProcessedResponse, "not json")
        .expect("put");
    let err = store
        .get_json::<serde_json::Value>(&reference)
        .unwrap_err();
    assert!(matches!(err, StoreError::Decode { .. }));
}

#[test]
fn new_versions_never_overwrite_issued_references() {
    let (blobs, store) = memory_store();
    let first = store
        .put_text(RUN, LogicalName::Turn1Prompt, "first version")
        .expect("first write");
    let second = store
        .put_text(RUN, LogicalName::Turn1Prompt, "second version")
        .expect("second write");

    assert_eq!(first.location.key, format!("2025/06/11/{RUN}/prompts/turn1-prompt"));
    assert_ne!(second.location.key, first.location.key);
    assert!(second.location.key.starts_with(&first.location.key));
    assert_eq!(store.get_text(&first).expect("first"), "first version");
    assert_eq!(store.get_text(&second).expect("second"), "second version");

    let again = store
        .put_text(RUN, LogicalName::Turn1Prompt, "second version")
        .expect("repeat write");
    assert_eq!(again, second);
    assert_eq!(blobs.keys().len(), 2);
}

#[test]
fn identical_create_once_puts_reuse_the_stored_object() {
    let (blobs, store) = memory_store();
    let first = store
        .put_json(RUN, LogicalName::Initialization, &json!({"layoutId": 7}))
        .expect("first write");
    let again = store
        .put_json(RUN, LogicalName::Initialization, &json!({"layoutId": 7}))
        .expect("same payload");
    assert_eq!(first, again);
    assert_eq!(blobs.keys().len(), 1);
}

#[test]
fn expired_deadlines_stop_reads_and_writes() {
    let (blobs, store) = memory_store();
    let reference = store
        .put_text(RUN, LogicalName::SystemPrompt, "Audit the machine.")
        .expect("put");
    let bounded = store.bounded(&Deadline::after(Duration::ZERO));

    let err = bounded.get(&reference).unwrap_err();
    assert!(matches!(err, StoreError::DeadlineExceeded { .. }), "{err}");
    assert!(err.is_retryable());
    let err = bounded
        .put_text(RUN, LogicalName::Turn1Prompt, "late")
        .unwrap_err();
    assert!(matches!(err, StoreError::DeadlineExceeded { .. }), "{err}");
    assert_eq!(blobs.keys().len(), 1);

    let roomy = store.bounded(&Deadline::after(Duration::from_secs(60)));
    assert_eq!(roomy.get_text(&reference).expect("in time"), "Audit the machine.");
}
