// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use silobang::{ByteRange, CancellationToken, Config, Error, MetadataOp, MetadataOperation, MetadataValue};
use test_log::test;

#[test]
fn round_trip_put_get_stat() {
    let dir = tempfile::tempdir().unwrap();
    let store = Config::new(dir.path()).open().unwrap();
    store.create_topic("models").unwrap();

    let put = store.put("models", b"vertex data", "scene.glb", None).unwrap();
    let bytes = store.get(&put.hash, None, true).unwrap();
    assert_eq!(bytes, b"vertex data");

    let stat = store.stat(&put.hash).unwrap();
    assert_eq!(stat.topic, "models");
    assert_eq!(stat.mime, "model/gltf-binary");
    assert_eq!(stat.size, "vertex data".len() as u64);
}

#[test]
fn cross_topic_dedup_reports_owning_topic() {
    let dir = tempfile::tempdir().unwrap();
    let store = Config::new(dir.path()).open().unwrap();
    store.create_topic("raw").unwrap();
    store.create_topic("derived").unwrap();

    store.put("raw", b"same bytes", "a.bin", None).unwrap();
    let err = store.put("derived", b"same bytes", "b.bin", None).unwrap_err();

    match err {
        Error::AssetDuplicate { topic, .. } => assert_eq!(topic, "raw"),
        other => panic!("expected AssetDuplicate, got {other:?}"),
    }
}

#[test]
fn segment_rollover_spans_multiple_dat_files() {
    let dir = tempfile::tempdir().unwrap();
    // Cap small enough that a handful of ~100-byte payloads force rollover.
    let store = Config::new(dir.path()).max_dat_size(500).open().unwrap();
    store.create_topic("chunks").unwrap();

    let mut segments_seen = std::collections::HashSet::new();
    for i in 0..10 {
        let payload = vec![i as u8; 100];
        let put = store.put("chunks", &payload, &format!("f{i}.bin"), None).unwrap();
        segments_seen.insert(put.segment_id);
    }

    assert!(segments_seen.len() > 1, "expected rollover across multiple segments");
}

#[test]
fn metadata_batch_applies_and_recomputes_view() {
    let dir = tempfile::tempdir().unwrap();
    let store = Config::new(dir.path()).open().unwrap();
    store.create_topic("photos").unwrap();
    let put = store.put("photos", b"jpeg bytes", "a.jpg", None).unwrap();

    let result = store
        .batch_metadata(vec![
            MetadataOperation {
                asset_hash: put.hash.clone(),
                op: MetadataOp::Set,
                key: "width".to_string(),
                value: Some(MetadataValue::Number(1920.0)),
                processor: "ingest".to_string(),
                processor_version: "1.0".to_string(),
            },
            MetadataOperation {
                asset_hash: put.hash.clone(),
                op: MetadataOp::Set,
                key: "camera".to_string(),
                value: Some(MetadataValue::Text("Canon".to_string())),
                processor: "ingest".to_string(),
                processor_version: "1.0".to_string(),
            },
        ])
        .unwrap();

    assert!(result.all_succeeded());
}

#[test]
fn verifier_detects_bit_flip_corruption() {
    use std::os::unix::fs::FileExt;

    let dir = tempfile::tempdir().unwrap();
    let store = Config::new(dir.path()).open().unwrap();
    store.create_topic("photos").unwrap();
    let put = store.put("photos", b"pristine bytes", "a.bin", None).unwrap();

    let segment_path = dir.path().join("topics/photos/000001.dat");
    let file = std::fs::OpenOptions::new().write(true).open(&segment_path).unwrap();
    let mut byte = [0u8; 1];
    file.read_exact_at(&mut byte, put.offset).unwrap();
    file.write_all_at(&[byte[0] ^ 0xFF], put.offset).unwrap();

    let report = store
        .verify("photos", &CancellationToken::new(), None::<fn(silobang::VerifyProgress)>)
        .unwrap();

    assert!(!report.is_healthy());
    assert!(report.issues.iter().any(|i| i.kind.as_str() == "HASH_MISMATCH"));
}

#[test]
fn recover_truncates_torn_tail_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = Config::new(dir.path()).open().unwrap();
    store.create_topic("photos").unwrap();
    let first = store.put("photos", b"first asset", "a.bin", None).unwrap();
    store.put("photos", b"second asset", "b.bin", None).unwrap();

    let segment_path = dir.path().join("topics/photos/000001.dat");
    let full_len = std::fs::metadata(&segment_path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&segment_path).unwrap();
    // Chop off the tail, leaving the second record torn but the first intact.
    file.set_len(full_len - 5).unwrap();

    let report = store.recover("photos").unwrap();
    assert_eq!(report.truncated_segment, Some(1));
    assert!(report.truncated_bytes > 0);

    // The first asset is still fully readable after recovery.
    let bytes = store.get(&first.hash, Some(ByteRange::new(0, first.size)), true).unwrap();
    assert_eq!(bytes, b"first asset");
}
