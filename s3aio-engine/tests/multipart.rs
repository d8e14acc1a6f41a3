//! Parallel multipart upload against the scripted and local backends

mod common;

use common::*;
use s3aio_core::*;
use s3aio_engine::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const TEN_MB: usize = 10_000_000;
const FOUR_MB: u64 = 4_000_000;

#[test]
fn test_local_fallback_reports_planned_parts() {
    let (io, _temp) = S3Io::temp().unwrap();
    let data = payload(TEN_MB, 1);

    let response = io.put_bytes_multipart("bucket", "big.bin", &data, FOUR_MB).unwrap();

    let numbers: Vec<u32> = response.parts.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(response.bucket, "bucket");
    assert_eq!(response.key, "big.bin");
    assert!(response.upload_id.starts_with("single-"));
    assert!(response.e_tag.as_deref().unwrap().ends_with("-3\""));

    let expected = format!("\"{}\"", blake3::hash(&data[8_000_000..]).to_hex());
    assert_eq!(response.parts[2].e_tag, expected);

    assert_eq!(io.get_bytes("bucket", "big.bin").unwrap().unwrap(), data);
}

#[test]
fn test_empty_payload_is_single_write() {
    let (io, _temp) = S3Io::temp().unwrap();

    let response = io.put_bytes_multipart("bucket", "empty", &[], FOUR_MB).unwrap();

    assert!(response.parts.is_empty());
    assert!(response.e_tag.is_none());
    assert_eq!(io.get_bytes("bucket", "empty").unwrap().unwrap(), Vec::<u8>::new());
}

#[test]
fn test_zero_block_size_rejected() {
    let (io, _temp) = S3Io::temp().unwrap();
    let result = io.put_bytes_multipart("bucket", "key", b"data", 0);
    assert!(matches!(result, Err(S3IoError::InvalidBlockSize(_))));
    assert!(!io.object_exists("bucket", "key").unwrap());
}

#[test]
fn test_too_many_parts_rejected() {
    let (io, _temp) = S3Io::temp().unwrap();
    let data = vec![7u8; MAX_PARTS as usize + 1];
    let result = io.put_bytes_multipart("bucket", "key", &data, 1);
    assert!(matches!(result, Err(S3IoError::InvalidBlockSize(_))));
}

#[test]
fn test_completion_receives_sorted_parts() {
    let temp = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(&temp.path().join("store"));
    let io = engine_with(Arc::new(backend.clone()), &temp);
    let data = payload(TEN_MB, 2);

    let response = io.put_bytes_multipart("bucket", "big.bin", &data, FOUR_MB).unwrap();

    let numbers: Vec<u32> = response.parts.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    let arrivals = backend.script.arrivals.lock().unwrap().clone();
    assert_eq!(arrivals.len(), 3);
    assert!(arrivals.windows(2).any(|w| w[0] > w[1]), "arrived in order: {:?}", arrivals);
    assert_eq!(*backend.script.completed_with.lock().unwrap(), vec![vec![1, 2, 3]]);
    assert!(backend.script.aborted.lock().unwrap().is_empty());
    assert_eq!(backend.script.fresh_sessions.load(Ordering::SeqCst), 3);
    assert_eq!(backend.open_uploads(), 0);

    assert_eq!(io.get_bytes("bucket", "big.bin").unwrap().unwrap(), data);
}

#[test]
fn test_many_parts_complete_in_order() {
    let temp = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(&temp.path().join("store"));
    let io = engine_with(Arc::new(backend.clone()), &temp);
    let data = payload(100_003, 3);

    let response = io.put_bytes_multipart("bucket", "many", &data, 4_096).unwrap();

    let expected: Vec<u32> = (1..=25).collect();
    let numbers: Vec<u32> = response.parts.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, expected);
    assert_eq!(backend.script.arrivals.lock().unwrap().len(), 25);
    assert_eq!(io.get_bytes("bucket", "many").unwrap().unwrap(), data);
}

#[test]
fn test_part_failure_aborts_once() {
    init_tracing();
    let temp = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(&temp.path().join("store"));
    *backend.script.fail_part.lock().unwrap() = Some(2);
    let io = engine_with(Arc::new(backend.clone()), &temp);
    let data = payload(TEN_MB, 4);

    let err = io.put_bytes_multipart("bucket", "big.bin", &data, FOUR_MB).unwrap_err();

    assert!(matches!(err, S3IoError::Storage { code: Some(500), .. }));
    assert!(err.to_string().contains("part 2 rejected"));
    assert_eq!(backend.script.aborted.lock().unwrap().len(), 1);
    assert!(backend.script.completed_with.lock().unwrap().is_empty());
    assert_eq!(backend.open_uploads(), 0);
    assert!(!io.object_exists("bucket", "big.bin").unwrap());
}

#[test]
fn test_abort_failure_keeps_original_error() {
    init_tracing();
    let temp = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(&temp.path().join("store"));
    *backend.script.fail_part.lock().unwrap() = Some(1);
    backend.script.fail_abort.store(true, Ordering::SeqCst);
    let io = engine_with(Arc::new(backend.clone()), &temp);
    let data = payload(TEN_MB, 5);

    let err = io.put_bytes_multipart("bucket", "big.bin", &data, FOUR_MB).unwrap_err();

    assert!(err.to_string().contains("part 1 rejected"));
    assert!(!err.to_string().contains("abort unavailable"));
    assert_eq!(backend.script.aborted.lock().unwrap().len(), 1);
}

#[test]
fn test_completion_failure_aborts() {
    let temp = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(&temp.path().join("store"));
    backend.script.fail_complete.store(true, Ordering::SeqCst);
    let io = engine_with(Arc::new(backend.clone()), &temp);
    let data = payload(TEN_MB, 6);

    let err = io.put_bytes_multipart("bucket", "big.bin", &data, FOUR_MB).unwrap_err();

    assert!(err.to_string().contains("InternalError"));
    assert_eq!(backend.script.completed_with.lock().unwrap().len(), 1);
    assert_eq!(backend.script.aborted.lock().unwrap().len(), 1);
    assert_eq!(backend.open_uploads(), 0);
}

#[test]
fn test_staged_upload_reads_buffer_slices() {
    let temp = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(&temp.path().join("store"));
    let io = engine_with(Arc::new(backend.clone()), &temp);
    let data = payload(1_000_000, 7);

    let name = io.arena().generate_name("staged");
    let buffer = io.arena().create(&name, data.len() as u64).unwrap();
    buffer.write_at(0, &data).unwrap();

    let response = io.put_staged_multipart("bucket", "staged.bin", &name, 300_000).unwrap();

    let numbers: Vec<u32> = response.parts.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(io.get_bytes("bucket", "staged.bin").unwrap().unwrap(), data);

    // The caller still owns the buffer
    assert_eq!(io.list_created_arrays().unwrap(), vec![name.clone()]);
    io.arena().delete(&name).unwrap();
}

#[test]
fn test_staged_upload_missing_buffer() {
    let (io, _temp) = S3Io::temp().unwrap();
    let result = io.put_staged_multipart("bucket", "key", "S3IO_nothing_here", 1024);
    assert!(matches!(result, Err(S3IoError::ArenaMissing(_))));
}
