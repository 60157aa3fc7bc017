//! Integration tests for the session orchestrator.
//!
//! These tests drive the public lifecycle API against the in-memory backend.

#![allow(clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use seedbox_core::backend::{BackendError, DEFAULT_PIECE_LENGTH};
use seedbox_core::{
    AdmissionDenial, Descriptor, DescriptorCache, ErrorKind, InfoHash, ManualClock, MemoryBackend,
    Orchestrator, OrchestratorConfig, OrchestratorError, PercentOfSize, SessionRecord,
    SessionState, SessionStatus,
};
use tempfile::TempDir;

const HASH_A: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";
const HASH_B: &str = "dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c";

fn magnet(hash: &str, name: &str) -> String {
    format!("magnet:?xt=urn:btih:{hash}&dn={name}")
}

fn manual_config() -> OrchestratorConfig {
    OrchestratorConfig {
        auto_start: false,
        restart_pause_ms: 0,
        ..OrchestratorConfig::default()
    }
}

fn setup(config: OrchestratorConfig) -> (Orchestrator, MemoryBackend, Arc<ManualClock>) {
    let backend = MemoryBackend::new();
    let clock = Arc::new(ManualClock::default());
    let orchestrator = Orchestrator::with_parts(
        Arc::new(backend.clone()),
        config,
        clock.clone(),
        Arc::new(PercentOfSize::default()),
    );
    (orchestrator, backend, clock)
}

/// Adds a magnet session and resolves its metadata to a single file of `size` bytes.
async fn add_resolved(
    orchestrator: &Orchestrator,
    backend: &MemoryBackend,
    hash: &str,
    name: &str,
    size: u64,
) -> InfoHash {
    let id = orchestrator
        .add_magnet(&magnet(hash, name))
        .await
        .expect("add succeeds");
    backend
        .transfer(&id)
        .expect("transfer registered")
        .resolve_metadata(name, vec![(format!("{name}.bin"), size)], DEFAULT_PIECE_LENGTH);
    id
}

async fn wait_for<F>(orchestrator: &Orchestrator, id: &InfoHash, predicate: F) -> SessionRecord
where
    F: Fn(&SessionRecord) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(record) = orchestrator.session(id).await
                && predicate(&record)
            {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time")
}

#[tokio::test]
async fn test_concurrency_limit_admits_after_stop() {
    let (orchestrator, backend, _clock) = setup(OrchestratorConfig {
        max_concurrent_sessions: 1,
        max_memory_bytes: 0,
        ..manual_config()
    });
    let a = add_resolved(&orchestrator, &backend, HASH_A, "alpha", 1_000_000).await;
    let b = add_resolved(&orchestrator, &backend, HASH_B, "beta", 1_000_000).await;

    orchestrator.start(&a).await.expect("first start admitted");

    let err = orchestrator.start(&b).await.unwrap_err();
    assert!(
        matches!(
            err,
            OrchestratorError::AdmissionDenied {
                reason: AdmissionDenial::ConcurrencyLimit {
                    active: 1,
                    limit: 1
                },
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert!(!orchestrator.session(&b).await.unwrap().started);

    orchestrator.stop(&a).await.expect("stop succeeds");
    orchestrator.start(&b).await.expect("slot freed by stop");
    assert_eq!(orchestrator.active_sessions().await, 1);
}

#[tokio::test]
async fn test_memory_ceiling_denies_oversized_session() {
    let (orchestrator, backend, _clock) = setup(OrchestratorConfig {
        max_memory_bytes: 1000,
        ..manual_config()
    });
    // 2% of 100 000 bytes = 2000 estimated, above the ceiling
    let big = add_resolved(&orchestrator, &backend, HASH_A, "big", 100_000).await;
    // 2% of 10 000 bytes = 200 estimated
    let small = add_resolved(&orchestrator, &backend, HASH_B, "small", 10_000).await;

    let err = orchestrator.start(&big).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AdmissionDenied);
    assert!(err.to_string().contains("memory limit reached"));
    assert_eq!(orchestrator.budget().used(), 0);

    orchestrator.start(&small).await.expect("fits the budget");
    assert_eq!(orchestrator.budget().used(), 200);
}

#[tokio::test]
async fn test_budget_released_on_stop_and_delete() {
    let (orchestrator, backend, _clock) = setup(OrchestratorConfig {
        max_memory_bytes: 0,
        ..manual_config()
    });
    let a = add_resolved(&orchestrator, &backend, HASH_A, "alpha", 100_000).await;
    let b = add_resolved(&orchestrator, &backend, HASH_B, "beta", 100_000).await;

    orchestrator.start(&a).await.unwrap();
    orchestrator.start(&b).await.unwrap();
    assert_eq!(orchestrator.budget().used(), 4000);
    assert_eq!(orchestrator.active_sessions().await, 2);

    orchestrator.stop(&a).await.unwrap();
    assert_eq!(orchestrator.budget().used(), 2000);
    assert!(backend.transfer(&a).unwrap().is_discarded());

    orchestrator.delete(&b).await.unwrap();
    assert_eq!(orchestrator.budget().used(), 0);
    assert_eq!(orchestrator.active_sessions().await, 0);
    assert!(orchestrator.session(&b).await.is_none());
    assert!(backend.transfer(&b).unwrap().is_discarded());
}

#[tokio::test]
async fn test_repeated_start_and_stop_leave_counters_unchanged() {
    let (orchestrator, backend, _clock) = setup(manual_config());
    let id = add_resolved(&orchestrator, &backend, HASH_A, "alpha", 100_000).await;

    let err = orchestrator.stop(&id).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InvalidState {
            state: SessionState::AlreadyStopped,
            ..
        }
    ));
    assert_eq!(orchestrator.active_sessions().await, 0);

    orchestrator.start(&id).await.unwrap();
    let err = orchestrator.start(&id).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InvalidState {
            state: SessionState::AlreadyStarted,
            ..
        }
    ));
    assert_eq!(orchestrator.active_sessions().await, 1);
    assert_eq!(orchestrator.budget().used(), 2000);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let (orchestrator, _backend, _clock) = setup(manual_config());
    let id = InfoHash::from_bytes([9; 20]);

    for err in [
        orchestrator.start(&id).await.unwrap_err(),
        orchestrator.stop(&id).await.unwrap_err(),
        orchestrator.delete(&id).await.unwrap_err(),
        orchestrator.start_file(&id, "a.bin").await.unwrap_err(),
        orchestrator.session_report(&id).await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::NotFound, "unexpected error: {err}");
    }
}

#[tokio::test]
async fn test_auto_start_after_metadata() {
    let (orchestrator, backend, _clock) = setup(OrchestratorConfig {
        auto_start: true,
        ..manual_config()
    });
    let id = orchestrator
        .add_magnet(&magnet(HASH_A, "alpha"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!orchestrator.session(&id).await.unwrap().started);

    let transfer = backend.transfer(&id).unwrap();
    transfer.resolve_metadata("alpha", vec![("alpha.bin".into(), 100_000)], DEFAULT_PIECE_LENGTH);

    wait_for(&orchestrator, &id, |record| record.started).await;
    assert!(transfer.is_running());
    assert_eq!(orchestrator.budget().used(), 2000);
}

#[tokio::test]
async fn test_delete_cancels_pending_auto_start() {
    let (orchestrator, backend, _clock) = setup(OrchestratorConfig {
        auto_start: true,
        ..manual_config()
    });
    let id = orchestrator
        .add_magnet(&magnet(HASH_A, "alpha"))
        .await
        .unwrap();
    let transfer = backend.transfer(&id).unwrap();

    orchestrator.delete(&id).await.unwrap();
    transfer.resolve_metadata("alpha", vec![("alpha.bin".into(), 100_000)], DEFAULT_PIECE_LENGTH);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(orchestrator.session(&id).await.is_none());
    assert!(!transfer.is_running());
    assert_eq!(orchestrator.active_sessions().await, 0);
}

#[tokio::test]
async fn test_backend_start_timeout_reserves_nothing() {
    let (orchestrator, backend, _clock) = setup(OrchestratorConfig {
        backend_timeout_secs: 1,
        ..manual_config()
    });
    let id = add_resolved(&orchestrator, &backend, HASH_A, "alpha", 100_000).await;
    backend.transfer(&id).unwrap().set_hang_on_start(true);

    let err = orchestrator.start(&id).await.unwrap_err();
    assert!(
        matches!(
            err,
            OrchestratorError::Backend {
                source: BackendError::Timeout {
                    operation: "start",
                    ..
                },
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert_eq!(orchestrator.active_sessions().await, 0);
    assert_eq!(orchestrator.budget().used(), 0);
    assert!(!orchestrator.session(&id).await.unwrap().started);
}

#[tokio::test]
async fn test_backend_start_failure_can_be_retried() {
    let (orchestrator, backend, _clock) = setup(manual_config());
    let id = add_resolved(&orchestrator, &backend, HASH_A, "alpha", 100_000).await;
    let transfer = backend.transfer(&id).unwrap();
    transfer.fail_next_start(BackendError::failed("tracker unreachable"));

    let err = orchestrator.start(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert!(err.to_string().contains("tracker unreachable"));
    assert_eq!(orchestrator.budget().used(), 0);

    orchestrator.start(&id).await.expect("second attempt succeeds");
    assert_eq!(transfer.start_calls(), 1);
}

#[tokio::test]
async fn test_restart_after_stop_re_adds_transfer() {
    let (orchestrator, backend, _clock) = setup(manual_config());
    let id = add_resolved(&orchestrator, &backend, HASH_A, "alpha", 100_000).await;
    let transfer = backend.transfer(&id).unwrap();

    orchestrator.start(&id).await.unwrap();
    orchestrator.stop(&id).await.unwrap();
    assert!(transfer.is_discarded());

    orchestrator.start(&id).await.unwrap();
    assert!(!transfer.is_discarded());
    assert!(transfer.is_running());
    assert_eq!(transfer.start_calls(), 2);
    assert_eq!(transfer.discard_calls(), 1);
}

#[tokio::test]
async fn test_start_file_marks_single_file() {
    let (orchestrator, backend, _clock) = setup(manual_config());
    let id = orchestrator
        .add_magnet(&magnet(HASH_A, "album"))
        .await
        .unwrap();
    let transfer = backend.transfer(&id).unwrap();
    transfer.resolve_metadata(
        "album",
        vec![("01.flac".into(), 30_000_000), ("02.flac".into(), 20_000_000)],
        DEFAULT_PIECE_LENGTH,
    );
    orchestrator.refresh().await;

    orchestrator.start_file(&id, "02.flac").await.unwrap();
    let record = orchestrator.session(&id).await.unwrap();
    assert!(!record.started);
    assert!(!record.file("01.flac").unwrap().started);
    assert!(record.file("02.flac").unwrap().started);
    assert_eq!(transfer.started_files(), vec!["02.flac".to_string()]);
    assert_eq!(orchestrator.active_sessions().await, 0);

    let err = orchestrator.start_file(&id, "02.flac").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = orchestrator.start_file(&id, "03.flac").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::FileNotFound { .. }));

    let err = orchestrator.stop_file(&id, "02.flac").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

#[tokio::test]
async fn test_metainfo_cached_and_removed_on_delete() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let (orchestrator, _backend, _clock) = setup(OrchestratorConfig {
        cache_dir: Some(temp_dir.path().to_path_buf()),
        ..manual_config()
    });
    let bytes = b"d4:infod6:lengthi1024e4:name8:test.binee".to_vec();

    let id = orchestrator.add_metainfo(bytes.clone()).await.unwrap();
    assert_eq!(id, Descriptor::metainfo(bytes.clone()).unwrap().info_hash());
    assert_eq!(orchestrator.session(&id).await.unwrap().name, "test.bin");
    let cached = DescriptorCache::new(temp_dir.path()).path_for(&id);
    assert_eq!(std::fs::read(&cached).unwrap(), bytes);

    orchestrator.delete(&id).await.unwrap();
    assert!(!cached.exists());
}

#[tokio::test]
async fn test_refresh_discovers_sessions_added_elsewhere() {
    let (orchestrator, backend, _clock) = setup(manual_config());
    let descriptor = Descriptor::magnet(&magnet(HASH_B, "outside")).unwrap();
    backend.inject(&descriptor);

    let sessions = orchestrator.refresh().await;
    assert_eq!(sessions.len(), 1);
    let record = sessions.values().next().unwrap();
    assert_eq!(record.name, "outside");
    assert!(!record.started);
}

#[tokio::test]
async fn test_refresh_tracks_progress_and_stall() {
    let (orchestrator, backend, clock) = setup(manual_config());
    let id = add_resolved(&orchestrator, &backend, HASH_A, "alpha", 1_000_000).await;
    let transfer = backend.transfer(&id).unwrap();
    orchestrator.start(&id).await.unwrap();
    orchestrator.refresh().await;

    clock.advance_secs(10);
    transfer.advance(500_000);
    let record = orchestrator.refresh().await.remove(&id).unwrap();
    assert_eq!(record.downloaded_bytes, 500_000);
    assert_eq!(record.percent_complete, 50.0);
    assert_eq!(record.download_rate_bps, 50_000.0);
    assert_eq!(record.status, SessionStatus::Healthy);
    // 500 000 bytes cover one whole 256 KiB piece of four
    let file = record.file("alpha.bin").unwrap();
    assert_eq!(file.chunk_count, 4);
    assert_eq!(file.completed_chunks, 1);
    assert_eq!(file.percent_complete, 25.0);

    clock.advance_secs(70);
    let record = orchestrator.refresh().await.remove(&id).unwrap();
    assert_eq!(record.download_rate_bps, 0.0);
    assert_eq!(record.status, SessionStatus::Stalled);
    assert_eq!(
        record.errors.latest().unwrap().message,
        "Download stalled - no progress for 70s"
    );
}

#[tokio::test]
async fn test_stopped_session_keeps_last_state() {
    let (orchestrator, backend, clock) = setup(manual_config());
    let id = add_resolved(&orchestrator, &backend, HASH_A, "alpha", 1_000_000).await;
    let transfer = backend.transfer(&id).unwrap();
    orchestrator.start(&id).await.unwrap();
    transfer.advance(250_000);
    clock.advance_secs(5);
    orchestrator.refresh().await;

    orchestrator.stop(&id).await.unwrap();
    clock.advance_secs(600);
    let record = orchestrator.refresh().await.remove(&id).unwrap();

    assert!(!record.started);
    assert_eq!(record.percent_complete, 25.0);
    assert_ne!(record.status, SessionStatus::Stalled);
}

#[tokio::test]
async fn test_reports_are_ordered_and_camel_case() {
    let (orchestrator, backend, clock) = setup(manual_config());
    let first = add_resolved(&orchestrator, &backend, HASH_B, "first", 1000).await;
    clock.advance_secs(1);
    let second = add_resolved(&orchestrator, &backend, HASH_A, "second", 1000).await;
    orchestrator.refresh().await;

    let reports = orchestrator.reports().await;
    let ids: Vec<InfoHash> = reports.iter().map(|report| report.id).collect();
    assert_eq!(ids, vec![first, second]);

    let json = serde_json::to_value(&reports[0]).unwrap();
    assert_eq!(json["infoHash"], HASH_B);
    assert_eq!(json["name"], "first");
    assert!(json.get("metadataPercent").is_some());

    let health = orchestrator.health().await;
    assert_eq!(health.sessions, 2);
    assert_eq!(health.active_sessions, 0);
}

#[tokio::test]
async fn test_stop_releases_what_start_reserved_after_size_change() {
    let (orchestrator, backend, _clock) = setup(OrchestratorConfig {
        max_memory_bytes: 0,
        ..manual_config()
    });
    let other = add_resolved(&orchestrator, &backend, HASH_B, "beta", 100_000).await;
    orchestrator.start(&other).await.unwrap();
    assert_eq!(orchestrator.budget().used(), 2000);

    // Started before metadata: the estimate is taken from a zero size
    let id = orchestrator
        .add_magnet(&magnet(HASH_A, "alpha"))
        .await
        .unwrap();
    orchestrator.start(&id).await.unwrap();
    assert_eq!(orchestrator.budget().used(), 2000);

    backend
        .transfer(&id)
        .unwrap()
        .resolve_metadata("alpha", vec![("alpha.bin".into(), 1_000_000)], DEFAULT_PIECE_LENGTH);
    let record = orchestrator.refresh().await.remove(&id).unwrap();
    assert_eq!(record.total_size, 1_000_000);

    orchestrator.stop(&id).await.unwrap();
    assert_eq!(orchestrator.budget().used(), 2000);

    // Growing a running session does not grow what stop gives back
    orchestrator.start(&id).await.unwrap();
    assert_eq!(orchestrator.budget().used(), 22_000);
    backend
        .transfer(&id)
        .unwrap()
        .resolve_metadata("alpha", vec![("alpha.bin".into(), 5_000_000)], DEFAULT_PIECE_LENGTH);
    orchestrator.refresh().await;
    orchestrator.stop(&id).await.unwrap();
    assert_eq!(orchestrator.budget().used(), 2000);
}

#[tokio::test]
async fn test_backend_descriptor_rejection_is_invalid_descriptor() {
    let (orchestrator, backend, _clock) = setup(manual_config());
    backend.fail_next_add(BackendError::InvalidDescriptor {
        reason: "unsupported metainfo version".to_string(),
    });

    let err = orchestrator
        .add_magnet(&magnet(HASH_A, "alpha"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidDescriptor, "unexpected error: {err}");
    assert!(orchestrator.sessions().await.is_empty());

    backend.fail_next_add(BackendError::failed("disk full"));
    let err = orchestrator
        .add_magnet(&magnet(HASH_A, "alpha"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
}

#[tokio::test]
async fn test_malformed_metainfo_never_reaches_backend() {
    let (orchestrator, backend, _clock) = setup(manual_config());

    for bytes in [
        b"d this is not bencode at all e".to_vec(),
        b"d8:announce14:http://trackere".to_vec(),
    ] {
        let err = orchestrator.add_metainfo(bytes).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDescriptor, "unexpected error: {err}");
    }
    assert_eq!(backend.add_calls(), 0);
    assert!(orchestrator.sessions().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_add_and_delete_leave_consistent_state() {
    let (orchestrator, backend, _clock) = setup(manual_config());
    let uri = magnet(HASH_A, "alpha");

    for _ in 0..50 {
        let id = orchestrator.add_magnet(&uri).await.unwrap();
        let (added, deleted) = tokio::join!(
            {
                let orchestrator = orchestrator.clone();
                let uri = uri.clone();
                tokio::spawn(async move { orchestrator.add_magnet(&uri).await })
            },
            {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.delete(&id).await })
            }
        );
        added.unwrap().expect("add succeeds");
        deleted.unwrap().expect("delete succeeds");

        let transfer = backend.transfer(&id).unwrap();
        if orchestrator.session(&id).await.is_some() {
            assert!(!transfer.is_discarded(), "tracked session lost its transfer");
            orchestrator.start(&id).await.expect("tracked session starts");
            orchestrator.delete(&id).await.unwrap();
        } else {
            assert!(transfer.is_discarded());
        }
    }
}

#[tokio::test]
async fn test_report_flags_recent_error_by_orchestrator_clock() {
    let (orchestrator, backend, clock) = setup(manual_config());
    let id = add_resolved(&orchestrator, &backend, HASH_A, "alpha", 1_000_000).await;
    orchestrator.start(&id).await.unwrap();
    orchestrator.refresh().await;
    assert!(!orchestrator.session_report(&id).await.unwrap().has_recent_error);

    clock.advance_secs(70);
    orchestrator.refresh().await;
    let report = orchestrator.session_report(&id).await.unwrap();
    assert!(report.has_recent_error);
    assert_eq!(serde_json::to_value(&report).unwrap()["hasRecentError"], true);

    clock.advance_secs(300);
    assert!(!orchestrator.session_report(&id).await.unwrap().has_recent_error);
}
