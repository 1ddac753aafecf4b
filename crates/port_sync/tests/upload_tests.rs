//! Upload sessions against the in-process fake server.
//!
//! Tests cover:
//!  1. Four-part scenario with an early complete
//!  2. Part retries and exhaustion (all-or-nothing abort)
//!  3. Terminal exclusivity and abort failures
//!  4. Whole-file uploads (multipart and single-shot)
//!  5. Cancellation and dropped uploads
//!  6. Part concurrency and parallel sessions

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{FakeServer, MEDIA_ID, SINGLE_MEDIA_ID, UPLOAD_ID};
use port_sync::{SyncClient, SyncConfig, SyncError, UploadError, UploadState};
use port_trigger::{TriggerBus, TriggerEvent};
use port_vault::SecureVault;
use serde_json::json;
use tempfile::tempdir;

const TOKEN: &str = "tok-upload";

fn client(config: SyncConfig) -> (SyncClient, TriggerBus) {
    let vault = SecureVault::in_memory();
    vault.save_token(TOKEN).unwrap();
    let bus = TriggerBus::new();
    (SyncClient::new(config, vault, bus.clone()).unwrap(), bus)
}

fn chunk(part: u32) -> Bytes {
    Bytes::from(format!("chunk-{part}"))
}

// ─── Test 1: Four-part scenario ─────────────────────────────────────────────

#[tokio::test]
async fn test_four_part_upload_with_early_complete() {
    let server = FakeServer::start().await;
    let (client, _) = client(server.config(1024));

    let session = client.begin_upload(4).await.unwrap();
    assert_eq!(session.total_parts(), 4);
    assert_eq!(session.id(), UPLOAD_ID);
    assert_eq!(session.state(), UploadState::Initiated);
    assert_eq!(server.state.begin_bodies.lock()[0], json!({"parts": 4}));

    // Out of order is fine.
    for part in [2, 1, 3] {
        client.upload_part(&session, part, chunk(part)).await.unwrap();
    }
    assert_eq!(session.state(), UploadState::Uploading);

    match client.complete_upload(&session).await {
        Err(SyncError::Upload(UploadError::IncompleteParts { missing })) => {
            assert_eq!(missing, vec![4])
        }
        other => panic!("expected IncompleteParts, got {other:?}"),
    }
    assert_eq!(session.state(), UploadState::Uploading);
    assert!(server.state.complete_bodies.lock().is_empty());

    client.upload_part(&session, 4, chunk(4)).await.unwrap();
    assert_eq!(session.state(), UploadState::ReadyToComplete);

    let media_id = client.complete_upload(&session).await.unwrap();
    assert_eq!(media_id, MEDIA_ID);
    assert_eq!(session.state(), UploadState::Completed);

    let completes = server.state.complete_bodies.lock();
    assert_eq!(
        completes[0],
        json!({
            "uploadId": UPLOAD_ID,
            "mediaId": MEDIA_ID,
            "parts": [
                {"PartNumber": 1, "ETag": "\"etag-1\""},
                {"PartNumber": 2, "ETag": "\"etag-2\""},
                {"PartNumber": 3, "ETag": "\"etag-3\""},
                {"PartNumber": 4, "ETag": "\"etag-4\""}
            ]
        })
    );
}

#[tokio::test]
async fn test_part_urls_carry_no_token() {
    let server = FakeServer::start().await;
    let (client, _) = client(server.config(1024));

    let session = client.begin_upload(1).await.unwrap();
    client.upload_part(&session, 1, chunk(1)).await.unwrap();

    assert_eq!(server.state.part_auth.lock().as_slice(), [None]);
    assert_eq!(server.state.auth_headers.lock().as_slice(), [TOKEN.to_string()]);
}

// ─── Test 2: Retries ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_part_retried_until_success() {
    let server = FakeServer::start().await;
    let (client, _) = client(server.config(1024));
    server.state.fail_part(2, 2);

    let session = client.begin_upload(2).await.unwrap();
    client.upload_part(&session, 2, chunk(2)).await.unwrap();

    assert_eq!(server.state.attempts(2), 3);
    assert_eq!(session.uploaded_parts(), vec![2]);
    assert_eq!(session.state(), UploadState::Uploading);
}

#[tokio::test]
async fn test_exhausted_part_aborts_session() {
    let server = FakeServer::start().await;
    let (client, _) = client(server.config(1024));
    server.state.fail_part(1, 10);

    let session = client.begin_upload(2).await.unwrap();
    client.upload_part(&session, 2, chunk(2)).await.unwrap();

    match client.upload_part(&session, 1, chunk(1)).await {
        Err(SyncError::Upload(UploadError::PartFailed { part, attempts, .. })) => {
            assert_eq!(part, 1);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected PartFailed, got {other:?}"),
    }
    assert_eq!(server.state.attempts(1), 3);
    assert_eq!(session.state(), UploadState::Aborted);
    assert_eq!(
        server.state.abort_bodies.lock().as_slice(),
        [json!({"mediaId": MEDIA_ID, "uploadId": UPLOAD_ID})]
    );

    // Aborted rejects complete.
    assert!(matches!(
        client.complete_upload(&session).await,
        Err(SyncError::Upload(UploadError::InvalidTransition { .. }))
    ));
}

#[tokio::test]
async fn test_part_failure_survives_failed_abort() {
    let server = FakeServer::start().await;
    let (client, _) = client(server.config(1024));
    server.state.fail_part(1, 10);
    *server.state.abort_status.lock() = Some(500);

    let session = client.begin_upload(2).await.unwrap();
    match client.upload_part(&session, 1, chunk(1)).await {
        Err(SyncError::Upload(UploadError::PartFailed { part, .. })) => assert_eq!(part, 1),
        other => panic!("expected PartFailed, got {other:?}"),
    }
    assert_eq!(session.state(), UploadState::Aborted);
    assert_eq!(server.state.abort_bodies.lock().len(), 1);
}

// ─── Test 3: Terminal states ────────────────────────────────────────────────

#[tokio::test]
async fn test_completed_rejects_abort() {
    let server = FakeServer::start().await;
    let (client, _) = client(server.config(1024));

    let session = client.begin_upload(1).await.unwrap();
    client.upload_part(&session, 1, chunk(1)).await.unwrap();
    client.complete_upload(&session).await.unwrap();

    assert!(matches!(
        client.abort_upload(&session).await,
        Err(SyncError::Upload(UploadError::InvalidTransition { .. }))
    ));
    assert_eq!(session.state(), UploadState::Completed);
    assert!(server.state.abort_bodies.lock().is_empty());
}

#[tokio::test]
async fn test_abort_from_initiated_and_server_failure() {
    let server = FakeServer::start().await;
    let (client, _) = client(server.config(1024));
    *server.state.abort_status.lock() = Some(500);

    let session = client.begin_upload(3).await.unwrap();
    match client.abort_upload(&session).await {
        Err(SyncError::Upload(UploadError::SessionAbortFailed { session_id, .. })) => {
            assert_eq!(session_id, UPLOAD_ID)
        }
        other => panic!("expected SessionAbortFailed, got {other:?}"),
    }
    // Locally terminal either way.
    assert_eq!(session.state(), UploadState::Aborted);
    assert!(client.upload_part(&session, 1, chunk(1)).await.is_err());
    assert_eq!(server.state.attempts(1), 0);
}

#[tokio::test]
async fn test_abort_without_token_is_still_terminal() {
    let server = FakeServer::start().await;
    let vault = SecureVault::in_memory();
    vault.save_token(TOKEN).unwrap();
    let client = SyncClient::new(server.config(1024), vault.clone(), TriggerBus::new()).unwrap();

    let session = client.begin_upload(2).await.unwrap();
    vault.clear_token().unwrap();

    assert!(matches!(
        client.abort_upload(&session).await,
        Err(SyncError::MissingToken)
    ));
    assert_eq!(session.state(), UploadState::Aborted);
    assert!(server.state.abort_bodies.lock().is_empty());
}

#[tokio::test]
async fn test_url_count_mismatch_releases_session() {
    let server = FakeServer::start().await;
    let (client, _) = client(server.config(1024));
    *server.state.drop_urls.lock() = 1;

    match client.begin_upload(3).await {
        Err(SyncError::Upload(UploadError::PartCountMismatch { expected, got })) => {
            assert_eq!((expected, got), (3, 2))
        }
        other => panic!("expected PartCountMismatch, got {other:?}"),
    }
    assert_eq!(server.state.abort_bodies.lock().len(), 1);
}

// ─── Test 4: Whole files ────────────────────────────────────────────────────

#[tokio::test]
async fn test_upload_file_multipart() {
    let server = FakeServer::start().await;
    let (client, bus) = client(server.config(4));
    let messages = bus.subscribe(TriggerEvent::NewMessage);

    let dir = tempdir().unwrap();
    let path = dir.path().join("photo.jpg");
    let content = b"0123456789".to_vec();
    std::fs::write(&path, &content).unwrap();

    let media_id = client.upload_file(&path).await.unwrap();
    assert_eq!(media_id, MEDIA_ID);
    assert_eq!(server.state.begin_bodies.lock()[0], json!({"parts": 3}));

    let stored = server.state.stored_parts.lock();
    let reassembled: Vec<u8> = stored.values().flatten().copied().collect();
    assert_eq!(stored.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(reassembled, content);
    assert_eq!(server.state.complete_bodies.lock().len(), 1);

    assert!(client.uploader().active_session(&path).is_none());
    // Uploads publish nothing.
    assert!(!messages.has_changed());
}

#[tokio::test]
async fn test_upload_file_single_shot() {
    let server = FakeServer::start().await;
    let (client, _) = client(server.config(1024));

    let dir = tempdir().unwrap();
    let path = dir.path().join("note.txt");
    std::fs::write(&path, b"small file body").unwrap();

    let media_id = client.upload_file(&path).await.unwrap();
    assert_eq!(media_id, SINGLE_MEDIA_ID);
    assert!(server.state.begin_bodies.lock().is_empty());

    let uploads = server.state.form_uploads.lock();
    assert_eq!(uploads.len(), 1);
    let (content_type, body) = &uploads[0];
    assert!(content_type.starts_with("multipart/form-data"));
    let body = String::from_utf8_lossy(body);
    assert!(body.contains("uploads/k1"));
    assert!(body.contains("p0l1cy"));
    assert!(body.contains("small file body"));
    assert!(body.find("p0l1cy").unwrap() < body.find("small file body").unwrap());
}

#[tokio::test]
async fn test_upload_file_failure_is_all_or_nothing() {
    let server = FakeServer::start().await;
    let (client, _) = client(server.config(4));
    server.state.fail_part(2, 10);

    let dir = tempdir().unwrap();
    let path = dir.path().join("video.mp4");
    std::fs::write(&path, b"0123456789ab").unwrap();

    match client.upload_file(&path).await {
        Err(SyncError::Upload(UploadError::PartFailed { part, .. })) => assert_eq!(part, 2),
        other => panic!("expected PartFailed, got {other:?}"),
    }
    assert_eq!(server.state.abort_bodies.lock().len(), 1);
    assert!(server.state.complete_bodies.lock().is_empty());
    assert!(client.uploader().active_session(&path).is_none());
}

#[tokio::test]
async fn test_empty_file_is_rejected() {
    let server = FakeServer::start().await;
    let (client, _) = client(server.config(4));

    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.bin");
    std::fs::write(&path, b"").unwrap();

    assert!(matches!(
        client.upload_file(&path).await,
        Err(SyncError::Upload(UploadError::EmptySource))
    ));
    assert!(server.state.begin_bodies.lock().is_empty());
}

// ─── Test 5: Cancellation ───────────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_running_upload() {
    let server = FakeServer::start().await;
    let config = SyncConfig {
        max_part_attempts: 50,
        initial_backoff_ms: 200,
        max_backoff_ms: 200,
        ..server.config(4)
    };
    let (client, _) = client(config);
    server.state.fail_part(1, 1000);

    let dir = tempdir().unwrap();
    let path = dir.path().join("stuck.bin");
    std::fs::write(&path, b"01234567").unwrap();

    let running = {
        let client = client.clone();
        let path = path.clone();
        tokio::spawn(async move { client.upload_file(&path).await })
    };

    let mut waited = Duration::ZERO;
    while client.uploader().active_session(&path).is_none() {
        assert!(waited < Duration::from_secs(5), "upload never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
        waited += Duration::from_millis(5);
    }

    assert!(client.cancel_upload(&path).await.unwrap());
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        Err(SyncError::Upload(UploadError::Cancelled { .. }))
    ));
    assert_eq!(server.state.abort_bodies.lock().len(), 1);
    assert!(server.state.complete_bodies.lock().is_empty());
    assert!(!client.cancel_upload(&path).await.unwrap());
}

#[tokio::test]
async fn test_dropped_upload_releases_session() {
    let server = FakeServer::start().await;
    let config = SyncConfig {
        max_part_attempts: 50,
        initial_backoff_ms: 200,
        max_backoff_ms: 200,
        ..server.config(4)
    };
    let (client, _) = client(config);
    server.state.fail_part(1, 1000);

    let dir = tempdir().unwrap();
    let path = dir.path().join("abandoned.bin");
    std::fs::write(&path, b"01234567").unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(300), client.upload_file(&path)).await;
    assert!(outcome.is_err(), "upload should still be retrying");
    assert!(client.uploader().active_session(&path).is_none());

    // The server abort goes out from a background task.
    let mut waited = Duration::ZERO;
    while server.state.abort_bodies.lock().is_empty() {
        assert!(waited < Duration::from_secs(5), "session never released");
        tokio::time::sleep(Duration::from_millis(5)).await;
        waited += Duration::from_millis(5);
    }
    assert_eq!(
        server.state.abort_bodies.lock().as_slice(),
        [json!({"mediaId": MEDIA_ID, "uploadId": UPLOAD_ID})]
    );
    assert!(server.state.complete_bodies.lock().is_empty());
    assert!(!client.cancel_upload(&path).await.unwrap());
}

// ─── Test 6: Concurrency ────────────────────────────────────────────────────

#[tokio::test]
async fn test_parts_in_flight_respect_bound() {
    let server = FakeServer::start().await;
    let config = SyncConfig {
        max_concurrent_parts: 2,
        ..server.config(4)
    };
    let (client, _) = client(config);
    *server.state.part_delay_ms.lock() = 50;

    let dir = tempdir().unwrap();
    let path = dir.path().join("album.zip");
    let content = b"abcdefghijklmnopqrstuvwx".to_vec();
    std::fs::write(&path, &content).unwrap();

    assert_eq!(client.upload_file(&path).await.unwrap(), MEDIA_ID);
    assert_eq!(server.state.begin_bodies.lock()[0], json!({"parts": 6}));

    let stored = server.state.stored_parts.lock();
    assert_eq!(stored.len(), 6);
    assert_eq!(stored.values().flatten().copied().collect::<Vec<u8>>(), content);
    assert_eq!(server.state.peak_parts_in_flight(), 2);
}

#[tokio::test]
async fn test_two_sessions_run_side_by_side() {
    let server = FakeServer::start().await;
    let config = SyncConfig {
        max_concurrent_parts: 1,
        ..server.config(4)
    };
    let (client, _) = client(config);
    *server.state.part_delay_ms.lock() = 50;

    let dir = tempdir().unwrap();
    let first = dir.path().join("first.bin");
    let second = dir.path().join("second.bin");
    std::fs::write(&first, b"aaaabbbb").unwrap();
    std::fs::write(&second, b"ccccdddd").unwrap();

    let (a, b) = tokio::join!(client.upload_file(&first), client.upload_file(&second));
    assert_eq!(a.unwrap(), MEDIA_ID);
    assert_eq!(b.unwrap(), MEDIA_ID);

    assert_eq!(server.state.begin_bodies.lock().len(), 2);
    assert_eq!(server.state.complete_bodies.lock().len(), 2);
    // One part per session at a time, so two in flight means both sessions ran.
    assert_eq!(server.state.peak_parts_in_flight(), 2);
    assert!(client.uploader().active_session(&first).is_none());
    assert!(client.uploader().active_session(&second).is_none());
}
