//! Upload pipeline integration tests.
//!
//! Run with: `cargo test -p formdesk-services --test upload_test`

mod helpers;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};

use formdesk_core::models::{UploadProgress, UploadState};
use formdesk_core::AppError;
use formdesk_db::FormStore;
use formdesk_services::{UploadFile, UploadHandle};
use formdesk_storage::{LocalStorage, MemoryStorage, Storage};
use helpers::fixtures::{create_test_pdf, form_metadata, TEST_USER};
use helpers::{setup_test_app, setup_test_app_with, test_config, MEMORY_BASE_URL};
use tempfile::TempDir;

fn recording_handle() -> (UploadHandle, Arc<Mutex<Vec<UploadProgress>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let handle = UploadHandle::with_progress(move |p| sink.lock().unwrap().push(p));
    (handle, events)
}

fn assert_progress_well_formed(events: &[UploadProgress]) {
    assert!(events
        .windows(2)
        .all(|w| w[0].bytes_transferred <= w[1].bytes_transferred));
    let terminal = events.iter().filter(|p| p.state.is_terminal()).count();
    assert!(terminal <= 1);
    if terminal == 1 {
        assert!(events.last().unwrap().state.is_terminal());
    }
}

#[tokio::test]
async fn test_upload_form_links_file_to_record() {
    let app = setup_test_app_with(test_config(), MemoryStorage::new(MEMORY_BASE_URL).with_chunk_size(64));
    let pdf = create_test_pdf();
    let (handle, events) = recording_handle();

    let id = app
        .uploads()
        .upload_form(
            UploadFile::from_bytes("Commercial Auto (2024).pdf", "application/pdf", pdf.clone()),
            form_metadata("Commercial Auto"),
            TEST_USER,
            &handle,
        )
        .await
        .unwrap();

    let record = app.forms().get_form(id, None).await.unwrap().unwrap();
    let file_url = record.file_url.unwrap();
    let prefix = format!("{}/forms/{}/Commercial_Auto__2024__v1_", MEMORY_BASE_URL, id);
    assert!(file_url.starts_with(&prefix), "unexpected url {}", file_url);
    assert!(file_url.ends_with(".pdf"));
    assert_eq!(record.file_size, Some(pdf.len() as i64));

    let events = events.lock().unwrap();
    assert_progress_well_formed(&events);
    assert_eq!(events.first().unwrap().state, UploadState::Running);
    let last = events.last().unwrap();
    assert_eq!(last.state, UploadState::Success);
    assert_eq!(last.bytes_transferred, pdf.len() as u64);
    assert!(events.len() > 3);

    let file_name = file_url.rsplit('/').next().unwrap();
    let metadata = app.uploads().file_metadata(id, file_name).await.unwrap();
    assert_eq!(metadata.content_type, "application/pdf");
    assert_eq!(metadata.custom_metadata.get("formId"), Some(&id.to_string()));
    assert_eq!(metadata.custom_metadata.get("version").map(String::as_str), Some("1"));
    assert_eq!(
        metadata.custom_metadata.get("originalName").map(String::as_str),
        Some("Commercial Auto (2024).pdf")
    );
    assert!(metadata.custom_metadata.contains_key("uploadedAt"));
}

#[tokio::test]
async fn test_upload_rejects_before_any_call() {
    let app = setup_test_app();
    let cases = vec![
        (
            UploadFile::from_bytes("form.docx", "application/msword", create_test_pdf()),
            "Only PDF files are allowed",
        ),
        (
            UploadFile::new(
                "huge.pdf",
                "application/pdf",
                60 * 1024 * 1024,
                Box::pin(std::io::Cursor::new(Vec::new())),
            ),
            "File size must be less than 50 MB",
        ),
        (
            UploadFile::from_bytes("empty.pdf", "application/pdf", Vec::new()),
            "File is empty",
        ),
        (
            UploadFile::from_bytes("  ", "application/pdf", create_test_pdf()),
            "File must have a valid name",
        ),
    ];

    for (file, message) in cases {
        let (handle, events) = recording_handle();
        let err = app
            .uploads()
            .upload_form(file, form_metadata("Rejected"), TEST_USER, &handle)
            .await
            .unwrap_err();
        match err {
            AppError::Validation(msg) => assert_eq!(msg, message),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(events.lock().unwrap().is_empty());
    }

    assert_eq!(app.storage.upload_calls(), 0);
    assert!(app.store.scan_forms().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_content_type_parameters_are_ignored() {
    let app = setup_test_app();
    let id = app
        .uploads()
        .upload_form(
            UploadFile::from_bytes("form.pdf", "Application/PDF; charset=binary", create_test_pdf()),
            form_metadata("Parameterised"),
            TEST_USER,
            &UploadHandle::new(),
        )
        .await
        .unwrap();
    assert!(app.store.get_form(id).await.unwrap().unwrap().file_url.is_some());
}

#[tokio::test]
async fn test_cancelled_upload_leaves_orphan_record() {
    let app = setup_test_app_with(test_config(), MemoryStorage::new(MEMORY_BASE_URL).with_chunk_size(16));
    let slot: Arc<OnceLock<UploadHandle>> = Arc::new(OnceLock::new());
    let events = Arc::new(Mutex::new(Vec::new()));

    let cancel_slot = slot.clone();
    let sink = events.clone();
    let handle = UploadHandle::with_progress(move |p: UploadProgress| {
        sink.lock().unwrap().push(p);
        if p.bytes_transferred > 0 {
            if let Some(handle) = cancel_slot.get() {
                handle.cancel();
            }
        }
    });
    slot.set(handle.clone()).ok();

    let err = app
        .uploads()
        .upload_form(
            UploadFile::from_bytes("cancel.pdf", "application/pdf", create_test_pdf()),
            form_metadata("Cancelled Upload"),
            TEST_USER,
            &handle,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Cancelled(_)));

    let events = events.lock().unwrap();
    assert_progress_well_formed(&events);
    assert_eq!(events.last().unwrap().state, UploadState::Canceled);
    assert!(events.last().unwrap().bytes_transferred < create_test_pdf().len() as u64);

    let records = app.store.scan_forms().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].file_url.is_none());
    assert!(records[0].file_size.is_none());
    assert_eq!(app.storage.object_count().await, 0);
}

#[tokio::test]
async fn test_storage_failure_is_transfer_error() {
    let app = setup_test_app_with(test_config(), MemoryStorage::new(MEMORY_BASE_URL).with_chunk_size(16));
    app.storage.set_fail_uploads(true);
    let (handle, events) = recording_handle();

    let err = app
        .uploads()
        .upload_form(
            UploadFile::from_bytes("outage.pdf", "application/pdf", create_test_pdf()),
            form_metadata("Outage"),
            TEST_USER,
            &handle,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Transfer(_)));

    let events = events.lock().unwrap();
    assert_progress_well_formed(&events);
    assert_eq!(events.last().unwrap().state, UploadState::Error);
    assert_eq!(app.store.scan_forms().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pause_and_resume_upload() {
    let app = setup_test_app_with(test_config(), MemoryStorage::new(MEMORY_BASE_URL).with_chunk_size(16));
    let (handle, events) = recording_handle();
    assert!(handle.pause());

    let uploads = app.uploads().clone();
    let task_handle = handle.clone();
    let task = tokio::spawn(async move {
        uploads
            .upload_form(
                UploadFile::from_bytes("paused.pdf", "application/pdf", create_test_pdf()),
                form_metadata("Paused Upload"),
                TEST_USER,
                &task_handle,
            )
            .await
    });

    // the transfer waits at its first chunk while paused
    assert!(helpers::eventually(|| !events.lock().unwrap().is_empty()).await);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(app.storage.object_count().await, 0);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .all(|p| p.bytes_transferred == 0));

    assert!(handle.resume());
    let id = task.await.unwrap().unwrap();
    assert!(app.store.get_form(id).await.unwrap().unwrap().file_url.is_some());

    let events = events.lock().unwrap();
    assert_progress_well_formed(&events);
    assert!(events.iter().any(|p| p.state == UploadState::Running && p.bytes_transferred > 0));
    assert_eq!(events.last().unwrap().state, UploadState::Success);
}

#[tokio::test]
async fn test_upload_to_local_storage() {
    let temp_dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(temp_dir.path(), "http://localhost:3000/files".to_string())
        .await
        .unwrap()
        .with_chunk_size(32);
    let storage: Arc<dyn Storage> = Arc::new(storage);
    let store = Arc::new(formdesk_db::InMemoryFormStore::new());
    let app = formdesk_services::FormDesk::with_backends(test_config(), store.clone(), storage.clone());

    let pdf = create_test_pdf();
    let id = app
        .uploads()
        .upload_form(
            UploadFile::from_bytes("Local Form.pdf", "application/pdf", pdf.clone()),
            form_metadata("Local Form"),
            TEST_USER,
            &UploadHandle::new(),
        )
        .await
        .unwrap();

    let record = store.get_form(id).await.unwrap().unwrap();
    let file_url = record.file_url.unwrap();
    assert!(file_url.starts_with(&format!("http://localhost:3000/files/forms/{}/Local_Form_v1_", id)));

    let file_name = file_url.rsplit('/').next().unwrap().to_string();
    let stored = storage
        .download(&formdesk_storage::form_file_key(id, &file_name))
        .await
        .unwrap();
    assert_eq!(stored, pdf);
    assert_eq!(app.uploads().download_url(id, &file_name).await.unwrap(), file_url);

    app.uploads().delete_form_file(id, &file_name).await.unwrap();
    let err = app.uploads().file_metadata(id, &file_name).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    // the record survives its file
    assert!(store.get_form(id).await.unwrap().is_some());
}

const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

#[tokio::test]
async fn test_stream_larger_than_declared_is_rejected() {
    let config = formdesk_core::Config {
        max_upload_size_bytes: 1024 * 1024,
        ..test_config()
    };
    let app = setup_test_app_with(config, MemoryStorage::new(MEMORY_BASE_URL));
    let (handle, events) = recording_handle();

    // declared as 10 bytes, streams 3 MiB
    let file = UploadFile::new(
        "tiny.pdf",
        "application/pdf",
        10,
        Box::pin(std::io::Cursor::new(vec![0u8; 3 * 1024 * 1024])),
    );
    let err = app
        .uploads()
        .upload_form(file, form_metadata("Understated"), TEST_USER, &handle)
        .await
        .unwrap_err();
    match err {
        AppError::Validation(msg) => assert_eq!(msg, "File size must be less than 1 MB"),
        other => panic!("expected validation error, got {:?}", other),
    }

    assert_eq!(app.storage.object_count().await, 0);
    let records = app.store.scan_forms().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].file_url.is_none());
    assert!(records[0].file_size.is_none());

    let events = events.lock().unwrap();
    assert_progress_well_formed(&events);
    assert_eq!(events.last().unwrap().state, UploadState::Error);
    // the read stopped one byte past the limit
    assert!(events.last().unwrap().bytes_transferred <= 1024 * 1024 + 1);
}

#[tokio::test]
async fn test_stream_shorter_than_declared_is_rejected() {
    let app = setup_test_app();
    let pdf = create_test_pdf();
    let file = UploadFile::new(
        "short.pdf",
        "application/pdf",
        pdf.len() as u64 + 100,
        Box::pin(std::io::Cursor::new(pdf.clone())),
    );

    let err = app
        .uploads()
        .upload_form(file, form_metadata("Truncated"), TEST_USER, &UploadHandle::new())
        .await
        .unwrap_err();
    match err {
        AppError::Validation(msg) => assert_eq!(
            msg,
            format!(
                "File size {} does not match the declared size {}",
                pdf.len(),
                pdf.len() + 100
            )
        ),
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(app.storage.object_count().await, 0);
}

#[tokio::test]
async fn test_submit_form_without_file_creates_record_only() {
    let app = setup_test_app();

    let id = app
        .uploads()
        .submit_form(None, form_metadata("Paper Only"), TEST_USER, &UploadHandle::new())
        .await
        .unwrap();

    let record = app.store.get_form(id).await.unwrap().unwrap();
    assert_eq!(record.title, "Paper Only");
    assert!(record.file_url.is_none());
    assert_eq!(app.storage.upload_calls(), 0);

    let with_file = app
        .uploads()
        .submit_form(
            Some(UploadFile::from_bytes("scan.pdf", "application/pdf", create_test_pdf())),
            form_metadata("Scanned"),
            TEST_USER,
            &UploadHandle::new(),
        )
        .await
        .unwrap();
    assert!(app.store.get_form(with_file).await.unwrap().unwrap().file_url.is_some());
}

#[tokio::test]
async fn test_upload_files_numbers_versions() {
    let app = setup_test_app();
    let id = app
        .forms()
        .create_form(form_metadata("Multi Part Form"), TEST_USER)
        .await
        .unwrap();
    let (first_handle, first_events) = recording_handle();
    let (second_handle, second_events) = recording_handle();

    let stored = app
        .uploads()
        .upload_files(
            id,
            vec![
                (
                    UploadFile::from_bytes("page.pdf", "application/pdf", b"hello".to_vec()),
                    first_handle,
                ),
                (
                    UploadFile::from_bytes("page.pdf", "application/pdf", create_test_pdf()),
                    second_handle,
                ),
            ],
            "3",
        )
        .await
        .unwrap();

    assert_eq!(stored.len(), 2);
    assert!(stored[0].key.starts_with(&format!("forms/{}/page_v3_1_", id)));
    assert!(stored[1].key.starts_with(&format!("forms/{}/page_v3_2_", id)));
    assert_eq!(stored[0].url, format!("{}/{}", MEMORY_BASE_URL, stored[0].key));
    assert_eq!(
        stored[0].metadata.custom_metadata.get("version").map(String::as_str),
        Some("3_1")
    );
    assert_eq!(stored[0].metadata.size, 5);
    assert_eq!(stored[0].metadata.checksum.as_deref(), Some(HELLO_SHA256));
    assert_eq!(app.storage.object_count().await, 2);

    for events in [first_events, second_events] {
        let events = events.lock().unwrap();
        assert_progress_well_formed(&events);
        assert_eq!(events.last().unwrap().state, UploadState::Success);
    }
    // the record itself is untouched
    assert!(app.store.get_form(id).await.unwrap().unwrap().file_url.is_none());
}

#[tokio::test]
async fn test_upload_files_rolls_back_on_failure() {
    let app = setup_test_app();
    let id = app
        .forms()
        .create_form(form_metadata("Partial Batch"), TEST_USER)
        .await
        .unwrap();
    let (good_handle, good_events) = recording_handle();
    let (bad_handle, bad_events) = recording_handle();
    let pdf = create_test_pdf();

    let err = app
        .uploads()
        .upload_files(
            id,
            vec![
                (
                    UploadFile::from_bytes("good.pdf", "application/pdf", pdf.clone()),
                    good_handle,
                ),
                (
                    UploadFile::new(
                        "bad.pdf",
                        "application/pdf",
                        pdf.len() as u64 * 2,
                        Box::pin(std::io::Cursor::new(pdf.clone())),
                    ),
                    bad_handle,
                ),
            ],
            "1",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(app.storage.object_count().await, 0);
    assert_eq!(
        good_events.lock().unwrap().last().unwrap().state,
        UploadState::Canceled
    );
    assert_eq!(
        bad_events.lock().unwrap().last().unwrap().state,
        UploadState::Error
    );
}

#[tokio::test]
async fn test_upload_files_requires_live_form() {
    let app = setup_test_app();
    let id = app
        .forms()
        .create_form(form_metadata("Retired"), TEST_USER)
        .await
        .unwrap();
    app.forms().delete_form(id, TEST_USER).await.unwrap();

    let err = app
        .uploads()
        .upload_files(
            id,
            vec![(
                UploadFile::from_bytes("late.pdf", "application/pdf", create_test_pdf()),
                UploadHandle::new(),
            )],
            "1",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(app.storage.upload_calls(), 0);
}

#[tokio::test]
async fn test_update_file_metadata_merges() {
    let app = setup_test_app();
    let id = app
        .uploads()
        .upload_form(
            UploadFile::from_bytes("notice.pdf", "application/pdf", b"hello".to_vec()),
            form_metadata("Notice"),
            TEST_USER,
            &UploadHandle::new(),
        )
        .await
        .unwrap();
    let record = app.store.get_form(id).await.unwrap().unwrap();
    let file_url = record.file_url.unwrap();
    let file_name = file_url.rsplit('/').next().unwrap();

    let updates = BTreeMap::from([
        ("reviewStatus".to_string(), "approved".to_string()),
        ("version".to_string(), "1a".to_string()),
    ]);
    let updated = app
        .uploads()
        .update_file_metadata(id, file_name, &updates)
        .await
        .unwrap();
    assert_eq!(
        updated.custom_metadata.get("reviewStatus").map(String::as_str),
        Some("approved")
    );
    assert_eq!(updated.custom_metadata.get("version").map(String::as_str), Some("1a"));
    assert_eq!(updated.custom_metadata.get("formId"), Some(&id.to_string()));

    let reread = app.uploads().file_metadata(id, file_name).await.unwrap();
    assert_eq!(reread, updated);
    assert_eq!(reread.checksum.as_deref(), Some(HELLO_SHA256));

    let err = app
        .uploads()
        .update_file_metadata(id, "missing.pdf", &updates)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
