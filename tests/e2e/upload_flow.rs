//! E2E Upload Flow Tests
//!
//! ## Test Coverage
//!
//! - Single file upload
//! - Multiple files in one request
//! - Form fields without files
//! - Large file streaming
//! - Concurrent uploads with identical names
//! - Sequence numbers continue across restarts

use super::common::{file_names, file_part, E2ETestEnv};
use reqwest::multipart::Form;
use reqwest::StatusCode;

/// Test: Single file is stored under its allocated name
#[tokio::test]
async fn test_single_file_upload_succeeds() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let form = Form::new().part("doc", file_part(&b"AB"[..], "Web Data"));
    let response = env.upload(form).await.expect("Request failed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");

    let files = env.stored_files();
    assert_eq!(file_names(&files), vec!["0-Web_Data-doc".to_string()]);
    assert_eq!(std::fs::read(&files[0]).unwrap(), b"AB");
}

/// Test: Every part of a request ends up on disk
#[tokio::test]
async fn test_multiple_files_in_one_request() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let form = Form::new()
        .part("photo", file_part(&b"jpeg bytes"[..], "holiday.jpg"))
        .text("caption", "not a file")
        .part("notes", file_part(&b"plain text"[..], "notes.txt"));
    let response = env.upload(form).await.expect("Request failed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        file_names(&env.stored_files()),
        vec![
            "0-holiday-photo.jpg".to_string(),
            "1-notes-notes.txt".to_string()
        ]
    );
}

/// Test: A form without file parts is still a success
#[tokio::test]
async fn test_form_without_files_succeeds() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let form = Form::new().text("comment", "only text");
    let response = env.upload(form).await.expect("Request failed");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(env.stored_files().is_empty());
}

/// Test: 8MB upload is streamed intact
#[tokio::test]
async fn test_upload_8mb_file() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let payload: Vec<u8> = (0..8 * 1024 * 1024u32).map(|i| (i % 253) as u8).collect();
    let form = Form::new().part("blob", file_part(payload.clone(), "large.bin"));
    let response = env.upload(form).await.expect("Request failed");

    assert_eq!(response.status(), StatusCode::OK);
    let files = env.stored_files();
    assert_eq!(files.len(), 1);
    assert_eq!(std::fs::read(&files[0]).unwrap(), payload);
}

/// Test: Concurrent uploads with the same filename never overwrite each other
#[tokio::test]
async fn test_concurrent_uploads_same_name() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let uploads = (0..10).map(|i| {
        let form = Form::new().part("f", file_part(format!("content-{}", i), "same.txt"));
        env.upload(form)
    });
    for response in futures::future::join_all(uploads).await {
        assert_eq!(response.expect("Request failed").status(), StatusCode::OK);
    }

    let files = env.stored_files();
    assert_eq!(files.len(), 10);

    let mut contents: Vec<String> = files
        .iter()
        .map(|f| std::fs::read_to_string(f).unwrap())
        .collect();
    contents.sort();
    contents.dedup();
    assert_eq!(contents.len(), 10);
}

/// Test: A restarted server continues after the highest stored sequence
#[tokio::test]
async fn test_sequence_survives_restart() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    let form = Form::new().part("f", file_part(&b"first"[..], "a.txt"));
    assert_eq!(env.upload(form).await.unwrap().status(), StatusCode::OK);

    let storage = env.into_storage();
    let env = E2ETestEnv::with_storage(storage)
        .await
        .expect("Failed to restart test env");

    let form = Form::new().part("f", file_part(&b"second"[..], "a.txt"));
    assert_eq!(env.upload(form).await.unwrap().status(), StatusCode::OK);

    assert_eq!(
        file_names(&env.stored_files()),
        vec!["0-a-f.txt".to_string(), "1-a-f.txt".to_string()]
    );
}
