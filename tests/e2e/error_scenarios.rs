//! E2E Error Scenario Tests
//!
//! ## Test Coverage
//!
//! - Routing: health, unknown paths, wrong methods
//! - Non-multipart and malformed bodies
//! - Path traversal in declared filenames
//! - Client disconnect mid-upload

use super::common::{file_names, file_part, E2ETestEnv};
use reqwest::multipart::Form;
use reqwest::StatusCode;
use sluice_uploadr::config::TelegramConfig;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test: Health endpoint answers without touching storage
#[tokio::test]
async fn test_health_endpoint() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env
        .client
        .get(format!("{}/health", env.base_url()))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
}

/// Test: Unknown path returns 404
#[tokio::test]
async fn test_unknown_path_returns_404() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env
        .client
        .post(format!("{}/nonexistent", env.base_url()))
        .body("data")
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Test: Only POST is accepted on the upload path
#[tokio::test]
async fn test_get_upload_returns_405() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env
        .client
        .get(format!("{}/upload", env.base_url()))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get("allow").unwrap(), "POST");
}

/// Test: Non-multipart body is a malformed request
#[tokio::test]
async fn test_non_multipart_body_returns_400() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env
        .client
        .post(format!("{}/upload", env.base_url()))
        .header("Content-Type", "application/json")
        .body(r#"{"file": "nope"}"#)
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response
        .text()
        .await
        .unwrap()
        .starts_with("Upload failed: malformed request"));
    assert!(env.stored_files().is_empty());
}

/// Test: Missing Content-Type is a malformed request
#[tokio::test]
async fn test_missing_content_type_returns_400() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env
        .client
        .post(format!("{}/upload", env.base_url()))
        .body("raw bytes")
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// Test: Traversal in filenames stays inside the storage root
#[tokio::test]
async fn test_traversal_filename_is_contained() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let form = Form::new().part("f", file_part(&b"owned?"[..], "../../../../tmp/escape.sh"));
    let response = env.upload(form).await.expect("Request failed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        file_names(&env.stored_files()),
        vec!["0-escape-f.sh".to_string()]
    );
}

/// Test: Client disconnect mid-part fails the part, server keeps serving
#[tokio::test]
async fn test_client_disconnect_mid_part() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&mock_server)
        .await;

    let storage = tempfile::tempdir().unwrap();
    let mut config = E2ETestEnv::default_config(storage.path());
    config.notify.telegram = Some(TelegramConfig {
        bot_token: "123:e2e".into(),
        chat_id: "1".into(),
        api_base: mock_server.uri(),
        timeout_secs: 5,
        send_artifacts: false,
    });
    let env = E2ETestEnv::with_config(config, storage)
        .await
        .expect("Failed to create test env");

    let boundary = "disconnect-boundary";
    let head = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"f\"; filename=\"cut.bin\"\r\n\r\npartial-data",
        b = boundary
    );
    let request = format!(
        "POST /upload HTTP/1.1\r\nHost: {}\r\nContent-Type: multipart/form-data; boundary={}\r\nContent-Length: 100000\r\n\r\n{}",
        env.server_addr, boundary, head
    );

    let mut stream = tokio::net::TcpStream::connect(env.server_addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(stream);

    // The part failure is reported as a transport error
    let mut reported = false;
    for _ in 0..50 {
        let requests = mock_server.received_requests().await.unwrap_or_default();
        reported = requests.iter().any(|request| {
            String::from_utf8_lossy(&request.body).contains("Upload f of cut.bin failed: transport error")
        });
        if reported {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(reported, "transport failure was not reported");

    // The partial artifact is retained by default
    assert_eq!(file_names(&env.stored_files()), vec!["0-cut-f.bin".to_string()]);

    let form = Form::new().part("f", file_part(&b"ok"[..], "after.bin"));
    let response = env.upload(form).await.expect("Request failed");
    assert_eq!(response.status(), StatusCode::OK);
}
