mod helpers;

use base64::Engine;
use bytes::Bytes;
use futures::StreamExt;
use helpers::{token_from_url, TestStorage};
use std::time::Duration;
use stowage_storage::{
    util, Driver, DriverContext, ListOptions, LocalDriver, PutOptions, StorageError, TokenError,
};

#[tokio::test]
async fn test_put_then_get_returns_same_bytes_and_hash() {
    let storage = TestStorage::new();
    let driver = storage.driver("files").await;
    let content = Bytes::from_static(b"hello");

    let data = driver
        .put(content.clone(), "x.txt", &PutOptions::default())
        .await
        .unwrap();

    assert!(storage.file("files/x.txt").exists());
    assert_eq!(data.size, 5);
    assert_eq!(data.mime_type, "text/plain");
    assert_eq!(data.hash, util::content_hash(&content));
    assert!(driver.exists("x.txt").await.unwrap());
    assert_eq!(driver.get("x.txt").await.unwrap(), content);
    assert_eq!(driver.url("x.txt"), "https://cdn.example.com/files/x.txt");
}

#[tokio::test]
async fn test_stream_round_trip() {
    let storage = TestStorage::new();
    let driver = storage.driver("files").await;
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

    let reader = Box::pin(std::io::Cursor::new(payload.clone()));
    let data = driver
        .put_stream(reader, "blobs/big.bin", &PutOptions::default())
        .await
        .unwrap();
    assert_eq!(data.size, payload.len() as u64);
    assert_eq!(data.hash, util::content_hash(&payload));

    let mut stream = driver.get_stream("blobs/big.bin").await.unwrap();
    let mut read = Vec::new();
    while let Some(chunk) = stream.next().await {
        read.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(read, payload);
}

#[tokio::test]
async fn test_missing_paths() {
    let storage = TestStorage::new();
    let driver = storage.driver("files").await;

    assert!(!driver.exists("nope.txt").await.unwrap());
    assert!(matches!(driver.get("nope.txt").await, Err(StorageError::NotFound(_))));
    assert!(matches!(driver.get_info("nope.txt").await, Err(StorageError::NotFound(_))));
    assert!(matches!(driver.size("nope.txt").await, Err(StorageError::NotFound(_))));
    assert!(!driver.delete("nope.txt").await.unwrap());
}

#[tokio::test]
async fn test_copy_then_delete_behaves_like_move() {
    let storage = TestStorage::new();
    let driver = storage.driver("files").await;
    driver
        .put(Bytes::from_static(b"data"), "a.txt", &PutOptions::default())
        .await
        .unwrap();

    driver.copy("a.txt", "b.txt").await.unwrap();
    driver.delete("a.txt").await.unwrap();
    assert!(driver.exists("b.txt").await.unwrap());
    assert!(!driver.exists("a.txt").await.unwrap());

    let moved = driver.move_file("b.txt", "nested/c.txt").await.unwrap();
    assert_eq!(moved.path, "nested/c.txt");
    assert!(!driver.exists("b.txt").await.unwrap());
}

#[tokio::test]
async fn test_list_shallow_and_recursive() {
    let storage = TestStorage::new();
    let driver = storage.driver("files").await;
    for path in ["a/b.txt", "a/c/d.txt"] {
        driver
            .put(Bytes::from_static(b"x"), path, &PutOptions::default())
            .await
            .unwrap();
    }

    let shallow = driver.list("a/", &ListOptions::default()).await.unwrap();
    assert_eq!(shallow.len(), 2);
    let dirs: Vec<&str> = shallow
        .iter()
        .filter(|e| e.is_directory)
        .map(|e| e.path.as_str())
        .collect();
    let files: Vec<&str> = shallow
        .iter()
        .filter(|e| !e.is_directory)
        .map(|e| e.path.as_str())
        .collect();
    assert_eq!(dirs, vec!["a/c/"]);
    assert_eq!(files, vec!["a/b.txt"]);

    let recursive = driver.list("a/", &ListOptions::recursive()).await.unwrap();
    let paths: Vec<&str> = recursive.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["a/b.txt", "a/c/d.txt"]);
    assert!(recursive.iter().all(|e| !e.is_directory));
}

#[tokio::test]
async fn test_delete_many_reports_each_path() {
    let storage = TestStorage::new();
    let driver = storage.driver("files").await;
    driver
        .put(Bytes::from_static(b"x"), "a.txt", &PutOptions::default())
        .await
        .unwrap();

    let results = driver
        .delete_many(&["a.txt".to_string(), "missing.txt".to_string()])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    let a = results.iter().find(|r| r.path == "a.txt").unwrap();
    assert!(a.deleted);
    let missing = results.iter().find(|r| r.path == "missing.txt").unwrap();
    assert!(!missing.deleted);
    assert!(missing.error.is_some());
}

#[tokio::test]
async fn test_rejects_paths_outside_root() {
    let storage = TestStorage::new();
    let driver = storage.driver("files").await;
    tokio::fs::write(storage.file("outside.txt"), b"secret")
        .await
        .unwrap();

    assert!(matches!(
        driver.get("../outside.txt").await,
        Err(StorageError::InvalidKey(_))
    ));
    assert!(matches!(
        driver
            .put(Bytes::from_static(b"x"), "a/../../escape.txt", &PutOptions::default())
            .await,
        Err(StorageError::InvalidKey(_))
    ));
}

#[tokio::test]
async fn test_context_prefix_is_applied_once() {
    let storage = TestStorage::new();
    let driver = storage.driver("files").await;

    let returned = DriverContext::new()
        .with_prefix("tenant-42")
        .scope(async {
            let data = driver
                .put(Bytes::from_static(b"x"), "logo.png", &PutOptions::default())
                .await
                .unwrap();
            assert_eq!(driver.apply_prefix(&data.path), data.path);
            assert!(driver.exists(&data.path).await.unwrap());
            data.path
        })
        .await;

    assert_eq!(returned, "tenant-42/logo.png");
    assert!(storage.file("files/tenant-42/logo.png").exists());
}

#[tokio::test]
async fn test_temporary_url_lifecycle() {
    let storage = TestStorage::new();
    let driver = storage.driver("files").await;
    driver
        .put(Bytes::from_static(b"private"), "docs/a.pdf", &PutOptions::default())
        .await
        .unwrap();

    let url = driver
        .temporary_url("docs/a.pdf", Duration::from_secs(1))
        .await
        .unwrap();
    assert!(url.starts_with("https://app.example.com/temp/"));
    let token = token_from_url(&url);

    let file = driver
        .validate_temporary_token(token)
        .await
        .into_result()
        .unwrap();
    assert_eq!(file.path(), "docs/a.pdf");
    assert_eq!(file.buffer().await.unwrap(), Bytes::from_static(b"private"));

    let later = chrono::Utc::now().timestamp() + 2;
    let expired = driver.validate_temporary_token_at(token, later).await;
    assert_eq!(expired.error_code(), Some("expired"));
}

#[tokio::test]
async fn test_tampered_token_is_rejected() {
    let storage = TestStorage::new();
    let driver = storage.driver("files").await;
    driver
        .put(Bytes::from_static(b"x"), "a.txt", &PutOptions::default())
        .await
        .unwrap();
    let url = driver.temporary_url("a.txt", Duration::from_secs(60)).await.unwrap();
    let token = token_from_url(&url);

    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let mut payload: serde_json::Value =
        serde_json::from_slice(&engine.decode(token).unwrap()).unwrap();
    payload["path"] = serde_json::Value::String("b.txt".to_string());
    let forged = engine.encode(serde_json::to_vec(&payload).unwrap());

    let result = driver.validate_temporary_token(&forged).await;
    assert_eq!(result.error_code(), Some("invalid_signature"));

    // A changed character inside the signature fails the signature check.
    // Each replaced character is byte aligned and sets the high bit, so the
    // decoded byte is not valid UTF-8.
    let json = engine.decode(token).unwrap();
    let sig_start = json
        .windows(7)
        .position(|w| w == b"\"sig\":\"")
        .unwrap()
        + 7;
    let chars: Vec<char> = token.chars().collect();
    let mut checked = 0;
    for byte in (sig_start..sig_start + 64).filter(|b| b % 3 == 0) {
        let index = byte / 3 * 4;
        let mut mangled = chars.clone();
        mangled[index] = 'g';
        let mangled: String = mangled.into_iter().collect();

        let result = driver.validate_temporary_token(&mangled).await;
        assert_eq!(result.error_code(), Some("invalid_signature"), "index {}", index);
        checked += 1;
    }
    assert!(checked >= 20);

    // Breaking the JSON structure is an invalid token
    let mut chars = chars;
    chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
    let mangled: String = chars.into_iter().collect();
    let result = driver.validate_temporary_token(&mangled).await;
    assert_eq!(result.error_code(), Some("invalid_token"));
}

#[tokio::test]
async fn test_token_needs_secret() {
    let storage = TestStorage::new();
    let mut config = storage.local("files");
    config.secret = None;
    let driver = LocalDriver::new("unsigned", &config).await.unwrap();

    assert!(matches!(
        driver.temporary_url("a.txt", Duration::from_secs(60)).await,
        Err(StorageError::ConfigError(_))
    ));

    let signed = storage.driver("files").await;
    let url = signed.temporary_url("a.txt", Duration::from_secs(60)).await.unwrap();
    let result = driver.validate_temporary_token(token_from_url(&url)).await;
    assert!(matches!(result.into_result(), Err(TokenError::MissingKey)));
}
