use dog_chunks::{
    bytes_stream, collect_stream, AddChunkRequest, BlobStore, ChunkError, ChunkFile, ChunkManager,
    ChunkSettings, Disks, LocalStore, MergeDispatch, StoreOptions, Visibility,
};

/// Test factory functions
fn create_store() -> (tempfile::TempDir, LocalStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path());
    (dir, store)
}

/// Writes land atomically and are listed without temp files
#[tokio::test]
async fn test_write_list_and_read_back() {
    let (_dir, store) = create_store();

    let written = store
        .write_stream("chunks/a/0_a.bin", bytes_stream("hello"), &StoreOptions::new())
        .await
        .unwrap();
    assert_eq!(written, 5);

    assert_eq!(store.list_files("chunks/a").await.unwrap(), vec!["chunks/a/0_a.bin".to_string()]);
    assert_eq!(store.list_directories("chunks").await.unwrap(), vec!["chunks/a".to_string()]);
    assert_eq!(store.size("chunks/a/0_a.bin").await.unwrap(), 5);

    let body = collect_stream(store.read_stream("chunks/a/0_a.bin").await.unwrap())
        .await
        .unwrap();
    assert_eq!(body, "hello");
}

/// Missing files surface as NotFound, traversal as Invalid
#[tokio::test]
async fn test_errors_are_classified() {
    let (_dir, store) = create_store();

    assert!(matches!(store.size("nope.bin").await, Err(ChunkError::NotFound { .. })));
    assert!(matches!(store.delete("nope.bin").await, Err(ChunkError::NotFound { .. })));
    assert!(matches!(store.exists("../escape").await, Err(ChunkError::Invalid { .. })));
    assert!(store.delete_directory("").await.is_err());
}

/// Native concatenation joins sources in the given order
#[tokio::test]
async fn test_concatenate_in_order() {
    let (_dir, store) = create_store();
    for (path, body) in [("s/0_s.bin", "ab"), ("s/1_s.bin", "cd"), ("s/2_s.bin", "e")] {
        store.write_stream(path, bytes_stream(body), &StoreOptions::new()).await.unwrap();
    }

    store
        .concatenate(
            "out/s.bin",
            &["s/0_s.bin".to_string(), "s/1_s.bin".to_string(), "s/2_s.bin".to_string()],
        )
        .await
        .unwrap();

    let body = collect_stream(store.read_stream("out/s.bin").await.unwrap()).await.unwrap();
    assert_eq!(body, "abcde");
}

/// Visibility maps to file permissions
#[cfg(unix)]
#[tokio::test]
async fn test_visibility_sets_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let (dir, store) = create_store();
    store
        .write_stream(
            "secret.bin",
            bytes_stream("x"),
            &StoreOptions::new().with_visibility(Visibility::Private),
        )
        .await
        .unwrap();

    let mode = std::fs::metadata(dir.path().join("secret.bin")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    store.set_visibility("secret.bin", Visibility::Public).await.unwrap();
    let mode = std::fs::metadata(dir.path().join("secret.bin")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o644);
}

/// Full upload on disk: chunks, merge, cleanup
#[tokio::test]
async fn test_upload_end_to_end_on_disk() {
    let (dir, store) = create_store();
    let settings = ChunkSettings::new().with_merge_folder("uploads");
    let manager = ChunkManager::new(settings, Disks::new(store)).unwrap();

    let parts = ["0123", "4567", "89"];
    let mut last = None;
    for (index, part) in parts.iter().enumerate() {
        let request = AddChunkRequest::new(
            index as i64,
            ChunkFile::new("Data Dump.csv", bytes_stream(*part)),
            4,
            10,
        );
        last = manager.handle_upload(request, None).await.unwrap().merge;
    }

    assert_eq!(
        last,
        Some(MergeDispatch::Completed {
            destination: "uploads/Data Dump.csv".to_string()
        })
    );
    let merged = std::fs::read_to_string(dir.path().join("uploads/Data Dump.csv")).unwrap();
    assert_eq!(merged, "0123456789");
    assert!(!dir.path().join("chunks/data-dump").exists());
    assert!(manager.chunk_folders().await.unwrap().is_empty());
}
