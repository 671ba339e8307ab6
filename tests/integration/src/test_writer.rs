//! Atomic-writer scenarios: publication atomicity, cleanup of abandoned
//! writers, preconditions, and offset enforcement.

#[cfg(test)]
mod tests {
    use opal_store::StoreError;
    use opal_store::model::user::User;
    use opal_store::writer::CompleteParams;

    use crate::{TestStore, put_object};

    async fn store_with_bucket() -> (TestStore, String) {
        let ts = TestStore::open().await;
        ts.store
            .store_user(&User::new("user1"))
            .unwrap_or_else(|e| panic!("store user failed: {e}"));
        let bucket_id = ts
            .store
            .bucket_create("b1", "user1", false)
            .unwrap_or_else(|e| panic!("create bucket failed: {e}"))
            .bucket
            .bucket_id;
        (ts, bucket_id)
    }

    #[tokio::test]
    async fn test_should_publish_committed_version_with_matching_file() {
        let (ts, bucket_id) = store_with_bucket().await;

        let committed = put_object(&ts.store, &bucket_id, "k", b"0123456789").await;

        // The committed row's file exists with exactly `size` bytes.
        let data = ts
            .store
            .object_read(&bucket_id, "k", None)
            .unwrap_or_else(|e| panic!("read failed: {e}"));
        let on_disk =
            std::fs::metadata(&data.path).unwrap_or_else(|e| panic!("stat failed: {e}"));
        assert_eq!(on_disk.len(), committed.size);
        assert_eq!(committed.size, 10);
    }

    #[tokio::test]
    async fn test_should_clean_up_dropped_writer() {
        let (ts, bucket_id) = store_with_bucket().await;

        let mut writer = ts
            .store
            .writer_open_atomic(&bucket_id, "k")
            .await
            .unwrap_or_else(|e| panic!("writer open failed: {e}"));
        writer
            .process(&[7_u8; 100], 0)
            .await
            .unwrap_or_else(|e| panic!("process failed: {e}"));
        let object_uuid = writer.object_uuid();
        drop(writer);

        // The object row was created during prepare and survives.
        assert!(
            ts.store
                .metadata()
                .objects()
                .get(object_uuid)
                .unwrap_or_else(|e| panic!("get object failed: {e}"))
                .is_some()
        );
        // No committed version, and no content file remains.
        assert!(
            ts.store
                .metadata()
                .versions()
                .get_last_committed(object_uuid)
                .unwrap_or_else(|e| panic!("get_last_committed failed: {e}"))
                .is_none()
        );
        assert_eq!(ts.content_file_count(), 0);

        let read = ts.store.object_read(&bucket_id, "k", None);
        assert!(matches!(read, Err(StoreError::ObjectNotFound { .. })));
    }

    #[tokio::test]
    async fn test_should_cancel_on_if_match_mismatch() {
        let (ts, bucket_id) = store_with_bucket().await;

        let mut writer = ts
            .store
            .writer_open_atomic(&bucket_id, "k")
            .await
            .unwrap_or_else(|e| panic!("first writer open failed: {e}"));
        writer
            .process(b"first", 0)
            .await
            .unwrap_or_else(|e| panic!("process failed: {e}"));
        writer
            .complete(
                CompleteParams::builder()
                    .accounted_size(5)
                    .etag("\"E1\"".to_owned())
                    .build(),
            )
            .await
            .unwrap_or_else(|e| panic!("first complete failed: {e}"));

        let mut writer = ts
            .store
            .writer_open_atomic(&bucket_id, "k")
            .await
            .unwrap_or_else(|e| panic!("second writer open failed: {e}"));
        writer
            .process(b"second", 0)
            .await
            .unwrap_or_else(|e| panic!("process failed: {e}"));
        let completion = writer
            .complete(
                CompleteParams::builder()
                    .accounted_size(6)
                    .etag("\"E2\"".to_owned())
                    .if_match(Some("\"E0\"".to_owned()))
                    .build(),
            )
            .await
            .unwrap_or_else(|e| panic!("second complete failed: {e}"));

        assert!(completion.is_canceled());

        // The latest version is untouched and only one committed row
        // exists.
        let data = ts
            .store
            .object_read(&bucket_id, "k", None)
            .unwrap_or_else(|e| panic!("read failed: {e}"));
        assert_eq!(data.version.etag, "\"E1\"");
        assert_eq!(ts.content_file_count(), 1);

        let versions = ts
            .store
            .metadata()
            .versions()
            .list_for_object(data.object.uuid)
            .unwrap_or_else(|e| panic!("list versions failed: {e}"));
        let committed = versions.iter().filter(|v| v.is_committed()).count();
        assert_eq!(committed, 1);
    }

    #[tokio::test]
    async fn test_should_cancel_on_if_nomatch_star_when_object_exists() {
        let (ts, bucket_id) = store_with_bucket().await;
        put_object(&ts.store, &bucket_id, "k", b"existing").await;

        let mut writer = ts
            .store
            .writer_open_atomic(&bucket_id, "k")
            .await
            .unwrap_or_else(|e| panic!("writer open failed: {e}"));
        writer
            .process(b"new", 0)
            .await
            .unwrap_or_else(|e| panic!("process failed: {e}"));
        let completion = writer
            .complete(
                CompleteParams::builder()
                    .accounted_size(3)
                    .etag("\"new\"".to_owned())
                    .if_nomatch(Some("*".to_owned()))
                    .build(),
            )
            .await
            .unwrap_or_else(|e| panic!("complete failed: {e}"));
        assert!(completion.is_canceled());
    }

    #[tokio::test]
    async fn test_should_reject_non_monotonic_offsets() {
        let (ts, bucket_id) = store_with_bucket().await;

        let mut writer = ts
            .store
            .writer_open_atomic(&bucket_id, "k")
            .await
            .unwrap_or_else(|e| panic!("writer open failed: {e}"));
        writer
            .process(b"0123", 0)
            .await
            .unwrap_or_else(|e| panic!("process failed: {e}"));

        // Rewind and hole both fail without writing anything.
        assert!(matches!(
            writer.process(b"xx", 2).await,
            Err(StoreError::InvalidArgument { .. })
        ));
        assert!(matches!(
            writer.process(b"xx", 10).await,
            Err(StoreError::InvalidArgument { .. })
        ));
        assert_eq!(writer.bytes_written(), 4);

        // The writer remains usable at the correct offset.
        writer
            .process(b"45", 4)
            .await
            .unwrap_or_else(|e| panic!("resumed process failed: {e}"));
        let completion = writer
            .complete(
                CompleteParams::builder()
                    .accounted_size(6)
                    .etag("\"E\"".to_owned())
                    .build(),
            )
            .await
            .unwrap_or_else(|e| panic!("complete failed: {e}"));
        assert!(!completion.is_canceled());
    }

    #[tokio::test]
    async fn test_should_keep_latest_pointer_on_concurrent_commits() {
        let (ts, bucket_id) = store_with_bucket().await;

        let mut first = ts
            .store
            .writer_open_atomic(&bucket_id, "k")
            .await
            .unwrap_or_else(|e| panic!("open first failed: {e}"));
        let mut second = ts
            .store
            .writer_open_atomic(&bucket_id, "k")
            .await
            .unwrap_or_else(|e| panic!("open second failed: {e}"));

        first
            .process(b"aaaa", 0)
            .await
            .unwrap_or_else(|e| panic!("process first failed: {e}"));
        second
            .process(b"bbbb", 0)
            .await
            .unwrap_or_else(|e| panic!("process second failed: {e}"));

        // Prepared first, committed last: `first` wins the latest pointer.
        second
            .complete(
                CompleteParams::builder()
                    .accounted_size(4)
                    .etag("\"b\"".to_owned())
                    .build(),
            )
            .await
            .unwrap_or_else(|e| panic!("complete second failed: {e}"));
        first
            .complete(
                CompleteParams::builder()
                    .accounted_size(4)
                    .etag("\"a\"".to_owned())
                    .build(),
            )
            .await
            .unwrap_or_else(|e| panic!("complete first failed: {e}"));

        let data = ts
            .store
            .object_read(&bucket_id, "k", None)
            .unwrap_or_else(|e| panic!("read failed: {e}"));
        assert_eq!(data.version.etag, "\"a\"");
        // Both versions exist on disk under distinct paths.
        assert_eq!(ts.content_file_count(), 2);
    }
}
