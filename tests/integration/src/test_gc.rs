//! Garbage-collection scenarios: tombstoned buckets are reclaimed fully or
//! under a per-tick budget, and reclamation is idempotent and safe.

#[cfg(test)]
mod tests {
    use opal_store::model::user::User;

    use crate::{TestStore, put_object};

    /// `user1` owning buckets `b1` (one object, three versions) and `b2`
    /// (one object, two versions).
    struct Scenario {
        ts: TestStore,
        b1_id: String,
        b2_id: String,
    }

    async fn build_scenario(gc_max_objs: usize) -> Scenario {
        let ts = TestStore::open_with_gc_budget(gc_max_objs).await;
        ts.store
            .store_user(&User::new("user1"))
            .unwrap_or_else(|e| panic!("store user failed: {e}"));

        let b1_id = ts
            .store
            .bucket_create("b1", "user1", false)
            .unwrap_or_else(|e| panic!("create b1 failed: {e}"))
            .bucket
            .bucket_id;
        let b2_id = ts
            .store
            .bucket_create("b2", "user1", false)
            .unwrap_or_else(|e| panic!("create b2 failed: {e}"))
            .bucket
            .bucket_id;

        for body in [b"version-1".as_slice(), b"version-2", b"version-3"] {
            put_object(&ts.store, &b1_id, "obj_1", body).await;
        }
        for body in [b"version-4".as_slice(), b"version-5"] {
            put_object(&ts.store, &b2_id, "obj_2", body).await;
        }

        Scenario { ts, b1_id, b2_id }
    }

    fn object_count(ts: &TestStore, bucket_id: &str) -> usize {
        ts.store
            .metadata()
            .objects()
            .list_for_bucket(bucket_id)
            .unwrap_or_else(|e| panic!("list objects failed: {e}"))
            .len()
    }

    fn version_count(ts: &TestStore) -> usize {
        ts.store
            .metadata()
            .versions()
            .list_ids(true)
            .unwrap_or_else(|e| panic!("list version ids failed: {e}"))
            .len()
    }

    fn bucket_row_exists(ts: &TestStore, bucket_id: &str) -> bool {
        ts.store
            .metadata()
            .buckets()
            .get(bucket_id)
            .unwrap_or_else(|e| panic!("get bucket failed: {e}"))
            .is_some()
    }

    #[tokio::test]
    async fn test_should_reclaim_deleted_bucket() {
        let scenario = build_scenario(usize::MAX).await;
        let ts = &scenario.ts;

        // Five version files plus the database.
        assert_eq!(ts.content_file_count(), 5);
        assert!(ts.database_file_exists());
        assert_eq!(version_count(ts), 5);

        // Tombstoning b2 appends one delete marker for its single object.
        ts.store
            .bucket_delete(&scenario.b2_id)
            .unwrap_or_else(|e| panic!("bucket_delete failed: {e}"));
        assert_eq!(ts.content_file_count(), 5);
        assert_eq!(version_count(ts), 6);

        let removed = ts
            .store
            .gc()
            .process()
            .await
            .unwrap_or_else(|e| panic!("gc process failed: {e}"));
        assert_eq!(removed, 3);

        // Only b1's content remains.
        assert_eq!(ts.content_file_count(), 3);
        assert!(ts.database_file_exists());
        assert!(!bucket_row_exists(ts, &scenario.b2_id));
        assert_eq!(object_count(ts, &scenario.b2_id), 0);
        assert!(bucket_row_exists(ts, &scenario.b1_id));
        assert_eq!(object_count(ts, &scenario.b1_id), 1);

        // b1 is still fully readable.
        let data = ts
            .store
            .object_read(&scenario.b1_id, "obj_1", None)
            .unwrap_or_else(|e| panic!("read obj_1 failed: {e}"));
        assert_eq!(data.version.size, 9);

        // Deleting b1 as well leaves only the database.
        ts.store
            .bucket_delete(&scenario.b1_id)
            .unwrap_or_else(|e| panic!("delete b1 failed: {e}"));
        ts.store
            .gc()
            .process()
            .await
            .unwrap_or_else(|e| panic!("second gc process failed: {e}"));
        assert_eq!(ts.content_file_count(), 0);
        assert!(ts.database_file_exists());
        assert!(!bucket_row_exists(ts, &scenario.b1_id));
    }

    #[tokio::test]
    async fn test_should_rate_limit_removals_per_iteration() {
        let scenario = build_scenario(1).await;
        let ts = &scenario.ts;

        ts.store
            .bucket_delete(&scenario.b2_id)
            .unwrap_or_else(|e| panic!("bucket_delete failed: {e}"));
        assert_eq!(ts.content_file_count(), 5);

        // One version removal per tick: first the two content-bearing
        // versions, then the delete marker, then the empty-object sweep.
        ts.store
            .gc()
            .process()
            .await
            .unwrap_or_else(|e| panic!("gc #1 failed: {e}"));
        assert_eq!(ts.content_file_count(), 4);
        assert_eq!(object_count(ts, &scenario.b2_id), 1);
        assert_eq!(object_count(ts, &scenario.b1_id), 1);

        ts.store
            .gc()
            .process()
            .await
            .unwrap_or_else(|e| panic!("gc #2 failed: {e}"));
        assert_eq!(ts.content_file_count(), 3);
        assert_eq!(object_count(ts, &scenario.b2_id), 1);

        ts.store
            .gc()
            .process()
            .await
            .unwrap_or_else(|e| panic!("gc #3 failed: {e}"));
        assert_eq!(ts.content_file_count(), 3);
        assert_eq!(object_count(ts, &scenario.b2_id), 1);

        ts.store
            .gc()
            .process()
            .await
            .unwrap_or_else(|e| panic!("gc #4 failed: {e}"));
        assert_eq!(ts.content_file_count(), 3);
        assert_eq!(object_count(ts, &scenario.b2_id), 0);
        assert!(!bucket_row_exists(ts, &scenario.b2_id));
        assert_eq!(object_count(ts, &scenario.b1_id), 1);
    }

    #[tokio::test]
    async fn test_should_be_noop_after_stable_state() {
        let scenario = build_scenario(usize::MAX).await;
        let ts = &scenario.ts;

        ts.store
            .bucket_delete(&scenario.b2_id)
            .unwrap_or_else(|e| panic!("bucket_delete failed: {e}"));
        ts.store
            .gc()
            .process()
            .await
            .unwrap_or_else(|e| panic!("gc process failed: {e}"));

        let files = ts.content_file_count();
        let versions = version_count(ts);
        for i in 0..5 {
            let removed = ts
                .store
                .gc()
                .process()
                .await
                .unwrap_or_else(|e| panic!("gc repeat #{i} failed: {e}"));
            assert_eq!(removed, 0);
        }
        assert_eq!(ts.content_file_count(), files);
        assert_eq!(version_count(ts), versions);
    }

    #[tokio::test]
    async fn test_should_never_touch_live_buckets() {
        let scenario = build_scenario(usize::MAX).await;
        let ts = &scenario.ts;

        // No tombstones at all: the collector must not remove anything,
        // whatever the version states are.
        let removed = ts
            .store
            .gc()
            .process()
            .await
            .unwrap_or_else(|e| panic!("gc process failed: {e}"));
        assert_eq!(removed, 0);
        assert_eq!(ts.content_file_count(), 5);
        assert_eq!(version_count(ts), 5);

        // Both objects remain readable.
        for (bucket_id, key) in [
            (&scenario.b1_id, "obj_1"),
            (&scenario.b2_id, "obj_2"),
        ] {
            ts.store
                .object_read(bucket_id, key, None)
                .unwrap_or_else(|e| panic!("read {key} failed: {e}"));
        }
    }
}
