//! User/bucket catalog scenarios: optimistic concurrency and key lookups.

#[cfg(test)]
mod tests {
    use opal_store::StoreError;
    use opal_store::model::user::User;

    use crate::TestStore;

    #[tokio::test]
    async fn test_should_conflict_on_stale_bucket_store() {
        let ts = TestStore::open().await;
        ts.store
            .store_user(&User::new("user1"))
            .unwrap_or_else(|e| panic!("store user failed: {e}"));
        let bucket = ts
            .store
            .bucket_create("b", "user1", false)
            .unwrap_or_else(|e| panic!("create failed: {e}"))
            .bucket;

        // Two handles loaded at the same version.
        let handle_a = bucket.clone();
        let handle_b = bucket;

        let mut updated_a = handle_a;
        updated_a.bucket_attrs = Some(vec![1]);
        let stored_a = ts
            .store
            .store_bucket(&updated_a)
            .unwrap_or_else(|e| panic!("store A failed: {e}"));
        assert_eq!(stored_a.version, updated_a.version + 1);

        // B still carries the stale read version: conflict, no mutation.
        let mut updated_b = handle_b;
        updated_b.bucket_attrs = Some(vec![2]);
        let result = ts.store.store_bucket(&updated_b);
        assert!(
            matches!(result, Err(StoreError::Conflict { entity: "bucket", .. })),
            "expected conflict, got {result:?}"
        );

        let current = ts
            .store
            .metadata()
            .buckets()
            .get(&stored_a.bucket_id)
            .unwrap_or_else(|e| panic!("get failed: {e}"))
            .unwrap_or_else(|| panic!("bucket missing"));
        assert_eq!(current.bucket_attrs, Some(vec![1]));
        assert_eq!(current.version, stored_a.version);
    }

    #[tokio::test]
    async fn test_should_conflict_on_stale_user_store() {
        let ts = TestStore::open().await;

        let stored = ts
            .store
            .store_user(&User::new("user1"))
            .unwrap_or_else(|e| panic!("first store failed: {e}"));
        assert_eq!(stored.version, 1);

        // Two writers read the row at version 1; exactly one succeeds.
        let first = ts.store.store_user(&stored);
        let second = ts.store.store_user(&stored);
        assert!(first.is_ok());
        assert!(
            matches!(second, Err(StoreError::Conflict { entity: "user", .. })),
            "expected conflict, got {second:?}"
        );
    }

    #[tokio::test]
    async fn test_should_resolve_user_by_access_key() {
        let ts = TestStore::open().await;
        let mut user = User::new("user1");
        user.key_ids = vec!["AKIAEXAMPLE".to_owned()];
        ts.store
            .store_user(&user)
            .unwrap_or_else(|e| panic!("store failed: {e}"));

        let found = ts
            .store
            .get_user_by_access_key("AKIAEXAMPLE")
            .unwrap_or_else(|e| panic!("lookup failed: {e}"));
        assert_eq!(found.user_id, "user1");

        let missing = ts.store.get_user_by_access_key("AKIANOPE");
        assert!(matches!(missing, Err(StoreError::UserNotFound { .. })));
    }

    #[tokio::test]
    async fn test_should_remove_user() {
        let ts = TestStore::open().await;
        ts.store
            .store_user(&User::new("user1"))
            .unwrap_or_else(|e| panic!("store failed: {e}"));

        ts.store
            .remove_user("user1")
            .unwrap_or_else(|e| panic!("remove failed: {e}"));
        assert!(matches!(
            ts.store.get_user("user1"),
            Err(StoreError::UserNotFound { .. })
        ));
        assert!(matches!(
            ts.store.remove_user("user1"),
            Err(StoreError::UserNotFound { .. })
        ));
    }
}
