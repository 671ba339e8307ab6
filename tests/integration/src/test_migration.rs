//! Schema-migration scenario: a database written before the bucket
//! tombstone column existed opens cleanly and its rows stay loadable.

#[cfg(test)]
mod tests {
    use opal_store::meta::MetaStore;

    #[test]
    fn test_should_migrate_database_without_deleted_column() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));

        // Write a database the way an old build would have: no `deleted`
        // column, no version columns.
        {
            let conn = rusqlite::Connection::open(dir.path().join("s3gw.db"))
                .unwrap_or_else(|e| panic!("open raw db failed: {e}"));
            conn.execute_batch(
                "CREATE TABLE users (user_id TEXT PRIMARY KEY NOT NULL);
                 CREATE TABLE buckets (
                     bucket_id TEXT PRIMARY KEY NOT NULL,
                     bucket_name TEXT NOT NULL,
                     owner_id TEXT NOT NULL,
                     FOREIGN KEY (owner_id) REFERENCES users (user_id)
                 );
                 INSERT INTO users (user_id) VALUES ('user1');
                 INSERT INTO buckets (bucket_id, bucket_name, owner_id)
                     VALUES ('b1-id', 'b1', 'user1');
                 INSERT INTO buckets (bucket_id, bucket_name, owner_id)
                     VALUES ('b2-id', 'b2', 'user1');",
            )
            .unwrap_or_else(|e| panic!("fixture setup failed: {e}"));
        }

        let store = MetaStore::open(dir.path()).unwrap_or_else(|e| panic!("open failed: {e}"));

        // All prior bucket rows load, with the tombstone defaulting to
        // false.
        let buckets = store
            .buckets()
            .list()
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        assert_eq!(buckets.len(), 2);
        for bucket in &buckets {
            assert!(!bucket.deleted);
        }

        // The migrated column is usable: tombstoning works on the old rows.
        store
            .buckets()
            .mark_deleted("b2-id")
            .unwrap_or_else(|e| panic!("mark_deleted failed: {e}"));
        let deleted = store
            .buckets()
            .list_deleted()
            .unwrap_or_else(|e| panic!("list_deleted failed: {e}"));
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].bucket_id, "b2-id");
    }

    #[test]
    fn test_should_reopen_migrated_database() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));

        {
            let store =
                MetaStore::open(dir.path()).unwrap_or_else(|e| panic!("first open failed: {e}"));
            store
                .users()
                .store(&opal_store::model::user::User::new("user1"))
                .unwrap_or_else(|e| panic!("store user failed: {e}"));
        }

        // Reconciliation is idempotent across reopens and data survives.
        let store =
            MetaStore::open(dir.path()).unwrap_or_else(|e| panic!("second open failed: {e}"));
        let user = store
            .users()
            .get("user1")
            .unwrap_or_else(|e| panic!("get failed: {e}"))
            .unwrap_or_else(|| panic!("user missing"));
        assert_eq!(user.version, 1);
    }
}
