//! Integration tests for the Opal storage backend.
//!
//! Each test opens a [`Store`] over its own temporary data directory, with
//! the garbage collector suspended so reclamation only happens when a test
//! steps it explicitly.

use std::path::Path;
use std::sync::Once;

use tempfile::TempDir;

use opal_store::model::object::VersionedObject;
use opal_store::writer::CompleteParams;
use opal_store::{Store, StoreConfig};

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// A store over a temporary data directory, garbage collector suspended.
pub struct TestStore {
    /// The temporary data directory; removed on drop.
    pub dir: TempDir,
    /// The store under test.
    pub store: Store,
}

impl TestStore {
    /// Open a test store with an unbounded per-tick GC budget.
    pub async fn open() -> Self {
        Self::open_with_gc_budget(usize::MAX).await
    }

    /// Open a test store with a specific `gc_max_objs`.
    pub async fn open_with_gc_budget(gc_max_objs: usize) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
        let config = StoreConfig::builder()
            .data_path(dir.path())
            .gc_processor_period(3600)
            .gc_max_objs(gc_max_objs)
            .build();
        let store = Store::open(config)
            .await
            .unwrap_or_else(|e| panic!("store open failed: {e}"));
        store.gc().suspend();
        Self { dir, store }
    }

    /// Count content files under the data path, ignoring the metadata
    /// database and its WAL siblings.
    pub fn content_file_count(&self) -> usize {
        count_content_files(self.dir.path())
    }

    /// Whether the metadata database file exists.
    pub fn database_file_exists(&self) -> bool {
        self.dir.path().join("s3gw.db").exists()
    }
}

/// Recursively count regular files under `root` whose names do not start
/// with `s3gw.db`.
pub fn count_content_files(root: &Path) -> usize {
    let mut count = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file()
                && !entry.file_name().to_string_lossy().starts_with("s3gw.db")
            {
                count += 1;
            }
        }
    }
    count
}

/// Write one committed version of `(bucket, key)` through the atomic
/// writer and return the published row.
pub async fn put_object(
    store: &Store,
    bucket_id: &str,
    key: &str,
    body: &[u8],
) -> VersionedObject {
    let mut writer = store
        .writer_open_atomic(bucket_id, key)
        .await
        .unwrap_or_else(|e| panic!("writer open failed: {e}"));
    writer
        .process(body, 0)
        .await
        .unwrap_or_else(|e| panic!("process failed: {e}"));
    let etag = opal_store::checksums::quoted_etag(&opal_store::checksums::compute_md5(body));
    let completion = writer
        .complete(
            CompleteParams::builder()
                .accounted_size(body.len() as u64)
                .etag(etag)
                .build(),
        )
        .await
        .unwrap_or_else(|e| panic!("complete failed: {e}"));
    completion
        .committed()
        .unwrap_or_else(|| panic!("expected committed version"))
        .clone()
}

mod test_catalog;
mod test_gc;
mod test_migration;
mod test_writer;
