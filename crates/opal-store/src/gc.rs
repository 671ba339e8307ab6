//! Background reclamation of tombstoned buckets.
//!
//! The collector scans buckets marked `deleted`, removes each of their
//! versions (content file first, then the metadata row), then sweeps up
//! empty object rows and finally the bucket row. At most
//! [`gc_max_objs`](crate::StoreConfig::gc_max_objs) version removals happen
//! per iteration so foreground traffic keeps making progress; the next
//! iteration simply resumes where this one stopped.
//!
//! Every step is idempotent. Content is removed before its metadata row: a
//! crash between the two leaves a row whose file is already gone, which the
//! next iteration tolerates and finishes off.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::StoreConfig;
use crate::content::ContentStore;
use crate::error::StoreResult;
use crate::meta::MetaStore;

/// The scheduled garbage collector.
pub struct GarbageCollector {
    meta: Arc<MetaStore>,
    content: Arc<ContentStore>,
    period: Duration,
    max_objs: usize,
    suspended: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("period", &self.period)
            .field("max_objs", &self.max_objs)
            .field("suspended", &self.is_suspended())
            .finish_non_exhaustive()
    }
}

impl GarbageCollector {
    /// Create a collector over the given stores.
    pub(crate) fn new(
        meta: Arc<MetaStore>,
        content: Arc<ContentStore>,
        config: &StoreConfig,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            meta,
            content,
            period: config.gc_period(),
            max_objs: config.gc_max_objs,
            suspended: AtomicBool::new(false),
            shutdown,
        })
    }

    /// Start the scheduled loop. Ticks are skipped while suspended.
    pub(crate) fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let gc = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + gc.period;
            let mut ticker = tokio::time::interval_at(start, gc.period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if gc.is_suspended() {
                            continue;
                        }
                        match gc.process().await {
                            Ok(removed) if removed > 0 => {
                                debug!(removed, "garbage collection iteration finished");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = %e, "garbage collection iteration failed");
                            }
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// Halt scheduled iterations. [`process`](Self::process) may still be
    /// called manually to step the collector.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
        debug!("garbage collector suspended");
    }

    /// Resume scheduled iterations.
    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
        debug!("garbage collector resumed");
    }

    /// Whether scheduled iterations are currently suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Stop the scheduled loop; a running iteration stops between removals.
    pub(crate) fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run one reclamation iteration and return the number of version
    /// removals performed.
    ///
    /// A removal is one version's content file plus its metadata row; at
    /// most `max_objs` of them happen per call. Object and bucket rows
    /// swept up along the way do not count against the budget. Errors on
    /// individual items are logged and skipped.
    pub async fn process(&self) -> StoreResult<usize> {
        let mut removed = 0_usize;

        for bucket in self.meta.buckets().list_deleted()? {
            let mut objects_left = false;

            for object in self.meta.objects().list_for_bucket(&bucket.bucket_id)? {
                // Oldest version first.
                for version in self.meta.versions().list_for_object(object.uuid)? {
                    if *self.shutdown.borrow() {
                        return Ok(removed);
                    }

                    let path = self.content.version_path(object.uuid, &version.version_id);
                    // Content before metadata; a missing file is fine.
                    if let Err(e) = self.content.remove(&path).await {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "skipping version, content removal failed"
                        );
                        objects_left = true;
                        continue;
                    }
                    self.meta.versions().remove(version.id)?;
                    removed += 1;
                    if removed >= self.max_objs {
                        return Ok(removed);
                    }
                }

                if self.meta.versions().list_for_object(object.uuid)?.is_empty() {
                    self.meta.objects().remove(object.uuid)?;
                    debug!(object = %object.uuid, "reclaimed object row");
                } else {
                    objects_left = true;
                }
            }

            if !objects_left
                && self
                    .meta
                    .objects()
                    .list_for_bucket(&bucket.bucket_id)?
                    .is_empty()
            {
                self.meta.buckets().remove(&bucket.bucket_id)?;
                debug!(bucket = %bucket.bucket_id, "reclaimed bucket row");
            }
        }

        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bucket::Bucket;
    use crate::model::object::{ObjectState, VersionedObject};
    use crate::model::user::User;

    struct Fixture {
        _dir: tempfile::TempDir,
        meta: Arc<MetaStore>,
        content: Arc<ContentStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
        let meta =
            Arc::new(MetaStore::open(dir.path()).unwrap_or_else(|e| panic!("open failed: {e}")));
        meta.users()
            .store(&User::new("user1"))
            .unwrap_or_else(|e| panic!("store user failed: {e}"));
        let content = Arc::new(ContentStore::new(dir.path()));
        Fixture {
            _dir: dir,
            meta,
            content,
        }
    }

    fn collector(fx: &Fixture, max_objs: usize) -> Arc<GarbageCollector> {
        let config = StoreConfig::builder()
            .data_path(fx.content.root())
            .gc_max_objs(max_objs)
            .build();
        GarbageCollector::new(Arc::clone(&fx.meta), Arc::clone(&fx.content), &config)
    }

    async fn committed_version(fx: &Fixture, object_uuid: uuid::Uuid, version_id: &str) {
        let path = fx.content.version_path(object_uuid, version_id);
        let mut handle = fx
            .content
            .open_for_append(&path)
            .await
            .unwrap_or_else(|e| panic!("open failed: {e}"));
        handle
            .write_at(0, b"content")
            .await
            .unwrap_or_else(|e| panic!("write failed: {e}"));

        let mut version = VersionedObject::open(object_uuid, version_id);
        version.object_state = ObjectState::Committed;
        version.commit_time = Some(chrono::Utc::now());
        version.size = 7;
        fx.meta
            .versions()
            .insert(&version)
            .unwrap_or_else(|e| panic!("insert version failed: {e}"));
    }

    #[tokio::test]
    async fn test_should_do_nothing_without_tombstones() {
        let fx = fixture();
        fx.meta
            .buckets()
            .store(&Bucket::new("b1-id", "b1", "user1"))
            .unwrap_or_else(|e| panic!("store bucket failed: {e}"));
        let object = fx
            .meta
            .objects()
            .get_or_create("b1-id", "obj")
            .unwrap_or_else(|e| panic!("create object failed: {e}"));
        committed_version(&fx, object.uuid, "1").await;

        let gc = collector(&fx, usize::MAX);
        let removed = gc
            .process()
            .await
            .unwrap_or_else(|e| panic!("process failed: {e}"));
        assert_eq!(removed, 0);

        // Live data is untouched.
        assert_eq!(
            fx.meta
                .versions()
                .list_ids(true)
                .unwrap_or_else(|e| panic!("list_ids failed: {e}"))
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_should_reclaim_tombstoned_bucket_completely() {
        let fx = fixture();
        fx.meta
            .buckets()
            .store(&Bucket::new("b1-id", "b1", "user1"))
            .unwrap_or_else(|e| panic!("store bucket failed: {e}"));
        let object = fx
            .meta
            .objects()
            .get_or_create("b1-id", "obj")
            .unwrap_or_else(|e| panic!("create object failed: {e}"));
        committed_version(&fx, object.uuid, "1").await;
        committed_version(&fx, object.uuid, "2").await;

        fx.meta
            .buckets()
            .mark_deleted("b1-id")
            .unwrap_or_else(|e| panic!("mark_deleted failed: {e}"));

        let gc = collector(&fx, usize::MAX);
        let removed = gc
            .process()
            .await
            .unwrap_or_else(|e| panic!("process failed: {e}"));
        // 2 regular versions + 1 delete marker.
        assert_eq!(removed, 3);

        assert!(
            fx.meta
                .objects()
                .get(object.uuid)
                .unwrap_or_else(|e| panic!("get object failed: {e}"))
                .is_none()
        );
        assert!(
            fx.meta
                .buckets()
                .get("b1-id")
                .unwrap_or_else(|e| panic!("get bucket failed: {e}"))
                .is_none()
        );
        assert!(
            fx.content
                .list_regular_files()
                .await
                .unwrap_or_else(|e| panic!("list files failed: {e}"))
                .iter()
                .all(|p| p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("s3gw.db")))
        );
    }

    #[tokio::test]
    async fn test_should_respect_per_iteration_budget() {
        let fx = fixture();
        fx.meta
            .buckets()
            .store(&Bucket::new("b1-id", "b1", "user1"))
            .unwrap_or_else(|e| panic!("store bucket failed: {e}"));
        let object = fx
            .meta
            .objects()
            .get_or_create("b1-id", "obj")
            .unwrap_or_else(|e| panic!("create object failed: {e}"));
        committed_version(&fx, object.uuid, "1").await;
        committed_version(&fx, object.uuid, "2").await;
        fx.meta
            .buckets()
            .mark_deleted("b1-id")
            .unwrap_or_else(|e| panic!("mark_deleted failed: {e}"));

        let gc = collector(&fx, 1);

        // One removal per step; object and bucket survive until their
        // versions are gone.
        for expected_remaining in [2_usize, 1, 0] {
            let removed = gc
                .process()
                .await
                .unwrap_or_else(|e| panic!("process failed: {e}"));
            assert_eq!(removed, 1);
            assert_eq!(
                fx.meta
                    .versions()
                    .list_ids(true)
                    .unwrap_or_else(|e| panic!("list_ids failed: {e}"))
                    .len(),
                expected_remaining
            );
        }

        // Final step sweeps the empty object and bucket rows.
        let removed = gc
            .process()
            .await
            .unwrap_or_else(|e| panic!("final process failed: {e}"));
        assert_eq!(removed, 0);
        assert!(
            fx.meta
                .buckets()
                .get("b1-id")
                .unwrap_or_else(|e| panic!("get bucket failed: {e}"))
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_should_be_idempotent_after_stable_state() {
        let fx = fixture();
        fx.meta
            .buckets()
            .store(&Bucket::new("b1-id", "b1", "user1"))
            .unwrap_or_else(|e| panic!("store bucket failed: {e}"));
        let object = fx
            .meta
            .objects()
            .get_or_create("b1-id", "obj")
            .unwrap_or_else(|e| panic!("create object failed: {e}"));
        committed_version(&fx, object.uuid, "1").await;
        fx.meta
            .buckets()
            .mark_deleted("b1-id")
            .unwrap_or_else(|e| panic!("mark_deleted failed: {e}"));

        let gc = collector(&fx, usize::MAX);
        gc.process()
            .await
            .unwrap_or_else(|e| panic!("process failed: {e}"));

        for _ in 0..5 {
            let removed = gc
                .process()
                .await
                .unwrap_or_else(|e| panic!("repeat process failed: {e}"));
            assert_eq!(removed, 0);
        }
    }

    #[tokio::test]
    async fn test_should_tolerate_missing_content_file() {
        let fx = fixture();
        fx.meta
            .buckets()
            .store(&Bucket::new("b1-id", "b1", "user1"))
            .unwrap_or_else(|e| panic!("store bucket failed: {e}"));
        let object = fx
            .meta
            .objects()
            .get_or_create("b1-id", "obj")
            .unwrap_or_else(|e| panic!("create object failed: {e}"));
        // A version row without any file, as left by a crash between
        // content and metadata removal.
        let mut version = VersionedObject::open(object.uuid, "1");
        version.object_state = ObjectState::Committed;
        fx.meta
            .versions()
            .insert(&version)
            .unwrap_or_else(|e| panic!("insert failed: {e}"));
        fx.meta
            .buckets()
            .mark_deleted("b1-id")
            .unwrap_or_else(|e| panic!("mark_deleted failed: {e}"));

        let gc = collector(&fx, usize::MAX);
        let removed = gc
            .process()
            .await
            .unwrap_or_else(|e| panic!("process failed: {e}"));
        // Row plus its delete marker, neither of which had a file.
        assert_eq!(removed, 2);
        assert!(
            fx.meta
                .buckets()
                .get("b1-id")
                .unwrap_or_else(|e| panic!("get bucket failed: {e}"))
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_should_toggle_suspend_flag() {
        let fx = fixture();
        let gc = collector(&fx, usize::MAX);
        assert!(!gc.is_suspended());
        gc.suspend();
        assert!(gc.is_suspended());
        gc.resume();
        assert!(!gc.is_suspended());
    }
}
