//! Typed access to the embedded metadata database.
//!
//! [`MetaStore`] owns a single SQLite connection shared by every thread in
//! the process; writes are serialized by the connection mutex, and the busy
//! timeout makes contended operations wait instead of failing. The schema
//! is reconciled on open (see [`schema`]), so a database written by an
//! older build gains any missing columns in place.
//!
//! Each entity has a narrow repository handle ([`Users`], [`Buckets`],
//! [`Objects`], [`Versions`], [`Lifecycle`]) borrowed from the store on
//! demand. Multi-statement operations run inside a single transaction under
//! the mutex.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreResult;

pub mod buckets;
pub mod lifecycle;
pub mod objects;
pub mod schema;
pub mod users;
pub mod versions;

pub use buckets::Buckets;
pub use lifecycle::Lifecycle;
pub use objects::Objects;
pub use users::Users;
pub use versions::Versions;

/// Filename of the metadata database under the data path.
pub const DB_FILENAME: &str = "s3gw.db";

/// Busy timeout applied to the shared connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The embedded metadata database.
pub struct MetaStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaStore").finish_non_exhaustive()
    }
}

impl MetaStore {
    /// Open (creating if necessary) the metadata database under `data_path`
    /// and reconcile its schema.
    ///
    /// # Errors
    ///
    /// Fails if the data path cannot be created or the database cannot be
    /// opened, configured, or migrated.
    pub fn open(data_path: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_path)?;
        let db_path = Self::db_path(data_path);
        let conn = Connection::open(&db_path)?;
        configure(&conn)?;
        schema::ensure_schema(&conn)?;
        debug!(path = %db_path.display(), "opened metadata database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// The database file path for a given data path.
    #[must_use]
    pub fn db_path(data_path: &Path) -> PathBuf {
        data_path.join(DB_FILENAME)
    }

    /// Repository handle for users and access keys.
    #[must_use]
    pub fn users(&self) -> Users<'_> {
        Users::new(self)
    }

    /// Repository handle for buckets.
    #[must_use]
    pub fn buckets(&self) -> Buckets<'_> {
        Buckets::new(self)
    }

    /// Repository handle for objects.
    #[must_use]
    pub fn objects(&self) -> Objects<'_> {
        Objects::new(self)
    }

    /// Repository handle for versioned objects.
    #[must_use]
    pub fn versions(&self) -> Versions<'_> {
        Versions::new(self)
    }

    /// Repository handle for lifecycle rows.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle<'_> {
        Lifecycle::new(self)
    }

    /// Acquire the shared connection.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// Apply the connection pragmas.
///
/// WAL keeps readers unblocked while a write is in flight;
/// `synchronous=normal` is the durability point WAL is designed for. The
/// busy timeout makes lock contention wait rather than surface as errors.
fn configure(conn: &Connection) -> StoreResult<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // These two report their new value back and must be read as queries.
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    let _mmap: i64 = conn.query_row("PRAGMA mmap_size = 30000000000", [], |row| row.get(0))?;
    conn.execute_batch(
        "PRAGMA synchronous = normal;
         PRAGMA temp_store = memory;
         PRAGMA foreign_keys = on;",
    )?;
    debug!(mode = %journal_mode, "configured metadata database");
    Ok(())
}

/// Read a uuid stored as text from a row column.
pub(crate) fn uuid_from_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
