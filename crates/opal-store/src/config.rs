//! Storage backend configuration.
//!
//! Provides [`StoreConfig`] for configuring the data path and the garbage
//! collector. The recognized option names match the s3gw driver so an
//! existing deployment can point this backend at the same environment
//! without renaming anything.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Default root for the metadata database and content files.
const DEFAULT_DATA_PATH: &str = "/var/lib/opal";

/// Default garbage-collector tick interval in seconds.
const DEFAULT_GC_PROCESSOR_PERIOD: u64 = 3600;

/// Default upper bound on version removals per garbage-collector tick.
const DEFAULT_GC_MAX_OBJS: usize = 32;

/// Storage backend configuration.
///
/// All fields have defaults suitable for a single-node deployment.
/// Configuration can be loaded from environment variables via
/// [`StoreConfig::from_env`].
///
/// # Examples
///
/// ```
/// use opal_store::StoreConfig;
///
/// let config = StoreConfig::default();
/// assert_eq!(config.gc_processor_period, 3600);
/// assert_eq!(config.gc_max_objs, 32);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Root directory for the metadata database and content files.
    #[builder(default = PathBuf::from(DEFAULT_DATA_PATH), setter(into))]
    pub data_path: PathBuf,

    /// Garbage-collector tick interval in seconds.
    #[builder(default = DEFAULT_GC_PROCESSOR_PERIOD)]
    pub gc_processor_period: u64,

    /// Upper bound on version removals per garbage-collector tick.
    #[builder(default = DEFAULT_GC_MAX_OBJS)]
    pub gc_max_objs: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            gc_processor_period: DEFAULT_GC_PROCESSOR_PERIOD,
            gc_max_objs: DEFAULT_GC_MAX_OBJS,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads the following variables (falling back to defaults). The names
    /// are the s3gw option names, upper-cased:
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `RGW_SFS_DATA_PATH` | `/var/lib/opal` |
    /// | `RGW_GC_PROCESSOR_PERIOD` | `3600` |
    /// | `RGW_GC_MAX_OBJS` | `32` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("RGW_SFS_DATA_PATH") {
            config.data_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("RGW_GC_PROCESSOR_PERIOD") {
            if let Ok(n) = v.parse::<u64>() {
                config.gc_processor_period = n;
            }
        }
        if let Ok(v) = std::env::var("RGW_GC_MAX_OBJS") {
            if let Ok(n) = v.parse::<usize>() {
                config.gc_max_objs = n;
            }
        }

        config
    }

    /// The garbage-collector tick interval as a [`Duration`].
    #[must_use]
    pub fn gc_period(&self) -> Duration {
        Duration::from_secs(self.gc_processor_period)
    }
}
