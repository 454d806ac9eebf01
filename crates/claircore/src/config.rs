//! Layered configuration for the indexing engine: compiled-in defaults,
//! an optional file, then `CLAIRCORE_*` environment variable overrides,
//! in that precedence order — the same layering the reference codebase's
//! own top-level config loader uses.

use config::{Config as ConfigBase, Environment, File};
use serde::{Deserialize, Serialize};

use crate::Result;

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

/// Tunables intrinsic to the indexing core. Scanner/ecosystem selection and
/// storage-backend connection settings are caller concerns and are not
/// represented here.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Maximum number of concurrent `Index` calls the [`crate::indexer::Controller`]
    /// will admit at once.
    pub index_concurrency: usize,
    /// Maximum number of concurrent `(layer, scanner)` scan units the
    /// [`crate::scanner`] pool will run at once.
    pub scan_concurrency: usize,
    /// Timeout, in milliseconds, applied to individual store operations
    /// issued by [`crate::indexer::Controller`]. A timed-out call surfaces
    /// as [`crate::Error::DeadlineExceeded`], which is retryable.
    pub store_operation_timeout_ms: u64,
    /// Lower bound, in milliseconds, of the state machine's retry pacing.
    pub retry_backoff_min_ms: u64,
    /// Upper bound, in milliseconds, of the state machine's retry pacing.
    pub retry_backoff_max_ms: u64,
    /// Number of times `SeenManifest` will retry a disappeared report
    /// before surfacing the error.
    pub max_manifest_disappeared_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        Self {
            index_concurrency: parallelism,
            scan_concurrency: parallelism,
            store_operation_timeout_ms: 5_000,
            retry_backoff_min_ms: 1_000,
            retry_backoff_max_ms: 5_000,
            max_manifest_disappeared_retries: 3,
        }
    }
}

impl Config {
    /// Load configuration layering compiled-in defaults, an optional TOML
    /// file at `path` (if it exists), and `CLAIRCORE_*` environment
    /// variable overrides (e.g. `CLAIRCORE_SCAN_CONCURRENCY=8`).
    pub fn from_default_sources(path: Option<&std::path::Path>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = ConfigBase::builder().add_source(
            ConfigBase::try_from(&defaults)
                .expect("default Config must serialize into a config Source"),
        );
        if let Some(path) = path {
            if path.exists() {
                builder = builder.add_source(File::from(path));
            }
        }
        builder = builder.add_source(Environment::with_prefix("CLAIRCORE").separator("_"));
        let merged = builder.build()?;
        Ok(merged.try_deserialize()?)
    }
}
