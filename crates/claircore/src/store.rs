//! The persistence contract (§4.3) plus a single in-process reference
//! implementation (§4.11) built from `dashmap`s, so the state machine,
//! layer scanner, and coalescer can be exercised without an external
//! database. A production deployment supplies its own SQL-backed `Store`
//! implementing the same trait.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::digest::Digest;
use crate::manifest::Manifest;
use crate::report::{Distribution, File, IndexReport, Package, Repository};
use crate::scanner::ScannerMeta;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./store_test.rs"]
mod store_test;

/// Persistence contract for scanner registration, layer/manifest
/// scanned-ness flags, per-layer facts, and index reports.
///
/// Implementations must support concurrent readers; the core serializes
/// writers for a given manifest itself via the advisory lock on that
/// manifest's digest, so a `Store` need not provide its own per-manifest
/// mutual exclusion.
#[async_trait]
pub trait Store: Send + Sync {
    /// Assign (or confirm) surrogate registration for each scanner triple.
    /// Idempotent: registering an already-known triple is a no-op.
    async fn register_scanners(&self, scanners: &[ScannerMeta]) -> Result<()>;

    /// Record a manifest and its ordered layer association. Safe to retry
    /// with equal arguments.
    async fn persist_manifest(&self, manifest: &Manifest) -> Result<()>;

    /// `true` iff every layer in the manifest identified by `hash` has been
    /// scanned by every scanner in `scanners` (the primary dedup probe).
    async fn manifest_scanned(&self, hash: &Digest, scanners: &[ScannerMeta]) -> Result<bool>;

    /// `true` iff `(layer, scanner)` has completed.
    async fn layer_scanned(&self, layer: &Digest, scanner: &ScannerMeta) -> Result<bool>;

    /// Mark `(layer, scanner)` complete. Called only after the scanner's
    /// facts have been persisted via the matching `index_*` call.
    async fn set_layer_scanned(&self, layer: &Digest, scanner: &ScannerMeta) -> Result<()>;

    async fn index_packages(&self, packages: &[Package], layer: &Digest, scanner: &ScannerMeta) -> Result<()>;
    async fn index_distributions(&self, dists: &[Distribution], layer: &Digest, scanner: &ScannerMeta) -> Result<()>;
    async fn index_repositories(&self, repos: &[Repository], layer: &Digest, scanner: &ScannerMeta) -> Result<()>;
    async fn index_files(&self, files: &[File], layer: &Digest, scanner: &ScannerMeta) -> Result<()>;

    /// Facts for `layer`, restricted to those written by one of `scanners`.
    async fn packages_by_layer(&self, layer: &Digest, scanners: &[ScannerMeta]) -> Result<Vec<Package>>;
    async fn distributions_by_layer(&self, layer: &Digest, scanners: &[ScannerMeta]) -> Result<Vec<Distribution>>;
    async fn repositories_by_layer(&self, layer: &Digest, scanners: &[ScannerMeta]) -> Result<Vec<Repository>>;
    async fn files_by_layer(&self, layer: &Digest, scanners: &[ScannerMeta]) -> Result<Vec<File>>;

    /// Persist the final, merged effective view bound to the report's
    /// manifest hash. Called once near the terminal state.
    async fn index_manifest(&self, report: &IndexReport) -> Result<()>;

    /// Persist transient progress. Read-after-write must observe the
    /// latest write.
    async fn set_index_report(&self, report: &IndexReport) -> Result<()>;

    /// Retrieve the persisted report for `hash`, plus whether the manifest
    /// has ever been marked scanned at all (used by `SeenManifest` to
    /// distinguish "never indexed" from "disappeared").
    async fn index_report(&self, hash: &Digest) -> Result<(Option<IndexReport>, bool)>;

    /// Atomically mark the manifest finished and associate `scanners` with
    /// it, such that `manifest_scanned(hash, scanners)` is true immediately
    /// afterward.
    async fn set_index_finished(&self, report: &IndexReport, scanners: &[ScannerMeta]) -> Result<()>;

    /// Garbage collection hook.
    async fn delete_manifests(&self, hashes: &[Digest]) -> Result<()>;
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct LayerScannerKey {
    layer: Digest,
    scanner: ScannerMeta,
}

/// Reference, in-process `Store`: concurrent maps guarded by `dashmap`,
/// with no cross-process durability claim. Explicitly reference/test
/// grade, matching the stance the design takes toward the core's own
/// advisory lock reference implementation.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    manifests: DashMap<Digest, Manifest>,
    scanned: DashMap<LayerScannerKey, ()>,
    packages: DashMap<LayerScannerKey, Vec<Package>>,
    distributions: DashMap<LayerScannerKey, Vec<Distribution>>,
    repositories: DashMap<LayerScannerKey, Vec<Repository>>,
    files: DashMap<LayerScannerKey, Vec<File>>,
    /// manifest hash -> set of scanner triples that have fully scanned it
    manifest_scanners: DashMap<Digest, std::collections::HashSet<ScannerMeta>>,
    reports: DashMap<Digest, IndexReport>,
    registered: DashMap<ScannerMeta, ()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn register_scanners(&self, scanners: &[ScannerMeta]) -> Result<()> {
        for s in scanners {
            self.registered.insert(s.clone(), ());
        }
        Ok(())
    }

    async fn persist_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.manifests.insert(manifest.hash.clone(), manifest.clone());
        Ok(())
    }

    async fn manifest_scanned(&self, hash: &Digest, scanners: &[ScannerMeta]) -> Result<bool> {
        let Some(done) = self.manifest_scanners.get(hash) else {
            return Ok(false);
        };
        Ok(scanners.iter().all(|s| done.contains(s)))
    }

    async fn layer_scanned(&self, layer: &Digest, scanner: &ScannerMeta) -> Result<bool> {
        let key = LayerScannerKey {
            layer: layer.clone(),
            scanner: scanner.clone(),
        };
        Ok(self.scanned.contains_key(&key))
    }

    async fn set_layer_scanned(&self, layer: &Digest, scanner: &ScannerMeta) -> Result<()> {
        let key = LayerScannerKey {
            layer: layer.clone(),
            scanner: scanner.clone(),
        };
        self.scanned.insert(key, ());
        Ok(())
    }

    async fn index_packages(&self, packages: &[Package], layer: &Digest, scanner: &ScannerMeta) -> Result<()> {
        let key = LayerScannerKey {
            layer: layer.clone(),
            scanner: scanner.clone(),
        };
        if self.packages.contains_key(&key) {
            return Err(Error::Store(format!(
                "double-write of packages for layer {layer} scanner {scanner}"
            )));
        }
        self.packages.insert(key, packages.to_vec());
        Ok(())
    }

    async fn index_distributions(&self, dists: &[Distribution], layer: &Digest, scanner: &ScannerMeta) -> Result<()> {
        let key = LayerScannerKey {
            layer: layer.clone(),
            scanner: scanner.clone(),
        };
        if self.distributions.contains_key(&key) {
            return Err(Error::Store(format!(
                "double-write of distributions for layer {layer} scanner {scanner}"
            )));
        }
        self.distributions.insert(key, dists.to_vec());
        Ok(())
    }

    async fn index_repositories(&self, repos: &[Repository], layer: &Digest, scanner: &ScannerMeta) -> Result<()> {
        let key = LayerScannerKey {
            layer: layer.clone(),
            scanner: scanner.clone(),
        };
        if self.repositories.contains_key(&key) {
            return Err(Error::Store(format!(
                "double-write of repositories for layer {layer} scanner {scanner}"
            )));
        }
        self.repositories.insert(key, repos.to_vec());
        Ok(())
    }

    async fn index_files(&self, files: &[File], layer: &Digest, scanner: &ScannerMeta) -> Result<()> {
        let key = LayerScannerKey {
            layer: layer.clone(),
            scanner: scanner.clone(),
        };
        if self.files.contains_key(&key) {
            return Err(Error::Store(format!(
                "double-write of files for layer {layer} scanner {scanner}"
            )));
        }
        self.files.insert(key, files.to_vec());
        Ok(())
    }

    async fn packages_by_layer(&self, layer: &Digest, scanners: &[ScannerMeta]) -> Result<Vec<Package>> {
        let mut out = Vec::new();
        for scanner in scanners {
            let key = LayerScannerKey {
                layer: layer.clone(),
                scanner: scanner.clone(),
            };
            if let Some(v) = self.packages.get(&key) {
                out.extend(v.value().iter().cloned());
            }
        }
        Ok(out)
    }

    async fn distributions_by_layer(&self, layer: &Digest, scanners: &[ScannerMeta]) -> Result<Vec<Distribution>> {
        let mut out = Vec::new();
        for scanner in scanners {
            let key = LayerScannerKey {
                layer: layer.clone(),
                scanner: scanner.clone(),
            };
            if let Some(v) = self.distributions.get(&key) {
                out.extend(v.value().iter().cloned());
            }
        }
        Ok(out)
    }

    async fn repositories_by_layer(&self, layer: &Digest, scanners: &[ScannerMeta]) -> Result<Vec<Repository>> {
        let mut out = Vec::new();
        for scanner in scanners {
            let key = LayerScannerKey {
                layer: layer.clone(),
                scanner: scanner.clone(),
            };
            if let Some(v) = self.repositories.get(&key) {
                out.extend(v.value().iter().cloned());
            }
        }
        Ok(out)
    }

    async fn files_by_layer(&self, layer: &Digest, scanners: &[ScannerMeta]) -> Result<Vec<File>> {
        let mut out = Vec::new();
        for scanner in scanners {
            let key = LayerScannerKey {
                layer: layer.clone(),
                scanner: scanner.clone(),
            };
            if let Some(v) = self.files.get(&key) {
                out.extend(v.value().iter().cloned());
            }
        }
        Ok(out)
    }

    async fn index_manifest(&self, report: &IndexReport) -> Result<()> {
        self.reports.insert(report.hash.clone(), report.clone());
        Ok(())
    }

    async fn set_index_report(&self, report: &IndexReport) -> Result<()> {
        self.reports.insert(report.hash.clone(), report.clone());
        Ok(())
    }

    async fn index_report(&self, hash: &Digest) -> Result<(Option<IndexReport>, bool)> {
        let report = self.reports.get(hash).map(|r| r.value().clone());
        let seen = self.manifest_scanners.contains_key(hash);
        Ok((report, seen))
    }

    async fn set_index_finished(&self, report: &IndexReport, scanners: &[ScannerMeta]) -> Result<()> {
        self.reports.insert(report.hash.clone(), report.clone());
        self.manifest_scanners
            .entry(report.hash.clone())
            .or_default()
            .extend(scanners.iter().cloned());
        Ok(())
    }

    async fn delete_manifests(&self, hashes: &[Digest]) -> Result<()> {
        for hash in hashes {
            self.manifests.remove(hash);
            self.manifest_scanners.remove(hash);
            self.reports.remove(hash);
        }
        Ok(())
    }
}

/// Group facts produced for one layer, restricted to one ecosystem's
/// scanners, as handed to a [`crate::coalesce::Coalescer`]. `files` is
/// populated whenever `scanners` includes one of that ecosystem's file
/// scanners; the reference Linux coalescer ignores it, but a whiteout-only
/// ecosystem (see [`crate::coalesce::FileOnlyCoalescer`]) reads it directly.
#[derive(Debug, Clone, Default)]
pub struct LayerArtifacts {
    pub layer_hash: Digest,
    pub packages: Vec<Package>,
    pub distributions: Vec<Distribution>,
    pub repositories: Vec<Repository>,
    pub files: Vec<File>,
}

/// Fetch, for each layer in manifest order, the facts restricted to
/// `scanners`, bundling them into the shape the coalescer expects.
pub async fn gather_layer_artifacts(
    store: &dyn Store,
    layer_hashes: &[Digest],
    scanners: &[ScannerMeta],
) -> Result<Vec<LayerArtifacts>> {
    let mut out = Vec::with_capacity(layer_hashes.len());
    for hash in layer_hashes {
        out.push(LayerArtifacts {
            layer_hash: hash.clone(),
            packages: store.packages_by_layer(hash, scanners).await?,
            distributions: store.distributions_by_layer(hash, scanners).await?,
            repositories: store.repositories_by_layer(hash, scanners).await?,
            files: store.files_by_layer(hash, scanners).await?,
        });
    }
    Ok(out)
}

#[allow(unused)]
fn _assert_store_object_safe(_: &dyn Store) {}
