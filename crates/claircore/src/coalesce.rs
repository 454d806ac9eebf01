//! The algorithmic heart of the engine (§4.6): folding an ordered list of
//! per-layer facts into the effective package set of a squashed image.
//!
//! [`LinuxCoalescer`] implements the reference algorithm every
//! package-manager-backed ecosystem must reproduce: distribution
//! inheritance, package-database latest-wins masking, and oldest-layer
//! introduction attribution. [`FileOnlyCoalescer`] is the separate
//! "whiteout-only" coalescer mentioned in the design notes: it ignores
//! packages entirely and just carries `Files` facts through to the merged
//! report, which the reference Linux coalescer does not touch.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::digest::Digest;
use crate::manifest::Manifest;
use crate::report::{
    Distribution, DistributionId, Environment, File, FileKind, IdAllocator, Package, PackageId, PackageKind, Repository,
    RepositoryId,
};
use crate::store::LayerArtifacts;
use crate::Result;

#[cfg(test)]
#[path = "./coalesce_test.rs"]
mod coalesce_test;

/// One ecosystem's contribution to the merged [`crate::IndexReport`],
/// before the whiteout resolver runs.
#[derive(Debug, Default, Clone)]
pub struct ReportFragment {
    pub packages: HashMap<PackageId, Package>,
    pub distributions: HashMap<DistributionId, Distribution>,
    pub repositories: HashMap<RepositoryId, Repository>,
    pub environments: HashMap<PackageId, Vec<Environment>>,
    pub files: HashMap<Digest, Vec<File>>,
}

impl ReportFragment {
    /// Merge `other`'s entries into `self`. IDs were allocated from the
    /// same shared [`IdAllocator`] across every ecosystem's coalesce call
    /// in one `Index` call, so collisions between fragments cannot occur.
    pub fn merge(&mut self, other: ReportFragment) {
        self.packages.extend(other.packages);
        self.distributions.extend(other.distributions);
        self.repositories.extend(other.repositories);
        self.environments.extend(other.environments);
        for (layer, files) in other.files {
            self.files.entry(layer).or_default().extend(files);
        }
    }
}

/// Transforms one ecosystem's ordered per-layer facts into its contribution
/// to the final report. `artifacts` is given in manifest layer order
/// (index 0 = oldest/first-applied), which is the order every rule below
/// is defined in terms of.
#[async_trait]
pub trait Coalescer: Send + Sync {
    async fn coalesce(&self, manifest: &Manifest, artifacts: &[LayerArtifacts], ids: &IdAllocator) -> Result<ReportFragment>;
}

/// The reference coalescer for package-manager-backed ecosystems (apk,
/// dpkg, rpm): distribution inheritance, package-database latest-wins, and
/// oldest-layer introduction attribution (§4.6, steps 1-4).
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxCoalescer;

#[async_trait]
impl Coalescer for LinuxCoalescer {
    async fn coalesce(&self, _manifest: &Manifest, artifacts: &[LayerArtifacts], ids: &IdAllocator) -> Result<ReportFragment> {
        let mut fragment = ReportFragment::default();

        // Step 1: distribution determination, with inheritance from the
        // nearest prior layer that observed one.
        let mut effective_distribution: Vec<Option<Distribution>> = Vec::with_capacity(artifacts.len());
        let mut last_seen: Option<Distribution> = None;
        for layer in artifacts {
            if let Some(d) = layer.distributions.first() {
                last_seen = Some(d.clone());
            }
            effective_distribution.push(last_seen.clone());
        }

        let mut distribution_ids: HashMap<Distribution, DistributionId> = HashMap::new();
        for layer in artifacts {
            for d in &layer.distributions {
                let id = *distribution_ids.entry(d.clone()).or_insert_with(|| ids.next_distribution());
                fragment.distributions.insert(id, d.clone());
            }
        }
        // Repositories observed anywhere are emitted regardless of which
        // layer or package they accompanied.
        let mut repository_ids: HashMap<Repository, RepositoryId> = HashMap::new();
        for layer in artifacts {
            for r in &layer.repositories {
                let id = *repository_ids.entry(r.clone()).or_insert_with(|| ids.next_repository());
                fragment.repositories.insert(id, r.clone());
            }
        }

        // Step 2: package-database latest-wins, walking newest to oldest.
        let mut seen_dbs: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut surviving: HashMap<String, Vec<Package>> = HashMap::new();
        for layer in artifacts.iter().rev() {
            let mut by_db: HashMap<String, Vec<Package>> = HashMap::new();
            for pkg in &layer.packages {
                if pkg.kind != PackageKind::Binary {
                    continue;
                }
                by_db.entry(pkg.package_db.clone()).or_default().push(pkg.clone());
            }
            for (db, pkgs) in by_db {
                if seen_dbs.insert(db.clone()) {
                    surviving.insert(db, pkgs);
                }
            }
        }

        // Step 3: introduction attribution, searched independently of the
        // masking above: the oldest layer in which a package's
        // (name, package_db, version) key appears in any PackageDB.
        let mut introduced_at: HashMap<(String, String, String), usize> = HashMap::new();
        for (idx, layer) in artifacts.iter().enumerate() {
            for pkg in &layer.packages {
                if pkg.kind != PackageKind::Binary {
                    continue;
                }
                let key = (pkg.name.clone(), pkg.package_db.clone(), pkg.version.clone());
                introduced_at.entry(key).or_insert(idx);
            }
        }

        // Step 4: emit.
        for pkgs in surviving.into_values() {
            for pkg in pkgs {
                let key = (pkg.name.clone(), pkg.package_db.clone(), pkg.version.clone());
                let Some(&introduced_idx) = introduced_at.get(&key) else {
                    continue;
                };
                let pkg_id = ids.next_package();
                let repo_ids: Vec<RepositoryId> = if pkg.repository_hint.is_empty() {
                    Vec::new()
                } else {
                    repository_ids
                        .iter()
                        .filter(|(r, _)| r.key == pkg.repository_hint)
                        .map(|(_, id)| *id)
                        .collect()
                };
                let distribution_id = effective_distribution
                    .get(introduced_idx)
                    .and_then(|d| d.as_ref())
                    .and_then(|d| distribution_ids.get(d))
                    .copied();
                let environment = Environment {
                    introduced_in: artifacts[introduced_idx].layer_hash.clone(),
                    package_db: pkg.package_db.clone(),
                    repository_ids: repo_ids,
                    distribution_id,
                };
                fragment.packages.insert(pkg_id, pkg);
                fragment.environments.insert(pkg_id, vec![environment]);
            }
        }

        Ok(fragment)
    }
}

/// A coalescer for ecosystems whose package facts are irrelevant but whose
/// `Files` observations (from a file-kind scanner) must still reach the
/// merged report. The reference Linux coalescer deliberately ignores
/// `Files`; this one exists so a whiteout-only ecosystem can still
/// contribute file facts without duplicating package logic.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileOnlyCoalescer;

#[async_trait]
impl Coalescer for FileOnlyCoalescer {
    async fn coalesce(&self, _manifest: &Manifest, artifacts: &[LayerArtifacts], _ids: &IdAllocator) -> Result<ReportFragment> {
        let mut fragment = ReportFragment::default();
        for layer in artifacts {
            if layer.files.is_empty() {
                continue;
            }
            fragment.files.entry(layer.layer_hash.clone()).or_default().extend(layer.files.iter().cloned());
        }
        Ok(fragment)
    }
}
