//! The artifact value types ([`Package`], [`Distribution`], [`Repository`],
//! [`Environment`], [`File`]) and the [`IndexReport`] that bundles them into
//! the sole public output of the indexing engine.
//!
//! Report-scoped surrogate IDs ([`PackageId`], [`DistributionId`],
//! [`RepositoryId`]) key the `packages`/`distributions`/`repositories` maps
//! so that [`Environment`]s can cross-reference a package without owning
//! it. A package's source, by contrast, is modeled as a plain owned
//! [`Box<Package>`]: the relationship is one level deep and one-directional
//! (a source package never itself carries a `source`), so it needs none of
//! the cycle-aware machinery a true back-pointer would — just a tree, not a
//! graph.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

#[cfg(test)]
#[path = "./report_test.rs"]
mod report_test;

macro_rules! surrogate_id {
    ($name:ident) => {
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(u64);

        impl $name {
            pub fn new(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                raw.parse()
                    .map_err(|_| serde::de::Error::custom(format!("invalid {}: {raw}", stringify!($name))))
            }
        }
    };
}

surrogate_id!(PackageId);
surrogate_id!(DistributionId);
surrogate_id!(RepositoryId);

/// Allocates sequential, per-report surrogate IDs. IDs are stable for the
/// lifetime of one [`IndexReport`] but are not required to be stable across
/// independent runs of the indexer over the same manifest — re-indexing an
/// unchanged manifest may renumber IDs freely as long as the cross-references
/// within the new report remain internally consistent.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_package(&self) -> PackageId {
        PackageId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_distribution(&self) -> DistributionId {
        DistributionId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_repository(&self) -> RepositoryId {
        RepositoryId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Whether a [`Package`] was observed as a binary artifact (the thing a
/// package manager installs) or a source artifact (named only via another
/// package's [`Package::source`] back-reference).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    Binary,
    Source,
}

/// One software artifact observed installed in a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub kind: PackageKind,
    pub arch: String,
    /// Path to the package-manager database this package was read from,
    /// e.g. `lib/apk/db/installed`. The coalescer's latest-wins rule
    /// operates per distinct `package_db` value.
    pub package_db: String,
    /// An opaque hint, forwarded to the matcher, about which repository
    /// this package likely came from (e.g. a distro's security channel).
    #[serde(default)]
    pub repository_hint: String,
    /// Path to the package-manager metadata file this package was read
    /// from (e.g. a Python `dist-info/METADATA`, an apk `.apk` control
    /// entry). The whiteout resolver matches whiteout target paths against
    /// this field; scanners that cannot name one leave it empty, which
    /// makes the package immune to whiteout deletion.
    #[serde(default)]
    pub filepath: String,
    /// The sibling [`Package`] of [`PackageKind::Source`] this package was
    /// built from, if known. By convention a source package's own `source`
    /// is always `None` — the relationship never nests more than one level
    /// deep, so an owned [`Box`] is sufficient and never participates in
    /// [`IndexReport::environments`] as a key in its own right (see the
    /// module-level note).
    #[serde(default)]
    pub source: Option<Box<Package>>,
}

impl Package {
    pub fn binary(name: impl Into<String>, version: impl Into<String>, arch: impl Into<String>, package_db: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind: PackageKind::Binary,
            arch: arch.into(),
            package_db: package_db.into(),
            repository_hint: String::new(),
            filepath: String::new(),
            source: None,
        }
    }

    pub fn source(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind: PackageKind::Source,
            arch: String::new(),
            package_db: String::new(),
            repository_hint: String::new(),
            filepath: String::new(),
            source: None,
        }
    }

    pub fn with_filepath(mut self, filepath: impl Into<String>) -> Self {
        self.filepath = filepath.into();
        self
    }

    /// The key the coalescer groups and introduces packages by:
    /// `(name, package_db, version)`.
    pub fn introduction_key(&self) -> (&str, &str, &str) {
        (&self.name, &self.package_db, &self.version)
    }
}

/// A Linux distribution observed via an `os-release`-style scanner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Distribution {
    /// The `ID` field of `os-release`, e.g. `alpine`, `ubuntu`.
    pub did: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub version_code_name: String,
    #[serde(default)]
    pub version_id: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub cpe: String,
    #[serde(default)]
    pub pretty_name: String,
}

/// A package repository, either observed directly by a repository scanner
/// or contributed as a package scanner's declared default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub uri: String,
    /// An opaque key identifying this repository, matched against a
    /// package's [`Package::repository_hint`] downstream.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub cpe: String,
}

/// The context in which a [`Package`] was observed: which layer introduced
/// it, the database path it was read from, and the distribution effective
/// at that point in the layer stack, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub introduced_in: Digest,
    pub package_db: String,
    #[serde(default)]
    pub repository_ids: Vec<RepositoryId>,
    #[serde(default)]
    pub distribution_id: Option<DistributionId>,
}

/// The kind of a [`File`] fact. Only [`FileKind::Whiteout`] carries
/// interesting semantics for the core; other kinds are recorded for
/// completeness but ignored by the whiteout resolver.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Regular,
    Whiteout,
}

/// A file-kind scanner's observation: a path plus its kind, as seen on one
/// layer's filesystem view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub path: String,
    pub kind: FileKind,
}

impl File {
    /// `true` if `path`'s basename marks a regular (non-opaque) whiteout:
    /// `.wh.<name>`, but not the opaque marker itself.
    pub fn is_regular_whiteout(path: &str) -> bool {
        let base = path.rsplit('/').next().unwrap_or(path);
        base.starts_with(".wh.") && base != ".wh..wh..opq"
    }

    /// `true` if `path`'s basename is the opaque whiteout marker.
    pub fn is_opaque_whiteout(path: &str) -> bool {
        let base = path.rsplit('/').next().unwrap_or(path);
        base == ".wh..wh..opq"
    }
}

/// The short, stable name of a state the indexer state machine has reached
/// or is retrying, persisted on every progress write so tools can observe
/// progress without understanding the state machine's implementation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum State {
    CheckManifest,
    UnseenManifest,
    SeenManifest,
    FetchLayers,
    IndexLayers,
    Coalesce,
    IndexManifest,
    IndexFinished,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckManifest => "CheckManifest",
            Self::UnseenManifest => "UnseenManifest",
            Self::SeenManifest => "SeenManifest",
            Self::FetchLayers => "FetchLayers",
            Self::IndexLayers => "IndexLayers",
            Self::Coalesce => "Coalesce",
            Self::IndexManifest => "IndexManifest",
            Self::IndexFinished => "IndexFinished",
        }
    }

    /// `true` once a manifest reaching this state needs no further work.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SeenManifest | Self::IndexFinished)
    }
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The sole public output of the indexing engine.
///
/// Overwritten at every state transition as progress; the report persisted
/// once the state reaches [`State::IndexFinished`] (or short-circuits at
/// [`State::SeenManifest`]) is the final, stable result of an `Index` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub hash: Digest,
    pub state: State,
    pub success: bool,
    #[serde(default)]
    pub err: String,
    #[serde(default)]
    pub packages: HashMap<PackageId, Package>,
    #[serde(default)]
    pub distributions: HashMap<DistributionId, Distribution>,
    #[serde(default)]
    pub repositories: HashMap<RepositoryId, Repository>,
    #[serde(default)]
    pub environments: HashMap<PackageId, Vec<Environment>>,
    /// File facts (whiteout markers, primarily) observed per layer. The
    /// reference Linux coalescer ignores this field entirely; a dedicated
    /// whiteout-only coalescer populates it (see [`crate::whiteout`]), and
    /// merging ecosystem fragments keeps both kinds of output.
    #[serde(default)]
    pub files: HashMap<Digest, Vec<File>>,
}

impl IndexReport {
    pub fn new(hash: Digest) -> Self {
        Self {
            hash,
            state: State::CheckManifest,
            success: false,
            err: String::new(),
            packages: HashMap::new(),
            distributions: HashMap::new(),
            repositories: HashMap::new(),
            environments: HashMap::new(),
            files: HashMap::new(),
        }
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    pub fn fail(&mut self, err: impl Display) {
        self.success = false;
        self.err = err.to_string();
    }

    /// Every invariant §3 of the design requires of a well-formed report:
    /// every environment key has a matching package entry, every
    /// environment's `introduced_in` is one of `manifest_layers`, and no
    /// source package is a top-level environments key.
    pub fn check_invariants(&self, manifest_layers: &[Digest]) -> Result<(), String> {
        for (pkg_id, envs) in &self.environments {
            if !self.packages.contains_key(pkg_id) {
                return Err(format!("environment key {pkg_id} has no matching package"));
            }
            if envs.is_empty() {
                return Err(format!("package {pkg_id} has zero environments"));
            }
            for env in envs {
                if !manifest_layers.contains(&env.introduced_in) {
                    return Err(format!(
                        "environment for package {pkg_id} introduced in layer {} not in manifest",
                        env.introduced_in
                    ));
                }
            }
        }
        for (pkg_id, pkg) in &self.packages {
            if pkg.kind == PackageKind::Source && self.environments.contains_key(pkg_id) {
                return Err(format!("source package {pkg_id} appears as a top-level environments key"));
            }
        }
        Ok(())
    }
}
