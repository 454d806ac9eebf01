//! The scanner plugin interface: four symmetric traits, one per artifact
//! kind, plus the capability traits a scanner may additionally implement
//! ([`Configurable`], [`RpcScanner`], [`DefaultRepositoryProvider`]).
//!
//! The core never constructs a scanner; it only ever calls through these
//! trait objects, which ecosystems (see [`crate::ecosystem`]) hand it.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::layer::Layer;
use crate::report::{Distribution, File, Package, Repository};
use crate::Result;

#[cfg(test)]
#[path = "./scanner_test.rs"]
mod scanner_test;

/// The artifact kind a scanner produces. Dispatch to the correct
/// `Store::index_*` method during layer scanning is keyed on this, never on
/// the scanned content.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Package,
    Distribution,
    Repository,
    File,
}

/// A scanner's process-global identity: `(name, version, kind)`. Two
/// scanners are equal iff all three fields match; registration of an
/// already-known triple is a no-op.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ScannerMeta {
    pub name: String,
    pub version: String,
    pub kind: Kind,
}

impl ScannerMeta {
    pub fn new(name: impl Into<String>, version: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind,
        }
    }
}

impl std::fmt::Display for ScannerMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} ({:?})", self.name, self.version, self.kind)
    }
}

/// Invoked once at startup with an opaque per-scanner configuration blob.
/// Scanners that need no configuration simply do not implement this.
#[async_trait]
pub trait Configurable: Send + Sync {
    async fn configure(&mut self, config: &serde_json::Value) -> Result<()>;
}

/// Marks a scanner whose `scan` talks to an external service, such that an
/// address-resolution failure (DNS/connect error to an unreachable
/// endpoint) should be demoted to a skip rather than treated as fatal
/// (§4.5, step 4c).
pub trait RpcScanner {}

/// A package scanner that can also declare a default repository, added to
/// a layer's repository facts whenever the scanner produced at least one
/// package (§4.5 contract specifics).
#[async_trait]
pub trait DefaultRepositoryProvider: Send + Sync {
    async fn default_repository(&self) -> Result<Repository>;
}

/// A leaf that extracts [`Package`]s from one layer's filesystem view.
#[async_trait]
pub trait PackageScanner: Send + Sync + Debug {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn kind(&self) -> Kind {
        Kind::Package
    }
    fn meta(&self) -> ScannerMeta {
        ScannerMeta::new(self.name(), self.version(), self.kind())
    }
    async fn scan(&self, ctx: CancellationToken, layer: &Layer) -> Result<Vec<Package>>;

    /// Non-`None` if this scanner also implements [`DefaultRepositoryProvider`].
    fn as_default_repository_provider(&self) -> Option<&dyn DefaultRepositoryProvider> {
        None
    }

    /// `true` if this scanner's `scan` should have address-resolution
    /// errors demoted to skips, i.e. it also conceptually implements
    /// [`RpcScanner`].
    fn is_rpc(&self) -> bool {
        false
    }
}

/// A leaf that extracts [`Distribution`]s from one layer's filesystem view.
#[async_trait]
pub trait DistributionScanner: Send + Sync + Debug {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn kind(&self) -> Kind {
        Kind::Distribution
    }
    fn meta(&self) -> ScannerMeta {
        ScannerMeta::new(self.name(), self.version(), self.kind())
    }
    async fn scan(&self, ctx: CancellationToken, layer: &Layer) -> Result<Vec<Distribution>>;
    fn is_rpc(&self) -> bool {
        false
    }
}

/// A leaf that extracts [`Repository`]s from one layer's filesystem view.
#[async_trait]
pub trait RepositoryScanner: Send + Sync + Debug {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn kind(&self) -> Kind {
        Kind::Repository
    }
    fn meta(&self) -> ScannerMeta {
        ScannerMeta::new(self.name(), self.version(), self.kind())
    }
    async fn scan(&self, ctx: CancellationToken, layer: &Layer) -> Result<Vec<Repository>>;
    fn is_rpc(&self) -> bool {
        false
    }
}

/// A leaf that extracts [`File`] facts (whiteout markers, primarily) from
/// one layer's filesystem view.
#[async_trait]
pub trait FileScanner: Send + Sync + Debug {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn kind(&self) -> Kind {
        Kind::File
    }
    fn meta(&self) -> ScannerMeta {
        ScannerMeta::new(self.name(), self.version(), self.kind())
    }
    async fn scan(&self, ctx: CancellationToken, layer: &Layer) -> Result<Vec<File>>;
    fn is_rpc(&self) -> bool {
        false
    }
}

/// The reference file scanner: walks a layer's filesystem view and reports
/// every path whose basename marks it as a whiteout, per the OCI image
/// spec (§6, "Whiteout file format").
#[derive(Debug, Clone, Copy, Default)]
pub struct WhiteoutFileScanner;

#[async_trait]
impl FileScanner for WhiteoutFileScanner {
    fn name(&self) -> &str {
        "whiteout"
    }
    fn version(&self) -> &str {
        "1"
    }
    async fn scan(&self, ctx: CancellationToken, layer: &Layer) -> Result<Vec<File>> {
        if ctx.is_cancelled() {
            return Err(crate::Error::Cancelled);
        }
        let fs = layer.fs()?;
        let mut out = Vec::new();
        for path in fs.walk()? {
            if File::is_regular_whiteout(&path) || File::is_opaque_whiteout(&path) {
                out.push(File {
                    path,
                    kind: crate::report::FileKind::Whiteout,
                });
            }
        }
        Ok(out)
    }
}
