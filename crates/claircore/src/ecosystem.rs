//! A named bundle of scanners plus exactly one coalescer, representing one
//! packaging world (dpkg, rpm, apk, a language ecosystem). Multiple
//! ecosystems may be active at once; [`crate::indexer::Controller::index`]
//! merges their outputs (§4.7, "Coalesce").

use std::sync::Arc;

use crate::coalesce::Coalescer;
use crate::scanner::{DistributionScanner, FileScanner, PackageScanner, RepositoryScanner};
use crate::Result;

type PackageScannerFactory = Box<dyn Fn() -> Result<Vec<Arc<dyn PackageScanner>>> + Send + Sync>;
type DistributionScannerFactory = Box<dyn Fn() -> Result<Vec<Arc<dyn DistributionScanner>>> + Send + Sync>;
type RepositoryScannerFactory = Box<dyn Fn() -> Result<Vec<Arc<dyn RepositoryScanner>>> + Send + Sync>;
type FileScannerFactory = Box<dyn Fn() -> Result<Vec<Arc<dyn FileScanner>>> + Send + Sync>;

/// One packaging world: the leaves that observe its artifacts, plus the
/// coalescer that folds their per-layer output into an effective view.
/// Each scanner accessor is a factory, not a cached value, so a caller can
/// fail ecosystem construction lazily (and `Index` aborts on that failure)
/// rather than at process startup.
pub struct Ecosystem {
    name: String,
    package_scanners: PackageScannerFactory,
    distribution_scanners: DistributionScannerFactory,
    repository_scanners: RepositoryScannerFactory,
    file_scanners: FileScannerFactory,
    coalescer: Arc<dyn Coalescer>,
}

impl Ecosystem {
    pub fn new(name: impl Into<String>, coalescer: Arc<dyn Coalescer>) -> Self {
        Self {
            name: name.into(),
            package_scanners: Box::new(|| Ok(Vec::new())),
            distribution_scanners: Box::new(|| Ok(Vec::new())),
            repository_scanners: Box::new(|| Ok(Vec::new())),
            file_scanners: Box::new(|| Ok(Vec::new())),
            coalescer,
        }
    }

    pub fn with_package_scanners<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Vec<Arc<dyn PackageScanner>>> + Send + Sync + 'static,
    {
        self.package_scanners = Box::new(factory);
        self
    }

    pub fn with_distribution_scanners<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Vec<Arc<dyn DistributionScanner>>> + Send + Sync + 'static,
    {
        self.distribution_scanners = Box::new(factory);
        self
    }

    pub fn with_repository_scanners<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Vec<Arc<dyn RepositoryScanner>>> + Send + Sync + 'static,
    {
        self.repository_scanners = Box::new(factory);
        self
    }

    pub fn with_file_scanners<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Vec<Arc<dyn FileScanner>>> + Send + Sync + 'static,
    {
        self.file_scanners = Box::new(factory);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn package_scanners(&self) -> Result<Vec<Arc<dyn PackageScanner>>> {
        (self.package_scanners)()
    }

    pub fn distribution_scanners(&self) -> Result<Vec<Arc<dyn DistributionScanner>>> {
        (self.distribution_scanners)()
    }

    pub fn repository_scanners(&self) -> Result<Vec<Arc<dyn RepositoryScanner>>> {
        (self.repository_scanners)()
    }

    pub fn file_scanners(&self) -> Result<Vec<Arc<dyn FileScanner>>> {
        (self.file_scanners)()
    }

    pub fn coalescer(&self) -> Arc<dyn Coalescer> {
        self.coalescer.clone()
    }
}

impl std::fmt::Debug for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ecosystem").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "./ecosystem_test.rs"]
mod ecosystem_test;
