//! Reusable test fixtures: manifest/layer builders, an in-memory store, and
//! a couple of deterministic mock scanners, so indexer/coalescer tests don't
//! each reinvent the same plumbing.
//!
//! Available under `cfg(test)` inside this crate, and to downstream crates
//! that enable the `test-fixtures` feature.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rstest::fixture;

use crate::digest::Digest;
use crate::layer::{Layer, MemoryLayerFs};
use crate::manifest::{LayerRef, Manifest};
use crate::report::Package;
use crate::scanner::PackageScanner;
use crate::store::InMemoryStore;
use crate::Result;

/// Install a subscriber that prints without timestamps through the test
/// harness's captured output. Safe to call from every test in a binary;
/// only the first call wins.
#[allow(dead_code)]
pub fn init_logging() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::TRACE)
        .without_time()
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// A deterministic [`LayerRef`] derived from `seed`, so callers don't have
/// to hand-compute digests for made-up layer content.
pub fn layer_ref(seed: &[u8]) -> LayerRef {
    LayerRef::new(Digest::sha256(seed), format!("fixture://{}", String::from_utf8_lossy(seed)))
}

/// A manifest over one [`layer_ref`] per seed, application order matching
/// the seed order. The manifest's own hash is derived from the layer
/// digests, so two calls with equal seeds produce equal manifests.
pub fn manifest(seeds: &[&[u8]]) -> Manifest {
    let layers: Vec<LayerRef> = seeds.iter().map(|s| layer_ref(s)).collect();
    let mut joined = Vec::new();
    for l in &layers {
        joined.extend_from_slice(l.hash.checksum());
    }
    Manifest::new(Digest::sha256(&joined), layers)
}

/// A [`Layer`] already realized with `files`, bypassing the fetch/unpack
/// step entirely — useful for exercising a scanner in isolation.
pub fn realized_layer(seed: &[u8], files: HashMap<String, Vec<u8>>) -> Layer {
    let layer = Layer::new(layer_ref(seed));
    layer.realize_with(Arc::new(MemoryLayerFs::new(files)));
    layer
}

#[fixture]
pub fn shared_store() -> Arc<InMemoryStore> {
    InMemoryStore::shared()
}

/// A package scanner that ignores the layer it's handed and always returns
/// the same fixed set, for tests that care about coalescing behavior rather
/// than scanning behavior.
#[derive(Debug, Clone)]
pub struct FixedPackageScanner {
    name: &'static str,
    packages: Vec<Package>,
}

impl FixedPackageScanner {
    pub fn new(name: &'static str, packages: Vec<Package>) -> Self {
        Self { name, packages }
    }
}

#[async_trait]
impl PackageScanner for FixedPackageScanner {
    fn name(&self) -> &str {
        self.name
    }

    fn version(&self) -> &str {
        "fixture"
    }

    async fn scan(&self, _ctx: tokio_util::sync::CancellationToken, _layer: &Layer) -> Result<Vec<Package>> {
        Ok(self.packages.clone())
    }
}

#[cfg(test)]
mod fixtures_test {
    use super::*;

    #[test]
    fn manifest_is_deterministic_over_equal_seeds() {
        let a = manifest(&[b"l0", b"l1"]);
        let b = manifest(&[b"l0", b"l1"]);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.layers, b.layers);
    }

    #[test]
    fn realized_layer_serves_the_files_it_was_built_with() {
        let mut files = HashMap::new();
        files.insert("a/b".to_string(), b"hi".to_vec());
        let layer = realized_layer(b"seed", files);
        assert!(layer.is_realized());
        assert_eq!(layer.fs().unwrap().read_file("a/b").unwrap(), b"hi");
    }

    #[tokio::test]
    async fn fixed_package_scanner_returns_its_configured_packages() {
        let scanner = FixedPackageScanner::new("fixed", vec![Package::binary("a", "1", "x86_64", "db")]);
        let layer = realized_layer(b"seed", HashMap::new());
        let found = scanner.scan(tokio_util::sync::CancellationToken::new(), &layer).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "a");
    }
}
