//! Lazy, read-only access to one layer's file tree.
//!
//! A [`Layer`] starts out unrealized — it knows only its [`LayerRef`] — and
//! gains a [`LayerFs`] handle once a [`crate::realize::Realizer`] has
//! fetched and decompressed its bytes. Scanners only ever see realized
//! layers; the indexer state machine enforces that ordering.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::digest::Digest;
use crate::manifest::LayerRef;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./layer_test.rs"]
mod layer_test;

/// A read-only view of a single layer's uncompressed file tree, rooted at
/// the layer's root directory. Implementations must tolerate concurrent
/// readers — the same handle is shared across every scanner scheduled
/// against this layer.
pub trait LayerFs: Send + Sync + std::fmt::Debug {
    /// Read the full contents of the file at `path` (relative to the
    /// layer root, using `/` separators, no leading slash).
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// List every path present anywhere in the layer, in no particular
    /// order. Used by scanners that need to walk the whole tree (e.g. the
    /// whiteout scanner) and by [`Layer::files`]'s existence checks.
    fn walk(&self) -> Result<Vec<String>>;

    /// True if `path` names a regular file or directory in this layer.
    fn exists(&self, path: &str) -> bool {
        self.walk().map(|all| all.iter().any(|p| p == path)).unwrap_or(false)
    }
}

/// An in-memory [`LayerFs`] populated directly from a map of paths to
/// bytes. This is what the reference remote realizer (and test fixtures)
/// build: layers in this engine are small package-database snapshots, not
/// multi-gigabyte application images, so holding the decompressed tree in
/// memory is the simple, correct choice the reference engine also makes
/// for its own realized-layer cache.
#[derive(Debug, Default)]
pub struct MemoryLayerFs {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryLayerFs {
    pub fn new(files: HashMap<String, Vec<u8>>) -> Self {
        Self { files }
    }
}

impl LayerFs for MemoryLayerFs {
    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("no such file in layer: {path}")))
    }

    fn walk(&self) -> Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}

/// A layer carries its manifest-level reference plus, once realized, a
/// shared handle onto its file tree.
#[derive(Clone, Debug)]
pub struct Layer {
    layer_ref: LayerRef,
    fs: Arc<OnceCell<Arc<dyn LayerFs>>>,
}

impl Layer {
    pub fn new(layer_ref: LayerRef) -> Self {
        Self {
            layer_ref,
            fs: Arc::new(OnceCell::new()),
        }
    }

    pub fn hash(&self) -> &Digest {
        &self.layer_ref.hash
    }

    pub fn layer_ref(&self) -> &LayerRef {
        &self.layer_ref
    }

    pub fn is_realized(&self) -> bool {
        self.fs.get().is_some()
    }

    /// Called by a [`crate::realize::Realizer`] once this layer's bytes
    /// have been fetched and decompressed. Idempotent: realizing an
    /// already-realized layer a second time is a no-op, matching the
    /// realizer contract's "Close() is idempotent" framing.
    pub fn realize_with(&self, fs: Arc<dyn LayerFs>) {
        let _ = self.fs.set(fs);
    }

    /// Return this layer's filesystem view.
    ///
    /// # Errors
    /// Fails with a "not realized" error if no realizer has populated this
    /// layer yet.
    pub fn fs(&self) -> Result<&Arc<dyn LayerFs>> {
        self.fs
            .get()
            .ok_or_else(|| Error::Validation(format!("layer {} is not realized", self.hash())))
    }

    /// Convenience: read several files at once, skipping ones that do not
    /// exist rather than failing the whole batch.
    pub fn files(&self, paths: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
        let fs = self.fs()?;
        let mut out = HashMap::new();
        for path in paths {
            if let Ok(bytes) = fs.read_file(path) {
                out.insert((*path).to_string(), bytes);
            }
        }
        Ok(out)
    }
}
