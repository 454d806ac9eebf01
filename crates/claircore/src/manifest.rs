//! The content-addressed description of an image: a [`Manifest`] is a hash
//! plus an ordered sequence of [`LayerRef`]s.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

#[cfg(test)]
#[path = "./manifest_test.rs"]
mod manifest_test;

/// A reference to a layer as it appears within one particular manifest:
/// how to fetch it, plus the headers to send while doing so.
///
/// Layers are globally deduplicated by [`LayerRef::hash`] — the same layer
/// may be named by many manifests, and the core always scans it once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayerRef {
    /// The content address of this layer's *uncompressed* contents.
    pub hash: Digest,
    /// Where to fetch the (possibly compressed) layer bytes from.
    pub uri: String,
    /// Headers to attach to the fetch request, e.g. registry bearer tokens.
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
}

impl LayerRef {
    pub fn new(hash: Digest, uri: impl Into<String>) -> Self {
        Self {
            hash,
            uri: uri.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.headers.insert(key.into(), values);
        self
    }
}

impl std::hash::Hash for LayerRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

/// A content-addressed description of an image: a digest identifying the
/// whole image, plus the ordered layer references that compose it.
///
/// Layer order is the image's *application order*: index `0` is applied
/// first, and later layers shadow earlier ones. Two manifests with equal
/// [`Manifest::hash`] must have equal layer sequences — the hash is the
/// manifest's identity, not merely a checksum of convenience.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub hash: Digest,
    pub layers: Vec<LayerRef>,
}

impl Manifest {
    pub fn new(hash: Digest, layers: Vec<LayerRef>) -> Self {
        Self { hash, layers }
    }

    /// The layer references in this manifest, deduplicated by hash while
    /// preserving first-seen (application) order. A layer repeated within
    /// one manifest is scanned only once.
    pub fn unique_layers(&self) -> Vec<&LayerRef> {
        let mut seen = std::collections::HashSet::new();
        self.layers
            .iter()
            .filter(|l| seen.insert(&l.hash))
            .collect()
    }

    /// The zero-based index of `hash` within [`Manifest::layers`]'s
    /// application order, or `None` if the layer is not part of this
    /// manifest. Later (higher) indices are "newer" for coalescing and
    /// whiteout purposes.
    pub fn layer_index(&self, hash: &Digest) -> Option<usize> {
        self.layers.iter().position(|l| &l.hash == hash)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
