//! Re-exports the digest type shared by manifests, layers, and realized
//! layer content. Kept as its own crate (`claircore-encoding`) so that
//! downstream scanner/matcher crates can depend on the digest format
//! without pulling in the rest of the indexing engine.

pub use claircore_encoding::{empty_sha256, Algorithm, Digest};
