//! Digest type shared by every content-addressed identifier in claircore:
//! manifest hashes, layer hashes, and the digests attached to realized
//! layer bytes.

mod digest;
mod error;

pub use digest::{empty_sha256, Algorithm, Digest};
pub use error::{Error, Result};
