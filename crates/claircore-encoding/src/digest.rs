use std::cmp::Ordering;
use std::fmt::Display;

use data_encoding::HEXLOWER_PERMISSIVE;
use ring::digest::{Context, SHA256};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./digest_test.rs"]
mod digest_test;

/// The algorithm that produced a [`Digest`]'s checksum.
///
/// `Sha256` is the only algorithm required by the format; the others are
/// accepted whenever their checksum has the matching length, so that a
/// caller fed a digest computed by a different, compatible hasher does not
/// need to fail parsing outright.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    /// The canonical lowercase tag used in the `ALG:HEX` string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// The number of raw checksum bytes this algorithm produces
    pub fn checksum_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    fn parse(tag: &str) -> Result<Self> {
        match tag {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::UnknownAlgorithm {
                algorithm: other.to_owned(),
            }),
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digest is the content address of some byte stream: an algorithm tag
/// plus the raw checksum bytes it produced.
///
/// Digests are immutable and totally ordered lexicographically over
/// `(algorithm, checksum)`, which makes them usable directly as map keys
/// or sort keys without any extra wrapper.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    checksum: Vec<u8>,
}

impl Digest {
    /// Build a digest from an already-computed checksum.
    ///
    /// Fails if `checksum`'s length does not match what `algorithm` produces.
    pub fn new(algorithm: Algorithm, checksum: Vec<u8>) -> Result<Self> {
        if checksum.len() != algorithm.checksum_len() {
            return Err(Error::ChecksumLength {
                algorithm: algorithm.as_str().to_owned(),
                got: checksum.len(),
                wanted: algorithm.checksum_len(),
            });
        }
        Ok(Self {
            algorithm,
            checksum,
        })
    }

    /// This digest's hash algorithm
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The raw checksum bytes, without the algorithm tag
    pub fn checksum(&self) -> &[u8] {
        &self.checksum
    }

    /// Parse a digest from its canonical `algorithm:hex` string form
    pub fn parse(source: &str) -> Result<Self> {
        let (alg, hex) = source
            .split_once(':')
            .ok_or_else(|| Error::MissingSeparator {
                given: source.to_owned(),
            })?;
        let algorithm = Algorithm::parse(alg)?;
        let checksum = HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .map_err(Error::InvalidChecksum)?;
        Self::new(algorithm, checksum)
    }

    /// Hash the given bytes with sha256 and return the resulting digest
    pub fn sha256(bytes: &[u8]) -> Self {
        let mut ctx = Context::new(&SHA256);
        ctx.update(bytes);
        let out = ctx.finish();
        Self {
            algorithm: Algorithm::Sha256,
            checksum: out.as_ref().to_vec(),
        }
    }

    /// Read the given reader to completion, returning the sha256 digest
    /// of its contents.
    pub fn sha256_from_reader(mut reader: impl std::io::Read) -> std::io::Result<Self> {
        let mut ctx = Context::new(&SHA256);
        let mut buf = [0u8; 8192];
        loop {
            let count = reader.read(&mut buf)?;
            if count == 0 {
                break;
            }
            ctx.update(&buf[..count]);
        }
        Ok(Self {
            algorithm: Algorithm::Sha256,
            checksum: ctx.finish().as_ref().to_vec(),
        })
    }

    /// Read the given async reader to completion, returning the sha256
    /// digest of its contents.
    pub async fn sha256_from_async_reader(mut reader: impl AsyncRead + Unpin) -> Result<Self> {
        let mut ctx = Context::new(&SHA256);
        let mut buf = [0u8; 8192];
        loop {
            let count = reader.read(&mut buf).await.map_err(Error::ReadError)?;
            if count == 0 {
                break;
            }
            ctx.update(&buf[..count]);
        }
        Ok(Self {
            algorithm: Algorithm::Sha256,
            checksum: ctx.finish().as_ref().to_vec(),
        })
    }
}

impl Ord for Digest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.algorithm
            .cmp(&other.algorithm)
            .then_with(|| self.checksum.cmp(&other.checksum))
    }
}

impl PartialOrd for Digest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}",
            self.algorithm,
            HEXLOWER_PERMISSIVE.encode(&self.checksum)
        )
    }
}

impl std::str::FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Digest {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct DigestVisitor;
        impl serde::de::Visitor<'_> for DigestVisitor {
            type Value = Digest;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a digest string of the form 'algorithm:hex'")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Digest, E>
            where
                E: serde::de::Error,
            {
                Digest::parse(value).map_err(|err| serde::de::Error::custom(err.to_string()))
            }
        }
        deserializer.deserialize_str(DigestVisitor)
    }
}

/// SHA256 of the empty byte string, useful as a sentinel "nothing observed" value.
pub fn empty_sha256() -> Digest {
    Digest::sha256(b"")
}
