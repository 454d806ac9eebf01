//! Turning a [`LayerRef`] into bytes a scanner can read (§4.2).
//!
//! A [`Realizer`] only makes a layer's uncompressed contents addressable;
//! it performs no parsing of its own. The reference [`RemoteRealizer`]
//! fetches by URI with the layer's attached headers, decompresses (at
//! least gzip), verifies the result against [`LayerRef::hash`], and spools
//! the unpacked tree into an in-memory [`MemoryLayerFs`] — layers in this
//! engine are small package-database snapshots, not multi-gigabyte
//! application filesystems, so holding the unpacked tree in memory is the
//! same simplifying choice [`MemoryLayerFs`] itself documents.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use http_body_util::BodyExt;
use hyper::header::{HeaderName, HeaderValue};
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio_util::sync::CancellationToken;

use crate::digest::Digest;
use crate::layer::{Layer, MemoryLayerFs};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./realize_test.rs"]
mod realize_test;

/// Fetches/materializes layer bytes so a [`Layer`]'s filesystem view can
/// serve reads. After a successful `realize`, every layer passed in has a
/// working `fs()`. `close` releases any handles and must be idempotent.
#[async_trait]
pub trait Realizer: Send + Sync {
    async fn realize(&self, ctx: CancellationToken, layers: &[Layer]) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Hands out per-request [`Realizer`]s so global resources (a shared HTTP
/// client, a temp directory) can live across many `Index` calls without
/// each call standing up its own.
pub trait FetchArena: Send + Sync {
    fn realizer(&self) -> Arc<dyn Realizer>;
}

/// The reference remote realizer: fetches each layer's (possibly
/// gzip-compressed) bytes over HTTP using the layer's attached headers,
/// decompresses, unpacks the tar stream into an in-memory path map, and
/// verifies the result's sha256 against [`crate::manifest::LayerRef::hash`].
pub struct RemoteRealizer {
    client: Client<HttpConnector, http_body_util::Full<hyper::body::Bytes>>,
}

impl Default for RemoteRealizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteRealizer {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }

    async fn fetch(&self, layer_ref: &crate::manifest::LayerRef) -> Result<Vec<u8>> {
        let uri: hyper::Uri = layer_ref
            .uri
            .parse()
            .map_err(|e| Error::Realize {
                digest: layer_ref.hash.clone(),
                reason: format!("invalid uri {}: {e}", layer_ref.uri),
            })?;
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, values) in &layer_ref.headers {
            for value in values {
                let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::Realize {
                    digest: layer_ref.hash.clone(),
                    reason: format!("invalid header name {name}: {e}"),
                })?;
                let header_value = HeaderValue::from_str(value).map_err(|e| Error::Realize {
                    digest: layer_ref.hash.clone(),
                    reason: format!("invalid header value for {name}: {e}"),
                })?;
                builder = builder.header(header_name, header_value);
            }
        }
        let request = builder
            .body(http_body_util::Full::new(hyper::body::Bytes::new()))
            .map_err(|e| Error::Realize {
                digest: layer_ref.hash.clone(),
                reason: e.to_string(),
            })?;
        let response = self.client.request(request).await.map_err(|e| {
            // Connection/address failures are what the layer scanner's
            // "RPC scanner" skip path is narrowly about; realize errors
            // from an unreachable registry are always fatal for this call.
            Error::Realize {
                digest: layer_ref.hash.clone(),
                reason: format!("fetch failed: {e}"),
            }
        })?;
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::Realize {
                digest: layer_ref.hash.clone(),
                reason: format!("reading response body: {e}"),
            })?
            .to_bytes();
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Realizer for RemoteRealizer {
    async fn realize(&self, ctx: CancellationToken, layers: &[Layer]) -> Result<()> {
        for layer in layers {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if layer.is_realized() {
                continue;
            }
            let compressed = self.fetch(layer.layer_ref()).await?;
            let decompressed = decompress(&compressed, &layer.layer_ref().hash)?;
            let digest = Digest::sha256(&decompressed);
            if digest != layer.layer_ref().hash {
                return Err(Error::DigestMismatch {
                    expected: layer.layer_ref().hash.clone(),
                    actual: digest,
                });
            }
            let files = unpack_tar(&decompressed, &layer.layer_ref().hash)?;
            layer.realize_with(Arc::new(MemoryLayerFs::new(files)));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Decompress `bytes` as gzip if it carries the gzip magic number
/// (`1f 8b`); otherwise assume it is already an uncompressed tar stream.
fn decompress(bytes: &[u8], digest: &Digest) -> Result<Vec<u8>> {
    if bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| Error::Realize {
            digest: digest.clone(),
            reason: format!("gzip decompression failed: {e}"),
        })?;
        Ok(out)
    } else {
        Ok(bytes.to_vec())
    }
}

fn unpack_tar(bytes: &[u8], digest: &Digest) -> Result<HashMap<String, Vec<u8>>> {
    let mut archive = tar::Archive::new(bytes);
    let mut files = HashMap::new();
    let entries = archive.entries().map_err(|e| Error::Realize {
        digest: digest.clone(),
        reason: format!("reading tar entries: {e}"),
    })?;
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::Realize {
            digest: digest.clone(),
            reason: format!("reading tar entry: {e}"),
        })?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| Error::Realize {
                digest: digest.clone(),
                reason: format!("invalid tar entry path: {e}"),
            })?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).map_err(|e| Error::Realize {
            digest: digest.clone(),
            reason: format!("reading tar entry contents: {e}"),
        })?;
        files.insert(path, contents);
    }
    Ok(files)
}

/// A [`Realizer`] for tests and callers who already hold layer bytes
/// in-process: it does no fetching, just installs a caller-provided
/// [`MemoryLayerFs`] for each layer whose hash it recognizes.
#[derive(Default)]
pub struct StaticRealizer {
    trees: HashMap<Digest, HashMap<String, Vec<u8>>>,
}

impl StaticRealizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, hash: Digest, files: HashMap<String, Vec<u8>>) -> Self {
        self.trees.insert(hash, files);
        self
    }
}

#[async_trait]
impl Realizer for StaticRealizer {
    async fn realize(&self, ctx: CancellationToken, layers: &[Layer]) -> Result<()> {
        for layer in layers {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if layer.is_realized() {
                continue;
            }
            let files = self.trees.get(layer.hash()).cloned().ok_or_else(|| Error::Realize {
                digest: layer.hash().clone(),
                reason: "no fixture registered for this layer".to_string(),
            })?;
            layer.realize_with(Arc::new(MemoryLayerFs::new(files)));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
