//! The top-level controller (C8): drives one manifest through the
//! checkpointed state machine described in §4.8, fanning per-layer scan
//! work out (C6) and folding results through each active ecosystem's
//! coalescer (C7) plus the whiteout resolver (§4.7).
//!
//! [`Controller::index`] is the crate's single public entrypoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, TryStreamExt};
use futures::FutureExt;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::coalesce::ReportFragment;
use crate::config::Config;
use crate::ecosystem::Ecosystem;
use crate::layer::Layer;
use crate::lock::{AdvisoryLockService, LockHolder};
use crate::manifest::Manifest;
use crate::realize::FetchArena;
use crate::report::{IdAllocator, IndexReport, State};
use crate::scanner::{DistributionScanner, FileScanner, PackageScanner, RepositoryScanner, ScannerMeta};
use crate::store::{gather_layer_artifacts, Store};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./indexer_test.rs"]
mod indexer_test;

/// Drives `Index` calls against a fixed set of [`Ecosystem`]s, using a
/// caller-supplied [`Store`], [`AdvisoryLockService`], and [`FetchArena`].
/// One `Controller` is meant to be long-lived and shared (its semaphore is
/// the process-wide admission limit for concurrent `Index` calls).
pub struct Controller {
    store: Arc<dyn Store>,
    locks: Arc<dyn AdvisoryLockService>,
    fetch_arena: Arc<dyn FetchArena>,
    ecosystems: Vec<Ecosystem>,
    config: Config,
    admission: Semaphore,
    /// Each `index()` call is a distinct lock holder, so the advisory lock
    /// service can tell two overlapping `Index` calls for the same manifest
    /// apart from one call recursing on its own lock.
    next_holder: AtomicU64,
}

impl Controller {
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<dyn AdvisoryLockService>,
        fetch_arena: Arc<dyn FetchArena>,
        ecosystems: Vec<Ecosystem>,
        config: Config,
    ) -> Self {
        let admission = Semaphore::new(config.index_concurrency.max(1));
        Self {
            store,
            locks,
            fetch_arena,
            ecosystems,
            config,
            admission,
            next_holder: AtomicU64::new(0),
        }
    }

    /// Index `manifest`, returning the final (or short-circuited) report.
    /// Concurrent calls for the *same* manifest serialize on its advisory
    /// lock; calls for different manifests run in parallel up to
    /// [`Config::index_concurrency`].
    #[tracing::instrument(skip_all, fields(manifest = %manifest.hash))]
    pub async fn index(&self, ctx: CancellationToken, manifest: &Manifest) -> Result<IndexReport> {
        let _permit = self.admission.acquire().await.expect("admission semaphore never closes");
        let lock_key = manifest.hash.to_string();
        let holder = LockHolder::new(self.next_holder.fetch_add(1, Ordering::Relaxed));
        let (lock_ctx, guard) = self.locks.lock(holder, ctx.clone(), &lock_key).await?;
        let result = self.drive(lock_ctx, manifest).await;
        guard.release();
        result
    }

    /// Bounds one store call to [`Config::store_operation_timeout_ms`],
    /// surfacing a timeout as [`Error::DeadlineExceeded`] (retryable) rather
    /// than letting a wedged backend hang the state machine forever.
    async fn store_call<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let timeout = Duration::from_millis(self.config.store_operation_timeout_ms.max(1));
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded),
        }
    }

    fn all_scanner_metas(&self) -> Result<Vec<ScannerMeta>> {
        let mut metas = Vec::new();
        for eco in &self.ecosystems {
            metas.extend(eco.package_scanners()?.iter().map(|s| s.meta()));
            metas.extend(eco.distribution_scanners()?.iter().map(|s| s.meta()));
            metas.extend(eco.repository_scanners()?.iter().map(|s| s.meta()));
            metas.extend(eco.file_scanners()?.iter().map(|s| s.meta()));
        }
        Ok(metas)
    }

    async fn drive(&self, ctx: CancellationToken, manifest: &Manifest) -> Result<IndexReport> {
        let all_scanners = self.all_scanner_metas()?;
        self.store_call(self.store.register_scanners(&all_scanners)).await?;

        let mut report = IndexReport::new(manifest.hash.clone());
        let mut needed_scanners = all_scanners.clone();
        let mut realized_layers: Vec<Layer> = Vec::new();
        let mut disappeared_retries = 0u32;
        let mut state = State::CheckManifest;

        loop {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            tracing::info!(manifest = %manifest.hash, state = %state, "entering indexer state");

            let outcome = self
                .run_state(&ctx, manifest, state, &all_scanners, &mut report, &mut needed_scanners, &mut realized_layers, &mut disappeared_retries)
                .await;

            match outcome {
                Ok(next) => {
                    report.state = next;
                    let _ = self.store_call(self.store.set_index_report(&report)).await;
                    if next.is_terminal() {
                        return Ok(report);
                    }
                    state = next;
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) if err.is_retryable() => {
                    tracing::warn!(manifest = %manifest.hash, state = %state, error = %err, "retrying indexer state");
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(retry_jitter(self.config.retry_backoff_min_ms, self.config.retry_backoff_max_ms)) => {}
                    }
                }
                Err(err) => {
                    report.fail(&err);
                    let _ = self.store_call(self.store.set_index_report(&report)).await;
                    return Err(err);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_state(
        &self,
        ctx: &CancellationToken,
        manifest: &Manifest,
        state: State,
        all_scanners: &[ScannerMeta],
        report: &mut IndexReport,
        needed_scanners: &mut Vec<ScannerMeta>,
        realized_layers: &mut Vec<Layer>,
        disappeared_retries: &mut u32,
    ) -> Result<State> {
        match state {
            State::CheckManifest => {
                if self.store_call(self.store.manifest_scanned(&manifest.hash, all_scanners)).await? {
                    Ok(State::SeenManifest)
                } else {
                    Ok(State::UnseenManifest)
                }
            }

            State::UnseenManifest => {
                let mut still_needed = Vec::with_capacity(needed_scanners.len());
                for scanner in needed_scanners.iter() {
                    if !self.store_call(self.store.manifest_scanned(&manifest.hash, std::slice::from_ref(scanner))).await? {
                        still_needed.push(scanner.clone());
                    }
                }
                *needed_scanners = still_needed;
                self.store_call(self.store.persist_manifest(manifest)).await?;
                Ok(State::FetchLayers)
            }

            State::SeenManifest => {
                let (persisted, _ever_seen) = self.store_call(self.store.index_report(&manifest.hash)).await?;
                match persisted {
                    Some(persisted_report) => {
                        // `manifest_scanned` only goes true once
                        // `set_index_finished` has run, so the report we just
                        // loaded already carries `State::IndexFinished` — keep
                        // it rather than relabeling it with the transient
                        // state that got us here.
                        let loaded_state = persisted_report.state;
                        *report = persisted_report;
                        Ok(loaded_state)
                    }
                    None => {
                        if *disappeared_retries >= self.config.max_manifest_disappeared_retries {
                            return Err(Error::ManifestDisappeared(manifest.hash.clone()));
                        }
                        *disappeared_retries += 1;
                        Err(Error::ManifestDisappeared(manifest.hash.clone()).retryable())
                    }
                }
            }

            State::FetchLayers => {
                let mut layers = Vec::new();
                for layer_ref in manifest.unique_layers() {
                    let mut still_needed = false;
                    for scanner in needed_scanners.iter() {
                        if !self.store_call(self.store.layer_scanned(&layer_ref.hash, scanner)).await? {
                            still_needed = true;
                            break;
                        }
                    }
                    if still_needed {
                        layers.push(Layer::new(layer_ref.clone()));
                    }
                }
                self.fetch_arena.realizer().realize(ctx.clone(), &layers).await?;
                *realized_layers = layers;
                Ok(State::IndexLayers)
            }

            State::IndexLayers => {
                self.scan_layers(ctx, realized_layers.as_slice(), needed_scanners.as_slice()).await?;
                Ok(State::Coalesce)
            }

            State::Coalesce => {
                let layer_hashes: Vec<_> = manifest.unique_layers().into_iter().map(|l| l.hash.clone()).collect();
                let ids = IdAllocator::new();
                let mut merged = ReportFragment::default();
                for eco in &self.ecosystems {
                    let mut eco_scanners = Vec::new();
                    eco_scanners.extend(eco.package_scanners()?.iter().map(|s| s.meta()));
                    eco_scanners.extend(eco.distribution_scanners()?.iter().map(|s| s.meta()));
                    eco_scanners.extend(eco.repository_scanners()?.iter().map(|s| s.meta()));
                    eco_scanners.extend(eco.file_scanners()?.iter().map(|s| s.meta()));

                    let artifacts = self.store_call(gather_layer_artifacts(self.store.as_ref(), &layer_hashes, &eco_scanners)).await?;
                    let package_count: usize = artifacts.iter().map(|a| a.packages.len()).sum();
                    let fragment = eco.coalescer().coalesce(manifest, &artifacts, &ids).await?;
                    tracing::debug!(
                        ecosystem = eco.name(),
                        packages_in = package_count,
                        packages_out = fragment.packages.len(),
                        "coalesce pass complete"
                    );
                    merged.merge(fragment);
                }

                crate::whiteout::resolve(manifest, &mut merged.packages, &mut merged.environments, &merged.files);

                report.packages = merged.packages;
                report.distributions = merged.distributions;
                report.repositories = merged.repositories;
                report.environments = merged.environments;
                report.files = merged.files;
                Ok(State::IndexManifest)
            }

            State::IndexManifest => {
                report.success = true;
                report.err.clear();
                self.store_call(self.store.index_manifest(report)).await?;
                Ok(State::IndexFinished)
            }

            State::IndexFinished => {
                self.store_call(self.store.set_index_finished(report, all_scanners)).await?;
                Ok(State::IndexFinished)
            }
        }
    }

    /// The Layer Scanner (C6): dedup is the caller's responsibility
    /// (`layers` is already [`Manifest::unique_layers`]); this fans every
    /// remaining `(layer, scanner)` unit out across a bounded pool and
    /// surfaces only the first error, dropping whatever units have not yet
    /// completed. Racing every poll against `ctx` means a cancellation
    /// lands promptly rather than waiting for the slowest in-flight unit.
    async fn scan_layers(&self, ctx: &CancellationToken, layers: &[Layer], needed: &[ScannerMeta]) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.scan_concurrency.max(1)));
        let mut units = FuturesUnordered::new();

        for eco in &self.ecosystems {
            for scanner in eco.package_scanners()? {
                if !needed.contains(&scanner.meta()) {
                    continue;
                }
                for layer in layers {
                    let (layer, scanner, semaphore, ctx) = (layer.clone(), scanner.clone(), semaphore.clone(), ctx.clone());
                    units.push(
                        async move {
                            let _permit = semaphore.acquire().await.expect("scan semaphore never closes");
                            self.scan_package_unit(ctx, &layer, &scanner).await
                        }
                        .boxed(),
                    );
                }
            }
            for scanner in eco.distribution_scanners()? {
                if !needed.contains(&scanner.meta()) {
                    continue;
                }
                for layer in layers {
                    let (layer, scanner, semaphore, ctx) = (layer.clone(), scanner.clone(), semaphore.clone(), ctx.clone());
                    units.push(
                        async move {
                            let _permit = semaphore.acquire().await.expect("scan semaphore never closes");
                            self.scan_distribution_unit(ctx, &layer, &scanner).await
                        }
                        .boxed(),
                    );
                }
            }
            for scanner in eco.repository_scanners()? {
                if !needed.contains(&scanner.meta()) {
                    continue;
                }
                for layer in layers {
                    let (layer, scanner, semaphore, ctx) = (layer.clone(), scanner.clone(), semaphore.clone(), ctx.clone());
                    units.push(
                        async move {
                            let _permit = semaphore.acquire().await.expect("scan semaphore never closes");
                            self.scan_repository_unit(ctx, &layer, &scanner).await
                        }
                        .boxed(),
                    );
                }
            }
            for scanner in eco.file_scanners()? {
                if !needed.contains(&scanner.meta()) {
                    continue;
                }
                for layer in layers {
                    let (layer, scanner, semaphore, ctx) = (layer.clone(), scanner.clone(), semaphore.clone(), ctx.clone());
                    units.push(
                        async move {
                            let _permit = semaphore.acquire().await.expect("scan semaphore never closes");
                            self.scan_file_unit(ctx, &layer, &scanner).await
                        }
                        .boxed(),
                    );
                }
            }
        }

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Err(Error::Cancelled),
                next = units.try_next() => {
                    if next?.is_none() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn scan_package_unit(&self, ctx: CancellationToken, layer: &Layer, scanner: &Arc<dyn PackageScanner>) -> Result<()> {
        let meta = scanner.meta();
        if self.store_call(self.store.layer_scanned(layer.hash(), &meta)).await? {
            tracing::debug!(scanner = %meta, layer = %layer.hash(), "scan unit already complete, skipping");
            return Ok(());
        }
        tracing::debug!(scanner = %meta, layer = %layer.hash(), "scan unit starting");
        let packages = match scanner.scan(ctx, layer).await {
            Ok(packages) => packages,
            Err(err) => return Self::handle_scan_error(scanner.is_rpc(), &meta, layer, err),
        };
        self.store_call(self.store.index_packages(&packages, layer.hash(), &meta)).await?;
        if let Some(provider) = scanner.as_default_repository_provider() {
            if !packages.is_empty() {
                let default_repo = provider.default_repository().await?;
                self.store_call(self.store.index_repositories(std::slice::from_ref(&default_repo), layer.hash(), &meta)).await?;
            }
        }
        self.store_call(self.store.set_layer_scanned(layer.hash(), &meta)).await?;
        tracing::debug!(scanner = %meta, layer = %layer.hash(), found = packages.len(), "scan unit complete");
        Ok(())
    }

    async fn scan_distribution_unit(&self, ctx: CancellationToken, layer: &Layer, scanner: &Arc<dyn DistributionScanner>) -> Result<()> {
        let meta = scanner.meta();
        if self.store_call(self.store.layer_scanned(layer.hash(), &meta)).await? {
            return Ok(());
        }
        let dists = match scanner.scan(ctx, layer).await {
            Ok(dists) => dists,
            Err(err) => return Self::handle_scan_error(scanner.is_rpc(), &meta, layer, err),
        };
        self.store_call(self.store.index_distributions(&dists, layer.hash(), &meta)).await?;
        self.store_call(self.store.set_layer_scanned(layer.hash(), &meta)).await?;
        Ok(())
    }

    async fn scan_repository_unit(&self, ctx: CancellationToken, layer: &Layer, scanner: &Arc<dyn RepositoryScanner>) -> Result<()> {
        let meta = scanner.meta();
        if self.store_call(self.store.layer_scanned(layer.hash(), &meta)).await? {
            return Ok(());
        }
        let repos = match scanner.scan(ctx, layer).await {
            Ok(repos) => repos,
            Err(err) => return Self::handle_scan_error(scanner.is_rpc(), &meta, layer, err),
        };
        self.store_call(self.store.index_repositories(&repos, layer.hash(), &meta)).await?;
        self.store_call(self.store.set_layer_scanned(layer.hash(), &meta)).await?;
        Ok(())
    }

    async fn scan_file_unit(&self, ctx: CancellationToken, layer: &Layer, scanner: &Arc<dyn FileScanner>) -> Result<()> {
        let meta = scanner.meta();
        if self.store_call(self.store.layer_scanned(layer.hash(), &meta)).await? {
            return Ok(());
        }
        let files = match scanner.scan(ctx, layer).await {
            Ok(files) => files,
            Err(err) => return Self::handle_scan_error(scanner.is_rpc(), &meta, layer, err),
        };
        self.store_call(self.store.index_files(&files, layer.hash(), &meta)).await?;
        self.store_call(self.store.set_layer_scanned(layer.hash(), &meta)).await?;
        Ok(())
    }

    /// §4.5 step 4c: an RPC-style scanner whose endpoint could not be
    /// reached is demoted to a skip rather than a fatal error. Every other
    /// scanner error is wrapped with scanner/layer context and halts
    /// scheduling.
    fn handle_scan_error(is_rpc: bool, meta: &ScannerMeta, layer: &Layer, err: Error) -> Result<()> {
        if is_rpc && matches!(err, Error::Http(_)) {
            tracing::warn!(scanner = %meta, layer = %layer.hash(), error = %err, "rpc scanner unreachable, skipping");
            return Ok(());
        }
        Err(Error::Scanner {
            scanner: meta.to_string(),
            layer: layer.hash().clone(),
            reason: err.to_string(),
        })
    }
}

fn retry_jitter(min_ms: u64, max_ms: u64) -> Duration {
    let min_ms = min_ms.max(1);
    let max_ms = max_ms.max(min_ms);
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}
