use super::*;
use crate::manifest::LayerRef;
use crate::report::{Package, State};
use crate::scanner::Kind;
use claircore_encoding::Digest;

fn digest(byte: u8) -> Digest {
    Digest::sha256(&[byte])
}

fn scanner() -> ScannerMeta {
    ScannerMeta::new("apk", "1", Kind::Package)
}

#[tokio::test]
async fn layer_scanned_flips_false_to_true_exactly_once() {
    let store = InMemoryStore::new();
    let layer = digest(1);
    let s = scanner();
    assert!(!store.layer_scanned(&layer, &s).await.unwrap());
    store
        .index_packages(&[Package::binary("musl", "1.1.22-r3", "x86_64", "db")], &layer, &s)
        .await
        .unwrap();
    store.set_layer_scanned(&layer, &s).await.unwrap();
    assert!(store.layer_scanned(&layer, &s).await.unwrap());
    let facts = store.packages_by_layer(&layer, &[s]).await.unwrap();
    assert_eq!(facts.len(), 1);
}

#[tokio::test]
async fn double_write_of_packages_for_same_layer_scanner_is_rejected() {
    let store = InMemoryStore::new();
    let layer = digest(1);
    let s = scanner();
    store.index_packages(&[], &layer, &s).await.unwrap();
    let err = store.index_packages(&[], &layer, &s).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
}

#[tokio::test]
async fn double_write_of_distributions_for_same_layer_scanner_is_rejected() {
    let store = InMemoryStore::new();
    let layer = digest(1);
    let s = ScannerMeta::new("os-release", "1", Kind::Distribution);
    store.index_distributions(&[], &layer, &s).await.unwrap();
    let err = store.index_distributions(&[], &layer, &s).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
}

#[tokio::test]
async fn double_write_of_repositories_for_same_layer_scanner_is_rejected() {
    let store = InMemoryStore::new();
    let layer = digest(1);
    let s = ScannerMeta::new("apk-repository", "1", Kind::Repository);
    store.index_repositories(&[], &layer, &s).await.unwrap();
    let err = store.index_repositories(&[], &layer, &s).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
}

#[tokio::test]
async fn double_write_of_files_for_same_layer_scanner_is_rejected() {
    let store = InMemoryStore::new();
    let layer = digest(1);
    let s = ScannerMeta::new("whiteout", "1", Kind::File);
    store.index_files(&[], &layer, &s).await.unwrap();
    let err = store.index_files(&[], &layer, &s).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
}

#[tokio::test]
async fn manifest_scanned_requires_every_scanner_in_the_set() {
    let store = InMemoryStore::new();
    let manifest = Manifest::new(digest(0), vec![LayerRef::new(digest(1), "oci://x")]);
    let s1 = ScannerMeta::new("apk", "1", Kind::Package);
    let s2 = ScannerMeta::new("os-release", "1", Kind::Distribution);
    let report = IndexReport::new(manifest.hash.clone()).with_state(State::IndexFinished);

    assert!(!store
        .manifest_scanned(&manifest.hash, std::slice::from_ref(&s1))
        .await
        .unwrap());

    store
        .set_index_finished(&report, std::slice::from_ref(&s1))
        .await
        .unwrap();
    assert!(store
        .manifest_scanned(&manifest.hash, std::slice::from_ref(&s1))
        .await
        .unwrap());
    assert!(!store
        .manifest_scanned(&manifest.hash, &[s1.clone(), s2.clone()])
        .await
        .unwrap());

    store
        .set_index_finished(&report, &[s1.clone(), s2.clone()])
        .await
        .unwrap();
    assert!(store.manifest_scanned(&manifest.hash, &[s1, s2]).await.unwrap());
}

#[tokio::test]
async fn index_report_read_after_write_observes_latest() {
    let store = InMemoryStore::new();
    let mut report = IndexReport::new(digest(0));
    report.state = State::FetchLayers;
    store.set_index_report(&report).await.unwrap();
    report.state = State::IndexLayers;
    store.set_index_report(&report).await.unwrap();
    let (got, _) = store.index_report(&digest(0)).await.unwrap();
    assert_eq!(got.unwrap().state, State::IndexLayers);
}

#[tokio::test]
async fn delete_manifests_clears_reports_and_scanned_flags() {
    let store = InMemoryStore::new();
    let report = IndexReport::new(digest(0));
    store.set_index_report(&report).await.unwrap();
    store.delete_manifests(&[digest(0)]).await.unwrap();
    let (got, seen) = store.index_report(&digest(0)).await.unwrap();
    assert!(got.is_none());
    assert!(!seen);
}
