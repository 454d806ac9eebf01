use super::*;
use claircore_encoding::Digest;

fn digest(byte: u8) -> Digest {
    Digest::sha256(&[byte])
}

#[test]
fn surrogate_ids_round_trip_through_display_and_parse() {
    let id = PackageId::new(42);
    let parsed: PackageId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn surrogate_ids_serialize_as_json_strings() {
    let id = PackageId::new(7);
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"7\"");
    let back: PackageId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn id_allocator_never_repeats() {
    let alloc = IdAllocator::new();
    let a = alloc.next_package();
    let b = alloc.next_package();
    assert_ne!(a, b);
}

#[test]
fn whiteout_basename_matching_ignores_mid_string_occurrences() {
    assert!(File::is_regular_whiteout("a/b/.wh.foo"));
    assert!(!File::is_regular_whiteout("a/.wh.foo/b"));
    assert!(!File::is_regular_whiteout("a/b/foo.wh.bar"));
    assert!(File::is_opaque_whiteout("a/b/.wh..wh..opq"));
    assert!(!File::is_regular_whiteout("a/b/.wh..wh..opq"));
}

#[test]
fn check_invariants_rejects_dangling_environment_layer() {
    let mut report = IndexReport::new(digest(0));
    let pkg_id = PackageId::new(1);
    report.packages.insert(
        pkg_id,
        Package::binary("musl", "1.1.22-r3", "x86_64", "lib/apk/db/installed"),
    );
    report.environments.insert(
        pkg_id,
        vec![Environment {
            introduced_in: digest(9),
            package_db: "lib/apk/db/installed".into(),
            repository_ids: vec![],
            distribution_id: None,
        }],
    );
    let err = report.check_invariants(&[digest(1)]).unwrap_err();
    assert!(err.contains("not in manifest"), "{err}");
}

#[test]
fn check_invariants_rejects_source_package_as_environment_key() {
    let mut report = IndexReport::new(digest(0));
    let pkg_id = PackageId::new(1);
    report.packages.insert(pkg_id, Package::source("openssl", "1.1.1d"));
    report.environments.insert(
        pkg_id,
        vec![Environment {
            introduced_in: digest(1),
            package_db: String::new(),
            repository_ids: vec![],
            distribution_id: None,
        }],
    );
    let err = report.check_invariants(&[digest(1)]).unwrap_err();
    assert!(err.contains("top-level environments key"), "{err}");
}

#[test]
fn index_report_json_round_trips() {
    let mut report = IndexReport::new(digest(0)).with_state(State::IndexFinished);
    report.success = true;
    let pkg_id = PackageId::new(1);
    report.packages.insert(
        pkg_id,
        Package::binary("busybox", "1.30.1-r2", "x86_64", "lib/apk/db/installed"),
    );
    report.environments.insert(
        pkg_id,
        vec![Environment {
            introduced_in: digest(1),
            package_db: "lib/apk/db/installed".into(),
            repository_ids: vec![],
            distribution_id: None,
        }],
    );
    let json = serde_json::to_string(&report).unwrap();
    let back: IndexReport = serde_json::from_str(&json).unwrap();
    assert_eq!(report, back);
}
