use std::collections::HashMap;

use super::*;
use crate::digest::Digest;
use crate::manifest::LayerRef;

fn layer_digest(byte: u8) -> Digest {
    Digest::sha256(&[byte])
}

fn manifest_of(layers: &[Digest]) -> Manifest {
    Manifest::new(
        Digest::sha256(b"manifest"),
        layers.iter().map(|h| LayerRef::new(h.clone(), "oci://x")).collect(),
    )
}

fn pkg_with_filepath(name: &str, filepath: &str) -> Package {
    let mut pkg = Package::binary(name, "1.0.0", "x86_64", "lib/apk/db/installed");
    pkg.filepath = filepath.to_string();
    pkg
}

fn env_at(layer: Digest) -> Environment {
    Environment {
        introduced_in: layer,
        package_db: "lib/apk/db/installed".to_string(),
        repository_ids: Vec::new(),
        distribution_id: None,
    }
}

fn whiteout_file(path: &str) -> File {
    File { path: path.to_string(), kind: FileKind::Whiteout }
}

#[test]
fn whiteout_delete_removes_the_named_package_but_not_its_sibling() {
    let l0 = layer_digest(0);
    let l1 = layer_digest(1);
    let manifest = manifest_of(&[l0.clone(), l1.clone()]);

    let a_id = PackageId::new(1);
    let b_id = PackageId::new(2);
    let mut packages = HashMap::new();
    packages.insert(a_id, pkg_with_filepath("a_package", "a/path/site-packages/a_package/METADATA"));
    packages.insert(b_id, pkg_with_filepath("b_package", "a/path/site-packages/b_package/METADATA"));
    let mut environments = HashMap::new();
    environments.insert(a_id, vec![env_at(l0.clone())]);
    environments.insert(b_id, vec![env_at(l0.clone())]);

    let mut files = HashMap::new();
    files.insert(l1.clone(), vec![whiteout_file("a/path/site-packages/.wh.a_package")]);

    resolve(&manifest, &mut packages, &mut environments, &files);

    assert!(!packages.contains_key(&a_id));
    assert!(packages.contains_key(&b_id));
    assert!(!environments.contains_key(&a_id));
}

#[test]
fn opaque_whiteout_clears_every_older_sibling_but_not_the_directory_itself() {
    let l0 = layer_digest(0);
    let l1 = layer_digest(1);
    let manifest = manifest_of(&[l0.clone(), l1.clone()]);

    let a_id = PackageId::new(1);
    let b_id = PackageId::new(2);
    let mut packages = HashMap::new();
    packages.insert(a_id, pkg_with_filepath("a_package", "site-packages/a_package/METADATA"));
    packages.insert(b_id, pkg_with_filepath("b_package", "site-packages/b_package/METADATA"));
    let mut environments = HashMap::new();
    environments.insert(a_id, vec![env_at(l0.clone())]);
    environments.insert(b_id, vec![env_at(l0.clone())]);

    let mut files = HashMap::new();
    files.insert(l1.clone(), vec![whiteout_file("site-packages/.wh..wh..opq")]);

    resolve(&manifest, &mut packages, &mut environments, &files);

    assert!(packages.is_empty());
    assert!(environments.is_empty());
}

#[test]
fn opaque_whiteout_does_not_delete_a_package_introduced_in_the_same_or_a_later_layer() {
    let l0 = layer_digest(0);
    let l1 = layer_digest(1);
    let manifest = manifest_of(&[l0.clone(), l1.clone()]);

    let a_id = PackageId::new(1);
    let mut packages = HashMap::new();
    packages.insert(a_id, pkg_with_filepath("a_package", "site-packages/a_package/METADATA"));
    let mut environments = HashMap::new();
    environments.insert(a_id, vec![env_at(l1.clone())]);

    let mut files = HashMap::new();
    files.insert(l1.clone(), vec![whiteout_file("site-packages/.wh..wh..opq")]);

    resolve(&manifest, &mut packages, &mut environments, &files);

    assert!(packages.contains_key(&a_id));
}

#[test]
fn reinstalling_a_package_in_a_layer_newer_than_the_whiteout_survives() {
    let l0 = layer_digest(0);
    let l1 = layer_digest(1);
    let l2 = layer_digest(2);
    let manifest = manifest_of(&[l0.clone(), l1.clone(), l2.clone()]);

    let pkg_id = PackageId::new(1);
    let mut packages = HashMap::new();
    packages.insert(pkg_id, pkg_with_filepath("pkg", "lib/apk/pkg/METADATA"));
    let mut environments = HashMap::new();
    // The coalescer attributed this package's effective environment to
    // layer2, the reinstall — not layer0, the original install.
    environments.insert(pkg_id, vec![env_at(l2.clone())]);

    let mut files = HashMap::new();
    files.insert(l1.clone(), vec![whiteout_file("lib/apk/.wh.pkg")]);

    resolve(&manifest, &mut packages, &mut environments, &files);

    assert!(packages.contains_key(&pkg_id));
}

#[test]
fn a_whiteout_in_the_same_layer_as_the_package_does_not_delete_it() {
    let l0 = layer_digest(0);
    let manifest = manifest_of(&[l0.clone()]);

    let pkg_id = PackageId::new(1);
    let mut packages = HashMap::new();
    packages.insert(pkg_id, pkg_with_filepath("pkg", "lib/apk/pkg/METADATA"));
    let mut environments = HashMap::new();
    environments.insert(pkg_id, vec![env_at(l0.clone())]);

    let mut files = HashMap::new();
    files.insert(l0.clone(), vec![whiteout_file("lib/apk/.wh.pkg")]);

    resolve(&manifest, &mut packages, &mut environments, &files);

    assert!(packages.contains_key(&pkg_id));
}

#[test]
fn a_package_with_no_filepath_is_immune_to_whiteout_deletion() {
    let l0 = layer_digest(0);
    let l1 = layer_digest(1);
    let manifest = manifest_of(&[l0.clone(), l1.clone()]);

    let pkg_id = PackageId::new(1);
    let mut packages = HashMap::new();
    packages.insert(pkg_id, Package::binary("pkg", "1.0.0", "x86_64", "lib/apk/db/installed"));
    let mut environments = HashMap::new();
    environments.insert(pkg_id, vec![env_at(l0.clone())]);

    let mut files = HashMap::new();
    files.insert(l1.clone(), vec![whiteout_file("lib/apk/db/.wh.pkg")]);

    resolve(&manifest, &mut packages, &mut environments, &files);

    assert!(packages.contains_key(&pkg_id));
}

#[test]
fn whiteout_basename_must_match_exactly_not_just_contain_wh_mid_string() {
    let l0 = layer_digest(0);
    let l1 = layer_digest(1);
    let manifest = manifest_of(&[l0.clone(), l1.clone()]);

    let pkg_id = PackageId::new(1);
    let mut packages = HashMap::new();
    packages.insert(pkg_id, pkg_with_filepath("pkg", "lib/apk/pkg/METADATA"));
    let mut environments = HashMap::new();
    environments.insert(pkg_id, vec![env_at(l0.clone())]);

    let mut files = HashMap::new();
    // Not a whiteout: ".wh." does not appear as a basename prefix.
    files.insert(l1.clone(), vec![whiteout_file("lib/apk/pkg.wh.backup")]);

    resolve(&manifest, &mut packages, &mut environments, &files);

    assert!(packages.contains_key(&pkg_id));
}

#[test]
fn empty_file_map_leaves_every_package_untouched() {
    let l0 = layer_digest(0);
    let manifest = manifest_of(&[l0.clone()]);
    let pkg_id = PackageId::new(1);
    let mut packages = HashMap::new();
    packages.insert(pkg_id, pkg_with_filepath("pkg", "lib/apk/pkg/METADATA"));
    let mut environments = HashMap::new();
    environments.insert(pkg_id, vec![env_at(l0.clone())]);

    resolve(&manifest, &mut packages, &mut environments, &HashMap::new());

    assert!(packages.contains_key(&pkg_id));
}

