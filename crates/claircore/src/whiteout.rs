//! The Whiteout Resolver (§4.7): a post-coalesce pass applying OCI
//! filesystem-layering semantics to the merged report.
//!
//! A whiteout file at `<dir>/.wh.<name>` in layer `W` declares the sibling
//! `<dir>/<name>` deleted in every layer strictly older than `W`. A file at
//! `<dir>/.wh..wh..opq` declares every *sibling* inside `<dir>` in layers
//! strictly older than `W` deleted, but leaves `<dir>` itself (and anything
//! introduced in `W` or later) alone. Whiteouts never delete a package
//! introduced in their own layer — the tar stream applies the whiteout
//! first, then re-adds whatever follows it.

use std::collections::HashMap;

use crate::manifest::Manifest;
use crate::report::{Environment, File, FileKind, Package, PackageId};

#[cfg(test)]
#[path = "./whiteout_test.rs"]
mod whiteout_test;

/// One whiteout file's effective deletion target, decomposed from its raw
/// path so matching doesn't re-derive it per candidate package.
struct Whiteout {
    /// The directory the whiteout lives in, component-split.
    dir: Vec<String>,
    /// `None` for an opaque whiteout (deletes every sibling in `dir`);
    /// `Some(name)` for a regular whiteout (deletes only `dir/name`).
    target_name: Option<String>,
    /// The zero-based manifest layer index this whiteout was observed in.
    layer_index: usize,
}

fn split_components(path: &str) -> Vec<String> {
    path.split('/').filter(|c| !c.is_empty()).map(str::to_string).collect()
}

fn parse_whiteouts(files_by_layer: &HashMap<crate::digest::Digest, Vec<File>>, manifest: &Manifest) -> Vec<Whiteout> {
    let mut out = Vec::new();
    for (layer_hash, files) in files_by_layer {
        let Some(layer_index) = manifest.layer_index(layer_hash) else {
            continue;
        };
        for file in files {
            if file.kind != FileKind::Whiteout {
                continue;
            }
            let mut components = split_components(&file.path);
            let Some(basename) = components.pop() else {
                continue;
            };
            if File::is_opaque_whiteout(&file.path) {
                out.push(Whiteout {
                    dir: components,
                    target_name: None,
                    layer_index,
                });
            } else if File::is_regular_whiteout(&file.path) {
                let name = basename.strip_prefix(".wh.").unwrap_or(&basename).to_string();
                out.push(Whiteout {
                    dir: components,
                    target_name: Some(name),
                    layer_index,
                });
            }
        }
    }
    out
}

/// `true` if `whiteout` deletes `filepath`, per the component-prefix rules
/// in §4.7. An empty `filepath` (a scanner that couldn't name one) is
/// never matched.
fn deletes(whiteout: &Whiteout, filepath: &str) -> bool {
    if filepath.is_empty() {
        return false;
    }
    let mut components = split_components(filepath);
    match &whiteout.target_name {
        Some(name) => {
            // Regular whiteout: dir/name must be a path-component prefix
            // of filepath (the package's metadata file may live under
            // dir/name/..., not necessarily equal to it).
            if components.len() < whiteout.dir.len() + 1 {
                return false;
            }
            components.truncate(whiteout.dir.len() + 1);
            components[..whiteout.dir.len()] == whiteout.dir[..] && components[whiteout.dir.len()] == *name
        }
        None => {
            // Opaque whiteout: filepath must live strictly inside dir, not
            // equal to dir itself.
            if components.len() <= whiteout.dir.len() {
                return false;
            }
            components.truncate(whiteout.dir.len());
            components == whiteout.dir
        }
    }
}

/// Drop packages (and their environments) that OCI whiteout semantics mark
/// deleted in the merged report. `packages`/`environments` are mutated in
/// place; `files` is the merged report's per-layer file facts.
pub fn resolve(
    manifest: &Manifest,
    packages: &mut HashMap<PackageId, Package>,
    environments: &mut HashMap<PackageId, Vec<Environment>>,
    files: &HashMap<crate::digest::Digest, Vec<File>>,
) {
    let whiteouts = parse_whiteouts(files, manifest);
    if whiteouts.is_empty() {
        return;
    }

    let mut deleted = Vec::new();
    for (pkg_id, envs) in environments.iter() {
        let Some(pkg) = packages.get(pkg_id) else {
            continue;
        };
        if pkg.filepath.is_empty() {
            continue;
        }
        let effective_layer = envs
            .iter()
            .filter_map(|env| manifest.layer_index(&env.introduced_in))
            .max();
        let Some(effective_layer) = effective_layer else {
            continue;
        };
        let is_deleted = whiteouts
            .iter()
            .filter(|w| w.layer_index > effective_layer)
            .any(|w| deletes(w, &pkg.filepath));
        if is_deleted {
            deleted.push(*pkg_id);
        }
    }

    for pkg_id in deleted {
        packages.remove(&pkg_id);
        environments.remove(&pkg_id);
    }
}
