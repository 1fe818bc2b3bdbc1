use std::collections::{BTreeSet, HashSet};
use std::fs;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::store::Store;
use crate::types::{Node, RootNode};

/// prune statistics
#[derive(Debug, Default)]
pub struct PruneStats {
    pub removed: Vec<Hash>,
    pub bytes_freed: u64,
}

/// every object a manifest keeps alive: fragments and metadata blobs
fn mark_tree(root: &RootNode, reachable: &mut HashSet<Hash>) {
    fn mark_node(node: &Node, reachable: &mut HashSet<Hash>) {
        reachable.extend(node.hashes().iter().copied());
        if let Some(hash) = node.metadata_hash() {
            reachable.insert(*hash);
        }
        if let Some(children) = node.children() {
            for child in children.values() {
                mark_node(child, reachable);
            }
        }
    }

    if let Some(hash) = &root.metadata_hash {
        reachable.insert(*hash);
    }
    for child in root.children.values() {
        mark_node(child, reachable);
    }
}

/// hashes of every object in the pool
fn pool_objects(store: &Store) -> Result<Vec<Hash>> {
    let dir = store.objects_path();
    let mut hashes = Vec::new();
    if !dir.exists() {
        return Ok(hashes);
    }
    for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| Error::Io {
            path: dir.clone(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walkdir error")),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(hash) = entry.file_name().to_str().and_then(|n| Hash::from_hex(n).ok()) {
            hashes.push(hash);
        }
    }
    Ok(hashes)
}

/// remove objects that no stored manifest references
///
/// with `candidates` only those hashes are considered; otherwise the whole pool is
/// swept. reachability is always computed across every instance in the store.
pub fn prune(store: &Store, candidates: Option<&BTreeSet<Hash>>) -> Result<PruneStats> {
    let mut reachable = HashSet::new();
    for manifest in store.all_manifests()? {
        mark_tree(&manifest, &mut reachable);
    }

    let candidates: Vec<Hash> = match candidates {
        Some(set) => set.iter().copied().collect(),
        None => pool_objects(store)?,
    };

    let mut stats = PruneStats::default();
    for hash in candidates {
        if reachable.contains(&hash) {
            continue;
        }
        let path = store.object_path(&hash);
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(Error::Io { path, source: e }),
        };
        fs::remove_file(&path).with_path(&path)?;
        debug!(object = %hash.short(), "pruned");
        stats.bytes_freed += meta.len();
        stats.removed.push(hash);
    }
    stats.removed.sort();

    info!(removed = stats.removed.len(), bytes = stats.bytes_freed, "prune complete");
    Ok(stats)
}

/// delete a package with all its instances, then prune the objects it referenced
pub fn rm(store: &Store, owner: &str, name: &str) -> Result<PruneStats> {
    if !store.package_exists(owner, name) {
        return Err(Error::PackageNotFound(format!("{}/{}", owner, name)));
    }

    let mut candidates = BTreeSet::new();
    for hash in store.instances(owner, name)? {
        let manifest = store.get_package(owner, name, Some(&hash))?.into_contents();
        let mut marked = HashSet::new();
        mark_tree(&manifest, &mut marked);
        candidates.extend(marked);
    }

    let path = store.package_path(owner, name);
    fs::remove_dir_all(&path).with_path(&path)?;
    // drop the owner directory once its last package is gone
    if let Some(owner_dir) = path.parent() {
        let _ = fs::remove_dir(owner_dir);
    }
    info!(package = %format!("{}/{}", owner, name), "removed package");

    prune(store, Some(&candidates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{object_exists, save_bytes};
    use crate::types::TargetKind;
    use tempfile::{tempdir, TempDir};

    fn test_store() -> (TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("store")).unwrap();
        (dir, store)
    }

    fn add_file(store: &Store, owner: &str, name: &str, files: &[&[u8]]) -> Vec<Hash> {
        let mut package = store.create_package(owner, name, false).unwrap();
        let mut hashes = Vec::new();
        for (i, content) in files.iter().enumerate() {
            let h = save_bytes(store, content).unwrap();
            package
                .add(&[format!("f{}", i)], vec![h], TargetKind::File, "f", "id", None)
                .unwrap();
            hashes.push(h);
        }
        package.save_contents().unwrap();
        hashes
    }

    #[test]
    fn test_prune_keeps_reachable() {
        let (_dir, store) = test_store();
        let kept = add_file(&store, "alice", "data", &[b"one", b"two"]);
        let orphan = save_bytes(&store, b"orphan").unwrap();

        let stats = prune(&store, None).unwrap();

        assert_eq!(stats.removed, vec![orphan]);
        assert!(stats.bytes_freed > 0);
        for h in &kept {
            assert!(object_exists(&store, h));
        }
    }

    #[test]
    fn test_prune_keeps_metadata_blobs() {
        let (_dir, store) = test_store();
        add_file(&store, "alice", "data", &[b"one"]);
        let mut package = store.get_package("alice", "data", None).unwrap();
        let meta = package
            .set_metadata(&store, "f0", &serde_json::json!({"units": "m"}))
            .unwrap()
            .unwrap();
        package.save_contents().unwrap();

        prune(&store, None).unwrap();
        assert!(object_exists(&store, &meta));
    }

    #[test]
    fn test_prune_only_candidates() {
        let (_dir, store) = test_store();
        let a = save_bytes(&store, b"a").unwrap();
        let b = save_bytes(&store, b"b").unwrap();

        let stats = prune(&store, Some(&BTreeSet::from([a]))).unwrap();
        assert_eq!(stats.removed, vec![a]);
        assert!(object_exists(&store, &b));
    }

    #[test]
    fn test_rm_keeps_shared_fragments() {
        let (_dir, store) = test_store();
        let first = add_file(&store, "alice", "data", &[b"shared", b"only mine"]);
        let second = add_file(&store, "bob", "data", &[b"shared"]);
        assert_eq!(first[0], second[0]);

        let stats = rm(&store, "alice", "data").unwrap();

        assert_eq!(stats.removed, vec![first[1]]);
        assert!(object_exists(&store, &first[0]));
        assert!(!store.package_exists("alice", "data"));
        assert!(!store.packages_path().join("alice").exists());
    }

    #[test]
    fn test_rm_missing_package() {
        let (_dir, store) = test_store();
        assert!(matches!(
            rm(&store, "alice", "nothing"),
            Err(Error::PackageNotFound(_))
        ));
    }
}
