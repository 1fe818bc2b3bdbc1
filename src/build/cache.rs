use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::build::transform::Kwargs;
use crate::error::{IoResultExt, Result};
use crate::hash::{hash_string, Hash};
use crate::object::object_exists;
use crate::store::Store;

/// one transformed source: the raw file hash and the fragments it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source_hash: Hash,
    pub obj_hashes: Vec<Hash>,
}

fn kwarg_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "dict",
        Value::Tagged(_) => "tagged",
    }
}

/// cache key for a source file under a transform and its arguments
///
/// kwargs are folded in sorted by name, each as `name:json value:type`. a value with
/// no json form, such as a mapping with a null key, has no key at all.
pub fn cache_key(source: &Path, transform: &str, kwargs: &Kwargs) -> Result<Hash> {
    let args = kwargs
        .iter()
        .map(|(k, v)| Ok(format!("{}:{}:{}", k, serde_json::to_string(v)?, kwarg_type(v))))
        .collect::<Result<Vec<String>>>()?;
    Ok(hash_string(&format!(
        "{}:{}:{{{}}}",
        source.display(),
        transform,
        args.join(",")
    )))
}

/// read a cache entry; anything unreadable is a miss
pub fn read_entry(store: &Store, key: &Hash) -> Option<CacheEntry> {
    let path = store.cache_path(key);
    let bytes = fs::read(&path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(entry) => Some(entry),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring corrupt cache entry");
            None
        }
    }
}

/// fragments for a cached source, if the source is unchanged and every fragment is present
pub fn lookup(store: &Store, key: &Hash, source_hash: &Hash) -> Option<Vec<Hash>> {
    let entry = read_entry(store, key)?;
    if entry.source_hash != *source_hash {
        debug!(key = %key.short(), "cache entry is stale");
        return None;
    }
    if !entry.obj_hashes.iter().all(|h| object_exists(store, h)) {
        debug!(key = %key.short(), "cache entry refers to missing fragments");
        return None;
    }
    Some(entry.obj_hashes)
}

fn write_entry(store: &Store, key: &Hash, entry: &CacheEntry) -> Result<()> {
    let tmp_path = store.temporary_object_path(&uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file
            .write_all(&serde_json::to_vec(entry)?)
            .with_path(&tmp_path)?;
    }
    let dest = store.cache_path(key);
    fs::rename(&tmp_path, &dest).with_path(&dest)?;
    Ok(())
}

/// record a transformed source; failures only cost a future cache miss
pub fn store_entry(store: &Store, key: &Hash, entry: &CacheEntry) {
    if let Err(e) = write_entry(store, key, entry) {
        warn!(key = %key.short(), error = %e, "could not write build cache entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::object::save_bytes;
    use tempfile::tempdir;

    fn kwargs(yaml: &str) -> Kwargs {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_cache_key_depends_on_inputs() {
        let path = Path::new("/data/t.csv");
        let key = |path: &Path, transform: &str, args: &Kwargs| cache_key(path, transform, args).unwrap();
        let base = key(path, "csv", &Kwargs::new());

        assert_eq!(base, key(path, "csv", &Kwargs::new()));
        assert_ne!(base, key(path, "tsv", &Kwargs::new()));
        assert_ne!(base, key(Path::new("/data/u.csv"), "csv", &Kwargs::new()));
        assert_ne!(
            key(path, "csv", &kwargs("{skiprows: 1}")),
            key(path, "csv", &kwargs("{skiprows: '1'}"))
        );
        assert_eq!(
            key(path, "csv", &kwargs("{a: 1, b: 2}")),
            key(path, "csv", &kwargs("{b: 2, a: 1}"))
        );
    }

    #[test]
    fn test_kwargs_without_json_form_have_no_key() {
        let path = Path::new("/data/t.csv");
        assert!(cache_key(path, "custom", &kwargs("{opts: {~: x}}")).is_err());
        assert!(cache_key(path, "custom", &kwargs("{opts: {a: x}}")).is_ok());
    }

    #[test]
    fn test_lookup_validity() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("store")).unwrap();
        let key = hash_string("key");
        let source = hash_bytes(b"source");
        let frag = save_bytes(&store, b"fragment").unwrap();

        assert_eq!(lookup(&store, &key, &source), None);

        store_entry(&store, &key, &CacheEntry {
            source_hash: source,
            obj_hashes: vec![frag],
        });
        assert_eq!(lookup(&store, &key, &source), Some(vec![frag]));
        assert_eq!(lookup(&store, &key, &hash_bytes(b"edited")), None);

        store_entry(&store, &key, &CacheEntry {
            source_hash: source,
            obj_hashes: vec![frag, hash_bytes(b"gone")],
        });
        assert_eq!(lookup(&store, &key, &source), None);
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("store")).unwrap();
        let key = hash_string("key");
        fs::write(store.cache_path(&key), b"{not json").unwrap();
        assert_eq!(read_entry(&store, &key), None);
    }
}
