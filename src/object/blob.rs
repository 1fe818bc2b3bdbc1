use std::fs::{self, File, Permissions};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{hash_bytes, Hash};
use crate::store::Store;

/// copy a file into the object pool, returning its content hash
///
/// the copy is hashed while it streams into tmp/, then moved into place.
pub fn save_file(store: &Store, source: &Path) -> Result<Hash> {
    let tmp_path = store.temporary_object_path(&uuid::Uuid::new_v4().to_string());
    let mut hasher = Sha256::new();
    {
        let mut input = File::open(source).with_path(source)?;
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = input.read(&mut buf).with_path(source)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp_file.write_all(&buf[..n]).with_path(&tmp_path)?;
        }
        tmp_file.sync_all().with_path(&tmp_path)?;
    }

    let hash = Hash::from_bytes(hasher.finalize().into());
    move_to_store(store, &tmp_path, &hash)?;
    Ok(hash)
}

/// write bytes into the object pool
pub fn save_bytes(store: &Store, content: &[u8]) -> Result<Hash> {
    let hash = hash_bytes(content);
    if object_exists(store, &hash) {
        return Ok(hash);
    }

    // atomic write: temp -> fsync -> rename
    let tmp_path = store.temporary_object_path(&uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file.write_all(content).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }
    move_to_store(store, &tmp_path, &hash)?;
    Ok(hash)
}

/// move a verified temp file into the pool, read-only
///
/// an existing object of the same hash is replaced.
pub fn move_to_store(store: &Store, tmp_path: &Path, hash: &Hash) -> Result<()> {
    fs::set_permissions(tmp_path, Permissions::from_mode(0o444)).with_path(tmp_path)?;
    let dest = store.object_path(hash);
    fs::rename(tmp_path, &dest).with_path(&dest)?;
    Ok(())
}

/// check if an object exists in the pool
pub fn object_exists(store: &Store, hash: &Hash) -> bool {
    store.object_path(hash).exists()
}

/// read object content
pub fn read_object(store: &Store, hash: &Hash) -> Result<Vec<u8>> {
    let path = store.object_path(hash);
    fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ObjectNotFound(*hash)
        } else {
            Error::Io { path, source: e }
        }
    })
}

/// size of a stored object in bytes
pub fn object_size(store: &Store, hash: &Hash) -> Result<u64> {
    let path = store.object_path(hash);
    let meta = fs::metadata(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ObjectNotFound(*hash)
        } else {
            Error::Io {
                path: path.clone(),
                source: e,
            }
        }
    })?;
    Ok(meta.len())
}

/// fail if any of the given fragments is missing from the pool
pub fn check_hashes<'a>(store: &Store, hashes: impl IntoIterator<Item = &'a Hash>) -> Result<()> {
    let missing: Vec<Hash> = hashes
        .into_iter()
        .filter(|h| !object_exists(store, h))
        .copied()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingFragments(missing))
    }
}
