use serde_json::Value;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::object::blob::{read_object, save_bytes};
use crate::store::Store;
use crate::types::SYSTEM_METADATA;

/// store user metadata as compact, key-sorted json
///
/// returns `None` for null or empty metadata, which leaves `metadata_hash` unset.
pub fn save_metadata(store: &Store, metadata: &Value) -> Result<Option<Hash>> {
    let map = match metadata {
        Value::Null => return Ok(None),
        Value::Object(map) => map,
        other => {
            return Err(Error::TypeMismatch(format!(
                "metadata must be a mapping, got {}",
                other
            )))
        }
    };
    if map.is_empty() {
        return Ok(None);
    }
    if map.contains_key(SYSTEM_METADATA) {
        return Err(Error::InvalidName(format!(
            "metadata key {} is reserved",
            SYSTEM_METADATA
        )));
    }

    // serde_json maps are ordered by key
    let bytes = serde_json::to_vec(metadata)?;
    Ok(Some(save_bytes(store, &bytes)?))
}

pub fn load_metadata(store: &Store, hash: &Hash) -> Result<Value> {
    let bytes = read_object(store, hash)?;
    Ok(serde_json::from_slice(&bytes)?)
}
