use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::{hash_bytes, Hash};
use crate::object::blob::{read_object, save_bytes};
use crate::store::Store;
use crate::types::Table;

/// rows per stored fragment
pub const ROWS_PER_FRAGMENT: usize = 1 << 20;

const FRAGMENT_VERSION: u32 = 1;

/// zstd level 3 - fast, reasonable ratio
const ZSTD_LEVEL: i32 = 3;

#[derive(Serialize, Deserialize)]
struct Fragment {
    version: u32,
    table: Table,
}

/// serialize a table into columnar fragments
///
/// each fragment is a row slice, serialized as CBOR then zstd compressed.
/// fragment hashes are computed over the compressed bytes.
pub fn encode_fragments(table: &Table, rows_per_fragment: usize) -> Result<Vec<Vec<u8>>> {
    table
        .split_rows(rows_per_fragment)
        .into_iter()
        .map(|slice| {
            let fragment = Fragment {
                version: FRAGMENT_VERSION,
                table: slice,
            };
            let mut cbor_bytes = Vec::new();
            ciborium::into_writer(&fragment, &mut cbor_bytes)?;
            zstd::encode_all(&cbor_bytes[..], ZSTD_LEVEL).map_err(|e| Error::Io {
                path: PathBuf::from("<zstd>"),
                source: e,
            })
        })
        .collect()
}

pub fn decode_fragment(compressed: &[u8]) -> Result<Table> {
    let cbor_bytes = zstd::decode_all(compressed).map_err(|e| Error::Io {
        path: PathBuf::from("<zstd>"),
        source: e,
    })?;
    let fragment: Fragment = ciborium::from_reader(&cbor_bytes[..])?;
    if fragment.version != FRAGMENT_VERSION {
        return Err(Error::TypeMismatch(format!(
            "unsupported table fragment version {}",
            fragment.version
        )));
    }
    Ok(fragment.table)
}

/// fragment hashes a table would get, without storing anything
pub fn table_hashes(table: &Table) -> Result<Vec<Hash>> {
    Ok(encode_fragments(table, ROWS_PER_FRAGMENT)?
        .iter()
        .map(|bytes| hash_bytes(bytes))
        .collect())
}

/// write a table into the object pool
pub fn save_table(store: &Store, table: &Table) -> Result<Vec<Hash>> {
    save_table_with(store, table, ROWS_PER_FRAGMENT)
}

pub(crate) fn save_table_with(store: &Store, table: &Table, rows: usize) -> Result<Vec<Hash>> {
    encode_fragments(table, rows)?
        .iter()
        .map(|bytes| save_bytes(store, bytes))
        .collect()
}

/// read a table back from its fragments, in order
pub fn load_table(store: &Store, hashes: &[Hash]) -> Result<Table> {
    let mut table = Table::default();
    for hash in hashes {
        let bytes = read_object(store, hash)?;
        table.append(decode_fragment(&bytes)?)?;
    }
    Ok(table)
}
