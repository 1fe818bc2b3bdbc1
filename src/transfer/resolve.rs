use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::ops::registry::{log, tag_get, version_get};
use crate::transfer::RegistryClient;
use crate::types::{PackageRef, Selector};

const MIN_PREFIX: usize = 6;
const FULL_HASH: usize = 64;

fn normalize_prefix(prefix: &str) -> Result<String> {
    let prefix = prefix.trim().to_ascii_lowercase();
    if prefix.len() < MIN_PREFIX || prefix.len() > FULL_HASH {
        return Err(Error::InvalidReference(format!(
            "{:?}: hashes are {} to {} characters",
            prefix, MIN_PREFIX, FULL_HASH
        )));
    }
    Ok(prefix)
}

/// pick the one candidate starting with `prefix`
///
/// `package` only appears in error messages. ambiguous matches are listed sorted.
pub fn match_hash_prefix<I, S>(package: &str, prefix: &str, candidates: I) -> Result<Hash>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let prefix = normalize_prefix(prefix)?;
    let mut matches: Vec<String> = candidates
        .into_iter()
        .map(|c| c.as_ref().to_ascii_lowercase())
        .filter(|c| c.starts_with(&prefix))
        .collect();
    matches.sort();
    matches.dedup();

    match matches.as_slice() {
        [] => Err(Error::UnknownHash {
            package: package.to_string(),
            hash: prefix,
        }),
        [single] => Hash::from_hex(single),
        _ => Err(Error::AmbiguousHash {
            package: package.to_string(),
            prefix,
            matches,
        }),
    }
}

/// expand a possibly abbreviated hash through the registry log
///
/// a full 64 character hash is returned without asking the registry.
pub fn resolve_hash(client: &RegistryClient, pkg: &PackageRef, hash: &str) -> Result<Hash> {
    let prefix = normalize_prefix(hash)?;
    if prefix.len() == FULL_HASH {
        return Hash::from_hex(&prefix);
    }
    let entries = log(client, pkg)?;
    let resolved = match_hash_prefix(&pkg.short_name(), &prefix, entries.iter().map(|e| e.hash.as_str()))?;
    debug!(package = %pkg, prefix = %prefix, hash = %resolved, "resolved short hash");
    Ok(resolved)
}

/// the instance a hash, tag or version selects on the registry
pub fn resolve_selector(client: &RegistryClient, pkg: &PackageRef, selector: &Selector) -> Result<Hash> {
    match selector {
        Selector::Hash(hash) => resolve_hash(client, pkg, hash),
        Selector::Tag(tag) => tag_get(client, pkg, tag),
        Selector::Version(version) => version_get(client, pkg, version),
    }
}
