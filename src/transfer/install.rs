//! install operation - fetch a package instance from a registry

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::hash::{hash_tree, Hash};
use crate::object::object_exists;
use crate::refs::{self, LATEST_TAG};
use crate::store::Store;
use crate::transfer::client::{build_http, RegistryClient};
use crate::transfer::push::by_hash;
use crate::transfer::{fragment, pool, resolve_selector};
use crate::types::{Node, PackageRef, RootNode, Selector};

/// install options
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// instance to fetch; the latest tag when unset
    pub selector: Option<Selector>,
    /// replace a package that is already installed
    pub force: bool,
    /// worker threads; the configured default when zero
    pub workers: usize,
}

/// result of an install operation
#[derive(Debug, Clone)]
pub struct InstallResult {
    pub hash: Hash,
    /// fragments that were not already in the store
    pub fragments: usize,
    pub bytes_transferred: u64,
}

#[derive(Deserialize)]
struct PackageResponse {
    contents: Node,
    #[serde(default)]
    urls: HashMap<String, String>,
    #[serde(default)]
    sizes: HashMap<String, u64>,
}

/// bytes free for unprivileged writes on the filesystem holding `path`
pub fn available_space(path: &Path) -> Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    #[allow(clippy::unnecessary_cast)]
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

/// fail unless `required` bytes fit in the store
pub fn check_free_space(store: &Store, required: u64) -> Result<()> {
    let available = available_space(store.path())?;
    if required > available {
        return Err(Error::InsufficientSpace { required, available });
    }
    Ok(())
}

/// install a package instance from the registry
///
/// the manifest is verified against the requested hash before any fragment is
/// fetched. a subpath reference still stores the whole manifest but only downloads the
/// fragments under that subpath.
pub fn install(
    store: &Store,
    client: &RegistryClient,
    transfer: &TransferConfig,
    pkg: &PackageRef,
    options: &InstallOptions,
) -> Result<InstallResult> {
    let selector = options.selector.clone().unwrap_or_default();
    let hash = resolve_selector(client, pkg, &selector)?;

    if !options.force && store.package_exists(&pkg.owner, &pkg.name) {
        return Err(Error::PackageExists(pkg.short_name()));
    }

    let path = format!("/api/package/{}/{}/{}", pkg.owner, pkg.name, hash.to_hex());
    let subpath = pkg.subpath_str();
    let response: PackageResponse = client.get_json(&path, &[("subpath", subpath.as_str())])?;
    let contents = RootNode::try_from(response.contents)?;
    let actual = hash_tree(&contents);
    if actual != hash {
        return Err(Error::HashMismatch {
            expected: hash,
            actual,
        });
    }

    let urls = by_hash(response.urls)?;
    let sizes = by_hash(response.sizes)?;
    let missing: Vec<Hash> = urls
        .keys()
        .filter(|h| !object_exists(store, h))
        .copied()
        .collect();
    let required = missing.iter().filter_map(|h| sizes.get(h)).sum();
    check_free_space(store, required)?;
    debug!(package = %pkg, hash = %hash, fragments = missing.len(), required, "fetching fragments");

    let workers = if options.workers == 0 {
        transfer.download_workers
    } else {
        options.workers
    };
    let fragments = missing.len();
    let outcome = pool::run(
        "download",
        workers,
        missing,
        || build_http(transfer),
        |http, h| {
            let url = urls.get(h).ok_or(Error::ObjectNotFound(*h))?;
            fragment::download(http, store, h, url, transfer.retries)
        },
    );
    let bytes_transferred = outcome.into_result("download")?;

    let package = store.install_package(&pkg.owner, &pkg.name, contents)?;
    package.save_contents()?;
    match &selector {
        Selector::Tag(tag) if tag != LATEST_TAG => refs::write_tag(&package, tag, &hash)?,
        Selector::Version(version) => {
            refs::write_version(&package, version, &hash)?;
        }
        _ => {}
    }

    info!(package = %pkg, hash = %hash, bytes = bytes_transferred, "install complete");
    Ok(InstallResult {
        hash,
        fragments,
        bytes_transferred,
    })
}
