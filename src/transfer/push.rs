//! push operation - send a package instance to a registry

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::object::{check_hashes, object_size};
use crate::ops::registry::api_path;
use crate::refs::LATEST_TAG;
use crate::store::Store;
use crate::transfer::client::{build_http, RegistryClient, UploadUrls};
use crate::transfer::{fragment, pool};
use crate::types::PackageRef;

/// push options
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// local instance to push; latest when unset
    pub hash: Option<Hash>,
    pub is_public: bool,
    pub is_team: bool,
    /// upload fragments even when the registry already has them
    pub reupload: bool,
    pub description: Option<String>,
    /// worker threads; the configured default when zero
    pub workers: usize,
}

/// result of a push operation
#[derive(Debug, Clone)]
pub struct PushResult {
    pub hash: Hash,
    pub package_url: Option<String>,
    /// fragments the registry asked for
    pub fragments: usize,
    pub bytes_transferred: u64,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    dry_run: bool,
    is_public: bool,
    is_team: bool,
    contents: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    sizes: BTreeMap<String, u64>,
}

#[derive(Deserialize)]
struct PushResponse {
    #[serde(default)]
    upload_urls: HashMap<String, UploadUrls>,
    #[serde(default)]
    package_url: Option<String>,
}

#[derive(Serialize)]
struct TagBody {
    hash: String,
}

/// key a registry map by parsed hash
pub(crate) fn by_hash<V>(map: HashMap<String, V>) -> Result<HashMap<Hash, V>> {
    map.into_iter()
        .map(|(k, v)| Ok((Hash::from_hex(&k)?, v)))
        .collect()
}

/// push a local package instance
///
/// the registry is asked (dry run) which fragments it needs, those are uploaded by a
/// worker pool, and only when every one made it is the manifest registered and the
/// latest tag moved.
pub fn push(
    store: &Store,
    client: &RegistryClient,
    transfer: &TransferConfig,
    pkg: &PackageRef,
    options: &PushOptions,
) -> Result<PushResult> {
    if !pkg.subpath.is_empty() {
        return Err(Error::InvalidReference(format!(
            "{}: cannot push part of a package",
            pkg
        )));
    }

    let package = store.get_package(&pkg.owner, &pkg.name, options.hash.as_ref())?;
    let hash = package.get_hash();
    let objects = package.contents().object_hashes();
    check_hashes(store, &objects)?;

    let sizes = objects
        .iter()
        .map(|h| Ok((h.to_hex(), object_size(store, h)?)))
        .collect::<Result<BTreeMap<_, _>>>()?;
    let mut request = PushRequest {
        dry_run: true,
        is_public: options.is_public,
        is_team: options.is_team,
        contents: package.contents().to_value()?,
        description: options.description.as_deref(),
        sizes,
    };
    let path = format!("/api/package/{}/{}/{}", pkg.owner, pkg.name, hash.to_hex());

    let response: PushResponse = client.put_json_gzip(&path, &request)?;
    let urls = by_hash(response.upload_urls)?;
    let fragments = urls.len();
    info!(package = %pkg, hash = %hash, fragments, "uploading fragments");

    let workers = if options.workers == 0 {
        transfer.upload_workers
    } else {
        options.workers
    };
    let outcome = pool::run(
        "upload",
        workers,
        urls.keys().copied().collect(),
        || build_http(transfer),
        |http, h| {
            let target = urls.get(h).ok_or(Error::ObjectNotFound(*h))?;
            fragment::upload(http, store, h, target, options.reupload, transfer.retries)
        },
    );
    let bytes_transferred = outcome.into_result("upload")?;

    request.dry_run = false;
    let response: PushResponse = client.put_json_gzip(&path, &request)?;

    let tag_path = format!("{}{}", api_path("tag", pkg), LATEST_TAG);
    let _: Value = client.put_json(&tag_path, &TagBody { hash: hash.to_hex() })?;

    info!(package = %pkg, hash = %hash, bytes = bytes_transferred, "push complete");
    Ok(PushResult {
        hash,
        package_url: response.package_url,
        fragments,
        bytes_transferred,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::save_bytes;
    use crate::types::TargetKind;
    use mockito::{Matcher, Mock, ServerGuard};
    use tempfile::{tempdir, TempDir};

    fn test_store() -> (TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("store")).unwrap();
        (dir, store)
    }

    /// a package with `n` single-fragment files
    fn sample_package(store: &Store, n: usize) -> (Hash, Vec<Hash>) {
        let mut package = store.create_package("alice", "data", false).unwrap();
        let mut hashes = Vec::new();
        for i in 0..n {
            let h = save_bytes(store, format!("fragment {}", i).as_bytes()).unwrap();
            package
                .add(&[format!("f{}", i)], vec![h], TargetKind::File, "f.bin", "bin", None)
                .unwrap();
            hashes.push(h);
        }
        (package.save_contents().unwrap(), hashes)
    }

    fn upload_urls(server: &ServerGuard, hashes: &[Hash]) -> Value {
        let urls: serde_json::Map<String, Value> = hashes
            .iter()
            .map(|h| {
                (
                    h.to_hex(),
                    serde_json::json!({
                        "head": format!("{}/s3/{}", server.url(), h.to_hex()),
                        "put": format!("{}/s3/{}", server.url(), h.to_hex()),
                    }),
                )
            })
            .collect();
        serde_json::json!({ "upload_urls": urls, "package_url": "https://example.com/alice/data" })
    }

    fn registry_mocks(server: &mut ServerGuard, hash: &Hash, fragments: &[Hash]) -> Vec<Mock> {
        let path = format!("/api/package/alice/data/{}", hash.to_hex());
        let body = upload_urls(server, fragments).to_string();
        let push = server
            .mock("PUT", path.as_str())
            .match_header("content-encoding", "gzip")
            .with_body(body)
            .expect(2)
            .create();
        let tag = server
            .mock("PUT", "/api/tag/alice/data/latest")
            .match_body(Matcher::Json(serde_json::json!({"hash": hash.to_hex()})))
            .with_body("{}")
            .create();
        vec![push, tag]
    }

    #[test]
    fn test_push_uploads_only_missing_fragments() {
        let (_dir, store) = test_store();
        let (hash, fragments) = sample_package(&store, 12);
        let mut server = mockito::Server::new();
        let registry = registry_mocks(&mut server, &hash, &fragments);

        let mut puts = Vec::new();
        for (i, h) in fragments.iter().enumerate() {
            let path = format!("/s3/{}", h.to_hex());
            let present = i % 3 == 0;
            server
                .mock("HEAD", path.as_str())
                .with_status(if present { 200 } else { 404 })
                .create();
            puts.push(
                server
                    .mock("PUT", path.as_str())
                    .expect(if present { 0 } else { 1 })
                    .create(),
            );
        }

        let client = RegistryClient::new(&server.url(), None, &TransferConfig::default()).unwrap();
        let options = PushOptions {
            workers: 4,
            ..PushOptions::default()
        };
        let pkg = PackageRef::new("alice", "data").unwrap();
        let result = push(&store, &client, &TransferConfig::default(), &pkg, &options).unwrap();

        assert_eq!(result.hash, hash);
        assert_eq!(result.fragments, 12);
        assert_eq!(result.package_url.as_deref(), Some("https://example.com/alice/data"));
        for mock in puts.iter().chain(registry.iter()) {
            mock.assert();
        }
    }

    #[test]
    fn test_failed_upload_fails_push_before_registering() {
        let (_dir, store) = test_store();
        let (hash, fragments) = sample_package(&store, 3);
        let mut server = mockito::Server::new();
        let path = format!("/api/package/alice/data/{}", hash.to_hex());
        let register = server
            .mock("PUT", path.as_str())
            .with_body(upload_urls(&server, &fragments).to_string())
            .expect(1)
            .create();
        let tag = server.mock("PUT", "/api/tag/alice/data/latest").expect(0).create();
        server.mock("HEAD", Matcher::Any).with_status(404).create();
        for (i, h) in fragments.iter().enumerate() {
            let path = format!("/s3/{}", h.to_hex());
            server
                .mock("PUT", path.as_str())
                .with_status(if i == 1 { 500 } else { 200 })
                .create();
        }

        let client = RegistryClient::new(&server.url(), None, &TransferConfig::default()).unwrap();
        let pkg = PackageRef::new("alice", "data").unwrap();
        let err = push(&store, &client, &TransferConfig::default(), &pkg, &PushOptions::default()).unwrap_err();

        match err {
            Error::IncompleteTransfer { completed, total, failures, .. } => {
                assert_eq!((completed, total), (2, 3));
                assert_eq!(failures[0].hash, fragments[1]);
            }
            other => panic!("unexpected error: {}", other),
        }
        register.assert();
        tag.assert();
    }

    #[test]
    fn test_push_rejects_subpath() {
        let (_dir, store) = test_store();
        let client = RegistryClient::new("http://127.0.0.1:9", None, &TransferConfig::default()).unwrap();
        let pkg = PackageRef::parse("alice/data/inner").unwrap();
        let err = push(&store, &client, &TransferConfig::default(), &pkg, &PushOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));
    }
}
