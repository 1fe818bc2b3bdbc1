use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::hash::Hash;
use crate::transfer::{resolve_hash, RegistryClient};
use crate::types::{normalize_version, PackageRef};

/// one pushed instance, as recorded by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub hash: String,
    /// unix timestamp
    #[serde(default)]
    pub created: Option<f64>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    pub tag: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    pub hash: String,
}

#[derive(Deserialize)]
struct LogResponse {
    logs: Vec<LogEntry>,
}

#[derive(Deserialize)]
struct TagsResponse {
    tags: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct VersionsResponse {
    versions: Vec<VersionEntry>,
}

#[derive(Serialize, Deserialize)]
struct HashBody {
    hash: String,
}

pub(crate) fn api_path(endpoint: &str, pkg: &PackageRef) -> String {
    format!("/api/{}/{}/{}/", endpoint, pkg.owner, pkg.name)
}

/// every instance pushed for a package, oldest first
pub fn log(client: &RegistryClient, pkg: &PackageRef) -> Result<Vec<LogEntry>> {
    let response: LogResponse = client.get_json(&api_path("log", pkg), &[])?;
    Ok(response.logs)
}

pub fn tag_list(client: &RegistryClient, pkg: &PackageRef) -> Result<Vec<TagEntry>> {
    let response: TagsResponse = client.get_json(&api_path("tag", pkg), &[])?;
    Ok(response.tags)
}

pub fn tag_get(client: &RegistryClient, pkg: &PackageRef, tag: &str) -> Result<Hash> {
    let path = format!("{}{}", api_path("tag", pkg), tag);
    let response: HashBody = client.get_json(&path, &[])?;
    Hash::from_hex(&response.hash)
}

/// point a remote tag at an instance; `hash` may be abbreviated
pub fn tag_add(client: &RegistryClient, pkg: &PackageRef, tag: &str, hash: &str) -> Result<Hash> {
    let hash = resolve_hash(client, pkg, hash)?;
    let path = format!("{}{}", api_path("tag", pkg), tag);
    let _: serde_json::Value = client.put_json(&path, &HashBody { hash: hash.to_hex() })?;
    info!(package = %pkg, tag, hash = %hash, "tagged");
    Ok(hash)
}

pub fn tag_remove(client: &RegistryClient, pkg: &PackageRef, tag: &str) -> Result<()> {
    client.delete(&format!("{}{}", api_path("tag", pkg), tag))
}

pub fn version_list(client: &RegistryClient, pkg: &PackageRef) -> Result<Vec<VersionEntry>> {
    let response: VersionsResponse = client.get_json(&api_path("version", pkg), &[])?;
    Ok(response.versions)
}

pub fn version_get(client: &RegistryClient, pkg: &PackageRef, version: &str) -> Result<Hash> {
    let version = normalize_version(version)?;
    let path = format!("{}{}", api_path("version", pkg), version);
    let response: HashBody = client.get_json(&path, &[])?;
    Hash::from_hex(&response.hash)
}

/// register a version on the registry; returns the normalized version and full hash
pub fn version_add(
    client: &RegistryClient,
    pkg: &PackageRef,
    version: &str,
    hash: &str,
) -> Result<(String, Hash)> {
    let version = normalize_version(version)?;
    let hash = resolve_hash(client, pkg, hash)?;
    let path = format!("{}{}", api_path("version", pkg), version);
    let _: serde_json::Value = client.put_json(&path, &HashBody { hash: hash.to_hex() })?;
    info!(package = %pkg, version = %version, hash = %hash, "versioned");
    Ok((version, hash))
}
