use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::package::Package;
use crate::store::{TAGS_DIR, VERSIONS_DIR};
use crate::types::normalize_version;

/// default tag, moved by every save
pub const LATEST_TAG: &str = "latest";

/// write a pointer file atomically: temp -> fsync -> rename
fn write_pointer(dir: &Path, tmp_dir: &Path, name: &str, hash: &Hash) -> Result<()> {
    fs::create_dir_all(dir).with_path(dir)?;
    fs::create_dir_all(tmp_dir).with_path(tmp_dir)?;

    let final_path = dir.join(name);
    let tmp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        writeln!(tmp_file, "{}", hash.to_hex()).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }
    fs::rename(&tmp_path, &final_path).with_path(&final_path)?;

    let dir_file = File::open(dir).with_path(dir)?;
    dir_file.sync_all().with_path(dir)?;
    Ok(())
}

/// read a pointer file; None if absent
fn read_pointer(path: &Path) -> Result<Option<Hash>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(Hash::from_hex(content.trim())?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// list (name, hash) pointers in a directory, sorted by name
fn list_pointers(dir: &Path) -> Result<Vec<(String, Hash)>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        if let Some(hash) = read_pointer(&path)? {
            out.push((name, hash));
        }
    }
    out.sort();
    Ok(out)
}

/// validate a tag name: one path component, no traversal
fn validate_tag_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName("empty tag name".to_string()));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(Error::InvalidName(format!(
            "tag name cannot contain '/' or null bytes: {}",
            name
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidName(format!("reserved tag name: {}", name)));
    }
    Ok(())
}

fn tag_path(package: &Package, tag: &str) -> PathBuf {
    package.path().join(TAGS_DIR).join(tag)
}

/// point a tag at an instance (create or move)
pub fn write_tag(package: &Package, tag: &str, hash: &Hash) -> Result<()> {
    validate_tag_name(tag)?;
    write_pointer(&package.path().join(TAGS_DIR), package.tmp_dir(), tag, hash)
}

pub fn read_tag(package: &Package, tag: &str) -> Result<Hash> {
    validate_tag_name(tag)?;
    read_pointer(&tag_path(package, tag))?.ok_or_else(|| Error::TagNotFound(tag.to_string()))
}

pub fn delete_tag(package: &Package, tag: &str) -> Result<()> {
    validate_tag_name(tag)?;
    let path = tag_path(package, tag);
    fs::remove_file(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::TagNotFound(tag.to_string())
        } else {
            Error::Io { path, source: e }
        }
    })
}

pub fn list_tags(package: &Package) -> Result<Vec<(String, Hash)>> {
    list_pointers(&package.path().join(TAGS_DIR))
}

/// record a version; versions never move once written
///
/// returns the normalized version string.
pub fn write_version(package: &Package, version: &str, hash: &Hash) -> Result<String> {
    let version = normalize_version(version)?;
    let dir = package.path().join(VERSIONS_DIR);
    if let Some(existing) = read_pointer(&dir.join(&version))? {
        if existing == *hash {
            return Ok(version);
        }
        return Err(Error::VersionExists { version, existing });
    }
    write_pointer(&dir, package.tmp_dir(), &version, hash)?;
    Ok(version)
}

pub fn read_version(package: &Package, version: &str) -> Result<Hash> {
    let normalized = normalize_version(version)?;
    read_pointer(&package.path().join(VERSIONS_DIR).join(&normalized))?
        .ok_or_else(|| Error::VersionNotFound(version.to_string()))
}

pub fn list_versions(package: &Package) -> Result<Vec<(String, Hash)>> {
    list_pointers(&package.path().join(VERSIONS_DIR))
}
