use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::package::Package;
use crate::refs::{self, LATEST_TAG};
use crate::types::{check_name, RootNode};

/// on-disk format written by this version
pub const STORE_VERSION: &str = "1.3";

/// store directory used when none is configured
pub const DEFAULT_STORE_DIR: &str = "quilt_packages";

/// the one older format that is upgraded in place
const MIGRATABLE_VERSION: &str = "1.2";

const FORMAT_FILE: &str = ".format";
const OBJ_DIR: &str = "objs";
const TMP_DIR: &str = "tmp";
const PKG_DIR: &str = "pkgs";
const CACHE_DIR: &str = "cache";

pub(crate) const CONTENTS_DIR: &str = "contents";
pub(crate) const TAGS_DIR: &str = "tags";
pub(crate) const VERSIONS_DIR: &str = "versions";

/// a local package store
///
/// layout:
///   .format                                      format version
///   objs/<hash>                                  fragment pool
///   tmp/                                         scratch for atomic writes and downloads
///   pkgs/<owner>/<package>/contents/<hash>       manifests
///   pkgs/<owner>/<package>/tags/<tag>            mutable pointers
///   pkgs/<owner>/<package>/versions/<version>    append-only pointers
///   cache/<key>                                  build transform cache
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

/// one row of `ls`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageListing {
    pub package: String,
    /// empty for instances that no tag points at
    pub tag: String,
    pub hash: Hash,
}

impl Store {
    /// open a store, creating it if needed
    ///
    /// a store in the previous minor format is migrated; any other format is rejected.
    pub fn open(path: &Path) -> Result<Self> {
        let store = Self {
            path: path.to_path_buf(),
        };

        let format_path = store.format_path();
        match fs::read_to_string(&format_path) {
            Ok(found) => {
                let found = found.trim();
                if found == MIGRATABLE_VERSION {
                    store.migrate_from_1_2()?;
                } else if found != STORE_VERSION {
                    return Err(Error::IncompatibleStore {
                        path: store.path.clone(),
                        found: found.to_string(),
                        expected: STORE_VERSION,
                    });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Io {
                    path: format_path,
                    source: e,
                })
            }
        }

        store.create_dirs()?;
        Ok(store)
    }

    /// create the store skeleton and stamp the format version
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.objects_path(),
            self.tmp_path(),
            self.packages_path(),
            self.cache_dir(),
        ] {
            fs::create_dir_all(&dir).with_path(&dir)?;
        }
        let format_path = self.format_path();
        if !format_path.exists() {
            fs::write(&format_path, STORE_VERSION).with_path(&format_path)?;
        }
        Ok(())
    }

    // 1.3 added the build cache and per-package version pointers
    fn migrate_from_1_2(&self) -> Result<()> {
        info!(path = %self.path.display(), "migrating store from {} to {}", MIGRATABLE_VERSION, STORE_VERSION);
        let cache = self.cache_dir();
        fs::create_dir_all(&cache).with_path(&cache)?;
        for (owner, name) in self.iter_packages()? {
            let versions = self.package_path(&owner, &name).join(VERSIONS_DIR);
            fs::create_dir_all(&versions).with_path(&versions)?;
        }
        let format_path = self.format_path();
        fs::write(&format_path, STORE_VERSION).with_path(&format_path)?;
        Ok(())
    }

    /// store root path
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format_path(&self) -> PathBuf {
        self.path.join(FORMAT_FILE)
    }

    /// path to the fragment pool
    pub fn objects_path(&self) -> PathBuf {
        self.path.join(OBJ_DIR)
    }

    /// path to tmp directory (for atomic writes)
    pub fn tmp_path(&self) -> PathBuf {
        self.path.join(TMP_DIR)
    }

    pub fn packages_path(&self) -> PathBuf {
        self.path.join(PKG_DIR)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.path.join(CACHE_DIR)
    }

    pub fn object_path(&self, hash: &Hash) -> PathBuf {
        self.objects_path().join(hash.to_hex())
    }

    pub fn temporary_object_path(&self, name: &str) -> PathBuf {
        self.tmp_path().join(name)
    }

    pub fn cache_path(&self, key: &Hash) -> PathBuf {
        self.cache_dir().join(key.to_hex())
    }

    pub fn package_path(&self, owner: &str, name: &str) -> PathBuf {
        self.packages_path().join(owner).join(name)
    }

    fn open_package(&self, owner: &str, name: &str, contents: RootNode) -> Package {
        Package::new(
            owner,
            name,
            self.package_path(owner, name),
            self.tmp_path(),
            contents,
        )
    }

    fn create_package_dirs(&self, path: &Path) -> Result<()> {
        for sub in [CONTENTS_DIR, TAGS_DIR, VERSIONS_DIR] {
            let dir = path.join(sub);
            fs::create_dir_all(&dir).with_path(&dir)?;
        }
        Ok(())
    }

    /// start a new, empty package instance
    ///
    /// a dry run validates the names but touches nothing on disk.
    pub fn create_package(&self, owner: &str, name: &str, dry_run: bool) -> Result<Package> {
        check_name("owner", owner)?;
        check_name("package", name)?;
        let package = self.open_package(owner, name, RootNode::default());
        if !dry_run {
            self.create_package_dirs(package.path())?;
        }
        Ok(package)
    }

    /// prepare an instance for an incoming manifest, dropping any stale copy of it
    pub fn install_package(&self, owner: &str, name: &str, contents: RootNode) -> Result<Package> {
        check_name("owner", owner)?;
        check_name("package", name)?;
        let package = self.open_package(owner, name, contents);
        self.create_package_dirs(package.path())?;

        let stale = package.contents_path(&package.get_hash());
        match fs::remove_file(&stale) {
            Ok(()) => debug!(path = %stale.display(), "replaced existing instance"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io { path: stale, source: e }),
        }
        Ok(package)
    }

    /// whether any instance of the package exists locally
    pub fn package_exists(&self, owner: &str, name: &str) -> bool {
        self.package_path(owner, name).join(CONTENTS_DIR).is_dir()
    }

    /// load a package instance, by hash or through the latest tag
    pub fn get_package(&self, owner: &str, name: &str, hash: Option<&Hash>) -> Result<Package> {
        check_name("owner", owner)?;
        check_name("package", name)?;
        let pkg_name = format!("{}/{}", owner, name);
        if !self.package_exists(owner, name) {
            return Err(Error::PackageNotFound(pkg_name));
        }

        let shell = self.open_package(owner, name, RootNode::default());
        let hash = match hash {
            Some(hash) => *hash,
            None => refs::read_tag(&shell, LATEST_TAG).map_err(|e| match e {
                Error::TagNotFound(_) => Error::PackageNotFound(pkg_name.clone()),
                other => other,
            })?,
        };

        let path = shell.contents_path(&hash);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::InstanceNotFound {
                    package: pkg_name.clone(),
                    hash,
                }
            } else {
                Error::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;
        let contents = RootNode::from_json(&bytes)?;
        Ok(self.open_package(owner, name, contents))
    }

    /// every (owner, package) pair in the store, sorted
    pub fn iter_packages(&self) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        let root = self.packages_path();
        for owner in sorted_dir_names(&root)? {
            for name in sorted_dir_names(&root.join(&owner))? {
                out.push((owner.clone(), name));
            }
        }
        Ok(out)
    }

    /// hashes of every stored instance of a package
    pub fn instances(&self, owner: &str, name: &str) -> Result<Vec<Hash>> {
        let dir = self.package_path(owner, name).join(CONTENTS_DIR);
        let mut hashes = Vec::new();
        if !dir.is_dir() {
            return Ok(hashes);
        }
        for entry in fs::read_dir(&dir).with_path(&dir)? {
            let entry = entry.with_path(&dir)?;
            if let Some(hash) = entry.file_name().to_str().and_then(|n| Hash::from_hex(n).ok()) {
                hashes.push(hash);
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// all instances as (package, tag, hash) rows; untagged instances get an empty tag
    pub fn ls_packages(&self) -> Result<Vec<PackageListing>> {
        let mut rows = Vec::new();
        for (owner, name) in self.iter_packages()? {
            let shell = self.open_package(&owner, &name, RootNode::default());
            let package = format!("{}/{}", owner, name);
            let tags = refs::list_tags(&shell)?;
            for hash in self.instances(&owner, &name)? {
                let mut tagged = false;
                for (tag, target) in &tags {
                    if *target == hash {
                        tagged = true;
                        rows.push(PackageListing {
                            package: package.clone(),
                            tag: tag.clone(),
                            hash,
                        });
                    }
                }
                if !tagged {
                    rows.push(PackageListing {
                        package: package.clone(),
                        tag: String::new(),
                        hash,
                    });
                }
            }
        }
        Ok(rows)
    }

    /// load every stored manifest; used for reachability
    pub(crate) fn all_manifests(&self) -> Result<Vec<RootNode>> {
        let mut out = Vec::new();
        for (owner, name) in self.iter_packages()? {
            for hash in self.instances(&owner, &name)? {
                out.push(self.get_package(&owner, &name, Some(&hash))?.into_contents());
            }
        }
        Ok(out)
    }
}

fn sorted_dir_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    if !dir.is_dir() {
        return Ok(names);
    }
    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        if entry.file_type().with_path(entry.path())?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
