//! building packages from build files
//!
//! a build walks the `contents` tree of a build file. internal nodes become groups,
//! leaves point at source files that are either copied verbatim (`id`) or parsed
//! into tables and stored as columnar fragments. parsed sources are cached by path,
//! transform and arguments so an unchanged source is not parsed twice.

mod cache;
mod checks;
mod generate;
mod manifest;
mod transform;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use glob::MatchOptions;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{hash_file, Hash};
use crate::object::{check_hashes, save_file, save_table, table_hashes};
use crate::package::Package;
use crate::store::Store;
use crate::types::{to_nodename, Node, PackageRef, TargetKind};

pub use cache::{cache_key, CacheEntry};
pub use checks::{evaluate, CheckData, CheckDefs, CheckError};
pub use generate::{generate_build_file, generate_contents};
pub use manifest::{load_checks, load_yaml, parse_yaml, BuildFile, BUILD_FILE, RESERVED_KEYS};
pub use transform::{DelimitedParser, Kwargs, ParserRegistry, TableParser, ID_TRANSFORM};

use manifest::{has_magic, is_internal, Inherited};

/// build options
#[derive(Default)]
pub struct BuildOptions {
    /// compute the package hash without writing anything
    pub dry_run: bool,
    /// checks file; inline checks in the build file override it by name
    pub checks_file: Option<PathBuf>,
    pub parsers: ParserRegistry,
}

/// result of a build
#[derive(Debug)]
pub struct BuildOutcome {
    pub hash: Hash,
    pub package: Package,
    pub dry_run: bool,
}

/// build a package from a build file
pub fn build_package(
    store: &Store,
    pkg: &PackageRef,
    build_file: &Path,
    options: &BuildOptions,
) -> Result<BuildOutcome> {
    let build = BuildFile::load(build_file)?;
    let build_dir = match build_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    build_package_from_contents(store, pkg, &build_dir, &build, options)
}

/// build from a file, or from a directory with generated contents
pub fn build_from_path(store: &Store, pkg: &PackageRef, path: &Path, options: &BuildOptions) -> Result<BuildOutcome> {
    if path.is_dir() {
        let build = BuildFile {
            contents: generate_contents(path)?,
            ..BuildFile::default()
        };
        build_package_from_contents(store, pkg, path, &build, options)
    } else {
        build_package(store, pkg, path, options)
    }
}

/// build a package from an already parsed build file
///
/// relative `file` entries resolve against `build_dir`.
pub fn build_package_from_contents(
    store: &Store,
    pkg: &PackageRef,
    build_dir: &Path,
    build: &BuildFile,
    options: &BuildOptions,
) -> Result<BuildOutcome> {
    if !pkg.subpath.is_empty() {
        return Err(Error::Build(format!(
            "cannot build into a subpath of {}",
            pkg.short_name()
        )));
    }
    if !build.format.is_writable() {
        return Err(Error::Build(format!(
            "format {} cannot be built; use {}",
            build.format,
            crate::types::PackageFormat::Columnar
        )));
    }

    let mut checks = match &options.checks_file {
        Some(path) => load_checks(path)?,
        None => CheckDefs::new(),
    };
    checks.extend(build.checks.clone());

    let mut package = store.create_package(&pkg.owner, &pkg.name, options.dry_run)?;
    package.contents_mut().format = Some(build.format);

    let build_dir = fs::canonicalize(build_dir).with_path(build_dir)?;
    let mut builder = Builder {
        store,
        build_dir: &build_dir,
        checks: &checks,
        options,
        target: package.full_name(),
        package,
    };
    builder.build_node(&[], &Value::Mapping(build.contents.clone()), &Inherited::default())?;

    let Builder { package, .. } = builder;
    let hash = if options.dry_run {
        package.get_hash()
    } else {
        package.save_contents()?
    };
    info!(package = %package.full_name(), hash = %hash, dry_run = options.dry_run, "built package");
    Ok(BuildOutcome {
        hash,
        package,
        dry_run: options.dry_run,
    })
}

struct Builder<'a> {
    store: &'a Store,
    build_dir: &'a Path,
    checks: &'a CheckDefs,
    options: &'a BuildOptions,
    target: String,
    package: Package,
}

fn string_key(key: &Value) -> Result<&str> {
    key.as_str()
        .ok_or_else(|| Error::Build(format!("Invalid node name {:?}", key)))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Builder<'_> {
    fn build_node(&mut self, path: &[String], node: &Value, inherited: &Inherited) -> Result<()> {
        let empty = Mapping::new();
        let mapping = match node {
            Value::Null => &empty,
            Value::Mapping(m) => m,
            _ => {
                return Err(Error::Build(format!(
                    "Invalid node {} @ {}: expected a mapping",
                    path.join("/"),
                    self.target
                )))
            }
        };

        if !is_internal(mapping) {
            return self.build_leaf(path, mapping, inherited);
        }

        let inherited = inherited.merge(mapping, &path.join("/"))?;
        // names produced by globs at this level; explicit keys that collide are conflicts
        let mut taken: HashSet<String> = HashSet::new();

        for (key, child) in mapping {
            let key = string_key(key)?;
            if RESERVED_KEYS.contains(&key) {
                continue;
            }
            if has_magic(key) {
                self.expand_glob(path, key, child, &inherited, &mut taken)?;
            } else {
                let mut child_path = path.to_vec();
                child_path.push(key.to_string());
                self.build_node(&child_path, child, &inherited)?;
            }
        }
        Ok(())
    }

    fn expand_glob(
        &mut self,
        path: &[String],
        pattern: &str,
        child: &Value,
        inherited: &Inherited,
        taken: &mut HashSet<String>,
    ) -> Result<()> {
        let full = self.build_dir.join(pattern);
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        let mut matches: Vec<PathBuf> = glob::glob_with(&full.to_string_lossy(), options)
            .map_err(|e| Error::Build(format!("Invalid glob pattern {}: {}", pattern, e)))?
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file())
            .collect();
        matches.sort();

        if matches.is_empty() {
            warn!(pattern, "no files match glob");
            return Ok(());
        }

        let template = match child {
            Value::Null => Mapping::new(),
            Value::Mapping(m) => m.clone(),
            _ => {
                return Err(Error::Build(format!(
                    "Invalid node {} @ {}: expected a mapping",
                    pattern, self.target
                )))
            }
        };

        for file in matches {
            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = to_nodename(&stem, Some(taken))?;
            let rel = file
                .strip_prefix(self.build_dir)
                .unwrap_or(&file)
                .to_string_lossy()
                .into_owned();
            debug!(pattern, file = %rel, node = %name, "glob match");

            let mut leaf = template.clone();
            leaf.insert("file".into(), Value::String(rel));
            let mut child_path = path.to_vec();
            child_path.push(name);
            self.build_node(&child_path, &Value::Mapping(leaf), inherited)?;
        }
        Ok(())
    }

    fn ensure_new(&self, path: &[String]) -> Result<()> {
        if !path.is_empty() && self.package.contents().contains(&path.join("/"))? {
            return Err(Error::Build(format!(
                "Naming conflict: {} added to package more than once",
                path.join("/")
            )));
        }
        Ok(())
    }

    fn build_leaf(&mut self, path: &[String], node: &Mapping, inherited: &Inherited) -> Result<()> {
        let name = path.join("/");

        if node.is_empty() {
            self.ensure_new(path)?;
            return self
                .package
                .add(path, Vec::new(), TargetKind::Group, "", "", None);
        }

        if let Some(source) = node.get("package") {
            return self.graft(path, source);
        }

        let file = node
            .get("file")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Build(format!(
                    "Leaf nodes must define a file key: {} @ {}",
                    name, self.target
                ))
            })?;
        let source = self.build_dir.join(file);
        if !source.is_file() {
            return Err(Error::Build(format!(
                "File {} does not exist (node {} @ {})",
                source.display(),
                name,
                self.target
            )));
        }

        let settings = inherited.merge(node, &name)?;
        let transform = self.options.parsers.resolve(
            settings.transform.as_deref(),
            &source,
            &name,
            &self.target,
        )?;
        let checks = node.get("checks").and_then(scalar_string);
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.ensure_new(path)?;

        if transform == ID_TRANSFORM {
            if let Some(names) = &checks {
                let bytes = fs::read(&source).with_path(&source)?;
                let text = String::from_utf8_lossy(&bytes);
                checks::run_checks(names, self.checks, CheckData::Text(&text), file, TargetKind::File.as_str())?;
            }
            let hash = if self.options.dry_run {
                hash_file(&source)?
            } else {
                save_file(self.store, &source)?
            };
            info!(node = %name, file, "copied");
            return self
                .package
                .add(path, vec![hash], TargetKind::File, file, &ext, None);
        }

        let hashes = self.build_table(&name, file, &source, &transform, &settings, checks.as_deref())?;
        self.package
            .add(path, hashes, TargetKind::Table, file, &ext, None)
    }

    fn build_table(
        &self,
        name: &str,
        file: &str,
        source: &Path,
        transform: &str,
        settings: &Inherited,
        checks: Option<&str>,
    ) -> Result<Vec<Hash>> {
        let source_hash = hash_file(source)?;
        let key = match cache_key(source, transform, &settings.kwargs) {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(node = name, file, error = %e, "arguments cannot be cached");
                None
            }
        };

        // checks always run against freshly parsed data
        if let (Some(key), None) = (&key, checks) {
            if let Some(hashes) = cache::lookup(self.store, key, &source_hash) {
                info!(node = name, file, "using cached transform");
                return Ok(hashes);
            }
        }

        let parser = self.options.parsers.get(transform).ok_or_else(|| {
            Error::Build(format!(
                "Unknown transform '{}' for {} @ {}",
                transform, name, self.target
            ))
        })?;
        info!(node = name, file, transform, "parsing");
        let table = parser.parse(source, &settings.kwargs)?;

        if let Some(names) = checks {
            checks::run_checks(names, self.checks, CheckData::Table(&table), file, TargetKind::Table.as_str())?;
        }

        if self.options.dry_run {
            return table_hashes(&table);
        }
        let hashes = save_table(self.store, &table)?;
        if let Some(key) = &key {
            cache::store_entry(
                self.store,
                key,
                &CacheEntry {
                    source_hash,
                    obj_hashes: hashes.clone(),
                },
            );
        }
        Ok(hashes)
    }

    /// reuse a node from a package already in the store
    fn graft(&mut self, path: &[String], source: &Value) -> Result<()> {
        let reference = source.as_str().ok_or_else(|| {
            Error::Build(format!(
                "package of {} must be a string like owner/package/path",
                path.join("/")
            ))
        })?;
        let pkg = PackageRef::parse(reference)?;
        let existing = self.store.get_package(&pkg.owner, &pkg.name, None)?;
        let node = if pkg.subpath.is_empty() {
            Node::Group(existing.contents().clone().into())
        } else {
            existing.get(&pkg.subpath_str())?.clone()
        };

        let mut hashes = Vec::new();
        match &node {
            Node::Group(group) => {
                let root = crate::types::RootNode::from(group.clone());
                hashes.extend(root.object_hashes());
            }
            other => hashes.extend(other.hashes().iter().copied()),
        }
        check_hashes(self.store, &hashes)?;

        self.ensure_new(path)?;
        debug!(node = %path.join("/"), source = reference, "grafted");
        self.package.contents_mut().put(path, node)
    }
}
