use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::info;

use crate::build::manifest::BUILD_FILE;
use crate::error::{Error, IoResultExt, Result};
use crate::store::DEFAULT_STORE_DIR;
use crate::types::safe_name;

fn skipped(name: &str) -> bool {
    name.starts_with('.') || name.ends_with('~') || name == BUILD_FILE || name == DEFAULT_STORE_DIR
}

/// source path relative to the build root, with forward slashes
fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// derive a contents mapping from a directory tree
///
/// files become leaves named after their stem, directories become groups. when two
/// entries share a stem the full file name is used instead.
pub fn generate_contents(dir: &Path) -> Result<Mapping> {
    walk(dir, dir)
}

fn walk(root: &Path, dir: &Path) -> Result<Mapping> {
    let mut entries: Vec<(String, PathBuf, bool)> = Vec::new();
    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        if skipped(&name) {
            continue;
        }
        let is_dir = entry.file_type().with_path(entry.path())?.is_dir();
        entries.push((name, entry.path(), is_dir));
    }
    entries.sort();

    let stem = |name: &str, path: &Path, is_dir: bool| {
        if is_dir {
            safe_name(name)
        } else {
            safe_name(&path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default())
        }
    };

    let mut counts: HashMap<String, usize> = HashMap::new();
    for (name, path, is_dir) in &entries {
        *counts.entry(stem(name, path, *is_dir)).or_default() += 1;
    }

    let mut contents = Mapping::new();
    for (name, path, is_dir) in entries {
        let mut node_name = stem(&name, &path, is_dir);
        if counts.get(&node_name).copied().unwrap_or(0) > 1 {
            node_name = safe_name(&name);
        }
        if node_name.is_empty() {
            return Err(Error::Build(format!(
                "cannot derive a node name from {}",
                path.display()
            )));
        }
        if contents.contains_key(node_name.as_str()) {
            return Err(Error::Build(format!(
                "Duplicate node names in directory {}: {}",
                dir.display(),
                node_name
            )));
        }

        let node = if is_dir {
            Value::Mapping(walk(root, &path)?)
        } else {
            let mut leaf = Mapping::new();
            leaf.insert("file".into(), Value::String(relative(root, &path)));
            Value::Mapping(leaf)
        };
        contents.insert(Value::String(node_name), node);
    }
    Ok(contents)
}

/// write a build.yml describing `dir`; an existing build file is never overwritten
pub fn generate_build_file(dir: &Path) -> Result<PathBuf> {
    let path = dir.join(BUILD_FILE);
    if path.exists() {
        return Err(Error::Build(format!(
            "Build file already exists: {}",
            path.display()
        )));
    }

    let mut top = Mapping::new();
    top.insert("contents".into(), Value::Mapping(generate_contents(dir)?));
    let yaml = serde_yaml::to_string(&top)
        .map_err(|e| Error::Build(format!("cannot serialize build file: {}", e)))?;
    fs::write(&path, yaml).with_path(&path)?;
    info!(path = %path.display(), "generated build file");
    Ok(path)
}
