use std::fs;
use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::build::checks::CheckDefs;
use crate::build::transform::Kwargs;
use crate::error::{Error, IoResultExt, Result};
use crate::types::PackageFormat;

/// file name used for generated build files
pub const BUILD_FILE: &str = "build.yml";

/// keys that configure a node rather than name a child
pub const RESERVED_KEYS: &[&str] = &["file", "transform", "kwargs", "checks", "package", "environments"];

/// a parsed build file
#[derive(Debug, Clone, Default)]
pub struct BuildFile {
    pub contents: Mapping,
    pub format: PackageFormat,
    pub checks: CheckDefs,
}

/// parse a yaml document, reporting syntax errors with their position
pub fn load_yaml(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).with_path(path)?;
    parse_yaml(&text, path)
}

pub fn parse_yaml(text: &str, path: &Path) -> Result<Value> {
    serde_yaml::from_str(text).map_err(|e| {
        let message = match e.location() {
            Some(loc) => format!("line {}, column {}: {}", loc.line(), loc.column(), e),
            None => e.to_string(),
        };
        Error::Yaml {
            path: path.to_path_buf(),
            message,
        }
    })
}

impl BuildFile {
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_value(load_yaml(path)?, path)
    }

    pub fn from_value(value: Value, path: &Path) -> Result<Self> {
        let invalid = |what: &str| Error::Build(format!("Error in {}: {}", path.display(), what));

        let Value::Mapping(mut top) = value else {
            return Err(invalid("expected a mapping at the top level"));
        };

        let contents = match top.remove("contents") {
            Some(Value::Mapping(contents)) => contents,
            Some(_) => return Err(invalid("\"contents\" must be a mapping")),
            None => return Err(invalid("missing \"contents\"")),
        };

        let format = match top.remove("format") {
            None | Some(Value::Null) => PackageFormat::default(),
            Some(Value::String(s)) => s.parse()?,
            Some(_) => return Err(invalid("\"format\" must be a string")),
        };

        let checks = match top.remove("checks") {
            None | Some(Value::Null) => CheckDefs::new(),
            Some(value) => check_defs(value, path)?,
        };

        Ok(Self {
            contents,
            format,
            checks,
        })
    }
}

/// read check definitions from a `checks` mapping
pub fn check_defs(value: Value, path: &Path) -> Result<CheckDefs> {
    let Value::Mapping(map) = value else {
        return Err(Error::Build(format!(
            "Error in {}: checks must be a mapping of names to expressions",
            path.display()
        )));
    };
    map.into_iter()
        .map(|(name, code)| match (name, code) {
            (Value::String(name), Value::String(code)) => Ok((name, code)),
            (Value::String(name), Value::Bool(b)) => Ok((name, b.to_string())),
            (Value::String(name), Value::Number(n)) => Ok((name, n.to_string())),
            (name, _) => Err(Error::Build(format!(
                "Error in {}: check {:?} must be a string expression",
                path.display(),
                name
            ))),
        })
        .collect()
}

/// load a standalone checks file; its top level is the checks mapping
pub fn load_checks(path: &Path) -> Result<CheckDefs> {
    match load_yaml(path)? {
        Value::Null => Ok(CheckDefs::new()),
        value => check_defs(value, path),
    }
}

/// a node is internal when any key names a child
pub fn is_internal(node: &Mapping) -> bool {
    node.keys()
        .any(|k| !k.as_str().is_some_and(|k| RESERVED_KEYS.contains(&k)))
}

/// glob metacharacters
pub fn has_magic(name: &str) -> bool {
    name.contains(['*', '?', '['])
}

/// transform and kwargs passed down the tree
#[derive(Debug, Clone, Default)]
pub struct Inherited {
    pub transform: Option<String>,
    pub kwargs: Kwargs,
}

impl Inherited {
    /// settings for a node: its own values win, kwargs merge key by key
    pub fn merge(&self, node: &Mapping, name: &str) -> Result<Self> {
        let transform = match node.get("transform") {
            None | Some(Value::Null) => self.transform.clone(),
            Some(Value::String(t)) => Some(t.clone()),
            Some(_) => {
                return Err(Error::Build(format!("transform of {} must be a string", name)))
            }
        };

        let mut kwargs = self.kwargs.clone();
        match node.get("kwargs") {
            None | Some(Value::Null) => {}
            Some(Value::Mapping(map)) => {
                for (k, v) in map {
                    let Value::String(k) = k else {
                        return Err(Error::Build(format!("kwargs of {} must have string keys", name)));
                    };
                    kwargs.insert(k.clone(), v.clone());
                }
            }
            Some(_) => return Err(Error::Build(format!("kwargs of {} must be a mapping", name))),
        }

        Ok(Self { transform, kwargs })
    }
}
