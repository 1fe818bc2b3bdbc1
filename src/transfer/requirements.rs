//! installing every package a requirements file lists
//!
//! a requirements document is yaml with a `packages` list of extended references:
//!
//! ```yaml
//! packages:
//!   - alice/weather
//!   - bob/census:v:1.0
//!   - acme:carol/sales/2019:t:final
//! ```

use std::path::Path;

use serde_yaml::Value;
use tracing::info;

use crate::build::{load_yaml, parse_yaml};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::transfer::{install, InstallOptions, InstallResult, RegistryClient};
use crate::types::{PackageRef, Selector};

const INLINE_SOURCE: &str = "<requirements>";

/// one `packages` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub package: PackageRef,
    pub selector: Option<Selector>,
}

/// the `packages` list of a parsed requirements document
pub fn parse_requirements(doc: &Value, source: &str) -> Result<Vec<Requirement>> {
    let invalid = |message: &str| Error::Build(format!("Error in {}: {}", source, message));
    let entries = doc
        .get("packages")
        .ok_or_else(|| invalid("missing \"packages\" node"))?
        .as_sequence()
        .ok_or_else(|| invalid("\"packages\" must be a list"))?;

    entries
        .iter()
        .map(|entry| {
            let text = entry
                .as_str()
                .ok_or_else(|| invalid("package entries must be strings"))?;
            let (package, selector) = PackageRef::parse_extended(text.trim())?;
            Ok(Requirement { package, selector })
        })
        .collect()
}

/// requirements from `@path`, or from the yaml text itself
pub fn read_requirements(requirements: &str) -> Result<Vec<Requirement>> {
    match requirements.trim().strip_prefix('@') {
        Some(path) => {
            let path = Path::new(path);
            parse_requirements(&load_yaml(path)?, &path.display().to_string())
        }
        None => parse_requirements(&parse_yaml(requirements, Path::new(INLINE_SOURCE))?, INLINE_SOURCE),
    }
}

/// install every listed package, each from its own team's registry
///
/// stops at the first package that fails; packages installed before it stay.
pub fn install_requirements(
    store: &Store,
    config: &Config,
    requirements: &str,
    force: bool,
) -> Result<Vec<(PackageRef, InstallResult)>> {
    let requirements = read_requirements(requirements)?;
    let mut installed = Vec::with_capacity(requirements.len());
    for requirement in requirements {
        let client = RegistryClient::from_config(config, requirement.package.team.as_deref())?;
        let options = InstallOptions {
            selector: requirement.selector,
            force,
            workers: 0,
        };
        let result = install(store, &client, &config.transfer, &requirement.package, &options)?;
        info!(package = %requirement.package, hash = %result.hash, "requirement installed");
        installed.push((requirement.package, result));
    }
    Ok(installed)
}
