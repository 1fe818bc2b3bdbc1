use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::types::name::{check_name, validate_nodename};

/// which instance of a package a reference points at
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    /// full or abbreviated content hash
    Hash(String),
    Tag(String),
    Version(String),
}

impl Default for Selector {
    fn default() -> Self {
        Selector::Tag(crate::refs::LATEST_TAG.to_string())
    }
}

/// `[team:]owner/package[/sub/path]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageRef {
    pub team: Option<String>,
    pub owner: String,
    pub name: String,
    pub subpath: Vec<String>,
}

fn extended_re() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^((?:\w+:)?\w+/[\w/]+)(?::h(?:ash)?:(.+)|:v(?:ersion)?:(.+)|:t(?:ag)?:(.+))?$")
    })
    .as_ref()
    .map_err(|e| Error::InvalidReference(e.to_string()))
}

impl PackageRef {
    pub fn new(owner: &str, name: &str) -> Result<Self> {
        check_name("owner", owner)?;
        check_name("package", name)?;
        Ok(Self {
            team: None,
            owner: owner.to_string(),
            name: name.to_string(),
            subpath: Vec::new(),
        })
    }

    /// parse `[team:]owner/package[/sub/path]`
    pub fn parse(input: &str) -> Result<Self> {
        let (team, rest) = match input.split_once(':') {
            Some((team, rest)) => (Some(team), rest),
            None => (None, input),
        };
        if let Some(team) = team {
            check_name("team", team)?;
        }

        let mut parts = rest.split('/');
        let (Some(owner), Some(name)) = (parts.next(), parts.next()) else {
            return Err(Error::InvalidReference(format!(
                "{}: expected owner/package",
                input
            )));
        };
        check_name("owner", owner)?;
        check_name("package", name)?;

        let subpath: Vec<String> = parts.filter(|p| !p.is_empty()).map(String::from).collect();
        for segment in &subpath {
            validate_nodename(segment)?;
        }

        Ok(Self {
            team: team.map(String::from),
            owner: owner.to_string(),
            name: name.to_string(),
            subpath,
        })
    }

    /// parse a reference with an optional `:h:`/`:hash:`, `:v:`/`:version:` or `:t:`/`:tag:` suffix
    pub fn parse_extended(input: &str) -> Result<(Self, Option<Selector>)> {
        let caps = extended_re()?
            .captures(input)
            .ok_or_else(|| Error::InvalidReference(input.to_string()))?;
        let package = Self::parse(&caps[1])?;
        let selector = if let Some(hash) = caps.get(2) {
            Some(Selector::Hash(hash.as_str().to_string()))
        } else if let Some(version) = caps.get(3) {
            Some(Selector::Version(version.as_str().to_string()))
        } else {
            caps.get(4).map(|tag| Selector::Tag(tag.as_str().to_string()))
        };
        Ok((package, selector))
    }

    /// `owner/package`, without team or subpath
    pub fn short_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn subpath_str(&self) -> String {
        self.subpath.join("/")
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(team) = &self.team {
            write!(f, "{}:", team)?;
        }
        write!(f, "{}/{}", self.owner, self.name)?;
        for segment in &self.subpath {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let pkg = PackageRef::parse("akarve/sales").unwrap();
        assert_eq!(pkg.owner, "akarve");
        assert_eq!(pkg.name, "sales");
        assert!(pkg.team.is_none());
        assert!(pkg.subpath.is_empty());
        assert_eq!(pkg.to_string(), "akarve/sales");
    }

    #[test]
    fn test_parse_team_and_subpath() {
        let pkg = PackageRef::parse("acme:akarve/sales/q1/raw").unwrap();
        assert_eq!(pkg.team.as_deref(), Some("acme"));
        assert_eq!(pkg.subpath, vec!["q1", "raw"]);
        assert_eq!(pkg.subpath_str(), "q1/raw");
        assert_eq!(pkg.to_string(), "acme:akarve/sales/q1/raw");
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        assert!(matches!(PackageRef::parse("nope"), Err(Error::InvalidReference(_))));
        assert!(matches!(PackageRef::parse("1bad/pkg"), Err(Error::InvalidName(_))));
        assert!(matches!(PackageRef::parse("owner/pkg-name"), Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_parse_extended() {
        let (pkg, sel) = PackageRef::parse_extended("foo/bar:h:795a7b").unwrap();
        assert_eq!(pkg.short_name(), "foo/bar");
        assert_eq!(sel, Some(Selector::Hash("795a7b".into())));

        let (_, sel) = PackageRef::parse_extended("foo/bar:version:1.0").unwrap();
        assert_eq!(sel, Some(Selector::Version("1.0".into())));

        let (_, sel) = PackageRef::parse_extended("foo/bar/sub:t:stable").unwrap();
        assert_eq!(sel, Some(Selector::Tag("stable".into())));

        let (_, sel) = PackageRef::parse_extended("team:foo/bar").unwrap();
        assert_eq!(sel, None);

        assert!(PackageRef::parse_extended("foo/bar:x:1").is_err());
    }
}
