use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

const PEP440: &str = r"(?ix)
    ^\s*v?
    (?:(?P<epoch>[0-9]+)!)?
    (?P<release>[0-9]+(?:\.[0-9]+)*)
    (?P<pre>
        [-_.]?
        (?P<pre_l>alpha|beta|preview|pre|rc|a|b|c)
        [-_.]?
        (?P<pre_n>[0-9]+)?
    )?
    (?P<post>
        (?:-(?P<post_n1>[0-9]+))
        |
        (?:
            [-_.]?
            (?P<post_l>post|rev|r)
            [-_.]?
            (?P<post_n2>[0-9]+)?
        )
    )?
    (?P<dev>
        [-_.]?
        (?P<dev_l>dev)
        [-_.]?
        (?P<dev_n>[0-9]+)?
    )?
    (?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?
    \s*$";

fn pep440_re() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PEP440))
        .as_ref()
        .map_err(|e| Error::InvalidVersion(e.to_string()))
}

/// strip leading zeros from a numeric component
fn number(s: &str) -> String {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// normalize a version string to its canonical PEP 440 form
///
/// `1.0-RC1` becomes `1.0rc1`, `v2.post` becomes `2.post0`, `1.0.DEV` becomes `1.0.dev0`.
pub fn normalize_version(input: &str) -> Result<String> {
    let caps = pep440_re()?
        .captures(input)
        .ok_or_else(|| Error::InvalidVersion(input.to_string()))?;

    let mut out = String::new();

    if let Some(epoch) = caps.name("epoch") {
        let epoch = number(epoch.as_str());
        if epoch != "0" {
            out.push_str(&epoch);
            out.push('!');
        }
    }

    let release: Vec<String> = caps["release"].split('.').map(number).collect();
    out.push_str(&release.join("."));

    if let Some(label) = caps.name("pre_l") {
        let label = match label.as_str().to_ascii_lowercase().as_str() {
            "alpha" | "a" => "a",
            "beta" | "b" => "b",
            _ => "rc",
        };
        out.push_str(label);
        out.push_str(&caps.name("pre_n").map_or("0".to_string(), |n| number(n.as_str())));
    }

    if caps.name("post").is_some() {
        let n = caps
            .name("post_n1")
            .or_else(|| caps.name("post_n2"))
            .map_or("0".to_string(), |n| number(n.as_str()));
        out.push_str(".post");
        out.push_str(&n);
    }

    if caps.name("dev").is_some() {
        out.push_str(".dev");
        out.push_str(&caps.name("dev_n").map_or("0".to_string(), |n| number(n.as_str())));
    }

    if let Some(local) = caps.name("local") {
        let local: Vec<String> = local
            .as_str()
            .to_ascii_lowercase()
            .split(['-', '_', '.'])
            .map(|part| {
                if part.chars().all(|c| c.is_ascii_digit()) {
                    number(part)
                } else {
                    part.to_string()
                }
            })
            .collect();
        out.push('+');
        out.push_str(&local.join("."));
    }

    Ok(out)
}
