use std::collections::HashSet;

use crate::error::{Error, Result};

/// node names: ascii letter or underscore, then word characters; leading `_` is reserved
pub fn is_nodename(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// validate a node name, returning a naming error if it fails
pub fn validate_nodename(name: &str) -> Result<()> {
    if is_nodename(name) {
        Ok(())
    } else {
        Err(Error::InvalidName(format!(
            "{:?}: node names must start with a letter and contain only letters, digits and underscores",
            name
        )))
    }
}

/// validate an owner, package or team name
pub fn check_name(kind: &str, name: &str) -> Result<()> {
    if is_nodename(name) {
        Ok(())
    } else {
        Err(Error::InvalidName(format!("invalid {} name: {:?}", kind, name)))
    }
}

/// turn an arbitrary string into a valid node name
///
/// non-alphanumerics become `_`, surrounding underscores are stripped and a leading
/// digit gets an `n` prefix. when `taken` is given the result is deduplicated against
/// it with `_2`, `_3`, ... suffixes and inserted.
pub fn to_nodename(raw: &str, taken: Option<&mut HashSet<String>>) -> Result<String> {
    let replaced: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let mut name = replaced.trim_matches('_').to_string();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, 'n');
    }
    validate_nodename(&name)?;

    let Some(taken) = taken else {
        return Ok(name);
    };

    let mut candidate = name.clone();
    let mut counter = 1;
    while taken.contains(&candidate) {
        counter += 1;
        candidate = format!("{}_{}", name, counter);
    }
    taken.insert(candidate.clone());
    Ok(candidate)
}

/// sanitize a file name for generated build files; runs of separators collapse to one `_`
pub fn safe_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending && !out.is_empty() {
                out.push('_');
            }
            pending = false;
            out.push(c);
        } else {
            pending = true;
        }
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'n');
    }
    out
}
