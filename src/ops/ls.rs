use std::collections::BTreeMap;
use std::fmt::Write;

use crate::error::Result;
use crate::hash::Hash;
use crate::object::{check_hashes, load_table};
use crate::store::{PackageListing, Store};
use crate::types::{Node, PackageRef};

/// every installed instance, one row per tag
pub fn ls(store: &Store) -> Result<Vec<PackageListing>> {
    store.ls_packages()
}

/// render a package tree with box-drawing characters
///
/// tables show their shape and column types, which requires their fragments to be in
/// the store. a subpath in `pkg` renders only that part of the tree.
pub fn inspect(store: &Store, pkg: &PackageRef, hash: Option<&Hash>) -> Result<String> {
    let package = store.get_package(&pkg.owner, &pkg.name, hash)?;
    let node = if pkg.subpath.is_empty() {
        None
    } else {
        Some(package.get(&pkg.subpath_str())?)
    };
    let hashes: Vec<Hash> = match node {
        Some(node) => collect(node),
        None => package.contents().object_hashes().into_iter().collect(),
    };
    check_hashes(store, &hashes)?;

    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", pkg, package.get_hash().short());
    match node {
        Some(node) => render(store, node, "", "", pkg.subpath.last().map_or("", |s| s), &mut out)?,
        None => render_children(store, &package.contents().children, "", &mut out)?,
    }
    Ok(out)
}

fn collect(node: &Node) -> Vec<Hash> {
    let mut out = node.hashes().to_vec();
    if let Some(children) = node.children() {
        for child in children.values() {
            out.extend(collect(child));
        }
    }
    out
}

fn render_children(
    store: &Store,
    children: &BTreeMap<String, Node>,
    prefix: &str,
    out: &mut String,
) -> Result<()> {
    let last = children.len().saturating_sub(1);
    for (i, (name, child)) in children.iter().enumerate() {
        let (branch, indent) = if i == last { ("└─", "  ") } else { ("├─", "│ ") };
        render(
            store,
            child,
            &format!("{}{}", prefix, branch),
            &format!("{}{}", prefix, indent),
            name,
            out,
        )?;
    }
    Ok(())
}

fn render(
    store: &Store,
    node: &Node,
    prefix: &str,
    child_prefix: &str,
    name: &str,
    out: &mut String,
) -> Result<()> {
    match node {
        Node::Root(_) | Node::Group(_) => {
            let children = node.children().map(|c| c.len()).unwrap_or(0);
            let marker = if children > 0 { "┬ " } else { "─ " };
            let _ = writeln!(out, "{}{}{}", prefix, marker, name);
            if let Some(children) = node.children() {
                render_children(store, children, child_prefix, out)?;
            }
        }
        Node::Table(table) => {
            let data = load_table(store, &table.hashes)?;
            let columns: Vec<String> = data
                .columns()
                .iter()
                .map(|c| format!("{}:{}", c.name, c.data.type_name()))
                .collect();
            let _ = writeln!(
                out,
                "{}─ {}: shape ({}, {}), columns {}",
                prefix,
                name,
                data.num_rows(),
                data.num_columns(),
                columns.join(", ")
            );
        }
        Node::File(_) => {
            let _ = writeln!(out, "{}─ {}", prefix, name);
        }
    }
    Ok(())
}
