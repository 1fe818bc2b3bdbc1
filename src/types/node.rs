use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::types::metadata::{PackageFormat, TargetKind, META_EXT, META_PATH, META_TARGET};
use crate::types::name::validate_nodename;

/// a node in a package content tree
///
/// serialized with a `type` discriminator (`ROOT`, `GROUP`, `TABLE`, `FILE`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Node {
    #[serde(rename = "ROOT")]
    Root(RootNode),
    #[serde(rename = "GROUP")]
    Group(GroupNode),
    #[serde(rename = "TABLE")]
    Table(TableNode),
    #[serde(rename = "FILE")]
    File(FileNode),
}

impl Node {
    pub const ROOT: &'static str = "ROOT";
    pub const GROUP: &'static str = "GROUP";
    pub const TABLE: &'static str = "TABLE";
    pub const FILE: &'static str = "FILE";

    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Root(_) => Self::ROOT,
            Node::Group(_) => Self::GROUP,
            Node::Table(_) => Self::TABLE,
            Node::File(_) => Self::FILE,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Node::Root(_) | Node::Group(_))
    }

    /// children, for group-like nodes
    pub fn children(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Root(root) => Some(&root.children),
            Node::Group(group) => Some(&group.children),
            _ => None,
        }
    }

    fn children_mut(&mut self) -> Option<&mut BTreeMap<String, Node>> {
        match self {
            Node::Root(root) => Some(&mut root.children),
            Node::Group(group) => Some(&mut group.children),
            _ => None,
        }
    }

    /// fragment hashes, for leaf nodes
    pub fn hashes(&self) -> &[Hash] {
        match self {
            Node::Table(table) => &table.hashes,
            Node::File(file) => &file.hashes,
            _ => &[],
        }
    }

    pub fn metadata_hash(&self) -> Option<&Hash> {
        match self {
            Node::Root(n) => n.metadata_hash.as_ref(),
            Node::Group(n) => n.metadata_hash.as_ref(),
            Node::Table(n) => n.metadata_hash.as_ref(),
            Node::File(n) => n.metadata_hash.as_ref(),
        }
    }

    pub fn set_metadata_hash(&mut self, hash: Option<Hash>) {
        match self {
            Node::Root(n) => n.metadata_hash = hash,
            Node::Group(n) => n.metadata_hash = hash,
            Node::Table(n) => n.metadata_hash = hash,
            Node::File(n) => n.metadata_hash = hash,
        }
    }

    fn collect_hashes(&self, out: &mut BTreeSet<Hash>) {
        out.extend(self.hashes().iter().copied());
        if let Some(children) = self.children() {
            for child in children.values() {
                child.collect_hashes(out);
            }
        }
    }
}

/// top of a package tree
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RootNode {
    #[serde(default)]
    pub children: BTreeMap<String, Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_hash: Option<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<PackageFormat>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
    #[serde(default)]
    pub children: BTreeMap<String, Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_hash: Option<Hash>,
}

/// tabular dataset stored as one or more columnar fragments
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableNode {
    pub hashes: Vec<Hash>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_hash: Option<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<PackageFormat>,
}

/// opaque byte blob, conventionally a single fragment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub hashes: Vec<Hash>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_hash: Option<Hash>,
}

fn provenance(target: TargetKind, source_path: &str, ext: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(META_EXT.to_string(), Value::String(ext.to_string()));
    metadata.insert(META_PATH.to_string(), Value::String(source_path.to_string()));
    metadata.insert(META_TARGET.to_string(), Value::String(target.as_str().to_string()));
    metadata
}

impl TableNode {
    pub fn new(hashes: Vec<Hash>, source_path: &str, ext: &str) -> Self {
        Self {
            hashes,
            metadata: provenance(TargetKind::Table, source_path, ext),
            metadata_hash: None,
            format: Some(PackageFormat::Columnar),
        }
    }
}

impl FileNode {
    pub fn new(hashes: Vec<Hash>, source_path: &str, ext: &str) -> Self {
        Self {
            hashes,
            metadata: provenance(TargetKind::File, source_path, ext),
            metadata_hash: None,
        }
    }
}

impl From<GroupNode> for RootNode {
    fn from(group: GroupNode) -> Self {
        Self {
            children: group.children,
            metadata_hash: group.metadata_hash,
            format: None,
        }
    }
}

impl From<RootNode> for GroupNode {
    fn from(root: RootNode) -> Self {
        Self {
            children: root.children,
            metadata_hash: root.metadata_hash,
        }
    }
}

impl TryFrom<Node> for RootNode {
    type Error = Error;

    /// accepts old manifests whose top node is a plain group
    fn try_from(node: Node) -> Result<Self> {
        match node {
            Node::Root(root) => Ok(root),
            Node::Group(group) => Ok(group.into()),
            other => Err(Error::TypeMismatch(format!(
                "manifest top node is {}, expected ROOT",
                other.type_name()
            ))),
        }
    }
}

/// borrowed tagged view used to serialize a root with its `type` field
#[derive(Serialize)]
#[serde(tag = "type")]
enum TaggedRoot<'a> {
    #[serde(rename = "ROOT")]
    Root(&'a RootNode),
}

/// split a slash separated reference into validated segments
fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.trim().is_empty() {
        return Err(Error::BlankReference);
    }
    if path.starts_with('/') {
        return Err(Error::InvalidReference(format!(
            "{}: package paths must be relative",
            path
        )));
    }
    Ok(path.split('/').filter(|s| !s.is_empty()).collect())
}

impl RootNode {
    /// look up a node by slash separated path
    pub fn get(&self, path: &str) -> Result<&Node> {
        let segments = split_path(path)?;
        let mut children = &self.children;
        let mut prefix = String::new();
        let mut found: Option<&Node> = None;

        for segment in segments {
            if let Some(node) = found {
                children = node
                    .children()
                    .ok_or_else(|| Error::NotAGroup(prefix.clone()))?;
            }
            let node = children.get(segment).ok_or_else(|| Error::NodeNotFound {
                prefix: prefix.clone(),
                segment: segment.to_string(),
            })?;
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            found = Some(node);
        }

        found.ok_or(Error::BlankReference)
    }

    /// membership test; blank or absolute paths are still errors
    pub fn contains(&self, path: &str) -> Result<bool> {
        match self.get(path) {
            Ok(_) => Ok(true),
            Err(Error::NodeNotFound { .. }) | Err(Error::NotAGroup(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// insert or replace a node built from fragment hashes
    ///
    /// intermediate groups are created as needed. the empty path only accepts a group
    /// target and stores `metadata_hash` on the root itself.
    pub fn add(
        &mut self,
        path: &[String],
        hashes: Vec<Hash>,
        target: TargetKind,
        source_path: &str,
        transform: &str,
        metadata_hash: Option<Hash>,
    ) -> Result<()> {
        let node = match target {
            TargetKind::Group => Node::Group(GroupNode {
                children: BTreeMap::new(),
                metadata_hash,
            }),
            TargetKind::Table => {
                let mut table = TableNode::new(hashes, source_path, transform);
                table.metadata_hash = metadata_hash;
                table.format = self.format.or(table.format);
                Node::Table(table)
            }
            TargetKind::File => {
                let mut file = FileNode::new(hashes, source_path, transform);
                file.metadata_hash = metadata_hash;
                Node::File(file)
            }
        };
        self.put(path, node)
    }

    /// insert or replace an already built node
    pub fn put(&mut self, path: &[String], node: Node) -> Result<()> {
        let Some((last, parents)) = path.split_last() else {
            return match node {
                Node::Group(group) => {
                    if !group.children.is_empty() {
                        return Err(Error::TypeMismatch(
                            "cannot replace the package root with a non-empty group".to_string(),
                        ));
                    }
                    self.metadata_hash = group.metadata_hash;
                    Ok(())
                }
                other => Err(Error::TypeMismatch(format!(
                    "cannot store a {} at the package root",
                    other.type_name()
                ))),
            };
        };

        for segment in path {
            validate_nodename(segment)?;
        }

        let mut children = &mut self.children;
        let mut prefix = String::new();
        for segment in parents {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            let entry = children
                .entry(segment.clone())
                .or_insert_with(|| Node::Group(GroupNode::default()));
            children = entry
                .children_mut()
                .ok_or_else(|| Error::NotAGroup(prefix.clone()))?;
        }

        // adding a group over an existing group keeps its children
        if let (Node::Group(incoming), Some(existing)) = (&node, children.get_mut(last)) {
            if existing.is_group() && incoming.children.is_empty() {
                existing.set_metadata_hash(incoming.metadata_hash);
                return Ok(());
            }
        }
        children.insert(last.clone(), node);
        Ok(())
    }

    /// every fragment hash referenced anywhere in the tree
    pub fn object_hashes(&self) -> BTreeSet<Hash> {
        let mut out = BTreeSet::new();
        for child in self.children.values() {
            child.collect_hashes(&mut out);
        }
        out
    }

    /// leaf nodes with their slash separated paths, in sorted order
    pub fn leaves(&self) -> Vec<(String, &Node)> {
        fn walk<'a>(prefix: &str, children: &'a BTreeMap<String, Node>, out: &mut Vec<(String, &'a Node)>) {
            for (name, child) in children {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                };
                match child.children() {
                    Some(grandchildren) => walk(&path, grandchildren, out),
                    None => out.push((path, child)),
                }
            }
        }
        let mut out = Vec::new();
        walk("", &self.children, &mut out);
        out
    }

    /// serialize as a pretty printed manifest
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&TaggedRoot::Root(self))?)
    }

    /// parse a manifest, converting legacy group roots
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let node: Node = serde_json::from_slice(bytes)?;
        node.try_into()
    }

    /// tagged json value, as sent to the registry
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(TaggedRoot::Root(self))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> Hash {
        Hash::from_bytes([byte; 32])
    }

    fn path(p: &str) -> Vec<String> {
        p.split('/').map(String::from).collect()
    }

    fn sample() -> RootNode {
        let mut root = RootNode::default();
        root.add(&path("data/table"), vec![h(1), h(2)], TargetKind::Table, "data/t.csv", "csv", None)
            .unwrap();
        root.add(&path("data/readme"), vec![h(3)], TargetKind::File, "README.md", "md", None)
            .unwrap();
        root.add(&path("empty"), vec![], TargetKind::Group, "", "", None)
            .unwrap();
        root
    }

    #[test]
    fn test_get_nested() {
        let root = sample();
        assert!(matches!(root.get("data/table").unwrap(), Node::Table(_)));
        assert!(root.get("data").unwrap().is_group());
        assert!(root.get("data/").unwrap().is_group());
    }

    #[test]
    fn test_get_blank_and_absolute() {
        let root = sample();
        assert!(matches!(root.get(""), Err(Error::BlankReference)));
        assert!(matches!(root.get("   "), Err(Error::BlankReference)));
        assert!(matches!(root.get("/data"), Err(Error::InvalidReference(_))));
        assert!(root.contains("").is_err());
    }

    #[test]
    fn test_get_not_found_carries_prefix() {
        let root = sample();
        match root.get("data/missing/deeper") {
            Err(Error::NodeNotFound { prefix, segment }) => {
                assert_eq!(prefix, "data");
                assert_eq!(segment, "missing");
            }
            other => panic!("unexpected: {:?}", other),
        }
        let empty = RootNode::default();
        match empty.get("any/path") {
            Err(Error::NodeNotFound { prefix, segment }) => {
                assert_eq!(prefix, "");
                assert_eq!(segment, "any");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_get_through_leaf_is_not_a_group() {
        let root = sample();
        match root.get("data/table/column") {
            Err(Error::NotAGroup(prefix)) => assert_eq!(prefix, "data/table"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!root.contains("data/table/column").unwrap());
        assert!(root.contains("data/readme").unwrap());
        assert!(!root.contains("nope").unwrap());
    }

    #[test]
    fn test_add_rejects_bad_names() {
        let mut root = RootNode::default();
        let err = root
            .add(&path("_hidden"), vec![h(1)], TargetKind::File, "x", "", None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
    }

    #[test]
    fn test_add_through_leaf_fails() {
        let mut root = sample();
        let err = root
            .add(&path("data/table/x"), vec![h(1)], TargetKind::File, "x", "", None)
            .unwrap_err();
        assert!(matches!(err, Error::NotAGroup(_)));
    }

    #[test]
    fn test_add_root_only_group() {
        let mut root = sample();
        root.add(&[], vec![], TargetKind::Group, "", "", Some(h(7))).unwrap();
        assert_eq!(root.metadata_hash, Some(h(7)));
        assert_eq!(root.children.len(), 2);

        let err = root.add(&[], vec![h(1)], TargetKind::File, "x", "", None).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn test_add_group_keeps_children() {
        let mut root = sample();
        root.add(&path("data"), vec![], TargetKind::Group, "", "", Some(h(5))).unwrap();
        let data = root.get("data").unwrap();
        assert_eq!(data.children().unwrap().len(), 2);
        assert_eq!(data.metadata_hash(), Some(&h(5)));
    }

    #[test]
    fn test_provenance_metadata() {
        let root = sample();
        match root.get("data/table").unwrap() {
            Node::Table(table) => {
                assert_eq!(table.metadata[META_PATH], "data/t.csv");
                assert_eq!(table.metadata[META_EXT], "csv");
                assert_eq!(table.metadata[META_TARGET], "table");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_object_hashes_and_leaves() {
        let root = sample();
        let hashes: Vec<_> = root.object_hashes().into_iter().collect();
        assert_eq!(hashes, vec![h(1), h(2), h(3)]);

        let leaves: Vec<_> = root.leaves().into_iter().map(|(p, _)| p).collect();
        assert_eq!(leaves, vec!["data/readme", "data/table"]);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut root = sample();
        root.metadata_hash = Some(h(9));
        let json = root.to_json().unwrap();
        let text = String::from_utf8(json.clone()).unwrap();
        assert!(text.contains("\"type\": \"ROOT\""));
        assert!(text.contains("\"type\": \"TABLE\""));
        assert_eq!(RootNode::from_json(&json).unwrap(), root);
    }

    #[test]
    fn test_legacy_group_root() {
        let json = br#"{"type": "GROUP", "children": {"a": {"type": "FILE", "hashes": [], "metadata": {}}}}"#;
        let root = RootNode::from_json(json).unwrap();
        assert!(root.contains("a").unwrap());

        let json = br#"{"type": "FILE", "hashes": []}"#;
        assert!(RootNode::from_json(json).is_err());
    }

    #[test]
    fn test_unset_metadata_hash_is_omitted() {
        let root = sample();
        let text = String::from_utf8(root.to_json().unwrap()).unwrap();
        assert!(!text.contains("metadata_hash"));
    }
}
