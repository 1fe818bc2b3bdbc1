use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::IoResultExt;
use crate::types::{Node, RootNode};
use crate::Error;

/// read buffer size for streaming file hashes
const CHUNK_SIZE: usize = 64 * 1024;

/// SHA-256 hash used for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// zero hash (useful as sentinel)
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// parse from hex string
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidHashHex(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(Error::InvalidHashHex(s.to_string()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// abbreviated hex form for display
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..12])
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// sha256 of a byte slice
pub fn hash_bytes(data: &[u8]) -> Hash {
    Hash(Sha256::digest(data).into())
}

/// sha256 of the utf-8 encoding of a string
pub fn hash_string(value: &str) -> Hash {
    hash_bytes(value.as_bytes())
}

/// stream a file through sha256; matches `sha256sum`
pub fn hash_file(path: &Path) -> crate::Result<Hash> {
    let mut file = File::open(path).with_path(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).with_path(path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Hash(hasher.finalize().into()))
}

/// compute the canonical hash of a package tree
///
/// format, applied recursively:
///   type tag: string
///   table/file: count, then each fragment hash (hex string) in list order
///   group/root: count, then (name string, child) for each child sorted by name
///   metadata_hash: hex string, only when set
///
/// counts are 4 bytes BE; strings are a 4 byte BE length followed by utf-8 bytes.
/// the free-form `metadata` map never participates.
pub fn hash_tree(root: &RootNode) -> Hash {
    let mut hasher = TreeHasher::new();
    hasher.root(root);
    hasher.finalize()
}

/// canonical hash of any node, rooted at that node
pub fn hash_node(node: &Node) -> Hash {
    let mut hasher = TreeHasher::new();
    hasher.node(node);
    hasher.finalize()
}

struct TreeHasher {
    hasher: Sha256,
}

impl TreeHasher {
    fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    fn int(&mut self, value: usize) {
        self.hasher.update((value as u32).to_be_bytes());
    }

    fn str(&mut self, value: &str) {
        self.int(value.len());
        self.hasher.update(value.as_bytes());
    }

    fn root(&mut self, root: &RootNode) {
        self.str(Node::ROOT);
        self.children(root.children.iter());
        self.metadata_hash(root.metadata_hash.as_ref());
    }

    fn node(&mut self, node: &Node) {
        match node {
            Node::Root(root) => self.root(root),
            Node::Group(group) => {
                self.str(Node::GROUP);
                self.children(group.children.iter());
                self.metadata_hash(group.metadata_hash.as_ref());
            }
            Node::Table(table) => {
                self.str(Node::TABLE);
                self.fragments(&table.hashes);
                self.metadata_hash(table.metadata_hash.as_ref());
            }
            Node::File(file) => {
                self.str(Node::FILE);
                self.fragments(&file.hashes);
                self.metadata_hash(file.metadata_hash.as_ref());
            }
        }
    }

    // children come from a BTreeMap, so iteration order is already sorted by name
    fn children<'a>(&mut self, children: impl ExactSizeIterator<Item = (&'a String, &'a Node)>) {
        self.int(children.len());
        for (name, child) in children {
            self.str(name);
            self.node(child);
        }
    }

    fn fragments(&mut self, hashes: &[Hash]) {
        self.int(hashes.len());
        for hash in hashes {
            self.str(&hash.to_hex());
        }
    }

    fn metadata_hash(&mut self, metadata_hash: Option<&Hash>) {
        if let Some(hash) = metadata_hash {
            self.str(&hash.to_hex());
        }
    }

    fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileNode, GroupNode, TableNode};
    use tempfile::tempdir;

    fn h(byte: u8) -> Hash {
        Hash::from_bytes([byte; 32])
    }

    #[test]
    fn test_hash_hex_roundtrip() {
        let original =
            Hash::from_hex("abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789")
                .unwrap();
        let parsed = Hash::from_hex(&original.to_hex()).unwrap();
        assert_eq!(original, parsed);
        assert_eq!(original.short(), "abcdef01");
    }

    #[test]
    fn test_hash_invalid_hex() {
        assert!(Hash::from_hex("not valid hex").is_err());
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex(
            "abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789ff"
        )
        .is_err());
    }

    #[test]
    fn test_hash_file_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(
            hash_file(&path).unwrap().to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_file_one_byte() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one");
        std::fs::write(&path, b"a").unwrap();
        assert_eq!(
            hash_file(&path).unwrap().to_hex(),
            "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb"
        );
    }

    #[test]
    fn test_hash_file_many_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big");
        let data = vec![b'a'; 1_000_000];
        assert!(data.len() > CHUNK_SIZE);
        std::fs::write(&path, &data).unwrap();

        let streamed = hash_file(&path).unwrap();
        assert_eq!(
            streamed.to_hex(),
            "cdc76e5c9914fb9281a1c7e284d73e67f1809a48a497200e046d39ccc7112cd0"
        );
        assert_eq!(streamed, hash_bytes(&data));
    }

    #[test]
    fn test_hash_string_is_utf8_digest() {
        assert_eq!(hash_string("a"), hash_bytes(b"a"));
        assert_ne!(hash_string("é"), hash_bytes(&[0xe9]));
    }

    #[test]
    fn test_tree_hash_insertion_order() {
        let mut a = RootNode::default();
        let file = Node::File(FileNode::new(vec![h(1)], "x.txt", "txt"));
        a.children.insert("x".into(), file.clone());
        a.children.insert("y".into(), Node::Group(GroupNode::default()));

        let mut b = RootNode::default();
        b.children.insert("y".into(), Node::Group(GroupNode::default()));
        b.children.insert("x".into(), file);

        assert_eq!(hash_tree(&a), hash_tree(&b));
    }

    #[test]
    fn test_tree_hash_ignores_metadata() {
        let plain = Node::File(FileNode::new(vec![h(1)], "a.txt", "txt"));
        let mut annotated = plain.clone();
        if let Node::File(file) = &mut annotated {
            file.metadata
                .insert("q_path".into(), serde_json::Value::String("elsewhere.txt".into()));
        }
        assert_eq!(hash_node(&plain), hash_node(&annotated));

        if let Node::File(file) = &mut annotated {
            file.metadata_hash = Some(h(9));
        }
        assert_ne!(hash_node(&plain), hash_node(&annotated));
    }

    #[test]
    fn test_tree_hash_fragment_order_matters() {
        let ab = Node::Table(TableNode::new(vec![h(1), h(2)], "a.csv", "csv"));
        let ba = Node::Table(TableNode::new(vec![h(2), h(1)], "a.csv", "csv"));
        assert_ne!(hash_node(&ab), hash_node(&ba));
    }

    #[test]
    fn test_tree_hash_type_tag_matters() {
        let table = Node::Table(TableNode::new(vec![h(1)], "a", ""));
        let file = Node::File(FileNode::new(vec![h(1)], "a", ""));
        assert_ne!(hash_node(&table), hash_node(&file));
    }

    #[test]
    fn test_root_metadata_hash_changes_identity() {
        let plain = RootNode::default();
        let mut tagged = RootNode::default();
        tagged.metadata_hash = Some(h(3));
        assert_ne!(hash_tree(&plain), hash_tree(&tagged));
    }
}
