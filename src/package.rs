use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{IoResultExt, Result};
use crate::hash::{hash_tree, Hash};
use crate::object::save_metadata;
use crate::refs::{write_tag, LATEST_TAG};
use crate::store::{Store, CONTENTS_DIR};
use crate::types::{Node, RootNode, TargetKind};

/// an in-memory package instance bound to its directory in a store
#[derive(Debug, Clone)]
pub struct Package {
    owner: String,
    name: String,
    path: PathBuf,
    tmp_dir: PathBuf,
    contents: RootNode,
}

impl Package {
    pub(crate) fn new(
        owner: &str,
        name: &str,
        path: PathBuf,
        tmp_dir: PathBuf,
        contents: RootNode,
    ) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            path,
            tmp_dir,
            contents,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// package directory inside the store
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn contents(&self) -> &RootNode {
        &self.contents
    }

    pub fn contents_mut(&mut self) -> &mut RootNode {
        &mut self.contents
    }

    pub fn into_contents(self) -> RootNode {
        self.contents
    }

    /// canonical hash of the current contents
    pub fn get_hash(&self) -> Hash {
        hash_tree(&self.contents)
    }

    pub(crate) fn contents_path(&self, hash: &Hash) -> PathBuf {
        self.path.join(CONTENTS_DIR).join(hash.to_hex())
    }

    /// look up a node by slash separated path
    pub fn get(&self, path: &str) -> Result<&Node> {
        self.contents.get(path)
    }

    /// add a node to the contents; see [`RootNode::add`]
    pub fn add(
        &mut self,
        path: &[String],
        hashes: Vec<Hash>,
        target: TargetKind,
        source_path: &str,
        transform: &str,
        metadata_hash: Option<Hash>,
    ) -> Result<()> {
        self.contents
            .add(path, hashes, target, source_path, transform, metadata_hash)
    }

    /// attach user metadata to an existing node, or to the root for an empty path
    pub fn set_metadata(&mut self, store: &Store, path: &str, metadata: &Value) -> Result<Option<Hash>> {
        if path.trim_matches('/').is_empty() {
            let hash = save_metadata(store, metadata)?;
            self.contents.metadata_hash = hash;
            return Ok(hash);
        }
        let mut node = self.contents.get(path)?.clone();
        let hash = save_metadata(store, metadata)?;
        node.set_metadata_hash(hash);
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        self.contents.put(&segments, node)?;
        Ok(hash)
    }

    /// persist the manifest under its own hash and move the latest tag to it
    pub fn save_contents(&self) -> Result<Hash> {
        let hash = self.get_hash();
        let dir = self.path.join(CONTENTS_DIR);
        fs::create_dir_all(&dir).with_path(&dir)?;
        fs::create_dir_all(&self.tmp_dir).with_path(&self.tmp_dir)?;

        // atomic write: temp -> fsync -> rename
        let tmp_path = self.tmp_dir.join(uuid::Uuid::new_v4().to_string());
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            tmp_file
                .write_all(&self.contents.to_json()?)
                .with_path(&tmp_path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
        }
        let final_path = self.contents_path(&hash);
        fs::rename(&tmp_path, &final_path).with_path(&final_path)?;

        write_tag(self, LATEST_TAG, &hash)?;
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::load_metadata;
    use serde_json::json;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("store")).unwrap();
        (dir, store)
    }

    fn h(byte: u8) -> Hash {
        Hash::from_bytes([byte; 32])
    }

    #[test]
    fn test_save_contents_names_file_by_hash() {
        let (_dir, store) = test_store();
        let mut pkg = store.create_package("alice", "data", false).unwrap();
        pkg.add(&["a".into()], vec![h(1)], TargetKind::File, "a.bin", "bin", None)
            .unwrap();
        let hash = pkg.save_contents().unwrap();

        assert_eq!(hash, pkg.get_hash());
        let path = pkg.contents_path(&hash);
        let reloaded = RootNode::from_json(&fs::read(path).unwrap()).unwrap();
        assert_eq!(&reloaded, pkg.contents());
        assert_eq!(crate::refs::read_tag(&pkg, LATEST_TAG).unwrap(), hash);
    }

    #[test]
    fn test_set_metadata_changes_hash() {
        let (_dir, store) = test_store();
        let mut pkg = store.create_package("alice", "data", false).unwrap();
        pkg.add(&["a".into()], vec![h(1)], TargetKind::File, "a.bin", "bin", None)
            .unwrap();
        let before = pkg.get_hash();

        let meta = json!({"owner": "finance"});
        let meta_hash = pkg.set_metadata(&store, "a", &meta).unwrap().unwrap();
        assert_ne!(pkg.get_hash(), before);
        assert_eq!(pkg.get("a").unwrap().metadata_hash(), Some(&meta_hash));
        assert_eq!(load_metadata(&store, &meta_hash).unwrap(), meta);

        pkg.set_metadata(&store, "", &meta).unwrap();
        assert_eq!(pkg.contents().metadata_hash, Some(meta_hash));
    }

    #[test]
    fn test_set_metadata_missing_node() {
        let (_dir, store) = test_store();
        let mut pkg = store.create_package("alice", "data", false).unwrap();
        let err = pkg.set_metadata(&store, "nope", &json!({"a": 1})).unwrap_err();
        assert!(matches!(err, crate::Error::NodeNotFound { .. }));
    }
}
