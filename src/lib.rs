//! quilt - content-addressed data packages
//!
//! a local store of versioned data packages, built from a directory and a `build.yml`
//! manifest, and moved to and from a registry server.
//!
//! # Core concepts
//!
//! - **Fragment**: an immutable object in the store's pool, named by its SHA-256
//! - **Content tree**: a package's manifest (root, groups, tables, files), whose
//!   canonical hash identifies the package instance
//! - **Table**: typed columnar data, stored as CBOR + zstd fragments
//! - **Tag / version**: named pointers to an instance; versions never move
//!
//! # Hash format
//!
//! tree hash = SHA256 over a depth-first walk where every count is a u32 big-endian and
//! every string is its u32 big-endian length followed by its utf-8 bytes:
//!
//! node = type | children (name | node, sorted) or fragment hashes (in order) | metadata_hash?
//!
//! # Example usage
//!
//! ```no_run
//! use quilt::{build, ops, PackageRef, Store};
//! use std::path::Path;
//!
//! let store = Store::open(Path::new("quilt_packages")).unwrap();
//! let pkg = PackageRef::parse("alice/weather").unwrap();
//!
//! // build a package from a directory of csv files
//! let outcome = build::build_from_path(&store, &pkg, Path::new("data"), &Default::default()).unwrap();
//! println!("{}", outcome.hash);
//!
//! // show what went in
//! print!("{}", ops::inspect(&store, &pkg, None).unwrap());
//! ```

mod error;
mod package;

pub mod build;
pub mod config;
pub mod hash;
pub mod object;
pub mod ops;
pub mod refs;
pub mod store;
pub mod transfer;
pub mod types;

pub use config::{Config, TransferConfig};
pub use error::{Error, ErrorKind, FragmentFailure, Result};
pub use hash::{hash_bytes, hash_file, hash_string, hash_tree, Hash};
pub use package::Package;
pub use store::{PackageListing, Store};
pub use types::{Node, PackageRef, RootNode, Selector};
