//! registry transfer
//!
//! packages move between a local store and a registry server over http. the registry
//! speaks json for manifests, tags and versions; fragments themselves go to signed
//! object-storage urls, gzipped, through a pool of worker threads.

pub mod client;
pub mod fragment;
pub mod install;
pub mod pool;
pub mod push;
pub mod requirements;
pub mod resolve;

pub use client::{RegistryClient, UploadUrls};
pub use install::{available_space, check_free_space, install, InstallOptions, InstallResult};
pub use pool::PoolOutcome;
pub use push::{push, PushOptions, PushResult};
pub use requirements::{install_requirements, parse_requirements, read_requirements, Requirement};
pub use resolve::{match_hash_prefix, resolve_hash, resolve_selector};
