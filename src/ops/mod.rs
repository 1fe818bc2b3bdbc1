//! high-level operations on local stores and registries

mod gc;
mod ls;
pub mod registry;

pub use gc::{prune, rm, PruneStats};
pub use ls::{inspect, ls};
pub use registry::{
    log, tag_add, tag_get, tag_list, tag_remove, version_add, version_get, version_list,
    LogEntry, TagEntry, VersionEntry,
};
